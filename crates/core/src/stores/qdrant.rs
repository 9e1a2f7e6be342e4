use crate::models::{CollectionInfo, Distance, ScoredPoint, VectorPoint};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Map, Value};
use url::Url;

/// Qdrant over its REST API.
pub struct QdrantStore {
    endpoint: Url,
    client: Client,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(StoreError::Request(format!(
                "qdrant endpoint must be an http(s) URL, got {endpoint}"
            )));
        }
        Ok(Self {
            endpoint,
            client: Client::new(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// `<endpoint>/collections/<name>/<tail...>` with every segment percent-encoded.
    fn collection_url(&self, name: &str, tail: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::Request(format!("qdrant endpoint cannot be a base URL: {}", self.endpoint))
            })?
            .pop_if_empty()
            .push("collections")
            .push(name)
            .extend(tail);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key.trim()),
            None => request,
        }
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("{status}: {body}"),
        })
    }
}

/// Qdrant returns ids as either unsigned integers or UUID strings.
fn point_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

fn parse_hits(parsed: &Value) -> Vec<ScoredPoint> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| ScoredPoint {
                    id: point_id(hit.get("id")),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    payload: hit
                        .pointer("/payload")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_else(Map::new),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_collection_info(parsed: &Value) -> CollectionInfo {
    let points_count = parsed
        .pointer("/result/points_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let vector_size = parsed
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize);
    CollectionInfo {
        points_count,
        vector_size,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let response = self
            .authorized(self.client.get(self.collection_url(name, &[])?))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::checked(response).await.map(|_| true),
        }
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let response = self
            .authorized(self.client.get(self.collection_url(name, &[])?))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotReady(name.to_string()));
        }

        let parsed: Value = Self::checked(response).await?.json().await?;
        Ok(parse_collection_info(&parsed))
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.delete(self.collection_url(name, &[])?))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.put(self.collection_url(name, &[])?))
            .json(&json!({
                "vectors": {
                    "size": dimension,
                    "distance": distance.as_qdrant(),
                }
            }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut url = self.collection_url(name, &["points"])?;
        url.query_pairs_mut().append_pair("wait", "true");

        let response = self
            .authorized(self.client.put(url))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let response = self
            .authorized(self.client.post(self.collection_url(name, &["points", "search"])?))
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed: Value = Self::checked(response).await?.json().await?;
        Ok(parse_hits(&parsed))
    }
}
