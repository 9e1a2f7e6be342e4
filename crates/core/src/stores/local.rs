use crate::models::{CollectionInfo, Distance, ScoredPoint, VectorPoint};
use crate::traits::VectorStore;
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const COLLECTIONS_FILE: &str = "collections.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalCollection {
    dimension: usize,
    distance: Distance,
    points: Vec<VectorPoint>,
}

/// In-process vector store with brute-force search.
///
/// When opened on a directory, every mutation is flushed to
/// `<dir>/collections.json`, so a later process sees the same collections.
#[derive(Debug, Default)]
pub struct LocalStore {
    path: Option<PathBuf>,
    collections: Mutex<BTreeMap<String, LocalCollection>>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let file = dir.join(COLLECTIONS_FILE);
        let collections = if file.exists() {
            serde_json::from_str(&fs::read_to_string(&file)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(file),
            collections: Mutex::new(collections),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, LocalCollection>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Request("local store lock poisoned".to_string()))
    }

    fn persist(&self, collections: &BTreeMap<String, LocalCollection>) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string(collections)?)?;
            debug!(path = %path.display(), "flushed local store");
        }
        Ok(())
    }
}

fn score(distance: Distance, left: &[f32], right: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => {
            let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
            let norm = |vector: &[f32]| vector.iter().map(|value| value * value).sum::<f32>().sqrt();
            let denominator = norm(left) * norm(right);
            if denominator > 0.0 {
                dot / denominator
            } else {
                0.0
            }
        }
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(name))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let collections = self.lock()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::NotReady(name.to_string()))?;
        Ok(CollectionInfo {
            points_count: collection.points.len() as u64,
            vector_size: Some(collection.dimension),
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        collections.remove(name);
        self.persist(&collections)
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        if collections.contains_key(name) {
            return Err(StoreError::Request(format!(
                "collection '{name}' already exists"
            )));
        }
        collections.insert(
            name.to_string(),
            LocalCollection {
                dimension,
                distance,
                points: Vec::new(),
            },
        );
        self.persist(&collections)
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<(), StoreError> {
        let mut collections = self.lock()?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::NotReady(name.to_string()))?;

        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != collection.dimension)
        {
            return Err(StoreError::DimensionMismatch {
                expected: collection.dimension,
                actual: point.vector.len(),
            });
        }

        let mut positions: HashMap<String, usize> = collection
            .points
            .iter()
            .enumerate()
            .map(|(position, point)| (point.id.clone(), position))
            .collect();
        for point in points {
            match positions.get(&point.id) {
                Some(&position) => collection.points[position] = point,
                None => {
                    positions.insert(point.id.clone(), collection.points.len());
                    collection.points.push(point);
                }
            }
        }
        self.persist(&collections)
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let collections = self.lock()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::NotReady(name.to_string()))?;

        if vector.len() != collection.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: collection.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .iter()
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: score(collection.distance, vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();
        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
