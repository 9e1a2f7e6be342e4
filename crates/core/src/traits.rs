use crate::models::{CollectionInfo, Distance, ScoredPoint, VectorPoint};
use crate::StoreError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, StoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<(), StoreError>;

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<(), StoreError>;

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, StoreError>;
}
