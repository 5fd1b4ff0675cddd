use crate::{PdfChunk, RetrievedChunk, SearchError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Drops the collection if present and creates an empty one sized for `vector_size`.
    async fn recreate_collection(&self, vector_size: usize) -> Result<(), SearchError>;

    async fn index_vector_chunks(
        &self,
        chunks: &[PdfChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;
}
