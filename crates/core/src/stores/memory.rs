use crate::traits::VectorIndex;
use crate::{PdfChunk, RetrievedChunk, SearchError};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    vector_size: usize,
    points: Vec<(PdfChunk, Vec<f32>)>,
}

/// Process-local cosine index with the same replace-on-reindex semantics as Qdrant.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collection: RwLock<Option<Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.collection
            .read()
            .await
            .as_ref()
            .map(|collection| collection.points.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorStore {
    async fn recreate_collection(&self, vector_size: usize) -> Result<(), SearchError> {
        *self.collection.write().await = Some(Collection {
            vector_size,
            points: Vec::new(),
        });
        Ok(())
    }

    async fn index_vector_chunks(
        &self,
        chunks: &[PdfChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut guard = self.collection.write().await;
        let collection = guard
            .as_mut()
            .ok_or_else(|| SearchError::Request("collection has not been created".to_string()))?;

        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            if embedding.len() != collection.vector_size {
                return Err(SearchError::Request(format!(
                    "embedding dimension {} != {}",
                    embedding.len(),
                    collection.vector_size
                )));
            }
            collection.points.push((chunk.clone(), embedding.clone()));
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let guard = self.collection.read().await;
        let Some(collection) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let mut scored = collection
            .points
            .iter()
            .map(|(chunk, embedding)| (cosine_similarity(query_vector, embedding), chunk))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| RetrievedChunk {
                text: chunk.text.clone(),
                source: chunk.source.clone(),
                page: chunk.page,
                score,
            })
            .collect())
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum::<f64>();
    let left_norm = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let right_norm = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}
