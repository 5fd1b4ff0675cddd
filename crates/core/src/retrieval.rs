use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{RetrievedChunk, SearchError};
use std::sync::Arc;

pub const DEFAULT_TOP_K: usize = 4;

/// Nearest-neighbour lookup over whatever collection is currently active.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, SearchError> {
        let query_vector = self.embedder.embed_query(query).await?;
        let mut hits = self.index.search_vector(&query_vector, self.top_k).await?;
        hits.truncate(self.top_k);
        tracing::debug!(hits = hits.len(), top_k = self.top_k, "retrieved context");
        Ok(hits)
    }
}

/// Joins chunk texts in rank order with blank lines between them.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryVectorStore;
    use crate::PdfChunk;

    #[tokio::test]
    async fn retrieval_is_bounded_by_top_k() {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new());
        store.recreate_collection(embedder.dimensions()).await.expect("create");

        let chunks = (0..10)
            .map(|index| PdfChunk {
                chunk_index: index,
                source: "doc.pdf".to_string(),
                page: 1,
                text: format!("hydraulic section {index}"),
            })
            .collect::<Vec<_>>();
        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let vectors = embedder.embed_documents(&texts).await.expect("embed");
        store.index_vector_chunks(&chunks, &vectors).await.expect("index");

        let retriever = Retriever::new(embedder, store, DEFAULT_TOP_K);
        let hits = retriever.retrieve("hydraulic").await.expect("retrieve");
        assert_eq!(hits.len(), DEFAULT_TOP_K);
    }

    #[tokio::test]
    async fn empty_collection_returns_no_chunks() {
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            DEFAULT_TOP_K,
        );
        assert!(retriever.retrieve("anything").await.expect("retrieve").is_empty());
    }

    #[test]
    fn context_joins_with_blank_lines() {
        let chunk = |text: &str| RetrievedChunk {
            text: text.to_string(),
            source: String::new(),
            page: 1,
            score: 0.0,
        };
        assert_eq!(format_context(&[chunk("one"), chunk("two")]), "one\n\ntwo");
        assert_eq!(format_context(&[]), "");
    }
}
