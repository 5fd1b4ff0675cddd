use crate::traits::VectorIndex;
use crate::{PdfChunk, RetrievedChunk, SearchError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

const UPSERT_BATCH_SIZE: usize = 256;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    api_key: Option<String>,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            api_key: None,
            vector_size,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, SearchError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    pub async fn collection_exists(&self) -> Result<bool, SearchError> {
        let response = self
            .authorize(self.client.get(format!("{}/exists", self.collection_url())))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/exists")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn recreate_collection(&self, vector_size: usize) -> Result<(), SearchError> {
        if self.vector_size != vector_size {
            return Err(SearchError::Request(format!(
                "configured vector size {} does not match requested {}",
                self.vector_size, vector_size
            )));
        }

        if self.collection_exists().await? {
            let response = self
                .authorize(self.client.delete(self.collection_url()))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }
            tracing::info!(collection = %self.collection, "dropped existing collection");
        }

        let response = self
            .authorize(self.client.put(self.collection_url()))
            .json(&json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        tracing::info!(collection = %self.collection, vector_size, "created collection");
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

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": embedding,
                    "payload": {
                        "page_content": chunk.text,
                        "source": chunk.source,
                        "page": chunk.page,
                        "chunk_index": chunk.chunk_index,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            let response = self
                .authorize(
                    self.client
                        .put(format!("{}/points?wait=true", self.collection_url())),
                )
                .json(&json!({ "points": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/points/search", self.collection_url())),
            )
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::warn!(collection = %self.collection, "collection missing; nothing indexed yet");
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_search_hits(&parsed))
    }
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn parse_search_hits(parsed: &Value) -> Vec<RetrievedChunk> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .map(|hit| RetrievedChunk {
            text: hit
                .pointer("/payload/page_content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            source: hit
                .pointer("/payload/source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page: hit
                .pointer("/payload/page")
                .and_then(Value::as_u64)
                .and_then(|page| u32::try_from(page).ok())
                .unwrap_or_default(),
            score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect()
}
