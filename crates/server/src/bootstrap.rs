use anyhow::Context;
use pdf_chat_core::{
    CharacterNgramEmbedder, ChatOrchestrator, ConversationStore, DocumentIndexer, Embedder,
    InMemoryVectorStore, LopdfExtractor, OpenAiChatModel, OpenAiEmbedder, QdrantStore, Retriever,
    VectorIndex,
};
use std::sync::Arc;

use crate::config::{AppConfig, EmbeddingBackend, VectorBackend};
use crate::gateway::{AppState, RateLimits, UploadSettings};

/// Embedder and vector index shared by ingestion and retrieval.
struct Backends {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

fn build_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    let embedder: Arc<dyn Embedder> = match config.embedding_provider {
        EmbeddingBackend::Openai => Arc::new(
            OpenAiEmbedder::new(
                config.llm_base_url.as_str(),
                config.llm_api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
                config.request_timeout,
            )
            .context("building embedding client")?,
        ),
        EmbeddingBackend::Local => Arc::new(CharacterNgramEmbedder {
            dimensions: config.embedding_dimensions,
        }),
    };

    let index: Arc<dyn VectorIndex> = match config.vector_store {
        VectorBackend::Qdrant => Arc::new(
            QdrantStore::new(
                config.qdrant_url.as_str(),
                config.collection_name.clone(),
                config.embedding_dimensions,
            )
            .with_api_key(config.qdrant_api_key.clone())
            .with_timeout(config.request_timeout)
            .context("building qdrant client")?,
        ),
        VectorBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };

    tracing::info!(
        embedding = ?config.embedding_provider,
        vector_store = ?config.vector_store,
        dimensions = config.embedding_dimensions,
        "backends configured"
    );

    Ok(Backends { embedder, index })
}

fn indexer_for(config: &AppConfig, backends: &Backends) -> DocumentIndexer {
    DocumentIndexer::new(
        Arc::new(LopdfExtractor),
        Arc::clone(&backends.embedder),
        Arc::clone(&backends.index),
        config.ingestion.clone(),
    )
}

/// Indexer alone, for one-shot ingestion from the command line.
pub fn build_indexer(config: &AppConfig) -> anyhow::Result<DocumentIndexer> {
    let backends = build_backends(config)?;
    Ok(indexer_for(config, &backends))
}

pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let api_key = config.require_api_key()?;
    let backends = build_backends(config)?;

    let model = OpenAiChatModel::new(
        config.llm_base_url.as_str(),
        config.llm_api_key.clone(),
        config.chat_model.clone(),
        config.temperature,
        config.request_timeout,
    )
    .context("building chat client")?;

    let retriever = Retriever::new(
        Arc::clone(&backends.embedder),
        Arc::clone(&backends.index),
        config.top_k,
    );
    let conversations = Arc::new(ConversationStore::new(config.max_turns_per_session));
    let orchestrator = ChatOrchestrator::new(retriever, Arc::new(model), conversations);

    Ok(AppState {
        indexer: Arc::new(indexer_for(config, &backends)),
        orchestrator: Arc::new(orchestrator),
        limits: Arc::new(RateLimits::new(config.rate_limits)),
        api_key: Arc::from(api_key),
        uploads: Arc::new(UploadSettings {
            dir: config.upload_dir.clone(),
            max_file_size: config.max_file_size,
        }),
    })
}
