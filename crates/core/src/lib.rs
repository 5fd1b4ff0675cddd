pub mod chunking;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, split_text, ChunkingConfig};
pub use conversation::ConversationStore;
pub use embeddings::{CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ChatError, IngestError, SearchError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{ChatModel, OpenAiChatModel, TokenStream};
pub use ingest::{DocumentIndexer, STATUS_SUCCESS};
pub use models::{
    ChatMessage, DocumentFingerprint, IngestionOptions, IngestionReport, PdfChunk, RetrievedChunk,
    Role, Turn,
};
pub use orchestrator::{AnswerStream, ChatOrchestrator, StreamEvent};
pub use prompt::{assemble_messages, FALLBACK_ANSWER};
pub use retrieval::{format_context, Retriever, DEFAULT_TOP_K};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::VectorIndex;
