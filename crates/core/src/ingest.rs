use crate::chunking::build_chunks;
use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::traits::VectorIndex;
use crate::{DocumentFingerprint, IngestError, IngestionOptions, IngestionReport};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STATUS_SUCCESS: &str = "success";

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_document_fingerprint(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let checksum = digest_file(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path missing filename: {}", path.display()))
        })?;

    Ok(DocumentFingerprint {
        document_title: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}

/// Extracts, chunks, embeds and stores one PDF, replacing the whole collection.
pub struct DocumentIndexer {
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    options: IngestionOptions,
}

impl DocumentIndexer {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            extractor,
            embedder,
            index,
            options,
        }
    }

    pub async fn index(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let owned: PathBuf = path.to_path_buf();
        let (fingerprint, pages) = tokio::task::spawn_blocking(move || {
            let fingerprint = build_document_fingerprint(&owned)?;
            let pages = extractor.extract_pages(&owned)?;
            Ok::<_, IngestError>((fingerprint, pages))
        })
        .await
        .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))??;

        let chunks = build_chunks(&fingerprint.document_title, &pages, &self.options)?;
        tracing::info!(
            document = %fingerprint.document_title,
            pages = pages.len(),
            chunk_count = chunks.len(),
            "chunked document"
        );

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_documents(&texts).await?;

        self.index
            .recreate_collection(self.embedder.dimensions())
            .await?;
        self.index.index_vector_chunks(&chunks, &embeddings).await?;

        tracing::info!(
            document = %fingerprint.document_title,
            chunk_count = chunks.len(),
            "document indexed"
        );

        Ok(IngestionReport {
            document: fingerprint,
            chunks_created: chunks.len(),
            status: STATUS_SUCCESS.to_string(),
        })
    }
}
