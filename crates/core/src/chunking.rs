use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{IngestionOptions, PdfChunk};
use std::collections::VecDeque;

/// Separators tried in order, coarsest first. The empty separator splits by character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits `text` into chunks of at most `chunk_size` characters, carrying up to
/// `chunk_overlap` characters of the previous chunk into the next one.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let finer = separators.get(position + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut pending = Vec::new();

    for piece in pieces {
        if char_len(&piece) <= config.chunk_size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, separator, config));
            pending.clear();
        }

        if finer.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, finer, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, separator, config));
    }

    chunks
}

fn merge_pieces(pieces: &[String], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        let joined_len = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { separator_len };

        if !window.is_empty() && total + piece_len + joined_len(&window) > config.chunk_size {
            push_joined(&mut chunks, &window, separator);

            while total > config.chunk_overlap
                || (total > 0 && total + piece_len + joined_len(&window) > config.chunk_size)
            {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total = total.saturating_sub(char_len(front) + joined_len(&window));
            }
        }

        total += piece_len + joined_len(&window);
        window.push_back(piece);
    }

    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Chunks every page in document order, numbering chunks across the whole document.
pub fn build_chunks(
    source: &str,
    pages: &[PageText],
    options: &IngestionOptions,
) -> Result<Vec<PdfChunk>, IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        for text in split_text(&page.text, config) {
            chunks.push(PdfChunk {
                chunk_index: cursor,
                source: source.to_string(),
                page: page.number,
                text,
            });
            cursor = cursor.saturating_add(1);
        }
    }

    Ok(chunks)
}
