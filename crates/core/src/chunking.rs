use crate::error::IngestError;
use crate::models::{DocumentRecord, IngestionOptions, PdfChunk};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            min_chars: value.min_chunk_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than window {}",
                self.overlap_chars, self.max_chars
            )));
        }
        if self.min_chars > self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "minimum chunk size {} exceeds window {}",
                self.min_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Packs blank-line separated paragraphs into windows of at most `max_chars`
/// characters, then splits any oversized window with `overlap_chars` of
/// carried-over context.
pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = split_paragraphs(text);

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current.push_str(&paragraph);
            continue;
        }

        if char_len(&current) + char_len(&paragraph) + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::take(&mut current));
            current.push_str(&paragraph);
        }
    }

    if !current.is_empty() {
        packed.push(current);
    }

    let mut windows = Vec::new();
    for chunk in packed {
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= config.max_chars {
            windows.push(chunk);
            continue;
        }

        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            windows.push(piece.trim().to_string());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    windows
        .into_iter()
        .filter(|chunk| char_len(chunk) >= config.min_chars)
        .collect()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(normalize_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(normalize_whitespace(&current.join(" ")));
    }

    paragraphs.retain(|paragraph| !paragraph.is_empty());
    paragraphs
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Builds the chunks of one page, numbering them from `first_ordinal`.
/// Returns the chunks and the next free ordinal.
pub fn build_chunks(
    document: &DocumentRecord,
    page: u32,
    page_text: &str,
    options: &IngestionOptions,
    first_ordinal: u64,
) -> Result<(Vec<PdfChunk>, u64), IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;

    let mut chunks = Vec::new();
    let mut cursor = first_ordinal;

    for text in chunk_by_paragraph(page_text, config) {
        chunks.push(PdfChunk {
            chunk_id: make_chunk_id(&document.document_id, cursor, &text),
            document_id: document.document_id.clone(),
            filename: document.filename.clone(),
            page,
            ordinal: cursor,
            text,
        });
        cursor = cursor.saturating_add(1);
    }

    Ok((chunks, cursor))
}

fn make_chunk_id(document_id: &str, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
