//! Chunking: line-bounded chunks for source code, boundary-aware
//! character chunks for documentation.

use crate::error::{Error, Result};
use crate::llm::estimate_tokens;
use crate::types::{ChunkMetadata, CodeChunk, DocumentChunk, DocumentMetadata};

/// Split source content into line-bounded chunks of `chunk_size` lines with
/// `overlap` lines shared between neighbours. Line terminators are kept, so
/// the union of chunks reproduces the file.
pub fn chunk_code(
    content: &str,
    file_path: &str,
    language: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<CodeChunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk_size must be positive".into()));
    }
    if overlap >= chunk_size {
        return Err(Error::InvalidInput(format!(
            "chunk overlap ({overlap}) must be less than chunk size ({chunk_size})"
        )));
    }

    let lines: Vec<&str> = split_keep_ends(content);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0usize;

    while start < lines.len() {
        let end = (start + chunk_size).min(lines.len());
        let chunk_content: String = lines[start..end].concat();

        let metadata = ChunkMetadata {
            file_path: file_path.to_string(),
            language: language.to_string(),
            start_line: start + 1,
            end_line: end,
            chunk_index,
            total_chunks: 0,
            has_functions: false,
            has_imports: false,
            function_names: Vec::new(),
        };

        let token_count = estimate_tokens(&chunk_content);
        chunks.push(CodeChunk::new(chunk_content, metadata, token_count));
        chunk_index += 1;
        start += chunk_size - overlap;
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.metadata.total_chunks = total;
    }

    Ok(chunks)
}

/// Split text into lines keeping the terminators, so chunk contents
/// concatenate back to the original.
fn split_keep_ends(content: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'\n' {
            lines.push(&content[start..=i]);
            start = i + 1;
        }
    }
    if start < content.len() {
        lines.push(&content[start..]);
    }
    lines
}

/// Chunk a document by character budget with 25% overlap, preferring to cut
/// at a paragraph break past the midpoint, then at a sentence terminator.
/// Offsets are half-open byte offsets clamped to UTF-8 boundaries; chunks
/// whose trimmed content is empty are skipped.
pub fn chunk_document(
    content: &str,
    metadata: &DocumentMetadata,
    chunk_size: usize,
) -> Result<Vec<DocumentChunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("document chunk_size must be positive".into()));
    }

    let overlap = chunk_size / 4;
    let len = content.len();
    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut start = 0usize;

    while start < len {
        let mut end = floor_boundary(content, (start + chunk_size).min(len));

        if end < len {
            let midpoint = start + chunk_size / 2;
            if let Some(brk) = content[start..end].rfind("\n\n") {
                let brk = start + brk;
                if brk > midpoint {
                    end = brk + 2;
                }
            }
            if end == floor_boundary(content, (start + chunk_size).min(len)) {
                let sentence_break = [". ", ".\n", "! ", "? "]
                    .iter()
                    .filter_map(|sep| content[start..end].rfind(sep).map(|i| start + i))
                    .max();
                if let Some(brk) = sentence_break {
                    if brk > midpoint {
                        end = brk + 2;
                    }
                }
            }
        }

        let slice = content[start..end].trim();
        if !slice.is_empty() {
            chunks.push(DocumentChunk::new(
                slice.to_string(),
                metadata.clone(),
                start,
                end,
                chunk_index,
            ));
            chunk_index += 1;
        }

        start = if end < len { floor_boundary(content, end.saturating_sub(overlap)) } else { end };
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    Ok(chunks)
}

/// Largest valid UTF-8 boundary at or below `index`.
fn floor_boundary(content: &str, mut index: usize) -> usize {
    while index > 0 && !content.is_char_boundary(index) {
        index -= 1;
    }
    index
}
