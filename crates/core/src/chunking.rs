use crate::error::ConfigError;
use crate::extractor::ExtractedDocument;
use crate::models::Chunk;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Window sizes in characters (Unicode scalar values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 50,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits `text` into windows of `chunk_size` characters whose starts are
/// `chunk_size - chunk_overlap` apart. Only the last window may be shorter.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += config.stride();
    }

    pieces
}

pub fn build_chunks(
    document_id: &str,
    text: &str,
    config: ChunkingConfig,
    global_index: u64,
) -> (Vec<Chunk>, u64) {
    let mut cursor = global_index;
    let chunks = split_text(text, config)
        .into_iter()
        .map(|piece| {
            let chunk = Chunk {
                chunk_id: make_chunk_id(document_id, cursor, &piece),
                document_id: document_id.to_string(),
                sequence_index: cursor,
                text: piece,
            };
            cursor = cursor.saturating_add(1);
            chunk
        })
        .collect();

    (chunks, cursor)
}

/// Chunks each document separately; `sequence_index` runs across all of them.
pub fn chunk_documents(documents: &[ExtractedDocument], config: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for document in documents {
        let (document_chunks, next_cursor) =
            build_chunks(&document.document_id, &document.text(), config, cursor);
        cursor = next_cursor;
        chunks.extend(document_chunks);
    }

    chunks
}

/// Rebuilds source text from chunks in sequence order, dropping the overlap
/// shared by consecutive chunks of the same document. Non-adjacent chunks are
/// separated by a newline.
pub fn stitch_chunks(chunks: &[Chunk], chunk_overlap: usize) -> String {
    let mut text = String::new();
    let mut previous: Option<&Chunk> = None;

    for chunk in chunks {
        let continues_previous = previous.is_some_and(|prev| {
            prev.document_id == chunk.document_id
                && prev.sequence_index.saturating_add(1) == chunk.sequence_index
        });

        if continues_previous {
            text.extend(chunk.text.chars().skip(chunk_overlap));
        } else {
            if previous.is_some() {
                text.push('\n');
            }
            text.push_str(&chunk.text);
        }
        previous = Some(chunk);
    }

    text
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageText;
    use proptest::prelude::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig::new(size, overlap).expect("valid chunking config")
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(ChunkingConfig::new(10, 10).is_err());
        assert!(ChunkingConfig::new(0, 0).is_err());
        assert!(ChunkingConfig::new(10, 9).is_ok());
    }

    #[test]
    fn text_of_exactly_chunk_size_is_one_chunk() {
        let pieces = split_text("abcdefghij", config(10, 3));
        assert_eq!(pieces, vec!["abcdefghij".to_string()]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_text("", config(10, 3)).is_empty());
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let pieces = split_text("abcdefghijklmnop", config(6, 2));
        assert_eq!(pieces, vec!["abcdef", "efghij", "ijklmn", "mnop"]);
    }

    #[test]
    fn multibyte_text_is_split_on_characters() {
        let pieces = split_text("ééééé", config(2, 1));
        assert_eq!(pieces, vec!["éé", "éé", "éé", "éé"]);
    }

    #[test]
    fn sequence_index_runs_across_documents() {
        let documents = vec![
            ExtractedDocument {
                document_id: "a.pdf".to_string(),
                pages: vec![PageText {
                    number: 1,
                    text: "0123456789".to_string(),
                }],
            },
            ExtractedDocument {
                document_id: "b.pdf".to_string(),
                pages: vec![PageText {
                    number: 1,
                    text: "abcde".to_string(),
                }],
            },
        ];

        let chunks = chunk_documents(&documents, config(6, 2));

        let indexes: Vec<u64> = chunks.iter().map(|chunk| chunk.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(chunks[1].document_id, "a.pdf");
        assert_eq!(chunks[2].document_id, "b.pdf");
        assert_eq!(chunks[2].text, "abcde");
    }

    #[test]
    fn stitching_separates_documents() {
        let (mut chunks, next) = build_chunks("a", "0123456789", config(6, 2), 0);
        let (other, _) = build_chunks("b", "xyz", config(6, 2), next);
        chunks.extend(other);

        assert_eq!(stitch_chunks(&chunks, 2), "0123456789\nxyz");
    }

    proptest! {
        #[test]
        fn chunking_is_deterministic(
            text in "\\PC{0,300}",
            size in 1usize..40,
            overlap_seed in 0usize..40,
        ) {
            let cfg = config(size, overlap_seed % size);
            let first = build_chunks("doc", &text, cfg, 0).0;
            let second = build_chunks("doc", &text, cfg, 0).0;
            prop_assert_eq!(first, second);
        }

        #[test]
        fn stitched_chunks_reconstruct_the_text(
            text in "\\PC{0,300}",
            size in 1usize..40,
            overlap_seed in 0usize..40,
        ) {
            let cfg = config(size, overlap_seed % size);
            let (chunks, _) = build_chunks("doc", &text, cfg, 0);

            for chunk in chunks.iter().take(chunks.len().saturating_sub(1)) {
                prop_assert_eq!(chunk.text.chars().count(), size);
            }
            prop_assert_eq!(stitch_chunks(&chunks, cfg.chunk_overlap), text);
        }
    }
}
