use crate::error::IngestError;
use crate::models::{Chunk, PageRecord};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Separators tried in order; the empty separator splits into characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, IngestError> {
        let config = Self {
            max_chars,
            overlap_chars,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 || self.overlap_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk size ({}) and overlap ({}) must both be positive",
                self.max_chars, self.overlap_chars
            )));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` into pieces of at most `max_chars` characters, preferring
/// paragraph, then line, then word boundaries before falling back to raw characters.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut separator = separators.last().copied().unwrap_or("");
    let mut finer: &[&str] = &[];
    for (position, &candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = candidate;
            break;
        }
        if text.contains(candidate) {
            separator = candidate;
            finer = &separators[position + 1..];
            break;
        }
    }

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(index, character)| &text[index..index + character.len_utf8()])
            .collect()
    } else {
        split_keeping_separator(text, separator)
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in splits {
        if char_len(piece) < config.max_chars {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_splits(&fitting, config));
            fitting.clear();
        }

        if finer.is_empty() {
            push_trimmed(&mut chunks, piece);
        } else {
            chunks.extend(split_recursive(piece, finer, config));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_splits(&fitting, config));
    }

    chunks
}

/// Splits before every occurrence of `separator`, which stays at the start of
/// the following piece. Concatenating the pieces gives back `text`.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily concatenates adjacent pieces up to `max_chars`, seeding each new
/// chunk with the tail of the previous one up to `overlap_chars`.
fn merge_splits(splits: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in splits {
        let piece_len = char_len(piece);

        if total + piece_len > config.max_chars {
            if total > config.max_chars {
                warn!(
                    size = total,
                    max = config.max_chars,
                    "created a chunk longer than the configured maximum"
                );
            }

            if !window.is_empty() {
                push_trimmed(&mut chunks, &window.iter().copied().collect::<String>());

                while total > config.overlap_chars
                    || (total > 0 && total + piece_len > config.max_chars)
                {
                    let Some(removed) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(removed);
                }
            }
        }

        window.push_back(piece);
        total += piece_len;
    }

    push_trimmed(&mut chunks, &window.iter().copied().collect::<String>());
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Chunks every page, copying the page's metadata onto each chunk.
pub fn chunk_pages(pages: &[PageRecord], config: ChunkingConfig) -> Vec<Chunk> {
    let chunks: Vec<Chunk> = pages
        .iter()
        .flat_map(|page| {
            split_text(&page.page_content, config)
                .into_iter()
                .map(|text| Chunk {
                    text,
                    metadata: page.metadata.clone(),
                })
        })
        .collect();

    debug!(pages = pages.len(), chunks = chunks.len(), "chunked pages");
    chunks
}
