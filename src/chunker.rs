//! Byte-budget text chunker for synthesis requests.
//!
//! The synthesis API rejects request bodies above a fixed byte size, so long
//! narration text is cut into ordered chunks, each of which encodes to at most
//! the configured budget. Cuts prefer sentence boundaries, then word
//! boundaries; a single word longer than the budget is the only case that gets
//! cut mid-word (on a `char` boundary, never mid-codepoint).

use crate::defaults;
use crate::error::{Result, VoxreelError};

/// Characters that end a sentence. The boundary stays with its sentence.
const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

/// Closing characters that stick to a preceding terminator (`."`, `?)`).
const TRAILING_CLOSERS: [char; 6] = ['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Largest UTF-8 encoding of a single `char`.
const MAX_CHAR_BYTES: usize = 4;

/// Configuration for [`split_text_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum UTF-8 byte length of a chunk.
    pub budget_bytes: usize,
    /// Chunks shorter than this are merged into a neighbour when possible.
    pub min_chunk_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            budget_bytes: defaults::SAFE_LIMIT_BYTES,
            min_chunk_bytes: defaults::MIN_CHUNK_BYTES,
        }
    }
}

impl ChunkerConfig {
    /// Creates a config with the given budget and the default minimum size.
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            ..Self::default()
        }
    }
}

/// Splits `text` into chunks of at most `budget` bytes.
pub fn split_text(text: &str, budget: usize) -> Result<Vec<String>> {
    split_text_with(text, &ChunkerConfig::with_budget(budget))
}

/// Splits `text` into ordered, trimmed, non-empty chunks within the budget.
///
/// Fails when the budget cannot hold an arbitrary character, or when nothing
/// survives validation (empty or whitespace-only input).
pub fn split_text_with(text: &str, config: &ChunkerConfig) -> Result<Vec<String>> {
    let budget = config.budget_bytes;
    if budget < MAX_CHAR_BYTES {
        return Err(VoxreelError::Chunking {
            message: format!("budget of {budget} bytes cannot hold a UTF-8 character"),
        });
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(VoxreelError::Chunking {
            message: "input text is empty".to_string(),
        });
    }

    if text.len() <= budget {
        return Ok(vec![text.to_string()]);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if sentence.len() > budget {
            close(&mut current, &mut chunks);
            let mut pieces = split_words(sentence, budget);
            // The tail of an oversized sentence may still share a chunk with
            // the sentences after it.
            if let Some(tail) = pieces.pop() {
                chunks.extend(pieces);
                current = tail;
            }
            continue;
        }

        if !append_within(&mut current, sentence, budget) {
            close(&mut current, &mut chunks);
            current.push_str(sentence);
        }
    }
    close(&mut current, &mut chunks);

    let chunks = merge_fragments(chunks, config);
    if chunks.is_empty() {
        return Err(VoxreelError::Chunking {
            message: "no chunks survived validation".to_string(),
        });
    }

    tracing::debug!(
        chunks = chunks.len(),
        bytes = text.len(),
        budget,
        "split text into chunks"
    );
    Ok(chunks)
}

/// Iterates over sentences, each ending with its terminator (plus any run of
/// further terminators and closing quotes/brackets).
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }

        let mut chars = rest.char_indices().peekable();
        let mut end = rest.len();
        while let Some((idx, ch)) = chars.next() {
            if !SENTENCE_TERMINATORS.contains(&ch) {
                continue;
            }
            end = idx + ch.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if SENTENCE_TERMINATORS.contains(&next) || TRAILING_CLOSERS.contains(&next) {
                    end = next_idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            break;
        }

        let (sentence, remainder) = rest.split_at(end);
        rest = remainder;
        Some(sentence)
    })
}

/// Greedy word packing for a sentence that exceeds the budget on its own.
fn split_words(sentence: &str, budget: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        if word.len() > budget {
            close(&mut current, &mut pieces);
            let mut parts = split_chars(word, budget);
            if let Some(tail) = parts.pop() {
                pieces.extend(parts);
                current = tail;
            }
            continue;
        }

        if !append_within(&mut current, word, budget) {
            close(&mut current, &mut pieces);
            current.push_str(word);
        }
    }
    close(&mut current, &mut pieces);

    pieces
}

/// Last resort for a single word longer than the budget.
fn split_chars(word: &str, budget: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for ch in word.chars() {
        if current.len() + ch.len_utf8() > budget {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Appends `piece` to `current` with a single-space join if the result stays
/// within the budget. Returns false (leaving `current` untouched) otherwise.
fn append_within(current: &mut String, piece: &str, budget: usize) -> bool {
    if current.is_empty() {
        if piece.len() > budget {
            return false;
        }
        current.push_str(piece);
        return true;
    }

    if current.len() + 1 + piece.len() > budget {
        return false;
    }
    current.push(' ');
    current.push_str(piece);
    true
}

fn close(current: &mut String, chunks: &mut Vec<String>) {
    let chunk = current.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
    current.clear();
}

/// Folds chunks below the minimum size into a neighbour.
///
/// A short chunk joins the previous chunk if that fits, otherwise it is
/// carried forward and prepended to the next one. A fragment that fits
/// nowhere is kept as its own chunk if it carries any alphanumeric content,
/// and dropped otherwise.
fn merge_fragments(chunks: Vec<String>, config: &ChunkerConfig) -> Vec<String> {
    let budget = config.budget_bytes;
    let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
    let mut carry: Option<String> = None;

    for chunk in chunks {
        let chunk = match carry.take() {
            Some(prefix) if prefix.len() + 1 + chunk.len() <= budget => {
                format!("{prefix} {chunk}")
            }
            Some(prefix) => {
                keep_or_drop(prefix, &mut merged);
                chunk
            }
            None => chunk,
        };

        if chunk.len() >= config.min_chunk_bytes {
            merged.push(chunk);
            continue;
        }

        if let Some(previous) = merged.last_mut()
            && append_within(previous, &chunk, budget)
        {
            continue;
        }
        carry = Some(chunk);
    }

    if let Some(rest) = carry {
        keep_or_drop(rest, &mut merged);
    }

    merged
}

fn keep_or_drop(fragment: String, merged: &mut Vec<String>) {
    if fragment.chars().any(char::is_alphanumeric) {
        merged.push(fragment);
    } else {
        tracing::debug!(fragment = %fragment, "dropping punctuation-only fragment");
    }
}
