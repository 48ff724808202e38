//! # Text Chunking
//!
//! Splits raw document text into overlapping segments suitable for
//! embedding. Splitting prefers semantic boundaries in the order
//! paragraph break, line break, space, and finally a hard character cut,
//! and repeats `overlap` characters of trailing context at the start of
//! each following segment so meaning survives the boundary.
//!
//! The splitter is lossless: the first segment plus every later segment
//! with its leading `overlap` characters removed concatenates back to the
//! original text exactly.

use thiserror::Error;
use tracing::warn;

/// Default target segment size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 6000;

/// Default overlap carried between consecutive segments.
pub const DEFAULT_CHUNK_OVERLAP: usize = 1000;

#[derive(Error, Debug, PartialEq)]
pub enum ChunkError {
    #[error("Text content is empty or only whitespace")]
    EmptyContent,
    #[error("Chunk overlap ({overlap}) must be smaller than the chunk size ({max_size})")]
    OverlapTooLarge { max_size: usize, overlap: usize },
}

/// Splits `text` into segments of at most `max_size` characters with
/// `overlap` characters of carryover.
///
/// A single separator-free run longer than `max_size` is emitted whole as
/// an oversized segment rather than being cut mid-token.
pub fn split(text: &str, max_size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyContent);
    }
    if max_size == 0 || overlap >= max_size {
        return Err(ChunkError::OverlapTooLarge { max_size, overlap });
    }

    // Work in char space so multi-byte input can never split a code point.
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut segments = Vec::new();
    let mut seg_start = 0usize;

    loop {
        let hard_limit = seg_start + max_size;
        if hard_limit >= total {
            segments.push(chars[seg_start..total].iter().collect());
            break;
        }

        // The break must leave more than `overlap` characters in this
        // segment, otherwise the next segment would not advance.
        let min_break = seg_start + overlap + 1;
        let break_at = match find_break(&chars, min_break, hard_limit) {
            Some(at) => at,
            None => {
                // No separator fits in the window: the run is indivisible,
                // so carry it whole past the size limit.
                let at = next_break_after(&chars, hard_limit).unwrap_or(total);
                warn!(
                    segment_chars = at - seg_start,
                    max_size, "Indivisible run exceeds chunk size; emitting oversized segment"
                );
                at
            }
        };

        segments.push(chars[seg_start..break_at].iter().collect());
        if break_at >= total {
            break;
        }
        seg_start = break_at - overlap;
    }

    Ok(segments)
}

/// Finds the best break position in `(min_break..=hard_limit)`, preferring
/// the latest paragraph break, then the latest line break, then the latest
/// space. A break at `i` means the segment ends at char index `i`
/// (exclusive), keeping the separator in the earlier segment.
fn find_break(chars: &[char], min_break: usize, hard_limit: usize) -> Option<usize> {
    let mut newline_at = None;
    let mut space_at = None;

    for i in (min_break..=hard_limit).rev() {
        match chars[i - 1] {
            '\n' => {
                if i >= 2 && chars[i - 2] == '\n' {
                    return Some(i);
                }
                newline_at.get_or_insert(i);
            }
            ' ' => {
                space_at.get_or_insert(i);
            }
            _ => {}
        }
    }

    newline_at.or(space_at)
}

/// First break position strictly after `from`, or `None` if the rest of the
/// text is a single unbroken run.
fn next_break_after(chars: &[char], from: usize) -> Option<usize> {
    (from + 1..=chars.len()).find(|&i| matches!(chars[i - 1], '\n' | ' '))
}

/// Rebuilds the original text from `split` output. The inverse of the
/// overlap carryover; used by callers and tests to verify losslessness.
pub fn reconstruct(segments: &[String], overlap: usize) -> String {
    let mut text = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            text.push_str(segment);
        } else {
            text.extend(segment.chars().skip(overlap));
        }
    }
    text
}
