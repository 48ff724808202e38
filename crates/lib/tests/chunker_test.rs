//! Splitting behavior and the losslessness guarantee of the chunker.

mod common;

use studyrag::chunker::{reconstruct, split, ChunkError};

/// Builds text of exactly `chars` characters out of space-separated words.
fn words_of_len(chars: usize) -> String {
    let mut text = String::new();
    let mut word = 0usize;
    while text.chars().count() < chars {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&format!("word{word}"));
        word += 1;
    }
    text.chars().take(chars).collect()
}

#[test]
fn test_short_text_is_a_single_segment() {
    common::setup_tracing();
    let text = "A short note that fits in one chunk.";
    let segments = split(text, 6000, 1000).unwrap();
    assert_eq!(segments, vec![text.to_string()]);
}

#[test]
fn test_empty_and_whitespace_content_is_rejected() {
    assert_eq!(split("", 6000, 1000), Err(ChunkError::EmptyContent));
    assert_eq!(split("   \n\t ", 6000, 1000), Err(ChunkError::EmptyContent));
}

#[test]
fn test_overlap_must_be_smaller_than_chunk_size() {
    assert_eq!(
        split("some text", 100, 100),
        Err(ChunkError::OverlapTooLarge {
            max_size: 100,
            overlap: 100
        })
    );
    assert!(split("some text", 100, 99).is_ok());
}

#[test]
fn test_thirteen_thousand_chars_make_three_chunks() {
    common::setup_tracing();
    let text = words_of_len(13_000);
    let segments = split(&text, 6000, 1000).unwrap();

    assert_eq!(segments.len(), 3);
    for segment in &segments {
        assert!(segment.chars().count() <= 6000);
    }
    // Every later segment repeats the previous segment's tail.
    for window in segments.windows(2) {
        let prev_tail: String = window[0]
            .chars()
            .skip(window[0].chars().count() - 1000)
            .collect();
        let next_head: String = window[1].chars().take(1000).collect();
        assert_eq!(prev_tail, next_head);
    }
    assert_eq!(reconstruct(&segments, 1000), text);
}

#[test]
fn test_prefers_paragraph_breaks_over_spaces() {
    let mut text = words_of_len(90);
    text.push_str("\n\n");
    text.push_str(&words_of_len(90));
    let segments = split(&text, 100, 10).unwrap();

    // The first segment ends exactly at the paragraph break, separator kept.
    assert!(segments[0].ends_with("\n\n"));
}

#[test]
fn test_oversized_indivisible_run_is_emitted_whole() {
    common::setup_tracing();
    // 250 separator-free characters inside normal text, with a 100-char
    // limit: the run must not be cut mid-token.
    let run: String = "x".repeat(250);
    let text = format!("{} {} {}", words_of_len(80), run, words_of_len(80));
    let segments = split(&text, 100, 10).unwrap();

    assert!(
        segments.iter().any(|s| s.contains(&run)),
        "the indivisible run was cut: {segments:?}"
    );
    assert_eq!(reconstruct(&segments, 10), text);
}

#[test]
fn test_reconstruction_with_multibyte_characters() {
    let unit = "héllo wörld żółć 漢字テスト ";
    let text = unit.repeat(400);
    let segments = split(&text, 500, 100).unwrap();

    assert!(segments.len() > 1);
    assert_eq!(reconstruct(&segments, 100), text);
}

#[test]
fn test_reconstruction_over_assorted_shapes() {
    let samples = [
        words_of_len(6001),
        words_of_len(11_999),
        format!("{}\n\n{}\n{}", words_of_len(40), words_of_len(5000), words_of_len(7000)),
        "a ".repeat(10_000),
    ];
    for text in samples {
        let segments = split(&text, 6000, 1000).unwrap();
        assert_eq!(reconstruct(&segments, 1000), text);
    }
}
