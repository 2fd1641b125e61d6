//! Document splitting: overlapping sequential chunks and disjoint branches.
//!
//! Both functions operate on character counts, not bytes, so multi-byte
//! text never splits inside a code point.

use crate::error::{EngineError, EngineResult};

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// The first window starts at 0; each subsequent window starts `overlap`
/// characters before the previous window's end. The last window may be
/// shorter. Empty text yields no chunks.
///
/// # Errors
///
/// `Configuration` if `chunk_size` is zero or does not exceed `overlap`
/// (the window would never advance).
pub fn split_sequential(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> EngineResult<Vec<String>> {
    if chunk_size == 0 {
        return Err(EngineError::Configuration(
            "chunk_size must be at least 1".into(),
        ));
    }
    if chunk_size <= overlap {
        return Err(EngineError::Configuration(format!(
            "chunk_size ({chunk_size}) must exceed overlap ({overlap})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    Ok(chunks)
}

/// Split `text` into up to `branch_factor` contiguous, disjoint segments.
///
/// Segments are `ceil(len / branch_factor)` characters long except possibly
/// the last; very short documents yield fewer segments than requested.
///
/// # Errors
///
/// `Configuration` if `branch_factor` is zero.
pub fn split_branches(text: &str, branch_factor: usize) -> EngineResult<Vec<String>> {
    if branch_factor == 0 {
        return Err(EngineError::Configuration(
            "branch_factor must be at least 1".into(),
        ));
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let segment_len = chars.len().div_ceil(branch_factor);
    Ok(chars
        .chunks(segment_len)
        .map(|segment| segment.iter().collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_sequential(&"a".repeat(1000), 1000, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1000);
    }

    #[test]
    fn window_advances_by_chunk_size_minus_overlap() {
        let text: String = ('a'..='z').cycle().take(1500).collect();
        let chunks = split_sequential(&text, 1000, 100).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 1000);
        // Second window starts at 900, runs to the end.
        assert_eq!(chunks[1].len(), 600);
        assert_eq!(chunks[0][900..], chunks[1][..100]);
    }

    #[test]
    fn chunk_count_matches_ceil_formula() {
        for (len, chunk_size, overlap) in
            [(2000, 1000, 100), (1900, 1000, 100), (5000, 400, 50), (901, 900, 100)]
        {
            let text = "x".repeat(len);
            let chunks = split_sequential(&text, chunk_size, overlap).unwrap();
            let expected = if len <= chunk_size {
                1
            } else {
                (len - overlap).div_ceil(chunk_size - overlap)
            };
            assert_eq!(chunks.len(), expected, "len={len} cs={chunk_size} ov={overlap}");
        }
    }

    #[test]
    fn zero_overlap_tiles_the_text() {
        let chunks = split_sequential(&"ab".repeat(5), 4, 0).unwrap();
        assert_eq!(chunks, vec!["abab", "abab", "ab"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_sequential("", 1000, 100).unwrap().is_empty());
    }

    #[test]
    fn chunk_size_equal_to_overlap_is_rejected() {
        let err = split_sequential("abc", 100, 100).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(split_sequential("abc", 0, 0).is_err());
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(1200);
        let chunks = split_sequential(&text, 1000, 100).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn branches_are_disjoint_and_cover_the_text() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let branches = split_branches(&text, 3).unwrap();
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[0].len(), 34);
        assert_eq!(branches[1].len(), 34);
        assert_eq!(branches[2].len(), 32);
        assert_eq!(branches.concat(), text);
    }

    #[test]
    fn short_text_yields_fewer_branches() {
        let branches = split_branches("ab", 5).unwrap();
        assert_eq!(branches, vec!["a", "b"]);
    }

    #[test]
    fn single_branch_is_the_whole_text() {
        let branches = split_branches("hello world", 1).unwrap();
        assert_eq!(branches, vec!["hello world"]);
    }

    #[test]
    fn empty_text_yields_no_branches() {
        assert!(split_branches("", 4).unwrap().is_empty());
    }

    #[test]
    fn zero_branch_factor_is_rejected() {
        assert!(split_branches("abc", 0).is_err());
    }
}
