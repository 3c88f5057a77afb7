//! Partitioning of the input buffer into worker segments.

use std::ops::Range;

use crate::error::{Result, ScanError};

/// Half-open byte range `[start, start + length)` assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub length: u64,
}

impl Segment {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The segment as a slice range. Offsets always fit in `usize` because
    /// segments are planned over an in-memory buffer.
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end() as usize
    }

    /// Borrow the bytes this segment covers.
    pub fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.range()]
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// Split `total_length` bytes into `parts` contiguous segments.
///
/// Every segment gets `total_length / parts` bytes and the first
/// `total_length % parts` segments get one more, so the plan is deterministic
/// and lengths differ by at most one. Segments may be empty when `parts`
/// exceeds `total_length`.
pub fn plan(total_length: u64, parts: u32) -> Result<Vec<Segment>> {
    if parts == 0 {
        return Err(ScanError::InvalidPartitionRequest(parts.to_string()));
    }

    let parts = u64::from(parts);
    let base = total_length / parts;
    let remainder = total_length % parts;

    let mut segments = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let length = base + u64::from(i < remainder);
        segments.push(Segment { start, length });
        start += length;
    }
    Ok(segments)
}

/// Count occurrences of `target` in `bytes`.
///
/// Does not allocate, so it is safe to call in a forked worker.
pub fn count_matches(bytes: &[u8], target: u8) -> u64 {
    bytes.iter().filter(|&&b| b == target).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_zero_parts() {
        let err = plan(10, 0).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPartitionRequest(_)));
    }

    #[test]
    fn test_plan_even_split() {
        let segments = plan(8, 2).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment { start: 0, length: 4 },
                Segment { start: 4, length: 4 },
            ]
        );
    }

    #[test]
    fn test_plan_remainder_goes_to_first_segments() {
        let lengths: Vec<u64> = plan(10, 4).unwrap().iter().map(|s| s.length).collect();
        assert_eq!(lengths, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_plan_more_parts_than_bytes() {
        let segments = plan(3, 5).unwrap();
        let lengths: Vec<u64> = segments.iter().map(|s| s.length).collect();
        assert_eq!(lengths, vec![1, 1, 1, 0, 0]);
        assert!(segments[3].is_empty());
        assert_eq!(segments[3].start, 3);
        assert_eq!(segments[4].end(), 3);
    }

    #[test]
    fn test_plan_empty_buffer() {
        let segments = plan(0, 3).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(Segment::is_empty));
    }

    #[test]
    fn test_segment_display() {
        let segment = Segment { start: 4, length: 4 };
        assert_eq!(segment.to_string(), "[4, 8)");
    }

    #[test]
    fn test_count_matches_per_segment() {
        let buffer = b"aabcaabc";
        let segments = plan(buffer.len() as u64, 2).unwrap();
        let counts: Vec<u64> = segments
            .iter()
            .map(|s| count_matches(s.slice(buffer), b'a'))
            .collect();
        assert_eq!(counts, vec![2, 2]);
    }

    #[test]
    fn test_single_segment_matches_full_scan() {
        let buffer = b"the quick brown fox jumps over the lazy dog";
        let segments = plan(buffer.len() as u64, 1).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(
            count_matches(segments[0].slice(buffer), b'o'),
            count_matches(buffer, b'o')
        );
    }
}
