//! # Position-Indexed Rate Tracks
//!
//! Mutation and recombination rates can vary along the chromosome. A track is
//! an ordered set of non-overlapping half-open intervals with a rate value;
//! lookup is by binary search.

use crate::error::{ArgError, Result};

/// One `[start, end) -> value` interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateInterval {
    pub start: usize,
    pub end: usize,
    pub value: f64,
}

/// Sorted, non-overlapping rate intervals on a single chromosome
#[derive(Debug, Clone, Default)]
pub struct RateTrack {
    chrom: String,
    intervals: Vec<RateInterval>,
}

impl RateTrack {
    /// Build a track from intervals, validating order and disjointness.
    pub fn new(chrom: impl Into<String>, intervals: Vec<RateInterval>) -> Result<Self> {
        for (i, iv) in intervals.iter().enumerate() {
            if iv.end <= iv.start {
                return Err(ArgError::config(format!(
                    "empty rate interval [{}, {})",
                    iv.start, iv.end
                )));
            }
            if i > 0 && iv.start < intervals[i - 1].end {
                return Err(ArgError::config(format!(
                    "rate intervals overlap or are unsorted near position {}",
                    iv.start
                )));
            }
        }
        Ok(Self {
            chrom: chrom.into(),
            intervals,
        })
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn intervals(&self) -> &[RateInterval] {
        &self.intervals
    }

    /// Value at `pos`, or `default` if no interval covers it. O(log n).
    pub fn find(&self, pos: usize, default: f64) -> f64 {
        match self
            .intervals
            .binary_search_by(|iv| {
                if pos < iv.start {
                    std::cmp::Ordering::Greater
                } else if pos >= iv.end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            }) {
            Ok(i) => self.intervals[i].value,
            Err(_) => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> RateTrack {
        RateTrack::new(
            "chr1",
            vec![
                RateInterval {
                    start: 0,
                    end: 100,
                    value: 1e-8,
                },
                RateInterval {
                    start: 100,
                    end: 150,
                    value: 5e-8,
                },
                RateInterval {
                    start: 200,
                    end: 300,
                    value: 2e-8,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_find_covered() {
        let t = track();
        assert_eq!(t.find(0, 9.9), 1e-8);
        assert_eq!(t.find(99, 9.9), 1e-8);
        assert_eq!(t.find(100, 9.9), 5e-8);
        assert_eq!(t.find(250, 9.9), 2e-8);
    }

    #[test]
    fn test_find_uncovered_returns_default() {
        let t = track();
        assert_eq!(t.find(150, 9.9), 9.9);
        assert_eq!(t.find(199, 9.9), 9.9);
        assert_eq!(t.find(300, 9.9), 9.9);
    }

    #[test]
    fn test_overlap_rejected() {
        let r = RateTrack::new(
            "chr1",
            vec![
                RateInterval {
                    start: 0,
                    end: 100,
                    value: 1.0,
                },
                RateInterval {
                    start: 50,
                    end: 150,
                    value: 2.0,
                },
            ],
        );
        assert!(r.is_err());
    }
}
