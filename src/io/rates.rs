//! # Rate Map Files
//!
//! TSV files `chrom  start  end  rate` with half-open, non-overlapping,
//! sorted intervals, loaded into a `RateTrack`. Mask files share the layout
//! minus the rate column.

use std::io::BufRead;
use std::path::Path;

use crate::error::{ArgError, Result};
use crate::model::track::{RateInterval, RateTrack};

/// Loads a mutation or recombination map.
pub fn read_rate_map(path: &Path) -> Result<RateTrack> {
    let file = std::fs::File::open(path)?;
    parse_rate_map(std::io::BufReader::new(file))
}

pub fn parse_rate_map(reader: impl BufRead) -> Result<RateTrack> {
    let mut chrom: Option<String> = None;
    let mut intervals = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(ArgError::format(lineno, "expected: chrom start end rate"));
        }
        match &chrom {
            None => chrom = Some(fields[0].to_string()),
            Some(c) if c != fields[0] => {
                return Err(ArgError::format(lineno, "rate map spans several chromosomes"))
            }
            _ => {}
        }
        let start: usize = fields[1]
            .parse()
            .map_err(|_| ArgError::format(lineno, "bad start"))?;
        let end: usize = fields[2]
            .parse()
            .map_err(|_| ArgError::format(lineno, "bad end"))?;
        let value: f64 = fields[3]
            .parse()
            .map_err(|_| ArgError::format(lineno, "bad rate"))?;
        intervals.push(RateInterval { start, end, value });
    }

    RateTrack::new(chrom.unwrap_or_default(), intervals)
}

/// Loads mask intervals (`chrom start end`), returned as half-open pairs.
pub fn read_mask(path: &Path) -> Result<Vec<(usize, usize)>> {
    let file = std::fs::File::open(path)?;
    parse_mask(std::io::BufReader::new(file))
}

pub fn parse_mask(reader: impl BufRead) -> Result<Vec<(usize, usize)>> {
    let mut intervals = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(ArgError::format(lineno, "expected: chrom start end"));
        }
        let start: usize = fields[1]
            .parse()
            .map_err(|_| ArgError::format(lineno, "bad start"))?;
        let end: usize = fields[2]
            .parse()
            .map_err(|_| ArgError::format(lineno, "bad end"))?;
        intervals.push((start, end));
    }
    Ok(intervals)
}
