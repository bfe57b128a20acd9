//! # Sites File Format
//!
//! Line-oriented text holding variant columns of an alignment:
//!
//! ```text
//! NAMES<TAB>seq1<TAB>seq2<TAB>seq3
//! REGION<TAB>chr1<TAB>1<TAB>1000
//! 42<TAB>ACA
//! 90<TAB>TTN
//! ```
//!
//! Positions are 1-based inclusive in the file and strictly increasing;
//! internally everything is 0-based half-open. Unlisted positions are
//! invariant (no information). `{0,1}` columns are accepted for unphased
//! input and mapped onto two placeholder bases.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::{ArgError, Result};
use crate::model::emit::{decode_base, encode_base, Base};

/// An alignment's variant columns over a region
#[derive(Debug, Clone)]
pub struct Sites {
    pub chrom: String,
    /// 0-based half-open region
    pub start: usize,
    pub end: usize,
    pub names: Vec<String>,
    positions: Vec<usize>,
    columns: Vec<Vec<Base>>,
}

impl Sites {
    /// An empty region with no variant sites
    pub fn empty(chrom: impl Into<String>, start: usize, end: usize, names: Vec<String>) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
            names,
            positions: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn nseqs(&self) -> usize {
        self.names.len()
    }

    pub fn nsites(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn column(&self, idx: usize) -> &[Base] {
        &self.columns[idx]
    }

    /// The column at a genomic position, if it is a variant site
    pub fn column_at(&self, pos: usize) -> Option<&[Base]> {
        self.positions
            .binary_search(&pos)
            .ok()
            .map(|i| self.columns[i].as_slice())
    }

    /// Append a site; positions must arrive in increasing order.
    pub fn push(&mut self, pos: usize, column: Vec<Base>) -> Result<()> {
        if let Some(&last) = self.positions.last() {
            if pos <= last {
                return Err(ArgError::invariant("site positions must increase"));
            }
        }
        if column.len() != self.names.len() {
            return Err(ArgError::invariant("column width does not match names"));
        }
        self.positions.push(pos);
        self.columns.push(column);
        Ok(())
    }

    /// Parse a sites file.
    pub fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::parse(std::io::BufReader::new(file))
    }

    pub fn parse(reader: impl BufRead) -> Result<Self> {
        let mut names: Option<Vec<String>> = None;
        let mut region: Option<(String, usize, usize)> = None;
        let mut positions = Vec::new();
        let mut columns: Vec<Vec<Base>> = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let lineno = lineno + 1;
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let first = fields.next().unwrap();

            match first {
                "NAMES" => {
                    names = Some(fields.map(str::to_string).collect());
                }
                "REGION" => {
                    let chrom = fields
                        .next()
                        .ok_or_else(|| ArgError::format(lineno, "REGION missing chrom"))?;
                    let start: usize = fields
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ArgError::format(lineno, "REGION missing start"))?;
                    let end: usize = fields
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| ArgError::format(lineno, "REGION missing end"))?;
                    if start < 1 || end < start {
                        return Err(ArgError::format(lineno, "bad REGION bounds"));
                    }
                    region = Some((chrom.to_string(), start - 1, end));
                }
                pos_str => {
                    let names = names
                        .as_ref()
                        .ok_or_else(|| ArgError::format(lineno, "data before NAMES"))?;
                    let (_, start, end) = region
                        .as_ref()
                        .ok_or_else(|| ArgError::format(lineno, "data before REGION"))?;

                    let pos: usize = pos_str
                        .parse()
                        .map_err(|_| ArgError::format(lineno, "bad position"))?;
                    if pos < 1 {
                        return Err(ArgError::format(lineno, "positions are 1-based"));
                    }
                    let pos = pos - 1;
                    if pos < *start || pos >= *end {
                        return Err(ArgError::format(lineno, "position outside REGION"));
                    }
                    if let Some(&last) = positions.last() {
                        if pos <= last {
                            return Err(ArgError::format(
                                lineno,
                                "positions must be strictly increasing",
                            ));
                        }
                    }

                    let col_str = fields
                        .next()
                        .ok_or_else(|| ArgError::format(lineno, "missing column"))?;
                    if col_str.len() != names.len() {
                        return Err(ArgError::format(
                            lineno,
                            format!(
                                "column width {} does not match {} names",
                                col_str.len(),
                                names.len()
                            ),
                        ));
                    }
                    let column: Vec<Base> = col_str
                        .bytes()
                        .map(|c| match c {
                            // unphased input encodes binary alleles
                            b'0' => Some(0),
                            b'1' => Some(3),
                            _ => decode_base(c),
                        })
                        .collect();
                    if col_str
                        .bytes()
                        .any(|c| !matches!(c, b'A' | b'C' | b'G' | b'T' | b'N' | b'a' | b'c'
                            | b'g' | b't' | b'n' | b'0' | b'1'))
                    {
                        return Err(ArgError::format(lineno, "bad base in column"));
                    }
                    positions.push(pos);
                    columns.push(column);
                }
            }
        }

        let names = names.ok_or_else(|| ArgError::format(0, "missing NAMES header"))?;
        let (chrom, start, end) =
            region.ok_or_else(|| ArgError::format(0, "missing REGION header"))?;
        Ok(Self {
            chrom,
            start,
            end,
            names,
            positions,
            columns,
        })
    }

    /// Write the sites file (inverse of `parse`).
    pub fn write(&self, mut out: impl Write) -> Result<()> {
        write!(out, "NAMES")?;
        for name in &self.names {
            write!(out, "\t{name}")?;
        }
        writeln!(out)?;
        writeln!(out, "REGION\t{}\t{}\t{}", self.chrom, self.start + 1, self.end)?;
        for (pos, column) in self.positions.iter().zip(&self.columns) {
            let col: String = column.iter().map(|&b| encode_base(b) as char).collect();
            writeln!(out, "{}\t{}", pos + 1, col)?;
        }
        Ok(())
    }

    /// Mask columns covered by `[start, end)` intervals, setting them to `N`.
    pub fn apply_mask(&mut self, intervals: &[(usize, usize)]) {
        for (i, &pos) in self.positions.iter().enumerate() {
            if intervals.iter().any(|&(s, e)| pos >= s && pos < e) {
                self.columns[i] = vec![None; self.names.len()];
            }
        }
    }

    /// Compress coordinates by an integral factor. Two variant sites landing
    /// on the same compressed coordinate is an error; rates must be scaled
    /// by the same factor by the caller.
    pub fn compress(&mut self, factor: usize) -> Result<()> {
        if factor <= 1 {
            return Ok(());
        }
        let mut last = None;
        for pos in self.positions.iter_mut() {
            *pos /= factor;
            if last == Some(*pos) {
                return Err(ArgError::config(format!(
                    "sites too dense for compression factor {factor}"
                )));
            }
            last = Some(*pos);
        }
        self.start /= factor;
        self.end = self.end.div_ceil(factor);
        Ok(())
    }
}
