//! # Statistics Stream
//!
//! Per-iteration TSV written alongside the sampled ARGs:
//! `iter  joint  likelihood  prior  recombs  arglen`, one header line, one
//! row per iteration, flushed as it goes so progress is observable.

use std::io::Write;

use crate::error::Result;
use crate::sample::resample::ArgStats;

/// A TSV writer for the per-iteration statistics
pub struct StatsWriter<W: Write> {
    out: W,
}

impl<W: Write> StatsWriter<W> {
    /// Wraps a writer and emits the header line.
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "iter\tjoint\tlikelihood\tprior\trecombs\targlen")?;
        Ok(Self { out })
    }

    /// Appends one iteration's row and flushes.
    pub fn write_row(&mut self, iter: usize, stats: &ArgStats) -> Result<()> {
        writeln!(
            self.out,
            "{}\t{:.6}\t{:.6}\t{:.6}\t{}\t{:.3}",
            iter, stats.joint, stats.likelihood, stats.prior, stats.recombs, stats.arglen
        )?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_stream() {
        let mut buf = Vec::new();
        {
            let mut w = StatsWriter::new(&mut buf).unwrap();
            w.write_row(
                1,
                &ArgStats {
                    joint: -10.5,
                    likelihood: -8.25,
                    prior: -2.25,
                    recombs: 3,
                    arglen: 12345.678,
                },
            )
            .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "iter\tjoint\tlikelihood\tprior\trecombs\targlen"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("1\t-10.5"));
        assert!(row.contains("\t3\t"));
    }
}
