//! # Configuration Logic
//!
//! CLI argument parsing and validation for `arg-sample` using clap derive.

use clap::Parser;
use std::path::PathBuf;

use crate::error::{ArgError, Result};

/// arg-sample: sample ancestral recombination graphs from aligned sequences
#[derive(Parser, Debug, Clone)]
#[command(name = "arg-sample")]
#[command(version = "0.1.0")]
#[command(about = "Sample ancestral recombination graphs under the SMC", long_about = None)]
pub struct Config {
    // ============ Data Parameters ============
    /// Input sites file
    #[arg(short = 's', long, value_name = "FILE")]
    pub sites: PathBuf,

    /// Output file prefix
    #[arg(short = 'o', long, value_name = "PREFIX", default_value = "arg-sample")]
    pub output: PathBuf,

    /// Site compression factor
    #[arg(short = 'c', long, default_value = "1")]
    pub compress: usize,

    /// Mask file with regions to ignore (chrom start end)
    #[arg(long, value_name = "FILE")]
    pub maskmap: Option<PathBuf>,

    // ============ Model Parameters ============
    /// Haploid effective population size, one value or one per time interval
    #[arg(short = 'N', long, default_value = "10000", value_delimiter = ',')]
    pub popsize: Vec<f64>,

    /// Mutation rate (mutations/generation/site)
    #[arg(short = 'm', long, default_value = "2.5e-8")]
    pub mutrate: f64,

    /// Recombination rate (recombinations/generation/site)
    #[arg(short = 'r', long, default_value = "1.5e-8")]
    pub recombrate: f64,

    /// Number of discretized time points
    #[arg(long, default_value = "20")]
    pub ntimes: usize,

    /// Maximum time in generations
    #[arg(long, default_value = "200000")]
    pub maxtime: f64,

    /// Curvature of the log-spaced time grid
    #[arg(long, default_value = "0.01")]
    pub delta: f64,

    /// Mutation rate map file
    #[arg(long, value_name = "FILE")]
    pub mutmap: Option<PathBuf>,

    /// Recombination rate map file
    #[arg(long, value_name = "FILE")]
    pub recombmap: Option<PathBuf>,

    /// Assume infinite sites (penalize repeat mutations)
    #[arg(long)]
    pub infsites: bool,

    /// Log-scale penalty per infinite-sites violation
    #[arg(long, default_value = "10.0")]
    pub infsites_penalty: f64,

    // ============ Sampling Parameters ============
    /// Number of sampling iterations
    #[arg(short = 'n', long, default_value = "1000")]
    pub iters: usize,

    /// Resample bounded windows of this many sites instead of whole threads
    #[arg(long, value_name = "LEN")]
    pub resample_window: Option<usize>,

    /// Resample every thread each iteration
    #[arg(long)]
    pub gibbs: bool,

    /// Lead with this many hill-climb iterations
    #[arg(long, default_value = "0", value_name = "N")]
    pub climb: usize,

    /// Write an SMC snapshot every this many iterations
    #[arg(long, default_value = "10")]
    pub sample_step: usize,

    /// Random seed
    #[arg(short = 'x', long)]
    pub seed: Option<u64>,

    /// Suppress progress logging
    #[arg(long)]
    pub quiet: bool,
}

impl Config {
    /// Parse command line arguments and validate
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !self.sites.exists() {
            return Err(ArgError::config(format!(
                "sites file not found: {}",
                self.sites.display()
            )));
        }
        if self.ntimes < 2 {
            return Err(ArgError::config("ntimes must be at least 2"));
        }
        if self.maxtime <= 0.0 {
            return Err(ArgError::config("maxtime must be positive"));
        }
        if self.popsize.is_empty()
            || (self.popsize.len() != 1 && self.popsize.len() != self.ntimes)
        {
            return Err(ArgError::config(format!(
                "number of popsizes ({}) must be 1 or match ntimes ({})",
                self.popsize.len(),
                self.ntimes
            )));
        }
        if self.popsize.iter().any(|&n| n <= 0.0) {
            return Err(ArgError::config("popsize must be positive"));
        }
        if self.mutrate < 0.0 || self.recombrate < 0.0 {
            return Err(ArgError::config("rates cannot be negative"));
        }
        if self.compress == 0 {
            return Err(ArgError::config("compression factor must be at least 1"));
        }
        if let Some(w) = self.resample_window {
            if w == 0 {
                return Err(ArgError::config("resample window cannot be empty"));
            }
        }
        Ok(())
    }
}
