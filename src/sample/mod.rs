//! # Threading Sampler
//!
//! The forward-filter/backward-sample engine: per-block matrix assembly, the
//! log-space forward pass, stochastic traceback, path-to-SPR conversion, and
//! the resampling loop above them.

pub mod forward;
pub mod matrices;
pub mod resample;
pub mod thread;

pub use resample::{arg_stats, run_sampler, sample_initial_arg, ArgStats, SamplerOpts};
pub use thread::{sample_and_add_thread, sample_thread};
