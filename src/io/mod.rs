//! # File Formats
//!
//! Text formats around the core: sites files, mutation/recombination map
//! files, SMC serialization of sampled ARGs, and the statistics stream.

pub mod rates;
pub mod sites;
pub mod smc;
pub mod stats;

pub use sites::Sites;
pub use smc::{read_smc, write_smc};
pub use stats::StatsWriter;
