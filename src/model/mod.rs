//! # Statistical Model
//!
//! The discretized coalescent machinery: time grid, model parameters, rate
//! tracks, the threading state space, the compressed transition operators,
//! and the emission model.

pub mod emit;
pub mod params;
pub mod states;
pub mod time;
pub mod track;
pub mod trans;

pub use params::ArgModel;
pub use states::{LineageCounts, State, States};
pub use time::TimeGrid;
pub use track::RateTrack;
pub use trans::{TransMatrix, TransMatrixSwitch};
