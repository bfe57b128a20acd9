//! # ARG Data Structures
//!
//! The mutable core: local coalescent trees, SPR operations, the block
//! sequence connecting them, and the thread surgery that grows and shrinks
//! the ARG one lineage at a time.

pub mod spr;
pub mod thread;
pub mod tree;
pub mod trees;

pub use spr::Spr;
pub use tree::{LocalNode, LocalTree};
pub use trees::{Block, LocalTrees};
