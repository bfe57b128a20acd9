//! # Subtree-Prune-Regraft Operations
//!
//! One SPR detaches the branch above `recomb_node` at `recomb_time` and
//! reattaches it on the branch above `coal_node` at `coal_time`. Blocks store
//! `Option<Spr>`; `None` denotes identity between adjacent blocks.

use crate::arg::tree::LocalTree;

/// A single SPR operation, legal on the tree it is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spr {
    pub recomb_node: usize,
    pub recomb_time: usize,
    pub coal_node: usize,
    pub coal_time: usize,
}

impl Spr {
    pub fn new(recomb_node: usize, recomb_time: usize, coal_node: usize, coal_time: usize) -> Self {
        Self {
            recomb_node,
            recomb_time,
            coal_node,
            coal_time,
        }
    }

    /// Checks legality on the pre-image tree.
    ///
    /// The recombination point must sit on the recomb branch, the coalescence
    /// point on the coal branch (no upper bound when the coal node is the
    /// root), and the recombination cannot postdate the coalescence.
    pub fn is_valid_on(&self, tree: &LocalTree) -> bool {
        if self.recomb_node >= tree.nnodes() || self.coal_node >= tree.nnodes() {
            return false;
        }
        if self.recomb_time > self.coal_time {
            return false;
        }
        // the root branch cannot recombine away
        let rp = match tree.node(self.recomb_node).parent {
            Some(p) => p,
            None => return false,
        };
        if self.recomb_time < tree.node(self.recomb_node).age
            || self.recomb_time > tree.node(rp).age
        {
            return false;
        }
        if self.coal_time < tree.node(self.coal_node).age {
            return false;
        }
        if let Some(cp) = tree.node(self.coal_node).parent {
            if self.coal_time > tree.node(cp).age {
                return false;
            }
        }
        true
    }

    /// The SPR that undoes this one, expressed on the post-image tree.
    ///
    /// After application the recoal node (old parent of the recomb branch)
    /// sits at `coal_time` above `recomb_node`; pruning the same branch again
    /// and regrafting onto the old sibling at the old height restores the
    /// original topology. `old_sibling` and `old_parent_age` come from the
    /// pre-image tree.
    pub fn inverse(&self, old_sibling: usize, old_parent_age: usize) -> Spr {
        Spr {
            recomb_node: self.recomb_node,
            recomb_time: self.recomb_time,
            coal_node: old_sibling,
            coal_time: old_parent_age,
        }
    }
}
