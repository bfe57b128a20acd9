//! # HMM State Space and Lineage Counts
//!
//! A threading state `(branch, time)` says where the new lineage coalesces
//! onto the current local tree at one position. The state set covers every
//! branch from its lower node's age to its parent's age; the root branch
//! extends to the second-to-top grid point.
//!
//! `LineageCounts` sweeps each branch across the intervals it spans and
//! drives both the transition and the prior calculations — the counters
//! include the event slots permitted at the top of each branch.

use crate::arg::tree::LocalTree;

/// One threading state: the new lineage coalesces onto branch `node` in time
/// interval `time`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State {
    pub node: usize,
    pub time: usize,
}

impl State {
    pub fn new(node: usize, time: usize) -> Self {
        Self { node, time }
    }
}

/// The enumerated state set for one local tree
#[derive(Debug, Clone)]
pub struct States {
    states: Vec<State>,
    /// `lookup[node * ntimes + time]` -> state index
    lookup: Vec<Option<usize>>,
    ntimes: usize,
}

impl States {
    /// Enumerate the coalescing states of `tree` on a grid with `ntimes`
    /// points.
    pub fn enumerate(tree: &LocalTree, ntimes: usize) -> Self {
        let mut states = Vec::new();
        let mut lookup = vec![None; tree.nnodes() * ntimes];

        for node in 0..tree.nnodes() {
            let lo = tree.node(node).age;
            let hi = match tree.node(node).parent {
                Some(p) => tree.node(p).age,
                None => ntimes - 2,
            };
            for time in lo..=hi {
                lookup[node * ntimes + time] = Some(states.len());
                states.push(State::new(node, time));
            }
        }
        Self {
            states,
            lookup,
            ntimes,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[inline]
    pub fn state(&self, i: usize) -> State {
        self.states[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    /// Index of `(node, time)`, if it is a state
    #[inline]
    pub fn find(&self, node: usize, time: usize) -> Option<usize> {
        self.lookup.get(node * self.ntimes + time).copied().flatten()
    }
}

/// Per-interval lineage counters for one local tree
#[derive(Debug, Clone)]
pub struct LineageCounts {
    /// Branches crossing from time `i` to `i+1`
    pub nbranches: Vec<usize>,
    /// Possible recombination points at time `i`
    pub nrecombs: Vec<usize>,
    /// Possible coalescing points at time `i`
    pub ncoals: Vec<usize>,
}

impl LineageCounts {
    /// Counts lineages per time interval.
    ///
    /// The root branch extends to `ntimes - 2`; recombination and
    /// coalescence are also allowed at the top of each branch; the topmost
    /// interval always reports one branch.
    pub fn count(tree: &LocalTree, ntimes: usize) -> Self {
        let mut nbranches = vec![0; ntimes];
        let mut nrecombs = vec![0; ntimes];
        let mut ncoals = vec![0; ntimes];

        for i in 0..tree.nnodes() {
            let node = tree.node(i);
            debug_assert!(node.age < ntimes - 1);
            let parent_age = match node.parent {
                Some(p) => tree.node(p).age,
                None => ntimes - 2,
            };

            for j in node.age..parent_age {
                nbranches[j] += 1;
                nrecombs[j] += 1;
                ncoals[j] += 1;
            }

            // events are also permitted at the top of a branch
            nrecombs[parent_age] += 1;
            ncoals[parent_age] += 1;
            if node.parent.is_none() {
                nbranches[parent_age] += 1;
            }
        }

        nbranches[ntimes - 1] = 1;
        Self {
            nbranches,
            nrecombs,
            ncoals,
        }
    }
}
