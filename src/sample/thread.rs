//! # Path Sampling
//!
//! Ties the per-block matrices, the forward pass, and the traceback into one
//! operation: sample a threading path for one sequence against a residual
//! ARG, normalize it into a representable form, and sample the recombination
//! time of every within-block change.

use std::collections::HashMap;

use rand::Rng;

use crate::arg::thread::add_thread;
use crate::arg::trees::LocalTrees;
use crate::error::{ArgError, Result};
use crate::io::sites::Sites;
use crate::model::params::ArgModel;
use crate::model::states::State;
use crate::sample::forward::{forward, traceback};
use crate::sample::matrices::{assemble, BlockMatrices};
use crate::utils::{sample_weights, Workspace};

/// A sampled threading: one state per position plus the recombination time
/// of every within-block path change.
pub struct ThreadPath {
    pub path: Vec<State>,
    pub events: HashMap<usize, usize>,
}

/// Samples a thread for `thread_seqid` against the residual `trees`.
///
/// The clamps pin the thread's state at the region's endpoints: a bounded
/// window resample conditions on how the thread re-enters the surrounding
/// ARG on both sides.
pub fn sample_thread(
    model: &ArgModel,
    trees: &LocalTrees,
    sites: &Sites,
    thread_seqid: usize,
    clamps: (Option<State>, Option<State>),
    rng: &mut impl Rng,
) -> Result<ThreadPath> {
    let matrices = assemble(model, trees, sites, thread_seqid)?;
    let start_clamp = match clamps.0 {
        Some(s) => Some(
            matrices
                .first()
                .and_then(|m| m.states.find(s.node, s.time))
                .ok_or_else(|| ArgError::invariant("start clamp is not a live state"))?,
        ),
        None => None,
    };
    let end_clamp = match clamps.1 {
        Some(s) => Some(
            matrices
                .last()
                .and_then(|m| m.states.find(s.node, s.time))
                .ok_or_else(|| ArgError::invariant("end clamp is not a live state"))?,
        ),
        None => None,
    };

    let mut ws = Workspace::new();
    let table = forward(&matrices, &mut ws, start_clamp)?;
    let mut path = traceback(&matrices, &table, rng, end_clamp)?;

    normalize_boundaries(trees, &mut path);
    let events = sample_recomb_events(trees, &matrices, &path, rng);
    Ok(ThreadPath { path, events })
}

/// Samples and inserts a thread in one step (free endpoints).
pub fn sample_and_add_thread(
    model: &ArgModel,
    trees: &mut LocalTrees,
    sites: &Sites,
    thread_seqid: usize,
    rng: &mut impl Rng,
) -> Result<()> {
    let thread = sample_thread(model, trees, sites, thread_seqid, (None, None), rng)?;
    add_thread(trees, thread_seqid, &thread.path, &thread.events)
}

/// Rewrites boundary targets that no single SPR can realize.
///
/// When the thread sits exactly at a block SPR's recombination point, the
/// dense switch row reaches every coalescence in the next tree; only the
/// "dissolve" and "ride along" targets are expressible at the boundary
/// itself. Any other sampled target is reached by riding across the boundary
/// and re-coalescing one position later (the change re-emerges as an
/// ordinary within-block event).
fn normalize_boundaries(trees: &LocalTrees, path: &mut [State]) {
    let start = trees.start_coord();
    let mut bstart = start;
    for (bi, block) in trees.blocks().iter().enumerate() {
        if bi == 0 {
            bstart += block.blocklen;
            continue;
        }
        if let (Some(spr), Some(mapping)) = (&block.spr, &block.mapping) {
            let prev = path[bstart - start - 1];
            if (prev.node, prev.time) == (spr.recomb_node, spr.recomb_time) {
                let prev_tree = &trees.blocks()[bi - 1].tree;
                let rp = prev_tree.node(spr.recomb_node).parent.unwrap();
                let sib = prev_tree.sibling_of(spr.recomb_node).unwrap();
                let dissolve = mapping[sib].map(|n| State::new(n, prev_tree.node(rp).age));
                let ride = mapping[spr.recomb_node].map(|n| State::new(n, spr.recomb_time));

                let cur = path[bstart - start];
                if Some(cur) != dissolve && Some(cur) != ride {
                    if let Some(ride) = ride {
                        path[bstart - start] = ride;
                    }
                }
            }
        }
        bstart += block.blocklen;
    }
}

/// Samples the recombination time of every within-block change, weighted by
/// the survival-adjusted recombination mass of each interval.
fn sample_recomb_events(
    trees: &LocalTrees,
    matrices: &[BlockMatrices],
    path: &[State],
    rng: &mut impl Rng,
) -> HashMap<usize, usize> {
    let start = trees.start_coord();
    let mut events = HashMap::new();

    for m in matrices {
        for p in m.start + 1..m.start + m.len {
            let prev = path[p - start - 1];
            let cur = path[p - start];
            if prev == cur {
                continue;
            }
            let top = prev.time.min(cur.time);
            let weights: Vec<f64> = (0..=top).map(|k| m.trans.recomb_weight(k).max(0.0)).collect();
            let k = if weights.iter().sum::<f64>() > 0.0 {
                sample_weights(rng, &weights)
            } else {
                0
            };
            events.insert(p, k);
        }
    }
    events
}
