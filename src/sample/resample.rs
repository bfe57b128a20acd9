//! # Thread Resampling and the MCMC Driver
//!
//! One resampling step picks a leaf and a region, strips that thread out of
//! the ARG, re-threads it through the HMM, and splices everything back. The
//! step is atomic from the caller's viewpoint: on any failure the original
//! ARG is restored and the error surfaces as recoverable.
//!
//! The driver loops resampling steps, optionally in Gibbs mode (every leaf,
//! full length) or hill-climb mode (keep a proposal only when the joint
//! probability improves), and reports per-iteration statistics.

use rand::Rng;
use tracing::{debug, warn};

use crate::arg::thread::{add_thread, remove_thread};
use crate::arg::tree::LocalTree;
use crate::arg::trees::{map_congruent_trees, LocalTrees};
use crate::error::{ArgError, Result};
use crate::io::sites::Sites;
use crate::model::emit::ColumnPartials;
use crate::model::params::ArgModel;
use crate::model::states::LineageCounts;
use crate::model::trans::recoal_logprob;
use crate::sample::thread::{sample_and_add_thread, sample_thread};

/// Per-iteration summary statistics
#[derive(Debug, Clone, Copy)]
pub struct ArgStats {
    pub joint: f64,
    pub likelihood: f64,
    pub prior: f64,
    pub recombs: usize,
    pub arglen: f64,
}

/// Log likelihood of the alignment given the local trees: the Felsenstein
/// score of every variant column against its block's tree.
pub fn arg_likelihood(model: &ArgModel, trees: &LocalTrees, sites: &Sites) -> f64 {
    let mut total = 0.0;
    let mut bstart = trees.start_coord();
    for block in trees.blocks() {
        let bend = bstart + block.blocklen;
        for (&pos, col_idx) in sites
            .positions()
            .iter()
            .zip(0usize..)
            .filter(|(&p, _)| p >= bstart && p < bend)
        {
            let full = sites.column(col_idx);
            let column: Vec<_> = trees.seqids().iter().map(|&s| full[s]).collect();
            if column.iter().all(|b| b.is_none()) {
                continue;
            }
            let local = model.local_model(pos);
            let partials = ColumnPartials::calculate(&local, &block.tree, &column);
            total += partials.tree_likelihood(&block.tree).ln();
        }
        bstart = bend;
    }
    total
}

/// Log prior of one local tree under the discretized coalescent
fn tree_logprior(model: &ArgModel, tree: &LocalTree) -> f64 {
    let ntimes = model.ntimes();
    let lineages = LineageCounts::count(tree, ntimes);
    let mut lp = 0.0;
    for j in 0..ntimes - 1 {
        let k = lineages.nbranches[j] as f64;
        if k > 1.0 {
            lp -= k * (k - 1.0) / 2.0 * model.grid.step(j) / (2.0 * model.popsizes[j]);
        }
    }
    for i in 0..tree.nnodes() {
        if !tree.is_leaf(i) {
            lp -= (2.0 * model.popsizes[tree.node(i).age]).ln();
        }
    }
    lp
}

/// Log prior of the whole ARG under the sequentially Markov coalescent:
/// the first tree's coalescent prior, no-recombination survival along every
/// block, and a recombination-location plus re-coalescence density per SPR.
pub fn arg_prior(model: &ArgModel, trees: &LocalTrees) -> f64 {
    let grid = &model.grid;
    let mut lp = match trees.blocks().first() {
        Some(b) => tree_logprior(model, &b.tree),
        None => return 0.0,
    };

    let mut bstart = trees.start_coord();
    let mut prev: Option<&LocalTree> = None;
    for block in trees.blocks() {
        let local = model.local_model(bstart);
        let treelen = block.tree.treelen(grid, false);
        lp -= local.rho * treelen * (block.blocklen.saturating_sub(1)) as f64;

        if let (Some(spr), Some(prev_tree)) = (&block.spr, prev) {
            let prev_len = prev_tree.treelen(grid, false);
            let lineages = LineageCounts::count(prev_tree, model.ntimes());
            lp += (local.rho * prev_len).max(f64::MIN_POSITIVE).ln();
            lp += recoal_logprob(&local, &lineages, spr.recomb_time, spr.coal_time);
        }
        prev = Some(&block.tree);
        bstart += block.blocklen;
    }
    lp
}

/// All per-iteration statistics in one pass
pub fn arg_stats(model: &ArgModel, trees: &LocalTrees, sites: &Sites) -> ArgStats {
    let likelihood = arg_likelihood(model, trees, sites);
    let prior = arg_prior(model, trees);
    ArgStats {
        joint: likelihood + prior,
        likelihood,
        prior,
        recombs: trees.nrecombs(),
        arglen: trees.arglen(&model.grid),
    }
}

/// Removes one thread over `[a, b)` and re-threads it through the HMM.
///
/// On error the ARG is restored to its pre-call state.
pub fn resample_thread_window(
    model: &ArgModel,
    trees: &mut LocalTrees,
    sites: &Sites,
    seqid: usize,
    window: Option<(usize, usize)>,
    rng: &mut impl Rng,
) -> Result<()> {
    let backup = trees.clone();
    let result = resample_inner(model, trees, sites, seqid, window, rng);
    if result.is_err() {
        *trees = backup;
    }
    result
}

fn resample_inner(
    model: &ArgModel,
    trees: &mut LocalTrees,
    sites: &Sites,
    seqid: usize,
    window: Option<(usize, usize)>,
    rng: &mut impl Rng,
) -> Result<()> {
    let start = trees.start_coord();
    let end = trees.end_coord();
    let (a, b) = window.unwrap_or((start, end));
    if a < start || b > end || a >= b {
        return Err(ArgError::invariant("resample window out of range"));
    }

    let order: Vec<usize> = trees.seqids().to_vec();
    let (mut middle, edge_a) = trees.partition(a)?;
    let (tail, edge_b) = match b < end {
        true => {
            let (t, e) = middle.partition(b)?;
            (Some(t), e)
        }
        false => (None, None),
    };

    // the pre-removal boundary trees anchor the suture renumbering
    let orig_first = middle.blocks().first().map(|blk| blk.tree.clone());
    let orig_last = middle.blocks().last().map(|blk| blk.tree.clone());

    let leaf = middle
        .seqids()
        .iter()
        .position(|&s| s == seqid)
        .ok_or_else(|| ArgError::invariant("unknown seqid in resample"))?;
    let removed = remove_thread(&mut middle, leaf)?;

    // a bounded window pins the thread's attachment at both cut points so
    // the suture trees stay congruent with the untouched flanks
    let clamp_start = (a > start).then(|| removed.first().unwrap().1);
    let clamp_end = (b < end).then(|| removed.last().unwrap().1);

    let thread = sample_thread(
        model,
        &middle,
        sites,
        seqid,
        (clamp_start, clamp_end),
        rng,
    )?;
    add_thread(&mut middle, seqid, &thread.path, &thread.events)?;
    middle.reorder_leaves(&order)?;

    // left suture: reinstate a severed SPR edge, or merge congruent trees
    match edge_a {
        Some((spr, mapping)) => {
            let orig = orig_first.ok_or_else(|| ArgError::invariant("empty window"))?;
            let renum = map_congruent_trees(&orig, &order, &middle.blocks()[0].tree, &order);
            let composed: Vec<Option<usize>> = mapping
                .iter()
                .map(|m| m.and_then(|j| renum[j]))
                .collect();
            middle.blocks_mut()[0].spr = Some(spr);
            middle.blocks_mut()[0].mapping = Some(composed);
            trees.splice_end(middle)?;
        }
        None => trees.append(middle)?,
    }

    // right suture: the severed SPR's node ids live on the old middle tree
    // and must pass through the renumbering first
    if let Some(mut tail) = tail {
        match edge_b {
            Some((spr, mapping)) => {
                let orig = orig_last.ok_or_else(|| ArgError::invariant("empty window"))?;
                let last_tree = &trees
                    .blocks()
                    .last()
                    .ok_or_else(|| ArgError::invariant("empty splice"))?
                    .tree;
                let renum = map_congruent_trees(&orig, &order, last_tree, &order);
                let recomb_node = renum[spr.recomb_node]
                    .ok_or_else(|| ArgError::invariant("suture lost the recomb branch"))?;
                let coal_node = renum[spr.coal_node]
                    .ok_or_else(|| ArgError::invariant("suture lost the coal branch"))?;
                let spr2 = crate::arg::spr::Spr {
                    recomb_node,
                    coal_node,
                    ..spr
                };
                let mut composed = vec![None; last_tree.nnodes()];
                for (i, r) in renum.iter().enumerate() {
                    if let Some(ni) = r {
                        composed[*ni] = mapping[i];
                    }
                }
                tail.blocks_mut()[0].spr = Some(spr2);
                tail.blocks_mut()[0].mapping = Some(composed);
                trees.splice_end(tail)?;
            }
            None => trees.append(tail)?,
        }
    }
    trees.remove_null_sprs();
    trees.assert_valid()?;
    Ok(())
}

/// Builds an initial ARG by sequential threading: a single-leaf sequence
/// grows one sampled thread at a time.
pub fn sample_initial_arg(
    model: &ArgModel,
    sites: &Sites,
    rng: &mut impl Rng,
) -> Result<LocalTrees> {
    let mut trees = LocalTrees::from_tree(sites.start, sites.end, LocalTree::single_leaf());
    for seqid in 1..sites.nseqs() {
        sample_and_add_thread(model, &mut trees, sites, seqid, rng)?;
        debug!(seqid, nblocks = trees.nblocks(), "threaded sequence");
    }
    Ok(trees)
}

/// Driver options for the MCMC loop
#[derive(Debug, Clone, Copy)]
pub struct SamplerOpts {
    pub iters: usize,
    /// Resample a bounded window of this width instead of the full length
    pub window: Option<usize>,
    /// Resample every leaf over the full length each iteration
    pub gibbs: bool,
    /// Number of leading hill-climb iterations (keep only improvements)
    pub climb: usize,
}

impl Default for SamplerOpts {
    fn default() -> Self {
        Self {
            iters: 100,
            window: None,
            gibbs: false,
            climb: 0,
        }
    }
}

/// Runs the resampling loop, invoking `on_iter` after every iteration.
pub fn run_sampler(
    model: &ArgModel,
    trees: &mut LocalTrees,
    sites: &Sites,
    opts: &SamplerOpts,
    rng: &mut impl Rng,
    mut on_iter: impl FnMut(usize, &ArgStats, &LocalTrees) -> Result<()>,
) -> Result<()> {
    let nseqs = trees.nleaves();
    let mut best = arg_stats(model, trees, sites).joint;

    for iter in 1..=opts.iters {
        let climb = iter <= opts.climb;
        let backup = if climb { Some(trees.clone()) } else { None };

        let step = if opts.gibbs {
            let seqids: Vec<usize> = trees.seqids().to_vec();
            let mut r = Ok(());
            for seqid in seqids {
                r = resample_thread_window(model, trees, sites, seqid, None, rng);
                if r.is_err() {
                    break;
                }
            }
            r
        } else {
            let seqid = trees.seqids()[rng.gen_range(0..nseqs)];
            let window = opts.window.map(|w| {
                let span = trees.length();
                let w = w.min(span);
                let a = trees.start_coord() + rng.gen_range(0..=span - w);
                (a, a + w)
            });
            resample_thread_window(model, trees, sites, seqid, window, rng)
        };

        if let Err(e) = step {
            if matches!(e, ArgError::Numeric { .. }) {
                warn!(iter, "resample aborted: {e}");
            } else {
                return Err(e);
            }
        }

        let stats = arg_stats(model, trees, sites);
        if climb && stats.joint < best {
            if let Some(backup) = backup {
                *trees = backup;
            }
        } else {
            best = best.max(stats.joint);
        }

        let stats = arg_stats(model, trees, sites);
        on_iter(iter, &stats, trees)?;
    }
    Ok(())
}
