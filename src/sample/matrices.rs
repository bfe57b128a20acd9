//! # Per-Block Matrix Assembly
//!
//! For each block of the residual ARG the sampler needs the state space, the
//! compressed transition operator, the switch operator from the previous
//! block, and one log-emission column per position. Blocks are independent
//! given their trees, so the expensive pieces build in parallel.

use rayon::prelude::*;

use crate::arg::trees::LocalTrees;
use crate::error::{ArgError, Result};
use crate::io::sites::Sites;
use crate::model::emit::{emission_column, Base};
use crate::model::params::ArgModel;
use crate::model::states::{LineageCounts, States};
use crate::model::trans::{calc_state_priors, TransMatrix, TransMatrixSwitch};

/// Everything the forward pass needs for one block
pub struct BlockMatrices {
    pub start: usize,
    pub len: usize,
    pub states: States,
    /// Node ages of the block's tree, indexed by node
    pub ages: Vec<usize>,
    pub trans: TransMatrix,
    /// Switch operator from the previous block; `None` on the first block
    pub switch: Option<TransMatrixSwitch>,
    /// Log emissions per position; `None` marks a neutral (invariant) column
    pub emit: Vec<Option<Vec<f64>>>,
    /// Log state priors under the coalescent
    pub priors: Vec<f64>,
}

impl BlockMatrices {
    /// Log emission of state `j` at block offset `off`
    #[inline]
    pub fn emission(&self, off: usize, j: usize) -> f64 {
        match &self.emit[off] {
            Some(col) => col[j],
            None => 0.0,
        }
    }
}

/// The alignment column a threading run sees at one position: the residual
/// leaves' bases in leaf order plus the thread's own base.
pub fn thread_column(
    sites: &Sites,
    seqids: &[usize],
    thread_seqid: usize,
    pos: usize,
) -> Option<(Vec<Base>, Base)> {
    let full = sites.column_at(pos)?;
    let column: Vec<Base> = seqids.iter().map(|&s| full[s]).collect();
    Some((column, full[thread_seqid]))
}

/// Builds matrices for every block of the residual ARG, threading sequence
/// `thread_seqid` of `sites`.
pub fn assemble(
    model: &ArgModel,
    trees: &LocalTrees,
    sites: &Sites,
    thread_seqid: usize,
) -> Result<Vec<BlockMatrices>> {
    if trees.start_coord() < sites.start || trees.end_coord() > sites.end {
        return Err(ArgError::invariant("trees extend beyond the sites region"));
    }
    let ntimes = model.ntimes();

    // state spaces first; switch assembly for block i reads block i-1's
    let mut starts = Vec::with_capacity(trees.nblocks());
    let mut pos = trees.start_coord();
    for block in trees.blocks() {
        starts.push(pos);
        pos += block.blocklen;
    }
    let states: Vec<States> = trees
        .blocks()
        .iter()
        .map(|b| States::enumerate(&b.tree, ntimes))
        .collect();

    let blocks: Vec<&crate::arg::trees::Block> = trees.blocks().iter().collect();
    (0..blocks.len())
        .into_par_iter()
        .map(|bi| {
            let block = blocks[bi];
            let tree = &block.tree;
            let bstart = starts[bi];
            let lineages = LineageCounts::count(tree, ntimes);
            let local = model.local_model(bstart);
            let trans = TransMatrix::calculate(&local, tree, &lineages);
            let priors = calc_state_priors(&local, &lineages, &states[bi]);
            let ages: Vec<usize> = (0..tree.nnodes()).map(|i| tree.node(i).age).collect();

            let switch = match (&block.spr, &block.mapping, bi) {
                (Some(spr), Some(mapping), _) if bi > 0 => Some(TransMatrixSwitch::calculate(
                    &local,
                    &blocks[bi - 1].tree,
                    tree,
                    spr,
                    mapping,
                    &states[bi - 1],
                    &states[bi],
                )),
                (None, Some(mapping), _) if bi > 0 => {
                    // identity edge: every state maps through the bijection
                    Some(identity_switch(
                        mapping,
                        &states[bi - 1],
                        &states[bi],
                    ))
                }
                _ => None,
            };

            // emissions, batched: invariant positions share the neutral
            // column; variant positions get a pruning pass each
            let emit: Vec<Option<Vec<f64>>> = (bstart..bstart + block.blocklen)
                .map(|p| {
                    thread_column(sites, trees.seqids(), thread_seqid, p).map(
                        |(column, thread_base)| {
                            emission_column(
                                &model.local_model(p),
                                tree,
                                &states[bi],
                                &column,
                                thread_base,
                            )
                        },
                    )
                })
                .collect();

            Ok(BlockMatrices {
                start: bstart,
                len: block.blocklen,
                states: states[bi].clone(),
                ages,
                trans,
                switch,
                emit,
                priors,
            })
        })
        .collect()
}

/// Switch operator for a null edge: the bijective node mapping carries every
/// state across unchanged.
fn identity_switch(
    mapping: &crate::arg::trees::NodeMapping,
    states1: &States,
    states2: &States,
) -> TransMatrixSwitch {
    let determ = states1
        .iter()
        .map(|s| mapping[s.node].and_then(|n2| states2.find(n2, s.time)))
        .collect();
    TransMatrixSwitch {
        recoalsrc: None,
        recombsrc: None,
        determ,
        determprob: vec![0.0; states1.len()],
        recoalrow: vec![f64::NEG_INFINITY; states2.len()],
        recombrow: vec![f64::NEG_INFINITY; states2.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::tree::LocalTree;
    use crate::model::time::TimeGrid;

    fn setup() -> (ArgModel, LocalTrees, Sites) {
        let grid = TimeGrid::from_points(&[0.0, 100.0, 1000.0, 5000.0, 20_000.0]).unwrap();
        let model = ArgModel::new(grid, 1e4, 1e-8, 2e-8).unwrap();
        let tree = LocalTree::from_parents(&[Some(2), Some(2), None], &[0, 0, 2]).unwrap();
        let trees = LocalTrees::from_tree(0, 30, tree);
        let text = "NAMES\ta\tb\tc\nREGION\tchr1\t1\t30\n5\tACA\n12\tAAT\n";
        let sites = Sites::parse(text.as_bytes()).unwrap();
        (model, trees, sites)
    }

    #[test]
    fn test_assemble_single_block() {
        let (model, trees, sites) = setup();
        let mats = assemble(&model, &trees, &sites, 2).unwrap();
        assert_eq!(mats.len(), 1);
        let m = &mats[0];
        assert_eq!(m.len, 30);
        assert!(m.switch.is_none());
        // positions 4 and 11 carry data, the rest are neutral
        assert!(m.emit[4].is_some());
        assert!(m.emit[11].is_some());
        assert!(m.emit[0].is_none());
        assert_eq!(m.emission(0, 0), 0.0);
        assert!(m.emission(4, 0) < 0.0);
    }

    #[test]
    fn test_thread_column_permutes() {
        let (_, mut trees, sites) = setup();
        *trees.seqids_mut() = vec![1, 0];
        let (col, thread) = thread_column(&sites, trees.seqids(), 2, 4).unwrap();
        // full column at pos 4 is A,C,A; residual leaves are seqids 1,0
        assert_eq!(col, vec![Some(1), Some(0)]);
        assert_eq!(thread, Some(0));
        assert!(thread_column(&sites, trees.seqids(), 2, 3).is_none());
    }
}
