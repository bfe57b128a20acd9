//! # Thread Surgery
//!
//! Inserting a sampled thread into a block sequence and stripping one leaf
//! back out. Both operations renumber the node arena (leaves stay compact at
//! the bottom) and rewrite every SPR and node mapping so the chain invariants
//! survive.
//!
//! Insertion grows every tree by two nodes: the new leaf takes index
//! `nleaves`, old internal nodes shift up by one, and the thread's coalescent
//! node takes the top index. Within-block path changes become thread-side
//! SPRs (the recombination is on the thread's own branch); residual block
//! boundaries keep their SPR with node ids rerouted around the thread.

use std::collections::HashMap;

use crate::arg::spr::Spr;
use crate::arg::tree::{LocalNode, LocalTree};
use crate::arg::trees::{assert_spr, Block, LocalTrees, NodeMapping};
use crate::error::{ArgError, Result};
use crate::model::states::State;

/// Builds the threaded version of a residual tree: internal ids shifted up
/// by one, the thread leaf at `old_n`, and its coalescent node on branch
/// `state.node` at `state.time`.
pub fn thread_tree(tree: &LocalTree, state: State, old_n: usize) -> Result<LocalTree> {
    let shift = |i: usize| if i < old_n { i } else { i + 1 };
    let new_leaf = old_n;
    let new_coal = tree.nnodes() + 1;

    let mut nodes = vec![LocalNode::leaf(0); tree.nnodes() + 2];
    for i in 0..tree.nnodes() {
        let old = tree.node(i);
        nodes[shift(i)] = LocalNode {
            parent: old.parent.map(shift),
            children: [old.children[0].map(shift), old.children[1].map(shift)],
            age: old.age,
        };
    }

    let attach = shift(state.node);
    let old_parent = nodes[attach].parent;
    nodes[new_coal] = LocalNode {
        parent: old_parent,
        children: [Some(attach), Some(new_leaf)],
        age: state.time,
    };
    if let Some(p) = old_parent {
        let slot = if nodes[p].children[0] == Some(attach) { 0 } else { 1 };
        nodes[p].children[slot] = Some(new_coal);
    }
    nodes[attach].parent = Some(new_coal);
    nodes[new_leaf] = LocalNode {
        parent: Some(new_coal),
        children: [None, None],
        age: 0,
    };

    LocalTree::new(nodes)
}

/// Derives the SPR and mapping across a residual block boundary once the
/// thread is present on both sides.
///
/// The residual SPR keeps its meaning; node ids reroute through the thread's
/// coalescent node when the recombination or coalescence point lands on a
/// branch segment the thread's node now owns. The special sources (thread at
/// the recombination or coalescence point of the SPR) pick between the
/// "ride along" and "dissolve" realizations based on the sampled target.
#[allow(clippy::too_many_arguments)]
fn boundary_edge(
    prev_res: &LocalTree,
    prev_threaded: &LocalTree,
    prev_state: State,
    spr: &Spr,
    mapping: &NodeMapping,
    next_threaded: &LocalTree,
    next_state: State,
    old_n: usize,
) -> Result<(Spr, NodeMapping)> {
    let shift = |i: usize| if i < old_n { i } else { i + 1 };
    let new_leaf = old_n;
    let new_coal = prev_res.nnodes() + 1;

    let (r, rt) = (spr.recomb_node, spr.recomb_time);
    let (c, tc) = (spr.coal_node, spr.coal_time);
    let rp = prev_res
        .node(r)
        .parent
        .ok_or_else(|| ArgError::invariant("recomb branch has no parent"))?;
    let sib = prev_res
        .sibling_of(r)
        .ok_or_else(|| ArgError::invariant("broken node is unary"))?;
    let (v1, a) = (prev_state.node, prev_state.time);

    let (recomb2, coal2) = if (v1, a) == (r, rt) {
        // thread exactly at the prune point: either the cut falls below its
        // node (the thread dissolves onto the sibling) or above it (the
        // thread rides with the pruned pair)
        let dissolve =
            mapping[sib] == Some(next_state.node) && next_state.time == prev_res.node(rp).age;
        if dissolve {
            (shift(r), shift(c))
        } else {
            (new_coal, shift(c))
        }
    } else if (v1, a) == (c, tc) {
        // thread exactly at the landing point: the incoming lineage
        // coalesces just below or just above the thread's node
        let below = mapping[c] == Some(next_state.node) && next_state.time == tc;
        if below {
            (shift(r), new_coal)
        } else {
            (shift(r), shift(c))
        }
    } else {
        let recomb2 = if v1 == r && a < rt { new_coal } else { shift(r) };
        let coal2 = if v1 == c && a < tc { new_coal } else { shift(c) };
        (recomb2, coal2)
    };
    let spr2 = Spr::new(recomb2, rt, coal2, tc);

    let mut map2: NodeMapping = vec![None; prev_threaded.nnodes()];
    for i in 0..prev_res.nnodes() {
        map2[shift(i)] = mapping[i].map(shift);
    }
    map2[new_leaf] = Some(new_leaf);
    map2[new_coal] = Some(new_coal);

    let broken2 = prev_threaded
        .node(recomb2)
        .parent
        .ok_or_else(|| ArgError::invariant("threaded recomb branch has no parent"))?;
    if broken2 == new_coal {
        // the thread's node dissolves and reappears as the residual broken
        // node's continuation
        map2[shift(rp)] = Some(new_coal);
    }
    map2[broken2] = None;

    assert_spr(prev_threaded, next_threaded, &spr2, &map2)?;
    Ok((spr2, map2))
}

/// Inserts a sampled thread into `trees`.
///
/// `path` holds one state per position over the region, with node ids valid
/// for the residual tree of the block containing that position. `events`
/// maps each within-block change position to its sampled recombination time.
pub fn add_thread(
    trees: &mut LocalTrees,
    new_seqid: usize,
    path: &[State],
    events: &HashMap<usize, usize>,
) -> Result<()> {
    let start = trees.start_coord();
    if path.len() != trees.length() {
        return Err(ArgError::invariant("path length does not match region"));
    }
    let old_n = trees.nleaves();
    let new_leaf = old_n;
    let new_coal = trees.nnodes() + 1;
    let shift = |i: usize| if i < old_n { i } else { i + 1 };

    let old_blocks = std::mem::take(trees.blocks_mut());
    let mut new_blocks: Vec<Block> = Vec::with_capacity(old_blocks.len());
    let mut prev: Option<(LocalTree, LocalTree, State)> = None;

    let mut bstart = start;
    for block in old_blocks {
        let bend = bstart + block.blocklen;
        let s0 = path[bstart - start];
        let threaded0 = thread_tree(&block.tree, s0, old_n)?;

        // edge into this block's first sub-block
        let (mut edge_spr, mut edge_map) = match (&prev, &block.spr) {
            (None, _) => (None, None),
            (Some((prev_res, prev_threaded, prev_state)), Some(spr)) => {
                let mapping = block
                    .mapping
                    .as_ref()
                    .ok_or_else(|| ArgError::invariant("interior block lacks a mapping"))?;
                let (spr2, map2) = boundary_edge(
                    prev_res,
                    prev_threaded,
                    *prev_state,
                    spr,
                    mapping,
                    &threaded0,
                    s0,
                    old_n,
                )?;
                (Some(spr2), Some(map2))
            }
            (Some(_), None) => {
                // identity edge: extend the bijection over the new nodes
                let mapping = block
                    .mapping
                    .as_ref()
                    .ok_or_else(|| ArgError::invariant("interior block lacks a mapping"))?;
                let mut map2: NodeMapping = vec![None; threaded0.nnodes()];
                for (i, m) in mapping.iter().enumerate() {
                    map2[shift(i)] = m.map(shift);
                }
                map2[new_leaf] = Some(new_leaf);
                map2[new_coal] = Some(new_coal);
                (None, Some(map2))
            }
        };

        let mut seg_start = bstart;
        let mut cur_state = s0;
        let mut cur_tree = threaded0;
        for p in bstart + 1..bend {
            let s = path[p - start];
            if s == cur_state {
                continue;
            }

            new_blocks.push(Block {
                tree: cur_tree.clone(),
                spr: edge_spr,
                mapping: edge_map.take(),
                blocklen: p - seg_start,
            });

            // thread-side SPR: the recombination is on the thread's branch;
            // moving up the same branch re-coalesces above its own node
            let k = *events
                .get(&p)
                .ok_or_else(|| ArgError::invariant(format!("missing recomb time at {p}")))?;
            let coal_node = if s.node == cur_state.node && s.time > cur_state.time {
                new_coal
            } else {
                shift(s.node)
            };
            let spr = Spr::new(new_leaf, k, coal_node, s.time);
            let mut next_tree = cur_tree.clone();
            next_tree.apply_spr(&spr)?;

            let mut map: NodeMapping = (0..cur_tree.nnodes()).map(Some).collect();
            map[new_coal] = None;
            edge_spr = Some(spr);
            edge_map = Some(map);
            cur_state = s;
            cur_tree = next_tree;
            seg_start = p;
        }

        new_blocks.push(Block {
            tree: cur_tree.clone(),
            spr: edge_spr,
            mapping: edge_map,
            blocklen: bend - seg_start,
        });
        prev = Some((block.tree, cur_tree, cur_state));
        bstart = bend;
    }

    *trees.blocks_mut() = new_blocks;
    trees.seqids_mut().push(new_seqid);
    debug_assert!(trees.assert_valid().is_ok());
    Ok(())
}

/// Removes leaf index `leaf` from every block, shrinking each tree by one
/// leaf and rewriting every edge so the sequence stays consistent.
///
/// Edges whose SPR rode on the removed thread become null and are merged
/// away. Returns the removed thread's piecewise path as
/// `(blocklen, attachment state)` records in post-removal node ids.
pub fn remove_thread(trees: &mut LocalTrees, leaf: usize) -> Result<Vec<(usize, State)>> {
    let old_n = trees.nleaves();
    if old_n < 2 {
        return Err(ArgError::invariant("cannot remove the last leaf"));
    }
    if leaf >= old_n {
        return Err(ArgError::invariant("leaf index out of range"));
    }

    struct Surgery {
        u: usize,
        attach: usize,
        u_age: usize,
    }
    let perm = |surg: &Surgery, i: usize| -> Option<usize> {
        if i == leaf || i == surg.u {
            None
        } else {
            Some(i - usize::from(i > leaf) - usize::from(i > surg.u))
        }
    };

    // per-block structural surgery
    let mut surgeries = Vec::with_capacity(trees.nblocks());
    let mut new_trees = Vec::with_capacity(trees.nblocks());
    let mut removed_path = Vec::with_capacity(trees.nblocks());
    for block in trees.blocks() {
        let tree = &block.tree;
        let u = tree
            .node(leaf)
            .parent
            .ok_or_else(|| ArgError::invariant("leaf has no parent"))?;
        let attach = tree
            .sibling_of(leaf)
            .ok_or_else(|| ArgError::invariant("thread node is unary"))?;
        let surg = Surgery {
            u,
            attach,
            u_age: tree.node(u).age,
        };

        let nnodes = tree.nnodes() - 2;
        let mut parents = vec![None; nnodes];
        let mut ages = vec![0; nnodes];
        for i in 0..tree.nnodes() {
            let Some(ni) = perm(&surg, i) else { continue };
            let old_parent = if i == attach {
                tree.node(u).parent
            } else {
                tree.node(i).parent
            };
            parents[ni] = old_parent.and_then(|p| perm(&surg, p));
            ages[ni] = tree.node(i).age;
        }
        new_trees.push(LocalTree::from_parents(&parents, &ages)?);
        removed_path.push((
            block.blocklen,
            State::new(perm(&surg, attach).unwrap(), surg.u_age),
        ));
        surgeries.push(surg);
    }

    // rewrite edges
    for bi in 0..trees.nblocks() {
        let (spr2, map2): (Option<Spr>, Option<NodeMapping>) = if bi == 0 {
            (None, None)
        } else {
            let sp = &surgeries[bi - 1];
            let sn = &surgeries[bi];
            let block = &trees.blocks()[bi];
            let mapping = block
                .mapping
                .as_ref()
                .ok_or_else(|| ArgError::invariant("interior block lacks a mapping"))?;
            let compose = |mapping: &NodeMapping| -> NodeMapping {
                let old = trees.blocks()[bi - 1].tree.nnodes();
                let mut out = vec![None; old - 2];
                for i in 0..old {
                    if let Some(ni) = perm(sp, i) {
                        out[ni] = mapping[i].and_then(|j| perm(sn, j));
                    }
                }
                out
            };

            match &block.spr {
                None => (None, Some(compose(mapping))),
                Some(spr) if spr.recomb_node == leaf => {
                    // the SPR only moved the thread; residually an identity
                    (None, Some(compose(mapping)))
                }
                Some(spr) => {
                    let r2 = if spr.recomb_node == sp.u {
                        sp.attach
                    } else {
                        spr.recomb_node
                    };
                    let (c2, tc2) = if spr.coal_node == leaf {
                        (sp.attach, sp.u_age)
                    } else if spr.coal_node == sp.u {
                        (sp.attach, spr.coal_time)
                    } else {
                        (spr.coal_node, spr.coal_time)
                    };
                    if r2 == c2 {
                        // prune and re-coalescence collapse onto one branch
                        (None, Some(compose(mapping)))
                    } else {
                        let spr2 = Spr::new(
                            perm(sp, r2).unwrap(),
                            spr.recomb_time,
                            perm(sp, c2).unwrap(),
                            tc2,
                        );
                        (Some(spr2), Some(compose(mapping)))
                    }
                }
            }
        };

        let block = &mut trees.blocks_mut()[bi];
        block.tree = new_trees[bi].clone();
        block.spr = spr2;
        block.mapping = map2;
    }

    trees.seqids_mut().remove(leaf);
    trees.remove_null_sprs();
    debug_assert!(trees.assert_valid().is_ok());
    Ok(removed_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_leaf_tree() -> LocalTree {
        LocalTree::from_parents(&[Some(2), Some(2), None], &[0, 0, 2]).unwrap()
    }

    #[test]
    fn test_thread_tree_attach_mid_branch() {
        let tree = two_leaf_tree();
        let threaded = thread_tree(&tree, State::new(1, 1), 2).unwrap();
        threaded.validate().unwrap();
        assert_eq!(threaded.nleaves(), 3);
        // thread leaf 2 under its coal node 4 at time 1, on old leaf 1
        assert_eq!(threaded.node(2).parent, Some(4));
        assert_eq!(threaded.node(1).parent, Some(4));
        assert_eq!(threaded.node(4).age, 1);
        assert_eq!(threaded.node(4).parent, Some(3));
        assert_eq!(threaded.root(), 3);
    }

    #[test]
    fn test_thread_tree_attach_above_root() {
        let tree = two_leaf_tree();
        let threaded = thread_tree(&tree, State::new(2, 3), 2).unwrap();
        threaded.validate().unwrap();
        assert_eq!(threaded.root(), 4);
        assert_eq!(threaded.node(4).age, 3);
        assert_eq!(threaded.node(3).parent, Some(4));
    }

    #[test]
    fn test_add_thread_constant_path() {
        let tree = two_leaf_tree();
        let mut trees = LocalTrees::from_tree(0, 50, tree);
        let path = vec![State::new(1, 1); 50];
        add_thread(&mut trees, 2, &path, &HashMap::new()).unwrap();

        trees.assert_valid().unwrap();
        assert_eq!(trees.nleaves(), 3);
        assert_eq!(trees.nblocks(), 1);
        assert_eq!(trees.seqids(), &[0, 1, 2]);
        assert_eq!(trees.nrecombs(), 0);
    }

    #[test]
    fn test_add_thread_with_change() {
        let tree = two_leaf_tree();
        let mut trees = LocalTrees::from_tree(0, 50, tree);
        let mut path = vec![State::new(1, 1); 50];
        for s in path.iter_mut().skip(30) {
            *s = State::new(0, 2);
        }
        let mut events = HashMap::new();
        events.insert(30usize, 1usize);

        add_thread(&mut trees, 2, &path, &events).unwrap();
        trees.assert_valid().unwrap();
        assert_eq!(trees.nblocks(), 2);
        assert_eq!(trees.nrecombs(), 1);
        let spr = trees.blocks()[1].spr.unwrap();
        // the recombination rides the thread's own branch
        assert_eq!(spr.recomb_node, 2);
        assert_eq!(spr.recomb_time, 1);
        assert_eq!(spr.coal_node, 0);
        assert_eq!(spr.coal_time, 2);
    }

    #[test]
    fn test_add_thread_same_branch_up() {
        // moving up the same branch re-coalesces above the thread's own node
        let tree = two_leaf_tree();
        let mut trees = LocalTrees::from_tree(0, 10, tree);
        let mut path = vec![State::new(1, 0); 10];
        for s in path.iter_mut().skip(4) {
            *s = State::new(1, 2);
        }
        let mut events = HashMap::new();
        events.insert(4usize, 0usize);

        add_thread(&mut trees, 2, &path, &events).unwrap();
        trees.assert_valid().unwrap();
        let spr = trees.blocks()[1].spr.unwrap();
        assert_eq!(spr.recomb_node, 2);
        assert_eq!(spr.coal_node, 4);
        assert_eq!(spr.coal_time, 2);
    }

    #[test]
    fn test_remove_thread_inverts_add() {
        let tree = two_leaf_tree();
        let mut trees = LocalTrees::from_tree(0, 50, tree);
        let original = trees.clone();

        let mut path = vec![State::new(1, 1); 50];
        for s in path.iter_mut().skip(30) {
            *s = State::new(0, 2);
        }
        let mut events = HashMap::new();
        events.insert(30usize, 1usize);
        add_thread(&mut trees, 2, &path, &events).unwrap();

        let removed = remove_thread(&mut trees, 2).unwrap();
        trees.assert_valid().unwrap();
        assert_eq!(trees.nleaves(), 2);
        assert_eq!(trees.seqids(), original.seqids());
        // the thread's SPR vanishes and the blocks merge back
        assert_eq!(trees.nblocks(), 1);
        assert_eq!(trees.nrecombs(), 0);
        assert_eq!(trees.blocks()[0].tree, original.blocks()[0].tree);
        // the removed path reports both attachment segments
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0], (30, State::new(1, 1)));
        assert_eq!(removed[1], (20, State::new(0, 2)));
    }

    #[test]
    fn test_remove_thread_to_single_leaf() {
        let tree = two_leaf_tree();
        let mut trees = LocalTrees::from_tree(0, 20, tree);
        remove_thread(&mut trees, 0).unwrap();
        trees.assert_valid().unwrap();
        assert_eq!(trees.nleaves(), 1);
        assert_eq!(trees.nblocks(), 1);
        assert_eq!(trees.blocks()[0].tree.nnodes(), 1);
        assert_eq!(trees.seqids(), &[1]);
    }
}
