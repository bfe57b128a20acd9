//! # Local Tree Sequences
//!
//! A `LocalTrees` is the ordered sequence of (tree, SPR, node mapping, block
//! length) records spanning `[start, end)` on a chromosome. Adjacent trees
//! share most of their structure: each block records the SPR that produced
//! its tree from the previous one and a node-to-node mapping, with the node
//! broken by the SPR mapping to none.

use crate::arg::spr::Spr;
use crate::arg::tree::LocalTree;
use crate::error::{ArgError, Result};

/// Node correspondence between adjacent trees
pub type NodeMapping = Vec<Option<usize>>;

/// One maximal genomic interval over which the local tree is constant
#[derive(Debug, Clone)]
pub struct Block {
    pub tree: LocalTree,
    /// SPR from the previous block's tree; `None` denotes identity
    pub spr: Option<Spr>,
    /// Mapping from the previous block's nodes; `None` only on the first block
    pub mapping: Option<NodeMapping>,
    pub blocklen: usize,
}

/// Ordered sequence of local trees connected by SPRs
#[derive(Debug, Clone)]
pub struct LocalTrees {
    blocks: Vec<Block>,
    start_coord: usize,
    end_coord: usize,
    /// External sequence id of each leaf index
    seqids: Vec<usize>,
}

/// Returns a mapping from nodes in `tree1` to equivalent nodes in `tree2`.
///
/// Leaves are matched on sequence id; internal nodes reconcile in postorder
/// as the common parent of their mapped children, inheriting a single child's
/// image when only one maps. Two topologically identical trees with the same
/// id tables yield a bijection.
pub fn map_congruent_trees(
    tree1: &LocalTree,
    seqids1: &[usize],
    tree2: &LocalTree,
    seqids2: &[usize],
) -> NodeMapping {
    let mut mapping: NodeMapping = vec![None; tree1.nnodes()];

    // reconcile leaves
    for (i, seqid) in seqids1.iter().enumerate() {
        mapping[i] = seqids2.iter().position(|s| s == seqid);
    }

    // reconcile internal nodes bottom-up
    for j in tree1.postorder() {
        if tree1.is_leaf(j) {
            continue;
        }
        let c = tree1.node(j).children;
        let m0 = c[0].and_then(|x| mapping[x]);
        let m1 = c[1].and_then(|x| mapping[x]);
        mapping[j] = match (m0, m1) {
            (Some(a), Some(b)) => {
                let pa = tree2.node(a).parent;
                if pa == tree2.node(b).parent {
                    pa
                } else {
                    None
                }
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }
    mapping
}

/// Checks that an SPR edge between two adjacent trees is structurally sound.
pub fn assert_spr(
    last_tree: &LocalTree,
    tree: &LocalTree,
    spr: &Spr,
    mapping: &NodeMapping,
) -> Result<()> {
    // the recomb-bearing branch cannot be the broken one
    let recomb_image = mapping[spr.recomb_node]
        .ok_or_else(|| ArgError::invariant("recomb branch maps to nothing"))?;

    if !spr.is_valid_on(last_tree) {
        return Err(ArgError::invariant("SPR illegal on its pre-image tree"));
    }

    // the recoal node must join the recomb branch with the coal branch
    let recoal = tree
        .node(recomb_image)
        .parent
        .ok_or_else(|| ArgError::invariant("recomb image has no recoal parent"))?;
    let c = tree.node(recoal).children;
    let other = if c[0] == Some(recomb_image) { c[1] } else { c[0] };

    match mapping[spr.coal_node] {
        Some(coal_image) => {
            // the mapped coal branch hangs under the recoal node, possibly
            // through younger interposed nodes
            let mut cur = coal_image;
            loop {
                match tree.node(cur).parent {
                    Some(p) if p == recoal => {
                        if other != Some(cur) {
                            return Err(ArgError::invariant(
                                "recoal sibling is not the mapped coal branch",
                            ));
                        }
                        break;
                    }
                    Some(p) if tree.node(p).age <= spr.coal_time => cur = p,
                    _ => {
                        return Err(ArgError::invariant(
                            "recoal node does not sit above the coal branch",
                        ))
                    }
                }
            }
        }
        None => {
            // the coal branch was the broken one; its surviving child stands
            // in, possibly with younger nodes interposed on the way up
            let last_other = last_tree
                .sibling_of(spr.recomb_node)
                .ok_or_else(|| ArgError::invariant("broken node is unary"))?;
            let sib_image = mapping[last_other]
                .ok_or_else(|| ArgError::invariant("recomb sibling maps to nothing"))?;
            let mut cur = sib_image;
            loop {
                match tree.node(cur).parent {
                    Some(p) if p == recoal => break,
                    Some(p) if tree.node(p).age <= spr.coal_time => cur = p,
                    _ => {
                        return Err(ArgError::invariant(
                            "recoal node does not sit above the mapped sibling",
                        ))
                    }
                }
            }
        }
    }
    Ok(())
}

impl LocalTrees {
    /// An empty sequence over `[start, end)`
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            blocks: Vec::new(),
            start_coord: start,
            end_coord: end,
            seqids: Vec::new(),
        }
    }

    /// A sequence holding one tree across the whole region, default seqids
    pub fn from_tree(start: usize, end: usize, tree: LocalTree) -> Self {
        let seqids = (0..tree.nleaves()).collect();
        Self {
            blocks: vec![Block {
                tree,
                spr: None,
                mapping: None,
                blocklen: end - start,
            }],
            start_coord: start,
            end_coord: end,
            seqids,
        }
    }

    pub fn start_coord(&self) -> usize {
        self.start_coord
    }

    pub fn end_coord(&self) -> usize {
        self.end_coord
    }

    pub fn length(&self) -> usize {
        self.end_coord - self.start_coord
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    pub fn seqids(&self) -> &[usize] {
        &self.seqids
    }

    pub fn seqids_mut(&mut self) -> &mut Vec<usize> {
        &mut self.seqids
    }

    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn nleaves(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.tree.nleaves())
    }

    pub fn nnodes(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.tree.nnodes())
    }

    /// Index and start coordinate of the block containing `pos`
    pub fn block_at(&self, pos: usize) -> Option<(usize, usize)> {
        let mut start = self.start_coord;
        for (i, block) in self.blocks.iter().enumerate() {
            let end = start + block.blocklen;
            if pos >= start && pos < end {
                return Some((i, start));
            }
            start = end;
        }
        None
    }

    /// Total branch length integrated over the region, in generation-sites
    pub fn arglen(&self, grid: &crate::model::time::TimeGrid) -> f64 {
        self.blocks
            .iter()
            .map(|b| b.tree.treelen(grid, false) * b.blocklen as f64)
            .sum()
    }

    /// Number of recombination events (non-null SPRs)
    pub fn nrecombs(&self) -> usize {
        self.blocks.iter().filter(|b| b.spr.is_some()).count()
    }

    /// Structural validation of the whole chain: the first block carries no
    /// SPR or mapping, every tree is valid, every non-null edge satisfies
    /// `assert_spr`, null edges carry bijections, and block lengths sum to
    /// the region length.
    pub fn assert_valid(&self) -> Result<()> {
        let mut seqlen = 0;
        let mut last_tree: Option<&LocalTree> = None;

        if let Some(first) = self.blocks.first() {
            if first.spr.is_some() || first.mapping.is_some() {
                return Err(ArgError::invariant("first block must be edge-free"));
            }
            if first.tree.nleaves() != self.seqids.len() {
                return Err(ArgError::invariant("seqid table does not match leaves"));
            }
        }

        for block in &self.blocks {
            if block.blocklen == 0 {
                return Err(ArgError::invariant("empty block"));
            }
            seqlen += block.blocklen;
            block.tree.validate()?;

            if let Some(prev) = last_tree {
                let mapping = block
                    .mapping
                    .as_ref()
                    .ok_or_else(|| ArgError::invariant("interior block lacks a mapping"))?;
                match &block.spr {
                    None => {
                        // identity edge: mapping must be a bijection
                        let mut seen = vec![false; block.tree.nnodes()];
                        for m in mapping {
                            let j = m.ok_or_else(|| {
                                ArgError::invariant("null-SPR mapping must be total")
                            })?;
                            if seen[j] {
                                return Err(ArgError::invariant("null-SPR mapping not injective"));
                            }
                            seen[j] = true;
                        }
                    }
                    Some(spr) => assert_spr(prev, &block.tree, spr, mapping)?,
                }
            }
            last_tree = Some(&block.tree);
        }

        if seqlen != self.length() {
            return Err(ArgError::invariant("block lengths do not sum to region"));
        }
        Ok(())
    }

    /// Merges block `i` into its successor when the successor's SPR is null.
    ///
    /// The successor keeps its tree; the mapping becomes the transitive
    /// composition and the predecessor's SPR carries over. Returns true if a
    /// merge happened.
    pub fn remove_null_spr(&mut self, i: usize) -> bool {
        if i + 1 >= self.blocks.len() || self.blocks[i + 1].spr.is_some() {
            return false;
        }

        match self.blocks[i].mapping.take() {
            None => {
                // successor becomes the first block
                self.blocks[i + 1].mapping = None;
                self.blocks[i + 1].spr = None;
            }
            Some(m1) => {
                let m2 = self.blocks[i + 1]
                    .mapping
                    .as_ref()
                    .expect("interior block lacks a mapping");
                let composed: NodeMapping =
                    m1.iter().map(|m| m.and_then(|j| m2[j])).collect();
                self.blocks[i + 1].mapping = Some(composed);
                self.blocks[i + 1].spr = self.blocks[i].spr;
            }
        }

        self.blocks[i + 1].blocklen += self.blocks[i].blocklen;
        self.blocks.remove(i);
        true
    }

    /// Removes every null-SPR edge by merging blocks
    pub fn remove_null_sprs(&mut self) {
        let mut i = 0;
        while i < self.blocks.len() {
            if !self.remove_null_spr(i) {
                i += 1;
            }
        }
    }

    /// Splits the sequence at `pos`, returning the right part `[pos, end)`
    /// plus the SPR edge the cut severed, if the cut fell exactly on a
    /// recombination boundary.
    ///
    /// A block straddling `pos` is duplicated: the left keeps a copy of its
    /// tree truncated to `pos`, the right restarts edge-free. Callers that
    /// re-concatenate later hand the severed edge back to the splice.
    pub fn partition(&mut self, pos: usize) -> Result<(LocalTrees, Option<(Spr, NodeMapping)>)> {
        let (idx, block_start) = self
            .block_at(pos)
            .ok_or_else(|| ArgError::invariant(format!("partition point {pos} out of range")))?;

        let mut right = LocalTrees {
            blocks: self.blocks.split_off(idx),
            start_coord: pos,
            end_coord: self.end_coord,
            seqids: self.seqids.clone(),
        };

        let mut severed = None;
        if pos > block_start {
            // copy the straddling tree back as the left's final block
            let first = &mut right.blocks[0];
            self.blocks.push(Block {
                tree: first.tree.clone(),
                spr: first.spr,
                mapping: first.mapping.clone(),
                blocklen: pos - block_start,
            });
            first.blocklen -= pos - block_start;
        } else if let (Some(spr), Some(mapping)) =
            (right.blocks[0].spr, right.blocks[0].mapping.take())
        {
            severed = Some((spr, mapping));
        }

        // the right part starts fresh
        right.blocks[0].spr = None;
        right.blocks[0].mapping = None;
        self.end_coord = pos;

        Ok((right, severed))
    }

    /// Concatenates `other` whose first block's edge has already been set by
    /// the caller (a reinstated SPR across the suture).
    pub fn splice_end(&mut self, mut other: LocalTrees) -> Result<()> {
        if other.start_coord != self.end_coord {
            return Err(ArgError::invariant("spliced sequence is not contiguous"));
        }
        if other.seqids != self.seqids {
            return Err(ArgError::invariant("spliced sequence has different seqids"));
        }
        self.blocks.append(&mut other.blocks);
        self.end_coord = other.end_coord;
        Ok(())
    }

    /// Appends `other` (which must continue at `self.end_coord` with the same
    /// seqids), recomputing the suture mapping and absorbing the redundant
    /// null edge.
    pub fn append(&mut self, mut other: LocalTrees) -> Result<()> {
        if other.start_coord != self.end_coord {
            return Err(ArgError::invariant("appended sequence is not contiguous"));
        }
        if other.seqids != self.seqids && !self.blocks.is_empty() {
            return Err(ArgError::invariant("appended sequence has different seqids"));
        }
        if other.blocks.is_empty() {
            self.end_coord = other.end_coord;
            return Ok(());
        }

        let suture = self.blocks.len().saturating_sub(1);
        let left_tree = match self.blocks.last() {
            Some(b) => b.tree.clone(),
            None => {
                // appending onto an empty sequence is a move
                self.blocks = std::mem::take(&mut other.blocks);
                self.seqids = std::mem::take(&mut other.seqids);
                self.end_coord = other.end_coord;
                return Ok(());
            }
        };

        self.end_coord = other.end_coord;
        self.blocks.append(&mut other.blocks);

        let first_right = &mut self.blocks[suture + 1];
        let mapping = map_congruent_trees(
            &left_tree,
            &self.seqids,
            &first_right.tree,
            &self.seqids,
        );
        first_right.mapping = Some(mapping);

        if !self.remove_null_spr(suture) {
            return Err(ArgError::invariant("suture edge was not null"));
        }
        Ok(())
    }

    /// Relabels leaf indices so the seqid table becomes `new_seqids` (the
    /// same ids in a different order). Internal node indices are untouched;
    /// every tree, SPR, and mapping is rewritten consistently.
    pub fn reorder_leaves(&mut self, new_seqids: &[usize]) -> Result<()> {
        let nleaves = self.nleaves();
        if new_seqids.len() != nleaves {
            return Err(ArgError::invariant("seqid count mismatch in reorder"));
        }
        let mut relabel: Vec<usize> = (0..self.nnodes()).collect();
        for (i, seqid) in self.seqids.iter().enumerate() {
            relabel[i] = new_seqids
                .iter()
                .position(|s| s == seqid)
                .ok_or_else(|| ArgError::invariant("seqid missing in reorder"))?;
        }

        for block in &mut self.blocks {
            let old = block.tree.clone();
            let mut nodes = vec![*old.node(0); old.nnodes()];
            for i in 0..old.nnodes() {
                let n = old.node(i);
                nodes[relabel[i]] = crate::arg::tree::LocalNode {
                    parent: n.parent.map(|p| relabel[p]),
                    children: [
                        n.children[0].map(|c| relabel[c]),
                        n.children[1].map(|c| relabel[c]),
                    ],
                    age: n.age,
                };
            }
            block.tree = LocalTree::new(nodes)?;

            if let Some(spr) = &mut block.spr {
                spr.recomb_node = relabel[spr.recomb_node];
                spr.coal_node = relabel[spr.coal_node];
            }
            if let Some(mapping) = &mut block.mapping {
                let old_map = mapping.clone();
                for (i, m) in old_map.iter().enumerate() {
                    mapping[relabel[i]] = m.map(|j| relabel[j]);
                }
            }
        }
        self.seqids = new_seqids.to_vec();
        Ok(())
    }

    /// Canonical permuted export of the chain: per block, parent and age
    /// arrays indexed by external leaf id, the SPR in external ids, and the
    /// block length.
    pub fn export_blocks(&self) -> Vec<ExportedBlock> {
        let nleaves = self.nleaves();
        let nnodes = self.nnodes();
        let mut perm: Vec<usize> = (0..nnodes).collect();
        for i in 0..nleaves {
            perm[i] = self.seqids[i];
        }

        self.blocks
            .iter()
            .map(|block| {
                let mut parents = vec![None; nnodes];
                let mut ages = vec![0; nnodes];
                for j in 0..nnodes {
                    parents[perm[j]] = block.tree.node(j).parent.map(|p| perm[p]);
                    ages[perm[j]] = block.tree.node(j).age;
                }
                let spr = block.spr.map(|s| Spr {
                    recomb_node: perm[s.recomb_node],
                    coal_node: perm[s.coal_node],
                    ..s
                });
                ExportedBlock {
                    parents,
                    ages,
                    spr,
                    blocklen: block.blocklen,
                }
            })
            .collect()
    }
}

/// One block of `export_blocks` output, in external leaf-id order
#[derive(Debug, Clone)]
pub struct ExportedBlock {
    pub parents: Vec<Option<usize>>,
    pub ages: Vec<usize>,
    pub spr: Option<Spr>,
    pub blocklen: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_leaf_tree() -> LocalTree {
        LocalTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0, 0, 0, 1, 2],
        )
        .unwrap()
    }

    /// Two blocks joined by the SPR (0, 0) -> (2, 1)
    fn two_block_trees() -> LocalTrees {
        let t1 = three_leaf_tree();
        let spr = Spr::new(0, 0, 2, 1);
        let mut t2 = t1.clone();
        t2.apply_spr(&spr).unwrap();

        // identity mapping except the broken node
        let broken = t1.node(0).parent.unwrap();
        let mapping: NodeMapping = (0..t1.nnodes())
            .map(|i| if i == broken { None } else { Some(i) })
            .collect();

        let mut trees = LocalTrees::from_tree(0, 100, t1);
        trees.blocks_mut().first_mut().unwrap().blocklen = 40;
        trees.blocks_mut().push(Block {
            tree: t2,
            spr: Some(spr),
            mapping: Some(mapping),
            blocklen: 60,
        });
        trees
    }

    #[test]
    fn test_assert_valid_chain() {
        let trees = two_block_trees();
        trees.assert_valid().unwrap();
        assert_eq!(trees.length(), 100);
        assert_eq!(trees.nrecombs(), 1);
    }

    #[test]
    fn test_map_congruent_identity() {
        let t = three_leaf_tree();
        let ids = [0, 1, 2];
        let mapping = map_congruent_trees(&t, &ids, &t, &ids);
        for (i, m) in mapping.iter().enumerate() {
            assert_eq!(*m, Some(i));
        }
    }

    #[test]
    fn test_map_congruent_permuted_leaves() {
        let t1 = three_leaf_tree();
        let t2 = three_leaf_tree();
        // same topology, leaves named differently
        let mapping = map_congruent_trees(&t1, &[10, 11, 12], &t2, &[12, 10, 11]);
        assert_eq!(mapping[0], Some(1));
        assert_eq!(mapping[1], Some(2));
        assert_eq!(mapping[2], Some(0));
        // cherry (10,11) maps in t2 only if leaves 1,2 share a parent there
        assert_eq!(mapping[3], None);
        // the root inherits its single mapped child's image
        assert_eq!(mapping[4], Some(0));
    }

    #[test]
    fn test_block_at() {
        let trees = two_block_trees();
        assert_eq!(trees.block_at(0), Some((0, 0)));
        assert_eq!(trees.block_at(39), Some((0, 0)));
        assert_eq!(trees.block_at(40), Some((1, 40)));
        assert_eq!(trees.block_at(99), Some((1, 40)));
        assert_eq!(trees.block_at(100), None);
    }

    #[test]
    fn test_partition_interior_of_block() {
        let mut trees = two_block_trees();
        let (right, severed) = trees.partition(20).unwrap();
        assert!(severed.is_none());

        trees.assert_valid().unwrap();
        right.assert_valid().unwrap();
        assert_eq!(trees.end_coord(), 20);
        assert_eq!(right.start_coord(), 20);
        assert_eq!(right.length(), 80);
        assert_eq!(trees.nblocks(), 1);
        assert_eq!(right.nblocks(), 2);
        assert!(right.blocks()[0].spr.is_none());
    }

    #[test]
    fn test_partition_then_append_roundtrip() {
        // split inside a block and re-concatenate with an empty middle:
        // after null-SPR removal the original sequence is restored
        let original = two_block_trees();
        let mut trees = original.clone();
        let (right, _) = trees.partition(20).unwrap();
        trees.append(right).unwrap();
        trees.remove_null_sprs();

        trees.assert_valid().unwrap();
        assert_eq!(trees.nblocks(), original.nblocks());
        assert_eq!(trees.length(), original.length());
        for (a, b) in trees.blocks().iter().zip(original.blocks()) {
            assert_eq!(a.blocklen, b.blocklen);
            assert_eq!(a.spr, b.spr);
            assert_eq!(a.tree, b.tree);
        }
    }

    #[test]
    fn test_partition_at_boundary_returns_severed_edge() {
        let original = two_block_trees();
        let mut trees = original.clone();
        let (mut right, severed) = trees.partition(40).unwrap();
        let (spr, mapping) = severed.expect("cut at a recombination boundary");
        assert_eq!(spr, original.blocks()[1].spr.unwrap());

        // reinstating the edge and splicing restores the original chain
        right.blocks_mut()[0].spr = Some(spr);
        right.blocks_mut()[0].mapping = Some(mapping);
        trees.splice_end(right).unwrap();
        trees.assert_valid().unwrap();
        assert_eq!(trees.nblocks(), original.nblocks());
        for (a, b) in trees.blocks().iter().zip(original.blocks()) {
            assert_eq!(a.tree, b.tree);
            assert_eq!(a.spr, b.spr);
            assert_eq!(a.blocklen, b.blocklen);
        }
    }

    #[test]
    fn test_remove_null_sprs_merges() {
        let mut trees = two_block_trees();
        let (right, _) = trees.partition(70).unwrap();
        trees.append(right).unwrap();
        // partition left a null edge inside the second block; removal merges
        trees.remove_null_sprs();
        assert_eq!(trees.nblocks(), 2);
        trees.assert_valid().unwrap();
        assert_eq!(trees.blocks()[1].blocklen, 60);
    }

    #[test]
    fn test_export_blocks_permutes_seqids() {
        let mut trees = two_block_trees();
        *trees.seqids_mut() = vec![2, 0, 1];
        let exported = trees.export_blocks();
        assert_eq!(exported.len(), 2);
        // leaf 0 (seqid 2) appears at slot 2 with its parent renamed
        let b0 = &exported[0];
        assert_eq!(b0.parents[2], Some(3));
        assert_eq!(b0.ages[2], 0);
        let spr = exported[1].spr.unwrap();
        assert_eq!(spr.recomb_node, 2);
        assert_eq!(spr.coal_node, 1);
    }
}
