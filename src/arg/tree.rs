//! # Local Coalescent Trees
//!
//! A `LocalTree` is the marginal genealogy at one genomic position: a binary
//! tree over `n` leaves whose node ages index the model's time grid. Nodes
//! live in a fixed-length index arena; leaves occupy indices `0..n`. Leaves
//! carry no sequence ids here — the owning block sequence keeps the
//! permutation, so trees stay id-free and swappable.

use crate::arg::spr::Spr;
use crate::error::{ArgError, Result};
use crate::model::time::TimeGrid;

/// One node record in the tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNode {
    pub parent: Option<usize>,
    pub children: [Option<usize>; 2],
    /// Age as an index into the time grid, `0..ntimes-1` exclusive of the top
    pub age: usize,
}

impl LocalNode {
    pub fn leaf(age: usize) -> Self {
        Self {
            parent: None,
            children: [None, None],
            age,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children[0].is_none()
    }
}

/// A binary coalescent tree with integer node ages
#[derive(Debug, Clone)]
pub struct LocalTree {
    nodes: Vec<LocalNode>,
    root: usize,
}

/// Equality is structural: parents, ages, and the root. Child slot order is
/// an artifact of construction and does not participate.
impl PartialEq for LocalTree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| a.parent == b.parent && a.age == b.age)
    }
}

impl Eq for LocalTree {}

impl LocalTree {
    /// Build a tree from node records, locating the root.
    pub fn new(nodes: Vec<LocalNode>) -> Result<Self> {
        let root = nodes
            .iter()
            .position(|n| n.parent.is_none())
            .ok_or_else(|| ArgError::invariant("tree has no root"))?;
        let tree = Self { nodes, root };
        tree.validate()?;
        Ok(tree)
    }

    /// A single-leaf tree (the seed of a sequentially built ARG)
    pub fn single_leaf() -> Self {
        Self {
            nodes: vec![LocalNode::leaf(0)],
            root: 0,
        }
    }

    /// Build from parallel parent/age arrays (parents as `None` for the root).
    pub fn from_parents(parents: &[Option<usize>], ages: &[usize]) -> Result<Self> {
        let nnodes = parents.len();
        let mut nodes = vec![LocalNode::leaf(0); nnodes];
        for i in 0..nnodes {
            nodes[i].age = ages[i];
            nodes[i].parent = parents[i];
        }
        for i in 0..nnodes {
            if let Some(p) = parents[i] {
                if p >= nnodes {
                    return Err(ArgError::invariant("parent index out of range"));
                }
                let slot = if nodes[p].children[0].is_none() { 0 } else { 1 };
                if nodes[p].children[slot].is_some() {
                    return Err(ArgError::invariant("node has more than two children"));
                }
                nodes[p].children[slot] = Some(i);
            }
        }
        Self::new(nodes)
    }

    #[inline]
    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nleaves(&self) -> usize {
        (self.nodes.len() + 1) / 2
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    #[inline]
    pub fn node(&self, i: usize) -> &LocalNode {
        &self.nodes[i]
    }

    #[inline]
    pub fn node_mut(&mut self, i: usize) -> &mut LocalNode {
        &mut self.nodes[i]
    }

    #[inline]
    pub fn nodes(&self) -> &[LocalNode] {
        &self.nodes
    }

    #[inline]
    pub fn is_leaf(&self, i: usize) -> bool {
        self.nodes[i].is_leaf()
    }

    /// The other child of `i`'s parent, if `i` is not the root
    pub fn sibling_of(&self, i: usize) -> Option<usize> {
        let p = self.nodes[i].parent?;
        let c = self.nodes[p].children;
        if c[0] == Some(i) { c[1] } else { c[0] }
    }

    /// Recompute the root after in-place surgery
    fn reset_root(&mut self) -> Result<()> {
        let mut cur = self.root;
        // the old root may have been spliced under another node
        let mut hops = 0;
        while let Some(p) = self.nodes[cur].parent {
            cur = p;
            hops += 1;
            if hops > self.nodes.len() {
                return Err(ArgError::invariant("parent cycle while resetting root"));
            }
        }
        self.root = cur;
        Ok(())
    }

    /// Postorder traversal: children before parents, root last.
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded || self.is_leaf(node) {
                order.push(node);
            } else {
                stack.push((node, true));
                for c in self.nodes[node].children.iter().flatten() {
                    stack.push((*c, false));
                }
            }
        }
        order
    }

    /// Structural validation: parent/child links, single root, age ordering.
    pub fn validate(&self) -> Result<()> {
        let nnodes = self.nodes.len();
        if nnodes % 2 == 0 {
            return Err(ArgError::invariant("tree must have an odd node count"));
        }
        let nleaves = self.nleaves();
        let mut roots = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            match (node.children[0], node.children[1]) {
                (None, None) => {
                    if i >= nleaves {
                        return Err(ArgError::invariant("leaf outside leaf index range"));
                    }
                }
                (Some(a), Some(b)) => {
                    if i < nleaves {
                        return Err(ArgError::invariant("internal node in leaf index range"));
                    }
                    for c in [a, b] {
                        if c >= nnodes || self.nodes[c].parent != Some(i) {
                            return Err(ArgError::invariant("child does not point back to parent"));
                        }
                        if self.nodes[c].age > node.age {
                            return Err(ArgError::invariant("child older than parent"));
                        }
                    }
                }
                _ => return Err(ArgError::invariant("unary node")),
            }
            if node.parent.is_none() {
                roots += 1;
                if i != self.root {
                    return Err(ArgError::invariant("stale root index"));
                }
            }
        }
        if roots != 1 {
            return Err(ArgError::invariant("tree must have exactly one root"));
        }
        Ok(())
    }

    /// Performs the regraft in place. The SPR must be legal on the current
    /// (pre-image) tree; the broken node is reused as the recoal node and
    /// ends at `coal_time`.
    ///
    /// When `coal_node` is the node being broken, the coalescence lands on
    /// the sibling's extended branch instead.
    pub fn apply_spr(&mut self, spr: &Spr) -> Result<()> {
        if !spr.is_valid_on(self) {
            return Err(ArgError::invariant("illegal SPR for this tree"));
        }

        // the recoal node is also the node we are breaking
        let recoal = self.nodes[spr.recomb_node]
            .parent
            .ok_or_else(|| ArgError::invariant("recomb branch has no parent"))?;

        let c = self.nodes[recoal].children;
        let other = if c[0] == Some(spr.recomb_node) { 1 } else { 0 };
        let recomb_sib = c[other].ok_or_else(|| ArgError::invariant("recoal node is unary"))?;
        let broke_parent = self.nodes[recoal].parent;

        // splice the sibling up to the broken node's parent
        self.nodes[recomb_sib].parent = broke_parent;
        let mut broke_slot = 0;
        if let Some(bp) = broke_parent {
            let c = self.nodes[bp].children;
            broke_slot = if c[0] == Some(recoal) { 0 } else { 1 };
            self.nodes[bp].children[broke_slot] = Some(recomb_sib);
        }

        if spr.coal_node == recoal {
            // we just broke the coal node, so coalesce onto the sibling
            self.nodes[recoal].children[other] = Some(recomb_sib);
            self.nodes[recoal].parent = self.nodes[recomb_sib].parent;
            self.nodes[recomb_sib].parent = Some(recoal);
            if let Some(bp) = broke_parent {
                self.nodes[bp].children[broke_slot] = Some(recoal);
            }
        } else {
            self.nodes[recoal].children[other] = Some(spr.coal_node);
            self.nodes[recoal].parent = self.nodes[spr.coal_node].parent;
            self.nodes[spr.coal_node].parent = Some(recoal);

            if let Some(cp) = self.nodes[recoal].parent {
                let c = self.nodes[cp].children;
                let slot = if c[0] == Some(spr.coal_node) { 0 } else { 1 };
                self.nodes[cp].children[slot] = Some(recoal);
            }
        }
        self.nodes[recoal].age = spr.coal_time;

        self.reset_root()
    }

    /// Total branch length in generations, optionally including the basal
    /// stub above the root (one time step at the root's age).
    pub fn treelen(&self, grid: &TimeGrid, use_basal: bool) -> f64 {
        let mut total = 0.0;
        for (i, node) in self.nodes.iter().enumerate() {
            match node.parent {
                Some(p) => total += grid.time(self.nodes[p].age) - grid.time(node.age),
                None => {
                    if use_basal {
                        total += grid.step(self.nodes[i].age);
                    }
                }
            }
        }
        total
    }

    /// Length of the tree with one extra branch threaded from time 0 up to
    /// `time` on branch `node`, basal stub included.
    ///
    /// Threading onto the root raises the root to `time`, extending both the
    /// old root branch and the basal stub.
    pub fn treelen_with_branch(&self, grid: &TimeGrid, node: usize, time: usize) -> f64 {
        let base = self.treelen(grid, false);
        let root_age = self.nodes[self.root].age;
        let mut total = base + grid.time(time);
        let basal_age = if node == self.root {
            total += grid.time(time) - grid.time(root_age);
            time
        } else {
            root_age
        };
        let basal = grid.step(basal_age);
        if basal.is_finite() {
            total + basal
        } else {
            total
        }
    }
}
