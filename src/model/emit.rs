//! # Emission Probabilities
//!
//! The likelihood of one aligned column given a threading state is the
//! Felsenstein pruning likelihood of the column plus the thread's base, under
//! a Jukes–Cantor mutation model with branch lengths in generations.
//!
//! Downward and outward partials are computed once per column on the base
//! tree; every `(branch, time)` state then costs O(1) to evaluate. Columns of
//! pure missing data emit a neutral 1.0. With infinite sites enabled, a
//! column whose parsimony count on the candidate topology exceeds one is
//! charged the model's log penalty.

use crate::arg::tree::LocalTree;
use crate::model::params::ArgModel;
use crate::model::states::States;

/// A base call: `None` is missing data (`N` or masked)
pub type Base = Option<u8>;

/// Decode an ASCII base; `N` and anything unknown become missing.
pub fn decode_base(c: u8) -> Base {
    match c {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Encode a base for output
pub fn encode_base(b: Base) -> u8 {
    match b {
        Some(0) => b'A',
        Some(1) => b'C',
        Some(2) => b'G',
        Some(3) => b'T',
        _ => b'N',
    }
}

/// Jukes–Cantor match probability along a branch of `t` generations
#[inline]
fn jc_same(mu: f64, t: f64) -> f64 {
    0.25 + 0.75 * (-4.0 / 3.0 * mu * t).exp()
}

/// Jukes–Cantor specific-mismatch probability
#[inline]
fn jc_diff(mu: f64, t: f64) -> f64 {
    0.25 - 0.25 * (-4.0 / 3.0 * mu * t).exp()
}

#[inline]
fn jc(mu: f64, t: f64, x: usize, y: usize) -> f64 {
    if x == y {
        jc_same(mu, t)
    } else {
        jc_diff(mu, t)
    }
}

/// Transport a conditional-likelihood vector across a branch
#[inline]
fn propagate(mu: f64, t: f64, v: &[f64; 4]) -> [f64; 4] {
    let same = jc_same(mu, t);
    let diff = jc_diff(mu, t);
    let total: f64 = v.iter().sum();
    let mut out = [0.0; 4];
    for x in 0..4 {
        out[x] = same * v[x] + diff * (total - v[x]);
    }
    out
}

/// Per-column pruning partials on one base tree
pub struct ColumnPartials {
    /// Conditional likelihood of the subtree below each node
    down: Vec<[f64; 4]>,
    /// Outside likelihood at the top of each branch (at the parent's age),
    /// sibling folded in; unused for the root
    top_out: Vec<[f64; 4]>,
    mu: f64,
}

impl ColumnPartials {
    /// Computes partials for `column` (one base per leaf) on `tree`.
    pub fn calculate(model: &ArgModel, tree: &LocalTree, column: &[Base]) -> Self {
        let grid = &model.grid;
        let mu = model.mu;
        let nnodes = tree.nnodes();
        let mut down = vec![[1.0f64; 4]; nnodes];
        let mut top_out = vec![[0.25f64; 4]; nnodes];

        for v in tree.postorder() {
            if tree.is_leaf(v) {
                down[v] = match column[v] {
                    Some(b) => {
                        let mut d = [0.0; 4];
                        d[b as usize] = 1.0;
                        d
                    }
                    None => [1.0; 4],
                };
            } else {
                let t_v = grid.time(tree.node(v).age);
                let mut d = [1.0; 4];
                for c in tree.node(v).children.iter().flatten() {
                    let msg = propagate(mu, t_v - grid.time(tree.node(*c).age), &down[*c]);
                    for x in 0..4 {
                        d[x] *= msg[x];
                    }
                }
                down[v] = d;
            }
        }

        // outward pass, root first
        let mut out_node = vec![[0.25f64; 4]; nnodes];
        let mut order = tree.postorder();
        order.reverse();
        for p in order {
            if tree.is_leaf(p) {
                continue;
            }
            let t_p = grid.time(tree.node(p).age);
            let c = tree.node(p).children;
            for slot in 0..2 {
                let v = c[slot].expect("internal node is binary");
                let w = c[1 - slot].expect("internal node is binary");
                let sib_msg = propagate(mu, t_p - grid.time(tree.node(w).age), &down[w]);
                for q in 0..4 {
                    top_out[v][q] = out_node[p][q] * sib_msg[q];
                }
                let msg = propagate(mu, t_p - grid.time(tree.node(v).age), &top_out[v]);
                out_node[v] = msg;
            }
        }

        Self { down, top_out, mu }
    }

    /// Likelihood of the base tree alone (no thread)
    pub fn tree_likelihood(&self, tree: &LocalTree) -> f64 {
        self.down[tree.root()].iter().sum::<f64>() * 0.25
    }

    /// Likelihood of the column plus the thread base, with the thread
    /// coalescing onto branch `node` at grid time `time`.
    pub fn state_likelihood(
        &self,
        model: &ArgModel,
        tree: &LocalTree,
        node: usize,
        time: usize,
        thread_base: Base,
    ) -> f64 {
        let grid = &model.grid;
        let t_i = grid.time(time);
        let t_v = grid.time(tree.node(node).age);

        let below = propagate(self.mu, t_i - t_v, &self.down[node]);

        let leaf_msg = |z: usize| -> f64 {
            match thread_base {
                Some(b) => jc(self.mu, t_i, z, b as usize),
                None => 1.0,
            }
        };

        match tree.node(node).parent {
            Some(p) => {
                let t_p = grid.time(tree.node(p).age);
                let out_at = propagate(self.mu, t_p - t_i, &self.top_out[node]);
                (0..4).map(|z| out_at[z] * below[z] * leaf_msg(z)).sum()
            }
            None => (0..4).map(|z| 0.25 * below[z] * leaf_msg(z)).sum(),
        }
    }
}

/// Fitch parsimony count of the column on the tree with the thread attached
/// to `branch`. Only the topology matters, so the result is shared by every
/// time on the same branch.
pub fn fitch_count(tree: &LocalTree, column: &[Base], branch: usize, thread_base: Base) -> usize {
    let nnodes = tree.nnodes();
    let mut mask = vec![0u8; nnodes];
    let mut cost = vec![0usize; nnodes];

    let base_mask = |b: Base| -> u8 {
        match b {
            Some(x) => 1 << x,
            None => 0b1111,
        }
    };
    let join = |m1: u8, m2: u8| -> (u8, usize) {
        if m1 & m2 != 0 {
            (m1 & m2, 0)
        } else {
            (m1 | m2, 1)
        }
    };

    for v in tree.postorder() {
        if tree.is_leaf(v) {
            mask[v] = base_mask(column[v]);
        } else {
            let c = tree.node(v).children;
            let (c0, c1) = (c[0].unwrap(), c[1].unwrap());
            let (m, inc) = join(mask[c0], mask[c1]);
            mask[v] = m;
            cost[v] = cost[c0] + cost[c1] + inc;
        }
    }

    // virtually insert the thread's node on `branch` and rebuild the path to
    // the root
    let (mut cur_mask, inc) = join(mask[branch], base_mask(thread_base));
    let mut cur_cost = cost[branch] + inc;
    let mut v = branch;
    while let Some(p) = tree.node(v).parent {
        let sib = tree.sibling_of(v).expect("internal node is binary");
        let (m, inc) = join(cur_mask, mask[sib]);
        cur_cost += cost[sib] + inc;
        cur_mask = m;
        v = p;
    }
    cur_cost
}

/// Log emissions for every state of one column.
///
/// Returns 0.0 (probability one) for every state when the column and the
/// thread base carry no information.
pub fn emission_column(
    model: &ArgModel,
    tree: &LocalTree,
    states: &States,
    column: &[Base],
    thread_base: Base,
) -> Vec<f64> {
    let informative =
        thread_base.is_some() || column.iter().take(tree.nleaves()).any(|b| b.is_some());
    if !informative {
        return vec![0.0; states.len()];
    }

    let partials = ColumnPartials::calculate(model, tree, column);

    // the penalty depends only on the attachment branch
    let mut branch_penalty = vec![0.0; tree.nnodes()];
    if model.infinite_sites {
        for v in 0..tree.nnodes() {
            if fitch_count(tree, column, v, thread_base) > 1 {
                branch_penalty[v] = -model.infsites_penalty;
            }
        }
    }

    states
        .iter()
        .map(|s| {
            let lk = partials.state_likelihood(model, tree, s.node, s.time, thread_base);
            lk.ln() + branch_penalty[s.node]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::TimeGrid;

    fn model() -> ArgModel {
        let grid = TimeGrid::from_points(&[0.0, 1000.0, 5000.0, 20_000.0, 50_000.0]).unwrap();
        ArgModel::new(grid, 1e4, 1.5e-8, 2.5e-8).unwrap()
    }

    fn three_leaf_tree() -> LocalTree {
        LocalTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0, 0, 0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_all_missing_is_neutral() {
        let model = model();
        let tree = three_leaf_tree();
        let states = States::enumerate(&tree, 5);
        let emits = emission_column(&model, &tree, &states, &[None, None, None], None);
        assert!(emits.iter().all(|&e| e == 0.0));
    }

    #[test]
    fn test_missing_thread_base_is_state_independent() {
        // with no thread base the attachment is invisible: every state emits
        // the base tree's likelihood
        let model = model();
        let tree = three_leaf_tree();
        let states = States::enumerate(&tree, 5);
        let column = [Some(0), Some(0), Some(3)];

        let partials = ColumnPartials::calculate(&model, &tree, &column);
        let base_lk = partials.tree_likelihood(&tree);

        let emits = emission_column(&model, &tree, &states, &column, None);
        for &e in &emits {
            assert!((e - base_lk.ln()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_matching_base_beats_mismatching() {
        let model = model();
        let tree = three_leaf_tree();
        let states = States::enumerate(&tree, 5);
        let column = [Some(0), Some(0), Some(0)];

        let match_e = emission_column(&model, &tree, &states, &column, Some(0));
        let mismatch_e = emission_column(&model, &tree, &states, &column, Some(3));
        for (m, x) in match_e.iter().zip(&mismatch_e) {
            assert!(m > x, "matching thread base must be more likely");
        }
    }

    #[test]
    fn test_likelihoods_are_probabilities() {
        let model = model();
        let tree = three_leaf_tree();
        let states = States::enumerate(&tree, 5);
        let column = [Some(0), Some(1), Some(2)];
        let emits = emission_column(&model, &tree, &states, &column, Some(3));
        for &e in &emits {
            assert!(e.is_finite());
            assert!(e < 0.0);
        }
    }

    #[test]
    fn test_fitch_count() {
        let tree = three_leaf_tree();
        // monomorphic: no mutations regardless of attachment
        assert_eq!(fitch_count(&tree, &[Some(0), Some(0), Some(0)], 2, Some(0)), 0);
        // one derived leaf: one mutation
        assert_eq!(fitch_count(&tree, &[Some(0), Some(0), Some(3)], 0, Some(0)), 1);
        // thread base conflicts with the cherry: attaching inside the cherry
        // forces two mutations, attaching on the outgroup allows one
        let column = [Some(0), Some(0), Some(3)];
        assert_eq!(fitch_count(&tree, &column, 0, Some(3)), 2);
        assert_eq!(fitch_count(&tree, &column, 2, Some(3)), 1);
    }

    #[test]
    fn test_infinite_sites_penalty_applied() {
        let mut model = model();
        let tree = three_leaf_tree();
        let states = States::enumerate(&tree, 5);
        let column = [Some(0), Some(0), Some(3)];

        let plain = emission_column(&model, &tree, &states, &column, Some(3));
        model.infinite_sites = true;
        model.infsites_penalty = 20.0;
        let penalized = emission_column(&model, &tree, &states, &column, Some(3));

        for (i, s) in states.iter().enumerate() {
            let delta = plain[i] - penalized[i];
            if fitch_count(&tree, &column, s.node, Some(3)) > 1 {
                assert!((delta - 20.0).abs() < 1e-9);
            } else {
                assert!(delta.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_decode_encode_bases() {
        assert_eq!(decode_base(b'A'), Some(0));
        assert_eq!(decode_base(b't'), Some(3));
        assert_eq!(decode_base(b'N'), None);
        assert_eq!(encode_base(Some(2)), b'G');
        assert_eq!(encode_base(None), b'N');
    }
}
