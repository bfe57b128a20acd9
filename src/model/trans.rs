//! # Compressed Transition Operators
//!
//! Within a block the threading transition `P((v1,a) -> (v2,b))` factors
//! through five time-indexed arrays, keeping the per-column forward update
//! O(|states|) instead of O(|states|^2):
//!
//! - `D[a]` — recombination density on the threaded tree, given the thread
//!   coalesces at `a`
//! - `E[b]` — re-coalescence density into interval `b` per coalescing slot
//! - `B[k]` — cumulative recombination weight, survival-adjusted, up to `k`
//! - `G[a]` — the thread's own top-slot weight at `a`, subtracted when the
//!   coalescence is at or above the recombination time
//! - `norecombs[a]` — probability no recombination happens at this site
//!
//! Off-diagonal: `D[a]*E[b]*(B[min(a,b)] - I*G[a])` with `I = [a <= b]`.
//! Same branch (`c` the branch's lower age):
//! `D[a]*E[b]*(2B[min(a,b)] - 2I*G[a] - B[min(c,b)])`, plus `norecombs[a]`
//! when `a == b`.
//!
//! Between blocks the switch operator stores two dense rows (the states at
//! the recombination point and at the coalescence point of the SPR) and a
//! deterministic `(target, probability)` pair for every other source state.

use crate::arg::spr::Spr;
use crate::arg::tree::LocalTree;
use crate::arg::trees::NodeMapping;
use crate::model::params::ArgModel;
use crate::model::states::{LineageCounts, States};

/// Per-interval coalescent machinery shared by the transition matrices and
/// the state priors: cumulative escape exponents and per-slot coalescence
/// densities.
#[derive(Debug, Clone)]
struct CoalRates {
    /// `C[j]` = cumulative escape exponent below interval `j`
    cumul: Vec<f64>,
    /// `(1 - exp(-rate_b)) * exp(-C[b]) / ncoals[b]`; the top state interval
    /// coalesces with certainty
    density: Vec<f64>,
}

impl CoalRates {
    fn calculate(model: &ArgModel, lineages: &LineageCounts) -> Self {
        let ntimes = model.ntimes();
        let mut cumul = vec![0.0; ntimes];
        for j in 1..ntimes {
            let rate = model.grid.step(j - 1) * lineages.nbranches[j - 1] as f64
                / (2.0 * model.popsizes[j - 1]);
            cumul[j] = cumul[j - 1] + rate;
        }

        let mut density = vec![0.0; ntimes];
        for b in 0..ntimes - 1 {
            let slots = lineages.ncoals[b] as f64;
            if slots == 0.0 {
                continue;
            }
            if b == ntimes - 2 {
                density[b] = (-cumul[b]).exp() / slots;
            } else {
                let rate =
                    model.grid.step(b) * lineages.nbranches[b] as f64 / (2.0 * model.popsizes[b]);
                density[b] = (1.0 - (-rate).exp()) * (-cumul[b]).exp() / slots;
            }
        }
        Self { cumul, density }
    }
}

/// A compressed representation of the in-block transition matrix
#[derive(Debug, Clone)]
pub struct TransMatrix {
    ntimes: usize,
    pub b: Vec<f64>,
    pub d: Vec<f64>,
    pub e: Vec<f64>,
    pub g: Vec<f64>,
    pub norecombs: Vec<f64>,
}

impl TransMatrix {
    /// Builds the five arrays from the model, the lineage profile of the
    /// current tree, and the tree itself (for threaded lengths). Must be
    /// recomputed whenever any of those change.
    pub fn calculate(model: &ArgModel, tree: &LocalTree, lineages: &LineageCounts) -> Self {
        let ntimes = model.ntimes();
        let grid = &model.grid;
        let rates = CoalRates::calculate(model, lineages);

        let base_len = tree.treelen(grid, false);
        let root_age = tree.node(tree.root()).age;
        let basal = grid.step(root_age);

        let mut b = vec![0.0; ntimes];
        let mut g = vec![0.0; ntimes];
        let mut d = vec![0.0; ntimes];
        let mut e = vec![0.0; ntimes];
        let mut norecombs = vec![0.0; ntimes];

        let mut b_accum = 0.0;
        for k in 0..ntimes {
            if k < ntimes - 1 {
                let slots = (lineages.nrecombs[k] + 1) as f64;
                let weight = grid.step(k) * (lineages.nbranches[k] + 1) as f64 / slots;
                let survival = rates.cumul[k].exp();
                b_accum += weight * survival;
                g[k] = grid.step(k) / slots * survival;
            }
            b[k] = b_accum;

            e[k] = rates.density[k];

            // threaded length: new branch to time k plus the basal stub
            let threadlen = base_len + grid.time(k) + if basal.is_finite() { basal } else { 0.0 };
            norecombs[k] = (-(model.rho * threadlen).max(model.rho)).exp();
            d[k] = if threadlen > 0.0 {
                (1.0 - norecombs[k]) / threadlen
            } else {
                0.0
            };
        }

        Self {
            ntimes,
            b,
            d,
            e,
            g,
            norecombs,
        }
    }

    /// Log transition probability between two states of the same tree.
    pub fn transition_prob(&self, states: &States, ages: &[usize], i: usize, j: usize) -> f64 {
        let s1 = states.state(i);
        let s2 = states.state(j);
        let (a, bt) = (s1.time, s2.time);
        let ind = if a <= bt { 1.0 } else { 0.0 };
        let m = a.min(bt);

        if s1.node != s2.node {
            (self.d[a] * self.e[bt] * (self.b[m] - ind * self.g[a])).ln()
        } else {
            let c = ages[s1.node];
            let mut p = self.d[a]
                * self.e[bt]
                * (2.0 * self.b[m] - 2.0 * ind * self.g[a] - self.b[c.min(bt)]);
            if a == bt {
                p += self.norecombs[a];
            }
            p.ln()
        }
    }

    /// Weight of a recombination in interval `k` (the increment of `B`),
    /// used when sampling the recombination point of a path change.
    pub fn recomb_weight(&self, k: usize) -> f64 {
        if k == 0 {
            self.b[0]
        } else {
            self.b[k] - self.b[k - 1]
        }
    }

    /// One fused forward-column update: `out[j] = sum_i w[i] * P(i -> j)`.
    ///
    /// `w` holds linear-space (shifted) forward weights; `ages[v]` is the
    /// age of node `v` in the current tree. O(|states| + ntimes).
    pub fn fold_forward(&self, states: &States, ages: &[usize], w: &[f64], out: &mut [f64]) {
        let ntimes = self.ntimes;
        let nstates = states.len();
        debug_assert_eq!(w.len(), nstates);
        debug_assert_eq!(out.len(), nstates);

        // per-time recombination mass of the sources
        let mut u = vec![0.0; ntimes];
        for i in 0..nstates {
            let s = states.state(i);
            u[s.time] += w[i] * self.d[s.time];
        }

        // prefix over a <= b of U[a]*(B[a]-G[a]); suffix over a > b of U[a]
        let mut prefix = vec![0.0; ntimes];
        let mut suffix = vec![0.0; ntimes];
        let mut acc = 0.0;
        for a in 0..ntimes {
            acc += u[a] * (self.b[a] - self.g[a]);
            prefix[a] = acc;
        }
        let mut acc = 0.0;
        for a in (0..ntimes).rev() {
            suffix[a] = acc;
            acc += u[a];
        }

        // global off-diagonal part
        for j in 0..nstates {
            let bt = states.state(j).time;
            out[j] = self.e[bt] * (prefix[bt] + self.b[bt] * suffix[bt]);
        }

        // same-branch correction, one contiguous state run per branch
        let mut run_start = 0;
        while run_start < nstates {
            let node = states.state(run_start).node;
            let mut run_end = run_start + 1;
            while run_end < nstates && states.state(run_end).node == node {
                run_end += 1;
            }
            let c = ages[node];

            // branch-local prefix/suffix over the same formula
            let mut total = 0.0;
            let mut acc = 0.0;
            let mut bp = vec![0.0; run_end - run_start];
            for (k, i) in (run_start..run_end).enumerate() {
                let a = states.state(i).time;
                let ui = w[i] * self.d[a];
                acc += ui * (self.b[a] - self.g[a]);
                bp[k] = acc;
                total += ui;
            }
            let mut acc = 0.0;
            let mut bs = vec![0.0; run_end - run_start];
            for (k, i) in (run_start..run_end).enumerate().rev() {
                bs[k] = acc;
                acc += w[i] * self.d[states.state(i).time];
            }

            for (k, j) in (run_start..run_end).enumerate() {
                let bt = states.state(j).time;
                out[j] += self.e[bt]
                    * (bp[k] + self.b[bt] * bs[k] - self.b[c.min(bt)] * total);
            }
            run_start = run_end;
        }

        // diagonal no-recombination term
        for j in 0..nstates {
            out[j] += w[j] * self.norecombs[states.state(j).time];
        }
    }
}

/// Log prior over the states of a tree: the new lineage's coalescent
/// distribution under the lineage profile.
pub fn calc_state_priors(
    model: &ArgModel,
    lineages: &LineageCounts,
    states: &States,
) -> Vec<f64> {
    let rates = CoalRates::calculate(model, lineages);
    states
        .iter()
        .map(|s| rates.density[s.time].ln())
        .collect()
}

/// Log density of a recombination-born lineage detaching at `recomb_time`
/// and re-coalescing at `coal_time`, under the tree's lineage profile. Used
/// by the ARG prior.
pub fn recoal_logprob(
    model: &ArgModel,
    lineages: &LineageCounts,
    recomb_time: usize,
    coal_time: usize,
) -> f64 {
    let rates = CoalRates::calculate(model, lineages);
    rates.density[coal_time].ln() + rates.cumul[recomb_time]
}

/// A compressed representation of the switch transition matrix
#[derive(Debug, Clone)]
pub struct TransMatrixSwitch {
    /// Source state at the SPR's recombination point, if present
    pub recoalsrc: Option<usize>,
    /// Source state at the SPR's coalescence point, if present
    pub recombsrc: Option<usize>,
    /// Unique target for every other source state
    pub determ: Vec<Option<usize>>,
    /// Log probability of each deterministic move
    pub determprob: Vec<f64>,
    /// Dense log row out of `recoalsrc`
    pub recoalrow: Vec<f64>,
    /// Dense log row out of `recombsrc`
    pub recombrow: Vec<f64>,
}

impl TransMatrixSwitch {
    /// Log transition probability across the block boundary.
    #[inline]
    pub fn transition_prob(&self, i: usize, j: usize) -> f64 {
        if Some(i) == self.recoalsrc {
            self.recoalrow[j]
        } else if Some(i) == self.recombsrc {
            self.recombrow[j]
        } else if self.determ[i] == Some(j) {
            self.determprob[i]
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Builds the switch operator for the SPR edge between two adjacent
    /// trees.
    pub fn calculate(
        model: &ArgModel,
        last_tree: &LocalTree,
        tree: &LocalTree,
        spr: &Spr,
        mapping: &NodeMapping,
        states1: &States,
        states2: &States,
    ) -> Self {
        let nstates1 = states1.len();
        let nstates2 = states2.len();

        let recoalsrc = states1.find(spr.recomb_node, spr.recomb_time);
        let recombsrc = states1.find(spr.coal_node, spr.coal_time);

        let determ = deterministic_transitions(last_tree, tree, spr, mapping, states1, states2);
        let determprob = vec![0.0; nstates1];

        // dense row out of the recombination-point state: the thread's
        // attachment floats and re-coalesces anywhere at or above the
        // recombination time
        let mut recoalrow = vec![f64::NEG_INFINITY; nstates2];
        if recoalsrc.is_some() {
            let lineages2 = LineageCounts::count(tree, model.ntimes());
            let rates = CoalRates::calculate(model, &lineages2);
            let mut total = 0.0;
            for (j, s) in states2.iter().enumerate() {
                if s.time >= spr.recomb_time {
                    let wgt = rates.density[s.time];
                    recoalrow[j] = wgt;
                    total += wgt;
                }
            }
            for p in recoalrow.iter_mut() {
                if *p > f64::NEG_INFINITY {
                    *p = (*p / total).ln();
                }
            }
        }

        // dense row out of the coalescence-point state: the incoming lineage
        // lands exactly at the thread's attachment, which ends up on either
        // side of the inserted recoal node
        let mut recombrow = vec![f64::NEG_INFINITY; nstates2];
        if recombsrc.is_some() {
            let recoal2 = mapping[spr.recomb_node].and_then(|r2| tree.node(r2).parent);
            let below = mapping[spr.coal_node].and_then(|c2| states2.find(c2, spr.coal_time));
            let above = recoal2.and_then(|n| states2.find(n, spr.coal_time));
            let targets: Vec<usize> = [below, above].into_iter().flatten().collect();
            let share = -(targets.len() as f64).ln();
            for j in targets {
                recombrow[j] = share;
            }
        }

        Self {
            recoalsrc,
            recombsrc,
            determ,
            determprob,
            recoalrow,
            recombrow,
        }
    }
}

/// For each non-special source state, the unique target state implied by the
/// SPR: the node mapping at the same time, with broken-branch and
/// recoal-node reroutes.
pub fn deterministic_transitions(
    last_tree: &LocalTree,
    tree: &LocalTree,
    spr: &Spr,
    mapping: &NodeMapping,
    states1: &States,
    states2: &States,
) -> Vec<Option<usize>> {
    let broken = last_tree.node(spr.recomb_node).parent;
    let sib = last_tree.sibling_of(spr.recomb_node);
    let recoal2 = mapping[spr.recomb_node].and_then(|r2| tree.node(r2).parent);

    states1
        .iter()
        .map(|s| {
            let (v, a) = (s.node, s.time);

            // the two special sources get dense rows instead
            if (v, a) == (spr.recomb_node, spr.recomb_time)
                || (v, a) == (spr.coal_node, spr.coal_time)
            {
                return None;
            }

            let (node2, time2) = if v == spr.recomb_node && a > spr.recomb_time {
                // the branch below the thread leaves; the attachment
                // dissolves onto the sibling at the broken node's height
                let sib = sib?;
                let broken_age = last_tree.node(broken?).age;
                if spr.coal_node == sib && broken_age > spr.coal_time {
                    (recoal2?, broken_age)
                } else {
                    (mapping[sib]?, broken_age)
                }
            } else if Some(v) == broken {
                // the broken branch folds onto the sibling's extended branch
                let sib = sib?;
                if spr.coal_node == v && a >= spr.coal_time {
                    (recoal2?, a)
                } else {
                    (mapping[sib]?, a)
                }
            } else if v == spr.coal_node && a > spr.coal_time {
                // above the inserted recoal node
                (recoal2?, a)
            } else {
                (mapping[v]?, a)
            };

            states2.find(node2, time2)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::TimeGrid;

    fn model(ntimes: usize, rho: f64) -> ArgModel {
        let pts: Vec<f64> = (0..ntimes).map(|i| (i * 100) as f64).collect();
        let grid = TimeGrid::from_points(&pts).unwrap();
        ArgModel::new(grid, 1e4, rho, 2e-8).unwrap()
    }

    fn three_leaf_tree() -> LocalTree {
        LocalTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0, 0, 0, 1, 2],
        )
        .unwrap()
    }

    fn ages(tree: &LocalTree) -> Vec<usize> {
        (0..tree.nnodes()).map(|i| tree.node(i).age).collect()
    }

    #[test]
    fn test_transition_probs_finite_and_bounded() {
        let model = model(6, 1.5e-8);
        let tree = three_leaf_tree();
        let lineages = LineageCounts::count(&tree, 6);
        let states = States::enumerate(&tree, 6);
        let matrix = TransMatrix::calculate(&model, &tree, &lineages);
        let a = ages(&tree);

        for i in 0..states.len() {
            let mut row = 0.0;
            for j in 0..states.len() {
                let lp = matrix.transition_prob(&states, &a, i, j);
                assert!(!lp.is_nan(), "nan at {i}->{j}");
                assert!(lp <= 1e-9, "log prob above 0 at {i}->{j}: {lp}");
                row += lp.exp();
            }
            assert!(row > 0.5 && row < 1.2, "row {i} sums to {row}");
        }
    }

    #[test]
    fn test_rho_zero_is_identity() {
        let model = model(6, 0.0);
        let tree = three_leaf_tree();
        let lineages = LineageCounts::count(&tree, 6);
        let states = States::enumerate(&tree, 6);
        let matrix = TransMatrix::calculate(&model, &tree, &lineages);
        let a = ages(&tree);

        for i in 0..states.len() {
            for j in 0..states.len() {
                let lp = matrix.transition_prob(&states, &a, i, j);
                if i == j {
                    assert!(lp.abs() < 1e-12);
                } else {
                    assert_eq!(lp, f64::NEG_INFINITY);
                }
            }
        }
    }

    #[test]
    fn test_fold_forward_matches_naive() {
        let model = model(6, 1.5e-8);
        let tree = three_leaf_tree();
        let lineages = LineageCounts::count(&tree, 6);
        let states = States::enumerate(&tree, 6);
        let matrix = TransMatrix::calculate(&model, &tree, &lineages);
        let a = ages(&tree);
        let n = states.len();

        // arbitrary positive forward weights
        let w: Vec<f64> = (0..n).map(|i| 0.3 + 0.07 * i as f64).collect();

        let mut fused = vec![0.0; n];
        matrix.fold_forward(&states, &a, &w, &mut fused);

        for j in 0..n {
            let naive: f64 = (0..n)
                .map(|i| w[i] * matrix.transition_prob(&states, &a, i, j).exp())
                .sum();
            assert!(
                (fused[j] - naive).abs() < 1e-12 * naive.max(1.0),
                "column {j}: fused {} vs naive {}",
                fused[j],
                naive
            );
        }
    }

    #[test]
    fn test_state_priors_normalize() {
        let model = model(6, 1.5e-8);
        let tree = three_leaf_tree();
        let lineages = LineageCounts::count(&tree, 6);
        let states = States::enumerate(&tree, 6);
        let priors = calc_state_priors(&model, &lineages, &states);
        let total: f64 = priors.iter().map(|p| p.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9, "priors sum to {total}");
    }

    #[test]
    fn test_switch_matrix_shapes() {
        let model = model(6, 1.5e-8);
        let t1 = three_leaf_tree();
        let spr = Spr::new(0, 0, 2, 1);
        let mut t2 = t1.clone();
        t2.apply_spr(&spr).unwrap();

        let broken = t1.node(0).parent.unwrap();
        let mapping: NodeMapping = (0..t1.nnodes())
            .map(|i| if i == broken { None } else { Some(i) })
            .collect();

        let s1 = States::enumerate(&t1, 6);
        let s2 = States::enumerate(&t2, 6);
        let switch =
            TransMatrixSwitch::calculate(&model, &t1, &t2, &spr, &mapping, &s1, &s2);

        // the two special sources exist for this SPR
        let recoalsrc = switch.recoalsrc.unwrap();
        assert_eq!(s1.state(recoalsrc), crate::model::states::State::new(0, 0));
        let recombsrc = switch.recombsrc.unwrap();
        assert_eq!(s1.state(recombsrc), crate::model::states::State::new(2, 1));

        // dense rows are normalized distributions
        let total: f64 = switch.recoalrow.iter().map(|p| p.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
        let total: f64 = switch.recombrow.iter().map(|p| p.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);

        // every other source has exactly one target, which is a live state
        for i in 0..s1.len() {
            if i == recoalsrc || i == recombsrc {
                continue;
            }
            let t = switch.determ[i];
            assert!(t.is_some(), "source {i} lost its target");
            assert_eq!(switch.transition_prob(i, t.unwrap()), 0.0);
            // off-target probability is zero
            let other = (t.unwrap() + 1) % s2.len();
            assert_eq!(switch.transition_prob(i, other), f64::NEG_INFINITY);
        }
    }

    #[test]
    fn test_deterministic_mapping_preserves_time_off_spr() {
        let model = model(6, 1.5e-8);
        let _ = &model;
        let t1 = three_leaf_tree();
        let spr = Spr::new(0, 0, 2, 1);
        let mut t2 = t1.clone();
        t2.apply_spr(&spr).unwrap();
        let broken = t1.node(0).parent.unwrap();
        let mapping: NodeMapping = (0..t1.nnodes())
            .map(|i| if i == broken { None } else { Some(i) })
            .collect();
        let s1 = States::enumerate(&t1, 6);
        let s2 = States::enumerate(&t2, 6);

        let determ = deterministic_transitions(&t1, &t2, &spr, &mapping, &s1, &s2);

        // a state on an uninvolved branch keeps its node and time
        let src = s1.find(1, 1).unwrap();
        let tgt = determ[src].unwrap();
        assert_eq!(s2.state(tgt), crate::model::states::State::new(1, 1));
    }
}
