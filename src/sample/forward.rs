//! # Forward Pass and Stochastic Traceback
//!
//! The forward recursion runs strictly left to right in log space: each
//! column shifts by its running maximum, folds through the compressed
//! transition operator in linear space, and restores logs. Block boundaries
//! apply the switch operator instead of the in-block operator. A column whose
//! forward vector vanishes entirely is a hard numeric failure.
//!
//! The traceback runs right to left, drawing each state from the normalized
//! product of the forward value and the transition into the already-sampled
//! successor.

use rand::Rng;

use crate::error::{ArgError, Result};
use crate::model::states::State;
use crate::sample::matrices::BlockMatrices;
use crate::utils::{log_sum_exp, sample_log_weights, Workspace};

/// Log forward values for every position, grouped by block
pub struct ForwardTable {
    /// `alpha[block][offset][state]`
    pub alpha: Vec<Vec<Vec<f64>>>,
    /// Total log probability of the data (from the final column)
    pub log_prob: f64,
}

fn check_column(alpha: &[f64], pos: usize) -> Result<f64> {
    let max = alpha.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(ArgError::numeric(format!(
            "forward column vanished at position {pos}"
        )));
    }
    Ok(max)
}

/// Runs the forward recursion over all blocks.
///
/// With `start_clamp`, the first column is conditioned on that state instead
/// of the coalescent prior (used when resampling a bounded window whose left
/// endpoint is pinned to the surrounding ARG).
pub fn forward(
    matrices: &[BlockMatrices],
    ws: &mut Workspace,
    start_clamp: Option<usize>,
) -> Result<ForwardTable> {
    let mut alpha: Vec<Vec<Vec<f64>>> = Vec::with_capacity(matrices.len());

    for (bi, m) in matrices.iter().enumerate() {
        let n = m.states.len();
        ws.resize(n);
        let mut block_alpha: Vec<Vec<f64>> = Vec::with_capacity(m.len);

        // first column: prior, or switch from the previous block's last column
        let mut col = vec![0.0; n];
        if bi == 0 {
            match start_clamp {
                Some(idx) => {
                    col.fill(f64::NEG_INFINITY);
                    col[idx] = m.emission(0, idx);
                }
                None => {
                    for j in 0..n {
                        col[j] = m.priors[j] + m.emission(0, j);
                    }
                }
            }
        } else {
            let prev = alpha[bi - 1]
                .last()
                .ok_or_else(|| ArgError::invariant("empty block in forward table"))?;
            let switch = m
                .switch
                .as_ref()
                .ok_or_else(|| ArgError::invariant("interior block lacks a switch"))?;
            let shift = check_column(prev, m.start.wrapping_sub(1))?;

            ws.column[..n].fill(0.0);
            for (i, &a) in prev.iter().enumerate() {
                if a == f64::NEG_INFINITY {
                    continue;
                }
                let w = (a - shift).exp();
                if Some(i) == switch.recoalsrc {
                    for j in 0..n {
                        ws.column[j] += w * switch.recoalrow[j].exp();
                    }
                } else if Some(i) == switch.recombsrc {
                    for j in 0..n {
                        ws.column[j] += w * switch.recombrow[j].exp();
                    }
                } else if let Some(j) = switch.determ[i] {
                    ws.column[j] += w * switch.determprob[i].exp();
                }
            }
            for j in 0..n {
                col[j] = m.emission(0, j) + shift + ws.column[j].ln();
            }
        }
        check_column(&col, m.start)?;
        block_alpha.push(col);

        // in-block columns via the fused fold
        for off in 1..m.len {
            let prev = block_alpha.last().unwrap();
            let shift = check_column(prev, m.start + off - 1)?;
            for (i, &a) in prev.iter().enumerate() {
                ws.weights[i] = if a == f64::NEG_INFINITY {
                    0.0
                } else {
                    (a - shift).exp()
                };
            }
            m.trans
                .fold_forward(&m.states, &m.ages, &ws.weights[..n], &mut ws.column[..n]);

            let mut col = vec![0.0; n];
            for j in 0..n {
                col[j] = m.emission(off, j) + shift + ws.column[j].ln();
            }
            check_column(&col, m.start + off)?;
            block_alpha.push(col);
        }

        alpha.push(block_alpha);
    }

    let last = alpha
        .last()
        .and_then(|b| b.last())
        .ok_or_else(|| ArgError::invariant("forward pass over empty region"))?;
    let log_prob = log_sum_exp(last);
    Ok(ForwardTable { alpha, log_prob })
}

/// Draws one state path from the forward table, right to left.
///
/// Returns one state per position across the whole region, with node ids
/// valid for the containing block's tree. With `end_clamp`, the final state
/// is pinned instead of sampled.
pub fn traceback(
    matrices: &[BlockMatrices],
    table: &ForwardTable,
    rng: &mut impl Rng,
    end_clamp: Option<usize>,
) -> Result<Vec<State>> {
    let total: usize = matrices.iter().map(|m| m.len).sum();
    let mut path: Vec<State> = Vec::with_capacity(total);

    let last_col = table.alpha.last().and_then(|b| b.last()).unwrap();
    let mut j = match end_clamp {
        Some(idx) => idx,
        None => sample_log_weights(rng, last_col)?,
    };

    let mut rev: Vec<State> = Vec::with_capacity(total);
    rev.push(matrices.last().unwrap().states.state(j));

    for bi in (0..matrices.len()).rev() {
        let m = &matrices[bi];
        // within the block, right to left
        for off in (0..m.len - 1).rev() {
            let alpha = &table.alpha[bi][off];
            let weights: Vec<f64> = (0..m.states.len())
                .map(|i| alpha[i] + m.trans.transition_prob(&m.states, &m.ages, i, j))
                .collect();
            j = sample_log_weights(rng, &weights)?;
            rev.push(m.states.state(j));
        }

        // across the boundary into the previous block
        if bi > 0 {
            let prev = &matrices[bi - 1];
            let switch = m
                .switch
                .as_ref()
                .ok_or_else(|| ArgError::invariant("interior block lacks a switch"))?;
            let alpha = table.alpha[bi - 1].last().unwrap();
            let weights: Vec<f64> = (0..prev.states.len())
                .map(|i| alpha[i] + switch.transition_prob(i, j))
                .collect();
            j = sample_log_weights(rng, &weights)?;
            rev.push(prev.states.state(j));
        }
    }

    rev.reverse();
    path.append(&mut rev);
    debug_assert_eq!(path.len(), total);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::tree::LocalTree;
    use crate::arg::trees::LocalTrees;
    use crate::io::sites::Sites;
    use crate::model::params::ArgModel;
    use crate::model::time::TimeGrid;
    use crate::sample::matrices::assemble;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(rho: f64) -> (ArgModel, LocalTrees, Sites) {
        let grid = TimeGrid::from_points(&[0.0, 200.0, 1000.0, 5000.0, 20_000.0]).unwrap();
        let model = ArgModel::new(grid, 1e4, rho, 2e-8).unwrap();
        let tree = LocalTree::from_parents(&[Some(2), Some(2), None], &[0, 0, 2]).unwrap();
        let trees = LocalTrees::from_tree(0, 40, tree);
        let text = "NAMES\ta\tb\tc\nREGION\tchr1\t1\t40\n8\tAAT\n25\tCCC\n";
        let sites = Sites::parse(text.as_bytes()).unwrap();
        (model, trees, sites)
    }

    #[test]
    fn test_forward_finite() {
        let (model, trees, sites) = setup(1e-8);
        let mats = assemble(&model, &trees, &sites, 2).unwrap();
        let mut ws = Workspace::new();
        let table = forward(&mats, &mut ws, None).unwrap();
        assert!(table.log_prob.is_finite());
        assert_eq!(table.alpha[0].len(), 40);
    }

    #[test]
    fn test_traceback_path_covers_region() {
        let (model, trees, sites) = setup(1e-8);
        let mats = assemble(&model, &trees, &sites, 2).unwrap();
        let mut ws = Workspace::new();
        let table = forward(&mats, &mut ws, None).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let path = traceback(&mats, &table, &mut rng, None).unwrap();
        assert_eq!(path.len(), 40);
        for s in &path {
            assert!(mats[0].states.find(s.node, s.time).is_some());
        }
    }

    #[test]
    fn test_rho_zero_path_is_constant() {
        let (model, trees, sites) = setup(0.0);
        let mats = assemble(&model, &trees, &sites, 2).unwrap();
        let mut ws = Workspace::new();
        let table = forward(&mats, &mut ws, None).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let path = traceback(&mats, &table, &mut rng, None).unwrap();
        for w in path.windows(2) {
            assert_eq!(w[0], w[1]);
        }
    }

    #[test]
    fn test_deterministic_under_seed() {
        let (model, trees, sites) = setup(1e-8);
        let mats = assemble(&model, &trees, &sites, 2).unwrap();
        let mut ws = Workspace::new();
        let table = forward(&mats, &mut ws, None).unwrap();
        let a = traceback(&mats, &table, &mut StdRng::seed_from_u64(42), None).unwrap();
        let b = traceback(&mats, &table, &mut StdRng::seed_from_u64(42), None).unwrap();
        assert_eq!(a, b);
    }
}
