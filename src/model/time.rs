//! # Discretized Time Grid
//!
//! The coalescent is discretized onto a fixed grid of time points measured in
//! generations. Two derived step vectors are kept alongside the points:
//! full-interval widths (the top one infinite) and a half-step grid used by
//! the coalescent midpoint integration.

use crate::error::{ArgError, Result};

/// Default curvature for log-spaced grids
pub const DEFAULT_DELTA: f64 = 0.01;

/// Returns the i-th discretized time point of a log-spaced grid.
///
/// Points are linear in `ln(1 + delta * t)` space, so resolution is finest
/// near the present.
pub fn time_point(i: usize, ntimes: usize, maxtime: f64, delta: f64) -> f64 {
    ((i as f64 / ntimes as f64 * (1.0 + delta * maxtime).ln()).exp() - 1.0) / delta
}

/// A strictly increasing sequence of time points with derived step vectors.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    /// Time points in generations, `times[0] == 0`
    times: Vec<f64>,
    /// `steps[i] = times[i+1] - times[i]`; `steps[K-1] = +inf`
    steps: Vec<f64>,
    /// Half-step grid of length `2K - 1`: widths between consecutive entries
    /// of the midpoint-refined grid, top entry `+inf`
    coal_steps: Vec<f64>,
}

impl TimeGrid {
    /// Log-spaced grid over `[0, maxtime]` with `ntimes` points.
    pub fn log_spaced(ntimes: usize, maxtime: f64, delta: f64) -> Result<Self> {
        if ntimes < 2 {
            return Err(ArgError::config("time grid needs at least 2 points"));
        }
        if maxtime <= 0.0 || delta <= 0.0 {
            return Err(ArgError::config("maxtime and delta must be positive"));
        }
        let times: Vec<f64> = (0..ntimes)
            .map(|i| time_point(i, ntimes - 1, maxtime, delta))
            .collect();
        Self::build(times, false, delta)
    }

    /// Linearly spaced grid: `times[i] = i * step`.
    pub fn linear(step: f64, ntimes: usize) -> Result<Self> {
        if ntimes < 2 {
            return Err(ArgError::config("time grid needs at least 2 points"));
        }
        if step <= 0.0 {
            return Err(ArgError::config("time step must be positive"));
        }
        let times: Vec<f64> = (0..ntimes).map(|i| i as f64 * step).collect();
        Self::build(times, true, 0.0)
    }

    /// Grid from explicit points. Validates monotonicity and the zero origin.
    pub fn from_points(points: &[f64]) -> Result<Self> {
        if points.len() < 2 {
            return Err(ArgError::config("time grid needs at least 2 points"));
        }
        if points[0] != 0.0 {
            return Err(ArgError::config("time grid must start at 0"));
        }
        for w in points.windows(2) {
            if w[1] <= w[0] {
                return Err(ArgError::config("time grid must be strictly increasing"));
            }
        }
        Self::build(points.to_vec(), false, DEFAULT_DELTA)
    }

    fn build(times: Vec<f64>, linear: bool, delta: f64) -> Result<Self> {
        let ntimes = times.len();

        let mut steps = Vec::with_capacity(ntimes);
        for i in 0..ntimes - 1 {
            steps.push(times[i + 1] - times[i]);
        }
        steps.push(f64::INFINITY);

        // Midpoint-refined grid: points interleaved with interval midpoints,
        // placed linearly or in ln(1 + delta*t) space to match the spacing.
        let mut refined = Vec::with_capacity(2 * ntimes - 1);
        for i in 0..ntimes - 1 {
            refined.push(times[i]);
            if linear || delta <= 0.0 {
                refined.push(0.5 * (times[i] + times[i + 1]));
            } else {
                let l1 = (1.0 + delta * times[i]).ln();
                let l2 = (1.0 + delta * times[i + 1]).ln();
                refined.push(((0.5 * (l1 + l2)).exp() - 1.0) / delta);
            }
        }
        refined.push(times[ntimes - 1]);

        let mut coal_steps = Vec::with_capacity(2 * ntimes - 1);
        for w in refined.windows(2) {
            let dt = w[1] - w[0];
            if dt < 0.0 {
                return Err(ArgError::config("time grid midpoints are not monotone"));
            }
            coal_steps.push(dt);
        }
        coal_steps.push(f64::INFINITY);

        Ok(Self {
            times,
            steps,
            coal_steps,
        })
    }

    /// Number of time points
    pub fn ntimes(&self) -> usize {
        self.times.len()
    }

    /// Time point `i` in generations
    #[inline]
    pub fn time(&self, i: usize) -> f64 {
        self.times[i]
    }

    /// All time points
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Width of interval `i` (infinite for the top interval)
    #[inline]
    pub fn step(&self, i: usize) -> f64 {
        self.steps[i]
    }

    /// Half-step width `j` of the midpoint-refined grid
    #[inline]
    pub fn coal_step(&self, j: usize) -> f64 {
        self.coal_steps[j]
    }

    /// Nearest grid index for an arbitrary time in generations
    pub fn nearest_index(&self, t: f64) -> usize {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (i, &ti) in self.times.iter().enumerate() {
            let d = (t - ti).abs();
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        best
    }
}
