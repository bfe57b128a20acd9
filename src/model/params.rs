//! # Model Parameters
//!
//! `ArgModel` bundles the time discretization with the population-genetic
//! parameters: per-interval effective population sizes, mutation and
//! recombination rates, and the optional position-indexed rate maps.
//!
//! The grid and popsize storage are shared handles; a `local_model` view
//! overrides `mu` and `rho` for one position without copying either.

use std::sync::Arc;

use crate::error::{ArgError, Result};
use crate::model::time::TimeGrid;
use crate::model::track::RateTrack;

/// Model parameters and time discretization scheme
#[derive(Debug, Clone)]
pub struct ArgModel {
    /// Discretized time grid (shared)
    pub grid: Arc<TimeGrid>,
    /// Haploid effective population size per time interval (shared, len `ntimes`)
    pub popsizes: Arc<[f64]>,
    /// Mutation rate (mutations/generation/site)
    pub mu: f64,
    /// Recombination rate (recombs/generation/site)
    pub rho: f64,
    /// Log-scale penalty applied per column violating infinite sites
    pub infsites_penalty: f64,
    /// Reject or penalize columns requiring more than one mutation
    pub infinite_sites: bool,
    /// Input data carries unresolved phase
    pub unphased: bool,
    /// Emit sampled phasings alongside the ARG
    pub sample_phase: bool,
    /// Position-indexed mutation rates
    pub mutmap: Option<RateTrack>,
    /// Position-indexed recombination rates
    pub recombmap: Option<RateTrack>,
}

impl ArgModel {
    /// Model with a constant population size.
    pub fn new(grid: TimeGrid, popsize: f64, rho: f64, mu: f64) -> Result<Self> {
        if popsize <= 0.0 {
            return Err(ArgError::config("popsize must be positive"));
        }
        let ntimes = grid.ntimes();
        Ok(Self {
            grid: Arc::new(grid),
            popsizes: vec![popsize; ntimes].into(),
            mu,
            rho,
            infsites_penalty: 0.0,
            infinite_sites: false,
            unphased: false,
            sample_phase: false,
            mutmap: None,
            recombmap: None,
        })
    }

    /// Model with per-interval population sizes. The count must match the grid.
    pub fn with_popsizes(grid: TimeGrid, popsizes: Vec<f64>, rho: f64, mu: f64) -> Result<Self> {
        if popsizes.len() != grid.ntimes() {
            return Err(ArgError::config(format!(
                "number of popsizes ({}) does not match ntimes ({})",
                popsizes.len(),
                grid.ntimes()
            )));
        }
        if popsizes.iter().any(|&n| n <= 0.0) {
            return Err(ArgError::config("popsizes must be positive"));
        }
        let mut model = Self::new_unchecked(grid, popsizes, rho, mu);
        model.infsites_penalty = 0.0;
        Ok(model)
    }

    fn new_unchecked(grid: TimeGrid, popsizes: Vec<f64>, rho: f64, mu: f64) -> Self {
        Self {
            grid: Arc::new(grid),
            popsizes: popsizes.into(),
            mu,
            rho,
            infsites_penalty: 0.0,
            infinite_sites: false,
            unphased: false,
            sample_phase: false,
            mutmap: None,
            recombmap: None,
        }
    }

    /// Number of time points
    #[inline]
    pub fn ntimes(&self) -> usize {
        self.grid.ntimes()
    }

    /// True if a mutation map is present
    pub fn has_mutmap(&self) -> bool {
        self.mutmap.is_some()
    }

    /// True if a recombination map is present
    pub fn has_recombmap(&self) -> bool {
        self.recombmap.is_some()
    }

    /// Recombination rate at a position, honoring the map when present
    pub fn local_rho(&self, pos: usize) -> f64 {
        match &self.recombmap {
            Some(track) => track.find(pos, self.rho),
            None => self.rho,
        }
    }

    /// Mutation rate at a position, honoring the map when present
    pub fn local_mu(&self, pos: usize) -> f64 {
        match &self.mutmap {
            Some(track) => track.find(pos, self.mu),
            None => self.mu,
        }
    }

    /// A view of the model customized for one position.
    ///
    /// Shares the grid and popsize storage; only `mu` and `rho` change. The
    /// maps are not carried into the view, so nested lookups are impossible.
    pub fn local_model(&self, pos: usize) -> ArgModel {
        ArgModel {
            grid: Arc::clone(&self.grid),
            popsizes: Arc::clone(&self.popsizes),
            mu: self.local_mu(pos),
            rho: self.local_rho(pos),
            infsites_penalty: self.infsites_penalty,
            infinite_sites: self.infinite_sites,
            unphased: self.unphased,
            sample_phase: self.sample_phase,
            mutmap: None,
            recombmap: None,
        }
    }
}
