//! # Workspace Pattern for Forward Buffers
//!
//! Pre-allocated buffers for the forward pass to avoid repeated allocations
//! in the per-column hot loop. Buffers live outside the matrix structs and
//! are passed as `&mut Workspace`, keeping the computation functions free of
//! internal mutability.

/// Reusable buffers for the threading HMM
#[derive(Debug, Default)]
pub struct Workspace {
    /// Linear-space (shifted) forward weights for the current column
    pub weights: Vec<f64>,
    /// Fused-fold output for the next column
    pub column: Vec<f64>,
    /// Scratch for per-target log weights during traceback
    pub traceback: Vec<f64>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize every buffer for a state count, reusing capacity
    pub fn resize(&mut self, n_states: usize) {
        self.weights.resize(n_states, 0.0);
        self.column.resize(n_states, 0.0);
        self.traceback.resize(n_states, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_reuses() {
        let mut ws = Workspace::new();
        ws.resize(10);
        assert_eq!(ws.weights.len(), 10);
        ws.resize(4);
        assert_eq!(ws.column.len(), 4);
    }
}
