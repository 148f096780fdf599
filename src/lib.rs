//! Sparsity propagation analysis over einsum computation graphs.
//!
//! Given a DAG of tensor operations (einsum contractions and elementwise
//! additions) where each input tensor carries a known per-dimension
//! sparsity pattern, the analysis computes a tight per-dimension pattern
//! for every intermediate and output tensor. It is purely structural:
//! it never looks at values, only at which slices along each dimension
//! are guaranteed zero. The resulting bitsets then drive the per-mode
//! dense/sparse storage choice handed to the external tensor-algebra
//! executor (`sparseprop-kernel` is the bundled reference).
//!
//! # Core Types
//!
//! - [`SparsityVector`]: fixed-width per-dimension bitset, the abstract
//!   domain element
//! - [`TensorNode`] / [`GraphBuilder`] / [`Graph`]: arena-owned graph of
//!   tensors and operators with producer/consumer edges
//! - [`Direction`]: the three propagation passes (forward, intra,
//!   backward), driven by [`Graph::run_propagation`]
//! - [`bench::EinsumBenchmark`] / [`bench::build_tree`]: benchmark
//!   descriptors and the left-deep contraction-tree builder
//!
//! # Example
//!
//! ```rust
//! use sparseprop::{GraphBuilder, SparsityVector, TensorNode};
//!
//! let mut b = GraphBuilder::new();
//! let x = b.tensor(TensorNode::from_bitsets(
//!     vec![2, 2],
//!     vec![SparsityVector::from_bit_str("01"), SparsityVector::from_bit_str("11")],
//!     "X",
//! )?);
//! let w = b.tensor(TensorNode::empty_output(vec![2, 2], "W")?);
//! let o = b.tensor(TensorNode::empty_output(vec![2, 2], "O")?);
//! b.einsum(&[x, w], o, "ik,kj->ij")?;
//! let mut g = b.build(vec![x, w], o)?;
//!
//! g.run_propagation();
//! // Row 1 of X is structurally zero, so row 1 of O is too.
//! assert!(!g.tensor(o).sparsity(0).test(1));
//! # Ok::<(), sparseprop::SpaError>(())
//! ```

pub mod bench;
pub mod bitset;
pub mod error;
pub mod graph;
pub mod op;
pub mod parse;
pub mod propagate;
pub mod tensor;

pub use bitset::{SparsityVector, MAX_SIZE};
pub use error::{Result, SpaError};
pub use graph::{Graph, GraphBuilder, OpId, TensorId};
pub use op::{OpKind, OpNode};
pub use parse::Subscripts;
pub use propagate::Direction;
pub use tensor::TensorNode;

/// Explicit home for the knobs the original system kept in globals: the
/// seed behind every randomized bitset and the density threshold for the
/// per-mode format choice. Drivers construct one up front and thread it
/// through benchmark building and format selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationContext {
    /// Seed for all randomized sparsity generation.
    pub seed: u64,
    /// Zero-slice fraction above which a mode is stored sparse.
    pub threshold: f32,
}

impl PropagationContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

impl Default for PropagationContext {
    fn default() -> Self {
        Self {
            seed: 123,
            threshold: 0.5,
        }
    }
}
