//! Reference executor for the tensor-algebra operations that `sparseprop`
//! delegates after its analysis has chosen per-mode storage formats.
//!
//! The crate mirrors the surface of a real sparse-tensor compiler without
//! the compilation: tensors are created with a [`Format`] (per-mode
//! dense/sparse choice plus a mode permutation), filled with [`ConcreteTensor::insert`],
//! sealed with [`ConcreteTensor::pack`], and combined through
//! [`EinsumPlan`] contractions or [`add_into`] elementwise sums evaluated
//! by naive loop nests. Storage sizes are estimated with the usual
//! per-level pos/crd accounting so that format choices can be compared.
//!
//! Everything here is a correctness baseline; no claim is made about the
//! speed of the loop nests.

pub mod einsum;
pub mod error;
pub mod format;
pub mod tensor;

pub use einsum::{add_into, EinsumPlan};
pub use error::{KernelError, Result};
pub use format::{estimate_storage_bytes, Format, ModeFormat};
pub use tensor::ConcreteTensor;
