/// Errors surfaced by the reference executor.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("dimension mismatch for axis '{axis}': {dim_a} vs {dim_b}")]
    DimensionMismatch {
        axis: char,
        dim_a: usize,
        dim_b: usize,
    },

    #[error("operand count mismatch: expected {expected}, found {found}")]
    OperandCountMismatch { expected: usize, found: usize },

    #[error("unknown format token '{0}'")]
    UnknownFormat(String),

    #[error("invalid mode permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    #[error("format of rank {format_rank} given for tensor of rank {rank}")]
    FormatRankMismatch { rank: usize, format_rank: usize },

    #[error("coordinate {coord:?} out of bounds for shape {sizes:?}")]
    CoordOutOfBounds { coord: Vec<usize>, sizes: Vec<usize> },

    #[error("tensor '{0}' is already packed")]
    AlreadyPacked(String),

    #[error("tensor '{0}' has no concrete storage")]
    Uninitialized(String),

    #[error("output shape mismatch: expected {expected:?}, got {got:?}")]
    OutputShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

/// Convenience alias for `Result<T, KernelError>`.
pub type Result<T> = std::result::Result<T, KernelError>;
