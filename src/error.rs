/// Errors raised while assembling a graph or parsing its inputs.
///
/// Everything here surfaces at construction or file-parse time; once a
/// graph is built, propagation itself cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum SpaError {
    #[error("malformed einsum string: {0}")]
    MalformedEinsum(String),

    #[error("rank mismatch for tensor '{name}': expected {expected}, found {found}")]
    RankMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("size mismatch for '{axis}': {size_a} vs {size_b}")]
    SizeMismatch {
        axis: String,
        size_a: usize,
        size_b: usize,
    },

    #[error("index {index} out of bounds ({bound})")]
    DimOutOfBounds { index: usize, bound: usize },

    #[error("tensor '{0}' already has a producer")]
    DuplicateProducer(String),

    #[error("cycle detected in producer/consumer edges")]
    CycleDetected,

    #[error("benchmark parse error: {0}")]
    BenchmarkParseError(String),

    #[error("dimension of size {size} exceeds bitset capacity {max}")]
    BitsetOverflow { size: usize, max: usize },

    #[error(transparent)]
    ExternalCompilerError(#[from] sparseprop_kernel::KernelError),
}

/// Convenience alias for `Result<T, SpaError>`.
pub type Result<T> = std::result::Result<T, SpaError>;
