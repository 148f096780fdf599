//! Per-mode storage formats and the storage-size estimate.

use crate::{KernelError, Result};

/// Storage choice for a single tensor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFormat {
    Dense,
    Sparse,
}

/// Full storage format: one [`ModeFormat`] per mode plus the order in
/// which modes are stored. `perm[k]` is the tensor dimension stored at
/// level `k`, so `(Dense, Sparse)` with permutation `(1, 0)` is the
/// column-compressed layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    modes: Vec<ModeFormat>,
    perm: Vec<usize>,
}

impl Format {
    /// Format with explicit modes and a mode permutation.
    pub fn new(modes: Vec<ModeFormat>, perm: Vec<usize>) -> Result<Self> {
        let rank = modes.len();
        let mut seen = vec![false; rank];
        for &p in &perm {
            if p >= rank || seen[p] {
                return Err(KernelError::InvalidPermutation { perm, rank });
            }
            seen[p] = true;
        }
        if perm.len() != rank {
            return Err(KernelError::InvalidPermutation { perm, rank });
        }
        Ok(Self { modes, perm })
    }

    /// Format with the given modes stored in dimension order.
    pub fn with_modes(modes: Vec<ModeFormat>) -> Self {
        let perm = (0..modes.len()).collect();
        Self { modes, perm }
    }

    /// All-dense format of the given rank.
    pub fn dense(rank: usize) -> Self {
        Self::with_modes(vec![ModeFormat::Dense; rank])
    }

    /// All-sparse format of the given rank.
    pub fn sparse(rank: usize) -> Self {
        Self::with_modes(vec![ModeFormat::Sparse; rank])
    }

    /// Parse one of the named rank-2 format tokens.
    ///
    /// `CSR` = (Dense, Sparse); `CSC` = (Dense, Sparse) stored
    /// column-first; `DD` = (Dense, Dense); `DCSR`/`DCSC` = (Sparse,
    /// Sparse) row-/column-first; `SparseDense`/`SparseDense10` =
    /// (Sparse, Dense) row-/column-first.
    pub fn parse(token: &str) -> Result<Self> {
        use ModeFormat::{Dense, Sparse};
        let (modes, perm) = match token {
            "CSR" => (vec![Dense, Sparse], vec![0, 1]),
            "CSC" => (vec![Dense, Sparse], vec![1, 0]),
            "DD" => (vec![Dense, Dense], vec![0, 1]),
            "DCSR" => (vec![Sparse, Sparse], vec![0, 1]),
            "DCSC" => (vec![Sparse, Sparse], vec![1, 0]),
            "SparseDense" => (vec![Sparse, Dense], vec![0, 1]),
            "SparseDense10" => (vec![Sparse, Dense], vec![1, 0]),
            _ => return Err(KernelError::UnknownFormat(token.to_string())),
        };
        Ok(Self { modes, perm })
    }

    pub fn rank(&self) -> usize {
        self.modes.len()
    }

    pub fn modes(&self) -> &[ModeFormat] {
        &self.modes
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }
}

/// Estimate the packed storage size in bytes of a tensor with the given
/// dimension extents and per-dimension nonzero-slice counts.
///
/// Walks the storage levels in permutation order. A dense level stores a
/// single extent word and keeps every slice materialized; a compressed
/// level stores a `pos` array over the parent fibers plus one `crd`
/// entry per surviving fiber and drops the empty slices. Values cost one
/// word per leaf fiber. Word size is four bytes throughout.
pub fn estimate_storage_bytes(sizes: &[usize], dim_nnz: &[usize], format: &Format) -> usize {
    let mut fibers = 1usize;
    let mut words = 0usize;
    for &level in format.perm() {
        match format.modes()[level] {
            ModeFormat::Dense => {
                words += 1;
                fibers *= sizes[level];
            }
            ModeFormat::Sparse => {
                words += fibers + 1;
                fibers *= dim_nnz[level];
                words += fibers;
            }
        }
    }
    (words + fibers) * std::mem::size_of::<f32>()
}
