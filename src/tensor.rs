//! Tensor nodes: per-dimension sparsity state plus graph edges.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sparseprop_kernel::{estimate_storage_bytes, ConcreteTensor, Format, ModeFormat};

use crate::bitset::{SparsityVector, MAX_SIZE};
use crate::error::{Result, SpaError};
use crate::graph::OpId;

/// A tensor in the computation graph.
///
/// Carries one [`SparsityVector`] per dimension, the producer/consumer
/// edges wired in by the graph builder, and (after format selection) the
/// handle to the concrete tensor in the external executor.
#[derive(Debug, Clone)]
pub struct TensorNode {
    name: String,
    sizes: Vec<usize>,
    pub(crate) sparsities: Vec<SparsityVector>,
    pub(crate) is_output: bool,
    pub(crate) producer: Option<OpId>,
    pub(crate) consumers: Vec<OpId>,
    pub(crate) concrete: Option<ConcreteTensor>,
}

impl TensorNode {
    fn check_sizes(sizes: &[usize]) -> Result<()> {
        for &s in sizes {
            if s > MAX_SIZE {
                return Err(SpaError::BitsetOverflow {
                    size: s,
                    max: MAX_SIZE,
                });
            }
        }
        Ok(())
    }

    /// Tensor with explicit per-dimension sparsity vectors.
    pub fn from_bitsets(
        sizes: Vec<usize>,
        sparsities: Vec<SparsityVector>,
        name: &str,
    ) -> Result<Self> {
        Self::check_sizes(&sizes)?;
        if sparsities.len() != sizes.len() {
            return Err(SpaError::RankMismatch {
                name: name.to_string(),
                expected: sizes.len(),
                found: sparsities.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            sizes,
            sparsities,
            is_output: false,
            producer: None,
            consumers: Vec::new(),
            concrete: None,
        })
    }

    /// Tensor whose per-dimension vectors are generated by
    /// [`SparsityVector::random_with_density`], one density per dimension.
    pub fn from_densities(
        sizes: Vec<usize>,
        densities: &[f64],
        name: &str,
        seed: u64,
    ) -> Result<Self> {
        Self::check_sizes(&sizes)?;
        if densities.len() != sizes.len() {
            return Err(SpaError::RankMismatch {
                name: name.to_string(),
                expected: sizes.len(),
                found: densities.len(),
            });
        }
        let sparsities = sizes
            .iter()
            .zip(densities)
            .map(|(&len, &p)| SparsityVector::random_with_density(p, len, seed))
            .collect();
        Self::from_bitsets(sizes, sparsities, name)
    }

    /// Fully dense tensor, the starting state for operator outputs.
    pub fn empty_output(sizes: Vec<usize>, name: &str) -> Result<Self> {
        let sparsities = sizes.iter().map(|&len| SparsityVector::new_all_set(len)).collect();
        Self::from_bitsets(sizes, sparsities, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    /// True iff some operator in the graph writes this tensor.
    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    pub fn consumers(&self) -> &[OpId] {
        &self.consumers
    }

    pub fn sparsity(&self, dim: usize) -> &SparsityVector {
        &self.sparsities[dim]
    }

    pub fn sparsities(&self) -> &[SparsityVector] {
        &self.sparsities
    }

    /// Estimated count of possibly-nonzero elements: the product of the
    /// per-dimension popcounts.
    pub fn estimated_nnz(&self) -> usize {
        self.sizes
            .iter()
            .zip(&self.sparsities)
            .map(|(&len, v)| v.popcount_prefix(len))
            .product()
    }

    /// Estimated fraction of structurally-zero elements,
    /// `1 − ∏ popcount(d) / ∏ size(d)`.
    ///
    /// Assumes full tensor-product support over the per-dimension
    /// nonzeros, so it under-counts zeros of real data; the same
    /// estimator is used everywhere so format decisions stay consistent.
    pub fn sparsity_ratio(&self) -> f32 {
        let total: usize = self.sizes.iter().product();
        if total == 0 {
            return 0.0;
        }
        let nnz = self.estimated_nnz();
        (total - nnz) as f32 / total as f32
    }

    /// Per-dimension dense/sparse choice: a mode goes sparse when its
    /// zero-slice fraction exceeds `threshold`.
    pub fn choose_modes(&self, threshold: f32) -> Vec<ModeFormat> {
        self.sizes
            .iter()
            .zip(&self.sparsities)
            .map(|(&len, v)| {
                let zeros = len - v.popcount_prefix(len);
                if len > 0 && zeros as f32 / len as f32 > threshold {
                    ModeFormat::Sparse
                } else {
                    ModeFormat::Dense
                }
            })
            .collect()
    }

    /// Estimated packed storage size under `format`, computed from the
    /// bitset popcounts rather than concrete data.
    pub fn estimated_size_bytes(&self, format: &Format) -> usize {
        let dim_nnz: Vec<usize> = self
            .sizes
            .iter()
            .zip(&self.sparsities)
            .map(|(&len, v)| v.popcount_prefix(len))
            .collect();
        estimate_storage_bytes(&self.sizes, &dim_nnz, format)
    }

    /// Create the concrete tensor in the external executor with an
    /// explicit format.
    pub fn create_concrete(&mut self, format: Format) -> Result<()> {
        self.concrete = Some(ConcreteTensor::new(&self.name, self.sizes.clone(), format)?);
        Ok(())
    }

    /// Create the concrete tensor with modes chosen by
    /// [`choose_modes`](Self::choose_modes).
    pub fn create_concrete_auto(&mut self, threshold: f32) -> Result<()> {
        let format = Format::with_modes(self.choose_modes(threshold));
        self.create_concrete(format)
    }

    /// Fill the concrete tensor with seeded-random values at every
    /// coordinate whose per-dimension bits are all set, then pack it.
    ///
    /// Iterates outermost dimension first, the coordinate order the
    /// executor expects for insertion.
    pub fn initialize_concrete(&mut self, seed: u64) -> Result<()> {
        let concrete = self.concrete.as_mut().ok_or_else(|| {
            sparseprop_kernel::KernelError::Uninitialized(self.name.clone())
        })?;
        let mut rng = StdRng::seed_from_u64(seed);
        let total: usize = self.sizes.iter().product();
        let mut coord = vec![0usize; self.sizes.len()];
        for flat in 0..total {
            let mut rem = flat;
            for d in (0..self.sizes.len()).rev() {
                coord[d] = rem % self.sizes[d];
                rem /= self.sizes[d];
            }
            let live = coord
                .iter()
                .zip(&self.sparsities)
                .all(|(&c, v)| v.test(c));
            if live {
                concrete.insert(&coord, rng.gen::<f32>())?;
            }
        }
        concrete.pack();
        Ok(())
    }

    pub fn concrete(&self) -> Option<&ConcreteTensor> {
        self.concrete.as_ref()
    }

    pub fn concrete_mut(&mut self) -> Option<&mut ConcreteTensor> {
        self.concrete.as_mut()
    }

    /// Render every dimension's bits, one line per dimension.
    pub fn sparsity_dump(&self) -> String {
        let mut out = String::new();
        for (d, (&len, v)) in self.sizes.iter().zip(&self.sparsities).enumerate() {
            out.push_str(&format!("dim {d}: {}\n", v.to_bit_str(len)));
        }
        out
    }
}
