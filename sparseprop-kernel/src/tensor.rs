//! Concrete tensors with explicit insert/pack lifecycle.

use num_traits::Zero;

use crate::format::{estimate_storage_bytes, Format};
use crate::{KernelError, Result};

/// A concrete tensor handle as the analysis layer sees it: named, shaped,
/// carrying a storage [`Format`], filled coordinate-by-coordinate and
/// sealed with [`pack`](ConcreteTensor::pack) before it participates in
/// computation.
///
/// The backing store is a flat row-major `f32` buffer regardless of
/// format; the format only drives [`storage_size_bytes`](ConcreteTensor::storage_size_bytes)
/// and the layout a real compiler would pick.
#[derive(Debug, Clone)]
pub struct ConcreteTensor {
    name: String,
    sizes: Vec<usize>,
    format: Format,
    data: Vec<f32>,
    packed: bool,
}

impl ConcreteTensor {
    pub fn new(name: &str, sizes: Vec<usize>, format: Format) -> Result<Self> {
        if format.rank() != sizes.len() {
            return Err(KernelError::FormatRankMismatch {
                rank: sizes.len(),
                format_rank: format.rank(),
            });
        }
        let len = sizes.iter().product();
        Ok(Self {
            name: name.to_string(),
            sizes,
            format,
            data: vec![0.0; len],
            packed: false,
        })
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

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn is_packed(&self) -> bool {
        self.packed
    }

    fn flat_index(&self, coord: &[usize]) -> Result<usize> {
        if coord.len() != self.sizes.len()
            || coord.iter().zip(&self.sizes).any(|(&c, &s)| c >= s)
        {
            return Err(KernelError::CoordOutOfBounds {
                coord: coord.to_vec(),
                sizes: self.sizes.clone(),
            });
        }
        let mut idx = 0;
        for (&c, &s) in coord.iter().zip(&self.sizes) {
            idx = idx * s + c;
        }
        Ok(idx)
    }

    /// Stage a value at a coordinate. Only legal before [`pack`](Self::pack).
    pub fn insert(&mut self, coord: &[usize], value: f32) -> Result<()> {
        if self.packed {
            return Err(KernelError::AlreadyPacked(self.name.clone()));
        }
        let idx = self.flat_index(coord)?;
        self.data[idx] = value;
        Ok(())
    }

    /// Seal the tensor; after this, values only change through evaluation.
    pub fn pack(&mut self) {
        self.packed = true;
    }

    /// Read a value. Panics on a rank or bounds violation, like a direct
    /// array index would.
    pub fn at(&self, coord: &[usize]) -> f32 {
        let idx = self
            .flat_index(coord)
            .unwrap_or_else(|e| panic!("{e}"));
        self.data[idx]
    }

    pub(crate) fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub(crate) fn mark_packed(&mut self) {
        self.packed = true;
    }

    /// Number of stored nonzero values.
    pub fn nnz(&self) -> usize {
        self.data.iter().filter(|v| !v.is_zero()).count()
    }

    /// Number of slices along `dim` containing at least one nonzero.
    pub fn dim_nnz(&self, dim: usize) -> usize {
        let mut live = vec![false; self.sizes[dim]];
        for (flat, v) in self.data.iter().enumerate() {
            if !v.is_zero() {
                live[self.unflatten(flat)[dim]] = true;
            }
        }
        live.iter().filter(|&&b| b).count()
    }

    fn unflatten(&self, mut flat: usize) -> Vec<usize> {
        let mut coord = vec![0; self.sizes.len()];
        for d in (0..self.sizes.len()).rev() {
            coord[d] = flat % self.sizes[d];
            flat /= self.sizes[d];
        }
        coord
    }

    /// Packed storage footprint under this tensor's format, from the
    /// actually stored nonzero structure.
    pub fn storage_size_bytes(&self) -> usize {
        let dim_nnz: Vec<usize> = (0..self.rank()).map(|d| self.dim_nnz(d)).collect();
        estimate_storage_bytes(&self.sizes, &dim_nnz, &self.format)
    }
}
