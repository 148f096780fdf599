//! Einsum plans and their naive loop-nest evaluation.

use num_traits::Zero;

use crate::tensor::ConcreteTensor;
use crate::{KernelError, Result};

/// A parsed, shape-checked einsum assignment such as `"ik,kj->ij"`.
///
/// Parsing resolves every index variable to an extent and precomputes,
/// for each operand dimension, which variable it reads. Evaluation walks
/// the full cartesian product of the index variables and accumulates the
/// product of the operand entries into the output coordinate; this is
/// the reference semantics, not a fast kernel.
#[derive(Debug, Clone)]
pub struct EinsumPlan {
    notation: String,
    /// Index characters per operand.
    inputs: Vec<Vec<char>>,
    /// Index characters of the output.
    output: Vec<char>,
    /// Distinct variables in first-seen order, with their extents.
    vars: Vec<char>,
    extents: Vec<usize>,
    /// For each operand dimension, the position of its variable in `vars`.
    input_var_pos: Vec<Vec<usize>>,
    output_var_pos: Vec<usize>,
}

impl EinsumPlan {
    /// Parse `notation` against the operand shapes.
    pub fn parse(notation: &str, input_dims: &[&[usize]]) -> Result<Self> {
        let compact: String = notation.chars().filter(|c| !c.is_whitespace()).collect();
        let arrow = compact
            .find("->")
            .ok_or_else(|| KernelError::Parse(format!("missing '->' in '{notation}'")))?;
        let lhs = &compact[..arrow];
        let rhs = &compact[arrow + 2..];

        let inputs: Vec<Vec<char>> = lhs.split(',').map(|s| s.chars().collect()).collect();
        let output: Vec<char> = rhs.chars().collect();
        for c in inputs.iter().flatten().chain(output.iter()) {
            if !c.is_ascii_alphabetic() {
                return Err(KernelError::Parse(format!(
                    "invalid index character '{c}' in '{notation}'"
                )));
            }
        }
        if inputs.len() != input_dims.len() {
            return Err(KernelError::OperandCountMismatch {
                expected: inputs.len(),
                found: input_dims.len(),
            });
        }

        let mut vars: Vec<char> = Vec::new();
        let mut extents: Vec<usize> = Vec::new();
        for (operand, (chars, dims)) in inputs.iter().zip(input_dims).enumerate() {
            if chars.len() != dims.len() {
                return Err(KernelError::Parse(format!(
                    "operand {operand} of '{notation}' names {} indices for rank {}",
                    chars.len(),
                    dims.len()
                )));
            }
            for (&c, &d) in chars.iter().zip(dims.iter()) {
                match vars.iter().position(|&v| v == c) {
                    Some(p) if extents[p] != d => {
                        return Err(KernelError::DimensionMismatch {
                            axis: c,
                            dim_a: extents[p],
                            dim_b: d,
                        })
                    }
                    Some(_) => {}
                    None => {
                        vars.push(c);
                        extents.push(d);
                    }
                }
            }
        }
        for &c in &output {
            if !vars.contains(&c) {
                return Err(KernelError::Parse(format!(
                    "output index '{c}' not found in any operand of '{notation}'"
                )));
            }
        }

        let pos_of = |c: char| vars.iter().position(|&v| v == c).unwrap();
        let input_var_pos = inputs
            .iter()
            .map(|chars| chars.iter().map(|&c| pos_of(c)).collect())
            .collect();
        let output_var_pos = output.iter().map(|&c| pos_of(c)).collect();

        Ok(Self {
            notation: compact,
            inputs,
            output,
            vars,
            extents,
            input_var_pos,
            output_var_pos,
        })
    }

    pub fn notation(&self) -> &str {
        &self.notation
    }

    pub fn operand_count(&self) -> usize {
        self.inputs.len()
    }

    /// Extents of the output dimensions, in output index order.
    pub fn output_dims(&self) -> Vec<usize> {
        self.output_var_pos.iter().map(|&p| self.extents[p]).collect()
    }

    /// Evaluate the contraction into `out`, overwriting its contents.
    pub fn evaluate(&self, inputs: &[&ConcreteTensor], out: &mut ConcreteTensor) -> Result<()> {
        if inputs.len() != self.inputs.len() {
            return Err(KernelError::OperandCountMismatch {
                expected: self.inputs.len(),
                found: inputs.len(),
            });
        }
        for (t, chars) in inputs.iter().zip(&self.inputs) {
            let expected: Vec<usize> = chars
                .iter()
                .map(|&c| self.extents[self.vars.iter().position(|&v| v == c).unwrap()])
                .collect();
            if t.sizes() != expected.as_slice() {
                return Err(KernelError::OutputShapeMismatch {
                    expected,
                    got: t.sizes().to_vec(),
                });
            }
        }
        let out_dims = self.output_dims();
        if out.sizes() != out_dims.as_slice() {
            return Err(KernelError::OutputShapeMismatch {
                expected: out_dims,
                got: out.sizes().to_vec(),
            });
        }

        out.data_mut().fill(0.0);
        let total: usize = self.extents.iter().product();
        let mut assignment = vec![0usize; self.vars.len()];
        for step in 0..total {
            let mut rem = step;
            for v in (0..self.vars.len()).rev() {
                assignment[v] = rem % self.extents[v];
                rem /= self.extents[v];
            }

            let mut prod = 1.0f32;
            for (t, var_pos) in inputs.iter().zip(&self.input_var_pos) {
                let mut flat = 0usize;
                for (&p, &s) in var_pos.iter().zip(t.sizes()) {
                    flat = flat * s + assignment[p];
                }
                prod *= t.data()[flat];
                if prod.is_zero() {
                    break;
                }
            }
            if prod.is_zero() {
                continue;
            }

            let mut out_flat = 0usize;
            for (&p, &s) in self.output_var_pos.iter().zip(out.sizes()) {
                out_flat = out_flat * s + assignment[p];
            }
            out.data_mut()[out_flat] += prod;
        }
        out.mark_packed();
        Ok(())
    }
}

/// Elementwise n-ary sum: `out = in_1 + in_2 + … + in_n`.
pub fn add_into(inputs: &[&ConcreteTensor], out: &mut ConcreteTensor) -> Result<()> {
    if inputs.is_empty() {
        return Err(KernelError::OperandCountMismatch {
            expected: 1,
            found: 0,
        });
    }
    for t in inputs {
        if t.sizes() != out.sizes() {
            return Err(KernelError::OutputShapeMismatch {
                expected: out.sizes().to_vec(),
                got: t.sizes().to_vec(),
            });
        }
    }
    out.data_mut().fill(0.0);
    for t in inputs {
        for (o, v) in out.data_mut().iter_mut().zip(t.data()) {
            *o += v;
        }
    }
    out.mark_packed();
    Ok(())
}
