//! Einsum subscripts parsing.
//!
//! `"ab,bc->ac"` splits into one index string per input and the output
//! index string. Characters that appear in the output are *output
//! dimensions*; characters that appear only on the input side are
//! *reduction dimensions*. For both kinds the parser records every
//! `(input, dimension)` position the character occupies, which is the
//! shape the transfer functions consume.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SpaError};

/// Occurrences of one index character: `(input index, dimension index)`.
pub type IndexLocs = Vec<(usize, usize)>;

/// Every position `c` occupies across the input index strings, in input
/// order then dimension order.
fn occurrences(inputs: &[String], c: char) -> IndexLocs {
    let mut locs = Vec::new();
    for (i, s) in inputs.iter().enumerate() {
        for (j, ch) in s.chars().enumerate() {
            if ch == c {
                locs.push((i, j));
            }
        }
    }
    locs
}

/// A parsed einsum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscripts {
    inputs: Vec<String>,
    output: String,
    output_dims: BTreeMap<char, IndexLocs>,
    reduction_dims: BTreeMap<char, IndexLocs>,
}

impl Subscripts {
    /// Parse an einsum string such as `"ik,kj->ij"`.
    ///
    /// Index characters must be ASCII letters and every output character
    /// must occur in at least one input. A character repeated within one
    /// input string (a diagonal access) contributes every position it
    /// occupies, so the transfer functions see all of its dimensions.
    pub fn parse(expression: &str) -> Result<Self> {
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let arrow = compact.find("->").ok_or_else(|| {
            SpaError::MalformedEinsum(format!("missing '->' in '{expression}'"))
        })?;
        let lhs = &compact[..arrow];
        let output = compact[arrow + 2..].to_string();

        let inputs: Vec<String> = lhs.split(',').map(str::to_string).collect();
        for c in inputs.iter().flat_map(|s| s.chars()).chain(output.chars()) {
            if !c.is_ascii_alphabetic() {
                return Err(SpaError::MalformedEinsum(format!(
                    "invalid index character '{c}' in '{expression}'"
                )));
            }
        }
        for c in output.chars() {
            if !inputs.iter().any(|s| s.contains(c)) {
                return Err(SpaError::MalformedEinsum(format!(
                    "output index '{c}' not found in any input of '{expression}'"
                )));
            }
        }

        let mut output_dims: BTreeMap<char, IndexLocs> = BTreeMap::new();
        for c in output.chars() {
            output_dims
                .entry(c)
                .or_insert_with(|| occurrences(&inputs, c));
        }

        let mut reduction_dims: BTreeMap<char, IndexLocs> = BTreeMap::new();
        for s in &inputs {
            for c in s.chars() {
                if output_dims.contains_key(&c) || reduction_dims.contains_key(&c) {
                    continue;
                }
                reduction_dims.insert(c, occurrences(&inputs, c));
            }
        }

        Ok(Self {
            inputs,
            output,
            output_dims,
            reduction_dims,
        })
    }

    /// Index strings of the inputs, in operand order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Index string of the output.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Occurrence map of the output-dimension characters.
    pub fn output_dims(&self) -> &BTreeMap<char, IndexLocs> {
        &self.output_dims
    }

    /// Occurrence map of the reduction-dimension characters.
    pub fn reduction_dims(&self) -> &BTreeMap<char, IndexLocs> {
        &self.reduction_dims
    }

    /// Index character at dimension `dim` of input `input`.
    pub fn index_char(&self, input: usize, dim: usize) -> char {
        self.inputs[input]
            .chars()
            .nth(dim)
            .expect("dimension within input rank")
    }

    /// Position of `c` in the output string, if it is an output index.
    pub fn output_position(&self, c: char) -> Option<usize> {
        self.output.find(c)
    }

    /// Whether `c` is an output-dimension character.
    pub fn is_output_dim(&self, c: char) -> bool {
        self.output_dims.contains_key(&c)
    }
}

impl fmt::Display for Subscripts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.inputs.join(","), self.output)
    }
}
