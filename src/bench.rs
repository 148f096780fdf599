//! Benchmark descriptors and the left-deep contraction-tree builder.
//!
//! A descriptor is three lines of text: the contraction path as stack
//! index pairs, the einsum string per step (single-quoted), and the
//! initial tensor size tuples. Whitespace inside the lists is free-form.
//!
//! ```text
//! [(1, 3), (0, 2), (0, 2), (0, 1)]
//! ['ajac,acaj->a', 'ikbd,bdik->bik', 'bik,ikab->a', 'a,a->a']
//! [(10, 17, 10, 9), (16, 13, 16, 15), ...]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, SpaError};
use crate::graph::{Graph, GraphBuilder};
use crate::parse::Subscripts;
use crate::tensor::TensorNode;
use crate::PropagationContext;

/// Parsed benchmark descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EinsumBenchmark {
    /// Stack index pairs, one per contraction step.
    pub path: Vec<(usize, usize)>,
    /// Einsum strings, one per contraction step.
    pub strings: Vec<String>,
    /// Dimension sizes of the initial tensors.
    pub sizes: Vec<Vec<usize>>,
}

impl EinsumBenchmark {
    /// Serialize back to the three-line descriptor format.
    pub fn to_descriptor(&self) -> String {
        let path: Vec<String> = self.path.iter().map(|(a, b)| format!("({a}, {b})")).collect();
        let strings: Vec<String> = self.strings.iter().map(|s| format!("'{s}'")).collect();
        let sizes: Vec<String> = self
            .sizes
            .iter()
            .map(|dims| {
                let inner: Vec<String> = dims.iter().map(usize::to_string).collect();
                format!("({})", inner.join(", "))
            })
            .collect();
        format!(
            "[{}]\n[{}]\n[{}]\n",
            path.join(", "),
            strings.join(", "),
            sizes.join(", ")
        )
    }
}

fn parse_uint(text: &str, what: &str) -> Result<usize> {
    text.trim().parse().map_err(|_| {
        SpaError::BenchmarkParseError(format!("expected integer in {what}, found '{}'", text.trim()))
    })
}

/// Scan `(a, b)` pairs out of a line, ignoring everything between them.
fn parse_pairs(line: &str) -> Result<Vec<(usize, usize)>> {
    let mut pairs = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('(') {
        let close = rest[open..]
            .find(')')
            .map(|p| open + p)
            .ok_or_else(|| SpaError::BenchmarkParseError("unclosed '(' in path".into()))?;
        let body = &rest[open + 1..close];
        let (a, b) = body.split_once(',').ok_or_else(|| {
            SpaError::BenchmarkParseError(format!("expected pair, found '({body})'"))
        })?;
        pairs.push((parse_uint(a, "path")?, parse_uint(b, "path")?));
        rest = &rest[close + 1..];
    }
    Ok(pairs)
}

/// Scan single-quoted strings out of a line.
fn parse_quoted(line: &str) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('\'') {
        let close = rest[open + 1..]
            .find('\'')
            .map(|p| open + 1 + p)
            .ok_or_else(|| SpaError::BenchmarkParseError("unterminated quote".into()))?;
        strings.push(rest[open + 1..close].to_string());
        rest = &rest[close + 1..];
    }
    Ok(strings)
}

/// Scan `(d1, d2, …)` tuples out of a line.
fn parse_tuples(line: &str) -> Result<Vec<Vec<usize>>> {
    let mut tuples = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('(') {
        let close = rest[open..]
            .find(')')
            .map(|p| open + p)
            .ok_or_else(|| SpaError::BenchmarkParseError("unclosed '(' in sizes".into()))?;
        let dims = rest[open + 1..close]
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_uint(s, "sizes"))
            .collect::<Result<Vec<_>>>()?;
        tuples.push(dims);
        rest = &rest[close + 1..];
    }
    Ok(tuples)
}

/// Parse the three-line descriptor text.
pub fn parse_descriptor(text: &str) -> Result<EinsumBenchmark> {
    let mut lines = text.lines();
    let path_line = lines
        .next()
        .ok_or_else(|| SpaError::BenchmarkParseError("missing contraction path line".into()))?;
    let strings_line = lines
        .next()
        .ok_or_else(|| SpaError::BenchmarkParseError("missing einsum strings line".into()))?;
    let sizes_line = lines
        .next()
        .ok_or_else(|| SpaError::BenchmarkParseError("missing tensor sizes line".into()))?;

    Ok(EinsumBenchmark {
        path: parse_pairs(path_line)?,
        strings: parse_quoted(strings_line)?,
        sizes: parse_tuples(sizes_line)?,
    })
}

/// Read and parse a descriptor file.
pub fn read_descriptor(path: &Path) -> Result<EinsumBenchmark> {
    let text = fs::read_to_string(path)
        .map_err(|e| SpaError::BenchmarkParseError(format!("{}: {e}", path.display())))?;
    parse_descriptor(&text)
}

/// Deduce the output dimension sizes of one contraction step from the
/// einsum string and the operand sizes (given in operand order).
fn deduce_output_dims(subscripts: &Subscripts, operand_sizes: [&[usize]; 2]) -> Result<Vec<usize>> {
    let mut size_map: BTreeMap<char, usize> = BTreeMap::new();
    for (indices, sizes) in subscripts.inputs().iter().zip(operand_sizes) {
        if indices.len() != sizes.len() {
            return Err(SpaError::RankMismatch {
                name: indices.clone(),
                expected: indices.len(),
                found: sizes.len(),
            });
        }
        for (c, &size) in indices.chars().zip(sizes) {
            match size_map.insert(c, size) {
                Some(prev) if prev != size => {
                    return Err(SpaError::SizeMismatch {
                        axis: c.to_string(),
                        size_a: prev,
                        size_b: size,
                    })
                }
                _ => {}
            }
        }
    }
    Ok(subscripts.output().chars().map(|c| size_map[&c]).collect())
}

/// Build the left-deep contraction tree described by a benchmark.
///
/// The stack starts with the initial tensors, each dimension's bitset
/// generated at `density` from the context seed. Every step pops the two
/// operands named by the path entry, higher stack index first (so the
/// lower index stays stable during removal), pushes a fully dense
/// intermediate with deduced sizes and appends a binary einsum. The
/// tensor left on the stack is the graph output.
pub fn build_tree(
    benchmark: &EinsumBenchmark,
    density: f64,
    ctx: &PropagationContext,
) -> Result<Graph> {
    let mut builder = GraphBuilder::new();
    let mut stack = Vec::with_capacity(benchmark.sizes.len());
    let mut initial = Vec::with_capacity(benchmark.sizes.len());
    let mut counter = 0usize;
    for dims in &benchmark.sizes {
        let densities = vec![density; dims.len()];
        let tensor = TensorNode::from_densities(
            dims.clone(),
            &densities,
            &format!("T{counter}"),
            ctx.seed,
        )?;
        counter += 1;
        let id = builder.tensor(tensor);
        stack.push(id);
        initial.push(id);
    }

    if benchmark.path.len() != benchmark.strings.len() {
        return Err(SpaError::BenchmarkParseError(format!(
            "{} path steps but {} einsum strings",
            benchmark.path.len(),
            benchmark.strings.len()
        )));
    }

    for (&(a, b), expression) in benchmark.path.iter().zip(&benchmark.strings) {
        let lo = a.min(b);
        let hi = a.max(b);
        if hi >= stack.len() || lo == hi {
            return Err(SpaError::DimOutOfBounds {
                index: hi,
                bound: stack.len(),
            });
        }
        let subscripts = Subscripts::parse(expression)?;
        if subscripts.inputs().len() != 2 {
            return Err(SpaError::MalformedEinsum(format!(
                "contraction step '{expression}' is not binary"
            )));
        }
        let first = stack[hi];
        let second = stack[lo];
        let output_dims = deduce_output_dims(
            &subscripts,
            [
                builder_sizes(&builder, first),
                builder_sizes(&builder, second),
            ],
        )?;

        let out = builder.tensor(TensorNode::empty_output(
            output_dims,
            &format!("O{counter}"),
        )?);
        counter += 1;
        builder.einsum(&[first, second], out, expression)?;
        stack.remove(hi);
        stack.remove(lo);
        stack.push(out);
    }

    if stack.len() != 1 {
        return Err(SpaError::BenchmarkParseError(format!(
            "contraction path leaves {} tensors on the stack",
            stack.len()
        )));
    }
    builder.build(initial, stack[0])
}

fn builder_sizes(builder: &GraphBuilder, id: crate::graph::TensorId) -> &[usize] {
    builder.tensor_ref(id).sizes()
}
