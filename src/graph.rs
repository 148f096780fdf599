//! Graph assembly and ownership.
//!
//! The [`Graph`] owns every tensor and operator node in two arenas;
//! edges are plain index handles ([`TensorId`], [`OpId`]), so the DAG
//! has no reference cycles and no shared-ownership back-pointers.
//! [`GraphBuilder`] wires producer/consumer edges as operators are added
//! and rejects structural inconsistencies; [`GraphBuilder::build`]
//! performs the whole-graph checks (cycle detection, topological order)
//! after which propagation cannot fail.

use std::collections::BTreeMap;
use std::fmt;

use sparseprop_kernel::{add_into, EinsumPlan, Format};

use crate::error::{Result, SpaError};
use crate::op::{OpKind, OpNode};
use crate::parse::Subscripts;
use crate::tensor::TensorNode;

/// Handle to a tensor node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) usize);

impl TensorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to an operator node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub(crate) usize);

impl OpId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Incrementally assembles tensors and operators, wiring edges eagerly.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    tensors: Vec<TensorNode>,
    ops: Vec<OpNode>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor node, returning its handle.
    pub fn tensor(&mut self, tensor: TensorNode) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(tensor);
        id
    }

    /// Read access to a registered tensor.
    pub fn tensor_ref(&self, id: TensorId) -> &TensorNode {
        &self.tensors[id.0]
    }

    fn claim_output(&mut self, output: TensorId, op: OpId) -> Result<()> {
        let out = &mut self.tensors[output.0];
        if out.producer.is_some() {
            return Err(SpaError::DuplicateProducer(out.name().to_string()));
        }
        out.producer = Some(op);
        out.is_output = true;
        Ok(())
    }

    fn wire_consumers(&mut self, inputs: &[TensorId], op: OpId) {
        for &t in inputs {
            let consumers = &mut self.tensors[t.0].consumers;
            if !consumers.contains(&op) {
                consumers.push(op);
            }
        }
    }

    /// Append an n-ary elementwise addition.
    pub fn add(&mut self, inputs: &[TensorId], output: TensorId) -> Result<OpId> {
        let out_sizes = self.tensors[output.0].sizes().to_vec();
        for &t in inputs {
            let tensor = &self.tensors[t.0];
            if tensor.rank() != out_sizes.len() {
                return Err(SpaError::RankMismatch {
                    name: tensor.name().to_string(),
                    expected: out_sizes.len(),
                    found: tensor.rank(),
                });
            }
            if tensor.sizes() != out_sizes {
                let dim = (0..out_sizes.len())
                    .find(|&d| tensor.sizes()[d] != out_sizes[d])
                    .unwrap_or(0);
                return Err(SpaError::SizeMismatch {
                    axis: format!("{} dim {dim}", tensor.name()),
                    size_a: tensor.sizes()[dim],
                    size_b: out_sizes[dim],
                });
            }
        }
        let id = OpId(self.ops.len());
        self.claim_output(output, id)?;
        self.wire_consumers(inputs, id);
        self.ops.push(OpNode {
            id,
            inputs: inputs.to_vec(),
            output,
            kind: OpKind::Add,
            plan: None,
        });
        Ok(id)
    }

    /// Append an einsum contraction described by `expression`.
    pub fn einsum(
        &mut self,
        inputs: &[TensorId],
        output: TensorId,
        expression: &str,
    ) -> Result<OpId> {
        let subscripts = Subscripts::parse(expression)?;
        if subscripts.inputs().len() != inputs.len() {
            return Err(SpaError::MalformedEinsum(format!(
                "'{expression}' names {} operands, {} given",
                subscripts.inputs().len(),
                inputs.len()
            )));
        }

        // Ranks, then a single char -> size map across inputs and output.
        let mut char_sizes: BTreeMap<char, usize> = BTreeMap::new();
        for (i, &t) in inputs.iter().enumerate() {
            let tensor = &self.tensors[t.0];
            let indices = &subscripts.inputs()[i];
            if indices.len() != tensor.rank() {
                return Err(SpaError::RankMismatch {
                    name: tensor.name().to_string(),
                    expected: indices.len(),
                    found: tensor.rank(),
                });
            }
            for (c, &size) in indices.chars().zip(tensor.sizes()) {
                match char_sizes.insert(c, size) {
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
        let out = &self.tensors[output.0];
        if subscripts.output().len() != out.rank() {
            return Err(SpaError::RankMismatch {
                name: out.name().to_string(),
                expected: subscripts.output().len(),
                found: out.rank(),
            });
        }
        for (c, &size) in subscripts.output().chars().zip(out.sizes()) {
            let expected = char_sizes[&c];
            if expected != size {
                return Err(SpaError::SizeMismatch {
                    axis: c.to_string(),
                    size_a: expected,
                    size_b: size,
                });
            }
        }

        let id = OpId(self.ops.len());
        self.claim_output(output, id)?;
        self.wire_consumers(inputs, id);
        self.ops.push(OpNode {
            id,
            inputs: inputs.to_vec(),
            output,
            kind: OpKind::Einsum(subscripts),
            plan: None,
        });
        Ok(id)
    }

    /// Finish assembly: record the initial tensors and the final output,
    /// check the producer/consumer edges for cycles, and fix the forward
    /// traversal order.
    pub fn build(self, inputs: Vec<TensorId>, output: TensorId) -> Result<Graph> {
        let Self { tensors, ops } = self;

        // Kahn's algorithm over producer -> consumer edges.
        let mut indegree = vec![0usize; ops.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        for op in &ops {
            for &t in &op.inputs {
                if let Some(producer) = tensors[t.0].producer {
                    successors[producer.0].push(op.id.0);
                    indegree[op.id.0] += 1;
                }
            }
        }
        let mut ready: Vec<usize> = (0..ops.len()).filter(|&i| indegree[i] == 0).collect();
        let mut topo = Vec::with_capacity(ops.len());
        let mut head = 0;
        while head < ready.len() {
            let op = ready[head];
            head += 1;
            topo.push(OpId(op));
            for &next in &successors[op] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(next);
                }
            }
        }
        if topo.len() != ops.len() {
            return Err(SpaError::CycleDetected);
        }

        Ok(Graph {
            tensors,
            ops,
            inputs,
            output,
            topo,
        })
    }
}

/// A validated computation graph, ready for propagation and compute.
#[derive(Debug)]
pub struct Graph {
    tensors: Vec<TensorNode>,
    ops: Vec<OpNode>,
    inputs: Vec<TensorId>,
    output: TensorId,
    pub(crate) topo: Vec<OpId>,
}

impl Graph {
    pub fn tensor(&self, id: TensorId) -> &TensorNode {
        &self.tensors[id.0]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut TensorNode {
        &mut self.tensors[id.0]
    }

    pub fn op(&self, id: OpId) -> &OpNode {
        &self.ops[id.0]
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &TensorNode)> {
        self.tensors.iter().enumerate().map(|(i, t)| (TensorId(i), t))
    }

    pub fn ops(&self) -> impl Iterator<Item = &OpNode> {
        self.ops.iter()
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn output(&self) -> TensorId {
        self.output
    }

    pub(crate) fn tensors_mut(&mut self) -> &mut [TensorNode] {
        &mut self.tensors
    }

    /// Mean estimated sparsity ratio over every operand use plus the
    /// final output.
    pub fn sparsity_ratio(&self) -> f32 {
        let mut total = 0.0f32;
        let mut count = 0usize;
        for op in &self.ops {
            for &t in &op.inputs {
                total += self.tensors[t.0].sparsity_ratio();
                count += 1;
            }
        }
        total += self.tensors[self.output.0].sparsity_ratio();
        count += 1;
        total / count as f32
    }

    /// Sum of per-tensor estimated storage, each tensor under the modes
    /// chosen at `threshold`.
    pub fn estimated_size_bytes(&self, threshold: f32) -> usize {
        self.tensors
            .iter()
            .map(|t| {
                let format = Format::with_modes(t.choose_modes(threshold));
                t.estimated_size_bytes(&format)
            })
            .sum()
    }

    /// Sum of packed storage over all concrete tensors created so far.
    pub fn concrete_storage_bytes(&self) -> usize {
        self.tensors
            .iter()
            .filter_map(|t| t.concrete())
            .map(|c| c.storage_size_bytes())
            .sum()
    }

    /// Build the executor expression for every operator.
    pub fn assemble_expressions(&mut self) -> Result<()> {
        for i in 0..self.ops.len() {
            if let OpKind::Einsum(subscripts) = &self.ops[i].kind {
                let notation = subscripts.to_string();
                let dims: Vec<&[usize]> = self.ops[i]
                    .inputs
                    .iter()
                    .map(|&t| self.tensors[t.0].sizes())
                    .collect();
                self.ops[i].plan = Some(EinsumPlan::parse(&notation, &dims)?);
            }
        }
        Ok(())
    }

    /// Assemble and hand the expressions to the executor.
    pub fn compile(&mut self) -> Result<()> {
        self.assemble_expressions()
    }

    /// Run every operator in topological order, returning the final
    /// output tensor's id.
    pub fn compute(&mut self) -> Result<TensorId> {
        for idx in 0..self.topo.len() {
            let op_id = self.topo[idx];
            let (output, inputs, is_add) = {
                let op = &self.ops[op_id.0];
                (op.output, op.inputs.clone(), matches!(op.kind, OpKind::Add))
            };
            let mut out = self.tensors[output.0].concrete.take().ok_or_else(|| {
                sparseprop_kernel::KernelError::Uninitialized(
                    self.tensors[output.0].name().to_string(),
                )
            })?;
            {
                let operands = inputs
                    .iter()
                    .map(|&t| {
                        self.tensors[t.0].concrete.as_ref().ok_or_else(|| {
                            sparseprop_kernel::KernelError::Uninitialized(
                                self.tensors[t.0].name().to_string(),
                            )
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                if is_add {
                    add_into(&operands, &mut out)?;
                } else {
                    let plan = self.ops[op_id.0].plan.as_ref().ok_or_else(|| {
                        sparseprop_kernel::KernelError::Uninitialized(format!(
                            "expression for op {}",
                            op_id.0
                        ))
                    })?;
                    plan.evaluate(&operands, &mut out)?;
                }
            }
            self.tensors[output.0].concrete = Some(out);
        }
        Ok(self.output)
    }

    /// Graphviz rendering: operators as boxes, tensors as ellipses.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph G {\n  rankdir=LR;\n");
        for (i, t) in self.tensors.iter().enumerate() {
            dot.push_str(&format!(
                "  t{i} [label=\"{}\", shape=ellipse];\n",
                t.name()
            ));
        }
        for op in &self.ops {
            let label = match &op.kind {
                OpKind::Add => "Add".to_string(),
                OpKind::Einsum(s) => format!("Einsum[{s}]"),
            };
            dot.push_str(&format!("  o{} [label=\"{label}\", shape=box];\n", op.id.0));
            for &t in &op.inputs {
                dot.push_str(&format!("  t{} -> o{};\n", t.0, op.id.0));
            }
            dot.push_str(&format!("  o{} -> t{};\n", op.id.0, op.output.0));
        }
        dot.push_str("}\n");
        dot
    }

    /// Bit-level dump of every tensor's sparsity state.
    pub fn sparsity_dump(&self) -> String {
        let mut out = String::new();
        for t in &self.tensors {
            out.push_str(t.name());
            out.push('\n');
            out.push_str(&t.sparsity_dump());
        }
        out
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.inputs.iter().map(|&t| self.tensor(t).name()).collect();
        write!(f, "{}", names.join(","))?;
        for op in &self.ops {
            let operands: Vec<&str> = op.inputs.iter().map(|&t| self.tensor(t).name()).collect();
            match &op.kind {
                OpKind::Add => write!(f, "->Add({}", operands.join(", "))?,
                OpKind::Einsum(s) => write!(f, "->Einsum[{s}]({}", operands.join(", "))?,
            }
            write!(f, ", out={})", self.tensor(op.output).name())?;
        }
        write!(f, "->{}", self.tensor(self.output).name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::SparsityVector;

    fn dense(b: &mut GraphBuilder, name: &str) -> TensorId {
        b.tensor(TensorNode::empty_output(vec![2, 2], name).unwrap())
    }

    #[test]
    fn wires_producers_and_consumers() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let w = dense(&mut b, "W");
        let o = dense(&mut b, "O");
        let op = b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let g = b.build(vec![x, w], o).unwrap();

        assert_eq!(g.tensor(o).producer(), Some(op));
        assert!(g.tensor(o).is_output());
        assert_eq!(g.tensor(x).consumers(), &[op]);
        assert_eq!(g.tensor(w).consumers(), &[op]);
        assert_eq!(g.tensor(x).producer(), None);
        assert!(!g.tensor(x).is_output());
    }

    #[test]
    fn rejects_two_writers() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let w = dense(&mut b, "W");
        let o = dense(&mut b, "O");
        b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let err = b.einsum(&[w, x], o, "ik,kj->ij").unwrap_err();
        assert!(matches!(err, SpaError::DuplicateProducer(_)));
    }

    #[test]
    fn rejects_rank_mismatch() {
        let mut b = GraphBuilder::new();
        let x = b.tensor(TensorNode::empty_output(vec![2, 2, 2], "X").unwrap());
        let w = dense(&mut b, "W");
        let o = dense(&mut b, "O");
        let err = b.einsum(&[x, w], o, "ik,kj->ij").unwrap_err();
        assert!(matches!(err, SpaError::RankMismatch { .. }));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut b = GraphBuilder::new();
        let x = b.tensor(TensorNode::empty_output(vec![2, 3], "X").unwrap());
        let w = b.tensor(TensorNode::empty_output(vec![4, 2], "W").unwrap());
        let o = dense(&mut b, "O");
        let err = b.einsum(&[x, w], o, "ik,kj->ij").unwrap_err();
        assert!(matches!(err, SpaError::SizeMismatch { .. }));
    }

    #[test]
    fn rejects_operand_count_mismatch() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let o = dense(&mut b, "O");
        let err = b.einsum(&[x], o, "ik,kj->ij").unwrap_err();
        assert!(matches!(err, SpaError::MalformedEinsum(_)));
    }

    #[test]
    fn rejects_add_shape_mismatch() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let y = b.tensor(TensorNode::empty_output(vec![2, 3], "Y").unwrap());
        let o = dense(&mut b, "O");
        let err = b.add(&[x, y], o).unwrap_err();
        assert!(matches!(err, SpaError::SizeMismatch { .. }));
    }

    #[test]
    fn rejects_cycle() {
        let mut b = GraphBuilder::new();
        let a = dense(&mut b, "A");
        let t1 = dense(&mut b, "T1");
        let t2 = dense(&mut b, "T2");
        // t2 feeds t1's producer and t1 feeds t2's producer.
        b.einsum(&[a, t2], t1, "ik,kj->ij").unwrap();
        b.einsum(&[a, t1], t2, "ik,kj->ij").unwrap();
        let err = b.build(vec![a], t2).unwrap_err();
        assert!(matches!(err, SpaError::CycleDetected));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let w1 = dense(&mut b, "W1");
        let w2 = dense(&mut b, "W2");
        let o1 = dense(&mut b, "O1");
        let o2 = dense(&mut b, "O2");
        let m1 = b.einsum(&[x, w1], o1, "ik,kj->ij").unwrap();
        let m2 = b.einsum(&[o1, w2], o2, "ik,kj->ij").unwrap();
        let g = b.build(vec![x, w1, w2], o2).unwrap();
        let pos = |id: OpId| g.topo.iter().position(|&o| o == id).unwrap();
        assert!(pos(m1) < pos(m2));
    }

    #[test]
    fn display_lists_the_chain() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let w = dense(&mut b, "W");
        let o = dense(&mut b, "O");
        b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let g = b.build(vec![x, w], o).unwrap();
        assert_eq!(g.to_string(), "X,W->Einsum[ik,kj->ij](X, W, out=O)->O");
    }

    #[test]
    fn dot_export_mentions_all_nodes() {
        let mut b = GraphBuilder::new();
        let x = dense(&mut b, "X");
        let w = dense(&mut b, "W");
        let o = dense(&mut b, "O");
        b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let g = b.build(vec![x, w], o).unwrap();
        let dot = g.to_dot();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("Einsum[ik,kj->ij]"));
        assert!(dot.contains("t0 -> o0;"));
        assert!(dot.contains("o0 -> t2;"));
    }

    #[test]
    fn empty_output_starts_fully_dense() {
        // from_bitsets and empty_output agree on the dense start state.
        let dense_t = TensorNode::empty_output(vec![4], "T").unwrap();
        let explicit = TensorNode::from_bitsets(
            vec![4],
            vec![SparsityVector::new_all_set(4)],
            "T",
        )
        .unwrap();
        assert_eq!(dense_t.sparsity(0), explicit.sparsity(0));
    }
}
