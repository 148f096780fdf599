//! Sparsity propagation: the three transfer directions and the driver.
//!
//! The abstract domain is the product of per-dimension bitsets over all
//! tensors, ordered bitwise. Every transfer below only clears bits, so
//! any pass sequence is monotone and bounded by the finite lattice;
//! [`Graph::run_propagation`] is exactly one forward, one intra, one
//! backward pass, and callers wanting a fixed point repeat it until
//! nothing changes.

use crate::bitset::SparsityVector;
use crate::graph::{Graph, OpId, TensorId};
use crate::op::{OpKind, OpNode};

/// Propagation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inputs to output, in topological order.
    Forward,
    /// Between operands across reduction indices, output-first.
    Intra,
    /// Output back to operands across output indices, output-first.
    Backward,
}

impl Graph {
    /// One forward, one intra and one backward pass.
    pub fn run_propagation(&mut self) {
        self.run_direction(Direction::Forward);
        self.run_direction(Direction::Intra);
        self.run_direction(Direction::Backward);
    }

    /// A single pass in the given direction.
    pub fn run_direction(&mut self, dir: Direction) {
        match dir {
            Direction::Forward => {
                for idx in 0..self.topo.len() {
                    let op = self.topo[idx];
                    self.transfer(op, dir);
                }
            }
            Direction::Intra | Direction::Backward => self.run_reverse(dir),
        }
    }

    /// Reverse traversal from the output producer. An operator's
    /// operand leads to its producer only once every consumer of that
    /// operand has been processed, so join points are visited after all
    /// their downstream uses.
    fn run_reverse(&mut self, dir: Direction) {
        let Some(start) = self.tensor(self.output()).producer() else {
            return;
        };
        let mut processed = vec![false; self.op_count()];
        let mut stack = vec![start];
        while let Some(op) = stack.pop() {
            if processed[op.index()] {
                continue;
            }
            processed[op.index()] = true;
            self.transfer(op, dir);
            let operands = self.op(op).inputs().to_vec();
            for t in operands {
                let tensor = self.tensor(t);
                let Some(producer) = tensor.producer() else {
                    continue;
                };
                if !processed[producer.index()]
                    && tensor.consumers().iter().all(|c| processed[c.index()])
                {
                    stack.push(producer);
                }
            }
        }
    }

    fn transfer(&mut self, op: OpId, dir: Direction) {
        let is_add = matches!(self.op(op).kind, OpKind::Add);
        match dir {
            Direction::Forward => {
                if is_add {
                    self.forward_add(op);
                } else {
                    self.forward_einsum(op);
                }
            }
            Direction::Intra => {
                // Nothing to do for Add (no reduction indices) or for a
                // single-operand einsum (no co-reduced sibling).
                if !is_add && self.op(op).inputs().len() >= 2 {
                    self.intra_einsum(op);
                }
            }
            Direction::Backward => {
                // Add narrows nothing on its own going backward: a zero
                // sum does not prove any summand zero.
                if !is_add {
                    self.backward_einsum(op);
                }
            }
        }
    }

    /// Output slice `k` of a sum may be nonzero iff some summand's slice
    /// `k` may be nonzero.
    fn forward_add(&mut self, op: OpId) {
        let (inputs, output) = {
            let node = self.op(op);
            (node.inputs().to_vec(), node.output())
        };
        for dim in 0..self.tensor(output).rank() {
            let mut union = SparsityVector::all_clear();
            for &t in &inputs {
                union |= self.tensor(t).sparsity(dim);
            }
            self.tensors_mut()[output.index()].sparsities[dim] &= &union;
        }
    }

    /// An output slice along an output index survives only if every
    /// operand carrying that index may be nonzero there.
    fn forward_einsum(&mut self, op: OpId) {
        let (inputs, output, subscripts) = {
            let node = self.op(op);
            let OpKind::Einsum(s) = &node.kind else { unreachable!() };
            (node.inputs().to_vec(), node.output(), s.clone())
        };
        for (pos, c) in subscripts.output().chars().enumerate() {
            let mut meet = SparsityVector::all_set();
            for &(i, d) in &subscripts.output_dims()[&c] {
                meet &= self.tensor(inputs[i]).sparsity(d);
            }
            self.tensors_mut()[output.index()].sparsities[pos] &= &meet;
        }
    }

    /// Narrow each operand dimension bound to a reduction index by what
    /// the consumers of that operand still consider relevant.
    fn intra_einsum(&mut self, op: OpId) {
        let (inputs, subscripts) = {
            let node = self.op(op);
            let OpKind::Einsum(s) = &node.kind else { unreachable!() };
            (node.inputs().to_vec(), s.clone())
        };
        for locs in subscripts.reduction_dims().values() {
            for &(i, d) in locs {
                let relevant = self.relevance(inputs[i], d);
                self.tensors_mut()[inputs[i].index()].sparsities[d] &= &relevant;
            }
        }
    }

    /// Narrow each operand dimension bound to an output index the same
    /// way; for this operator itself the condition is its output's
    /// bitset at that index.
    fn backward_einsum(&mut self, op: OpId) {
        let (inputs, subscripts) = {
            let node = self.op(op);
            let OpKind::Einsum(s) = &node.kind else { unreachable!() };
            (node.inputs().to_vec(), s.clone())
        };
        for locs in subscripts.output_dims().values() {
            for &(i, d) in locs {
                let relevant = self.relevance(inputs[i], d);
                self.tensors_mut()[inputs[i].index()].sparsities[d] &= &relevant;
            }
        }
    }

    /// Union over all consumers of `tensor` of the per-consumer
    /// relevance of dimension `dim`. A slice the union clears is read by
    /// no consumer in a way that can reach a nonzero result, so the
    /// owner may treat it as zero.
    fn relevance(&self, tensor: TensorId, dim: usize) -> SparsityVector {
        let mut relevant = SparsityVector::all_clear();
        for &consumer in self.tensor(tensor).consumers() {
            relevant |= &self.consumer_relevance(self.op(consumer), tensor, dim);
        }
        relevant
    }

    /// What one consumer still needs of `tensor` along `dim`:
    /// - an addition needs a slice iff its sum's output may be nonzero
    ///   there;
    /// - an einsum binding the dimension to an output index needs what
    ///   its output keeps at that index;
    /// - an einsum binding it to a reduction index needs the meet of all
    ///   co-reduced operand slices, since one zero factor voids the term.
    fn consumer_relevance(&self, consumer: &OpNode, tensor: TensorId, dim: usize) -> SparsityVector {
        match &consumer.kind {
            OpKind::Add => self.tensor(consumer.output()).sparsity(dim).clone(),
            OpKind::Einsum(subscripts) => {
                let mut relevant = SparsityVector::all_clear();
                for (q, &operand) in consumer.inputs().iter().enumerate() {
                    if operand != tensor {
                        continue;
                    }
                    let c = subscripts.index_char(q, dim);
                    if let Some(pos) = subscripts.output_position(c) {
                        relevant |= self.tensor(consumer.output()).sparsity(pos);
                    } else {
                        let mut meet = SparsityVector::all_set();
                        for &(j, e) in &subscripts.reduction_dims()[&c] {
                            meet &= self.tensor(consumer.inputs()[j]).sparsity(e);
                        }
                        relevant |= &meet;
                    }
                }
                relevant
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::SparsityVector;
    use crate::graph::GraphBuilder;
    use crate::tensor::TensorNode;

    fn tensor(b: &mut GraphBuilder, name: &str, rows: &str, cols: &str) -> TensorId {
        b.tensor(
            TensorNode::from_bitsets(
                vec![rows.len(), cols.len()],
                vec![
                    SparsityVector::from_bit_str(rows),
                    SparsityVector::from_bit_str(cols),
                ],
                name,
            )
            .unwrap(),
        )
    }

    fn bits(g: &Graph, t: TensorId, dim: usize) -> String {
        g.tensor(t).sparsity(dim).to_bit_str(g.tensor(t).sizes()[dim])
    }

    #[test]
    fn add_forward_unions_inputs() {
        let mut b = GraphBuilder::new();
        let x1 = tensor(&mut b, "X1", "01", "01");
        let x2 = tensor(&mut b, "X2", "01", "10");
        let x3 = tensor(&mut b, "X3", "01", "01");
        let o1 = tensor(&mut b, "O1", "11", "11");
        b.add(&[x1, x2, x3], o1).unwrap();
        let mut g = b.build(vec![x1, x2, x3], o1).unwrap();

        g.run_propagation();
        assert_eq!(bits(&g, o1, 0), "01");
        assert_eq!(bits(&g, o1, 1), "11");
        // Intra and backward leave the summands untouched.
        for t in [x1, x3] {
            assert_eq!(bits(&g, t, 0), "01");
            assert_eq!(bits(&g, t, 1), "01");
        }
        assert_eq!(bits(&g, x2, 1), "10");
    }

    #[test]
    fn matmul_forward_meets_row_and_col() {
        let mut b = GraphBuilder::new();
        let x = tensor(&mut b, "X", "01", "11");
        let w = tensor(&mut b, "W", "11", "10");
        let o = tensor(&mut b, "O", "11", "11");
        b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let mut g = b.build(vec![x, w], o).unwrap();

        g.run_direction(Direction::Forward);
        assert_eq!(bits(&g, o, 0), "01");
        assert_eq!(bits(&g, o, 1), "10");
    }

    #[test]
    fn transpose_permutes_and_backward_keeps_input() {
        let mut b = GraphBuilder::new();
        let x = tensor(&mut b, "X", "01", "10");
        let o = tensor(&mut b, "O", "11", "11");
        b.einsum(&[x], o, "ij->ji").unwrap();
        let mut g = b.build(vec![x], o).unwrap();

        g.run_propagation();
        assert_eq!(bits(&g, o, 0), "10");
        assert_eq!(bits(&g, o, 1), "01");
        assert_eq!(bits(&g, x, 0), "01");
        assert_eq!(bits(&g, x, 1), "10");
    }

    #[test]
    fn intra_narrows_co_reduced_operand() {
        // O1 = X1 * W1 with W1 column 0 zeroed; O3 = O1 * O2. The
        // reduction over k in the second matmul makes O2's rows
        // irrelevant wherever O1's columns are zero.
        let mut b = GraphBuilder::new();
        let x1 = tensor(&mut b, "X1", "01", "11");
        let w1 = tensor(&mut b, "W1", "11", "10");
        let x2 = tensor(&mut b, "X2", "11", "11");
        let w2 = tensor(&mut b, "W2", "11", "11");
        let o1 = tensor(&mut b, "O1", "11", "11");
        let o2 = tensor(&mut b, "O2", "11", "11");
        let o3 = tensor(&mut b, "O3", "11", "11");
        b.einsum(&[x1, w1], o1, "ik,kj->ij").unwrap();
        b.einsum(&[x2, w2], o2, "ik,kj->ij").unwrap();
        b.einsum(&[o1, o2], o3, "ik,kj->ij").unwrap();
        let mut g = b.build(vec![x1, w1, x2, w2], o3).unwrap();

        g.run_propagation();
        assert_eq!(bits(&g, o1, 0), "01");
        assert_eq!(bits(&g, o1, 1), "10");
        assert_eq!(bits(&g, o3, 0), "01");
        // O2's rows meet O1's columns through the shared reduction.
        assert_eq!(bits(&g, o2, 0), "10");
        // X2's rows then narrow through O2 going backward.
        assert_eq!(bits(&g, x2, 0), "10");
        // Pure inputs of the first matmul stay as given.
        assert_eq!(bits(&g, x1, 0), "01");
        assert_eq!(bits(&g, x1, 1), "11");
        assert_eq!(bits(&g, w1, 0), "11");
        assert_eq!(bits(&g, w1, 1), "10");
    }

    #[test]
    fn shared_operand_relevance_is_union_over_consumers() {
        // X2 feeds two matmuls. Its row slices stay relevant because the
        // second consumer binds dim 0 to an output index whose slices
        // all survive, even though the first consumer's reduction would
        // narrow them.
        let mut b = GraphBuilder::new();
        let x1 = tensor(&mut b, "X1", "01", "01");
        let x2 = tensor(&mut b, "X2", "11", "11");
        let w1 = tensor(&mut b, "W1", "11", "01");
        let o1 = tensor(&mut b, "O1", "11", "11");
        let o2 = tensor(&mut b, "O2", "11", "11");
        let o3 = tensor(&mut b, "O3", "11", "11");
        b.einsum(&[x1, x2], o1, "ik,kj->ij").unwrap();
        b.einsum(&[x2, w1], o2, "ik,kj->ij").unwrap();
        b.einsum(&[o1, o2], o3, "ik,kj->ij").unwrap();
        let mut g = b.build(vec![x1, x2, w1], o3).unwrap();

        g.run_propagation();
        assert_eq!(bits(&g, x2, 0), "11");
        assert_eq!(bits(&g, x2, 1), "11");
        assert_eq!(bits(&g, o3, 0), "01");
        assert_eq!(bits(&g, o3, 1), "01");
    }

    #[test]
    fn diagonal_forward_meets_every_occurrence() {
        // "ii->i" binds both dimensions of X to the output index, so the
        // diagonal survives only where rows and columns both do.
        let mut b = GraphBuilder::new();
        let x = tensor(&mut b, "X", "01", "10");
        let o = b.tensor(TensorNode::empty_output(vec![2], "O").unwrap());
        b.einsum(&[x], o, "ii->i").unwrap();
        let mut g = b.build(vec![x], o).unwrap();

        g.run_direction(Direction::Forward);
        assert_eq!(bits(&g, o, 0), "00");
    }

    #[test]
    fn forward_pass_is_idempotent() {
        let mut b = GraphBuilder::new();
        let x = tensor(&mut b, "X", "0110", "1010");
        let w = tensor(&mut b, "W", "1100", "1011");
        let o = b.tensor(TensorNode::empty_output(vec![4, 4], "O").unwrap());
        b.einsum(&[x, w], o, "ik,kj->ij").unwrap();
        let mut g = b.build(vec![x, w], o).unwrap();

        g.run_direction(Direction::Forward);
        let first: Vec<String> = (0..2).map(|d| bits(&g, o, d)).collect();
        g.run_direction(Direction::Forward);
        let second: Vec<String> = (0..2).map(|d| bits(&g, o, d)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn scalar_output_is_untouched_by_forward() {
        let mut b = GraphBuilder::new();
        let x = tensor(&mut b, "X", "01", "11");
        let y = tensor(&mut b, "Y", "11", "10");
        let o = b.tensor(TensorNode::empty_output(vec![], "O").unwrap());
        b.einsum(&[x, y], o, "ij,ji->").unwrap();
        let mut g = b.build(vec![x, y], o).unwrap();
        g.run_propagation();
        assert_eq!(g.tensor(o).rank(), 0);
    }
}
