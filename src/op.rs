//! Operator nodes.

use sparseprop_kernel::EinsumPlan;

use crate::graph::{OpId, TensorId};
use crate::parse::Subscripts;

/// The two operator kinds. A closed enum: the analysis dispatches on the
/// kind in several places and the set is fixed by design.
#[derive(Debug, Clone)]
pub enum OpKind {
    /// N-ary elementwise sum; all operands share the output's shape.
    Add,
    /// Multilinear contraction described by an einsum string.
    Einsum(Subscripts),
}

/// An operator in the computation graph: operand and result tensor ids
/// plus the kind-specific state.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub(crate) id: OpId,
    pub(crate) inputs: Vec<TensorId>,
    pub(crate) output: TensorId,
    pub(crate) kind: OpKind,
    /// Executor plan, present after `assemble_expressions`.
    pub(crate) plan: Option<EinsumPlan>,
}

impl OpNode {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn output(&self) -> TensorId {
        self.output
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn op_type(&self) -> &'static str {
        match self.kind {
            OpKind::Add => "Add",
            OpKind::Einsum(_) => "Einsum",
        }
    }

    /// The subscripts, for einsum operators.
    pub fn subscripts(&self) -> Option<&Subscripts> {
        match &self.kind {
            OpKind::Einsum(s) => Some(s),
            OpKind::Add => None,
        }
    }
}
