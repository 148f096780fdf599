//! Built-in benchmark graphs.
//!
//! Matrix shapes are all `SIZE x SIZE`; `row_density`/`col_density` give
//! the fraction of zeroed slices for the structured operands, weights
//! keep dense rows the way the modeled workloads do.

use sparseprop::{
    Graph, GraphBuilder, PropagationContext, Result, SparsityVector, TensorId, TensorNode,
};

/// Side length of every matrix in the built-in graphs.
pub const SIZE: usize = 256;

fn matrix(
    b: &mut GraphBuilder,
    name: &str,
    row_density: f64,
    col_density: f64,
    seed: u64,
) -> Result<TensorId> {
    let t = TensorNode::from_bitsets(
        vec![SIZE, SIZE],
        vec![
            SparsityVector::random_with_density(row_density, SIZE, seed),
            SparsityVector::random_with_density(col_density, SIZE, seed.wrapping_add(1)),
        ],
        name,
    )?;
    Ok(b.tensor(t))
}

fn output(b: &mut GraphBuilder, name: &str) -> Result<TensorId> {
    Ok(b.tensor(TensorNode::empty_output(vec![SIZE, SIZE], name)?))
}

/// Transformer-block shape: three projections of a shared input, two of
/// them recombined, a residual add, then two more projections and a
/// second residual.
pub fn bert(row_density: f64, col_density: f64, ctx: &PropagationContext) -> Result<Graph> {
    let s = ctx.seed;
    let mut b = GraphBuilder::new();
    let input = matrix(&mut b, "input", row_density, col_density, s)?;
    let w1 = matrix(&mut b, "W1", 0.0, col_density, s.wrapping_add(2))?;
    let w2 = matrix(&mut b, "W2", 0.0, col_density, s.wrapping_add(4))?;
    let w3 = matrix(&mut b, "W3", 0.0, col_density, s.wrapping_add(6))?;
    let w4 = matrix(&mut b, "W4", 0.0, col_density, s.wrapping_add(8))?;
    let w5 = matrix(&mut b, "W5", row_density, col_density, s.wrapping_add(10))?;
    let w6 = matrix(&mut b, "W6", col_density, 0.0, s.wrapping_add(12))?;

    let o: Vec<TensorId> = (0..10)
        .map(|i| output(&mut b, &format!("O{i}")))
        .collect::<Result<_>>()?;

    b.einsum(&[input, w1], o[0], "ik,kj->ij")?;
    b.einsum(&[input, w2], o[1], "ik,kj->ij")?;
    b.einsum(&[input, w3], o[2], "ik,kj->ij")?;
    b.einsum(&[o[1], o[2]], o[3], "ik,kj->ij")?;
    b.einsum(&[o[3], o[0]], o[4], "ik,kj->ij")?;
    b.einsum(&[o[4], w4], o[5], "ik,kj->ij")?;
    b.add(&[input, o[5]], o[6])?;
    b.einsum(&[o[6], w5], o[7], "ik,kj->ij")?;
    b.einsum(&[o[7], w6], o[8], "ik,kj->ij")?;
    b.add(&[o[8], o[6]], o[9])?;

    b.build(vec![input, w1, w2, w3, w4, w5, w6], o[9])
}

/// Two embedding-style projections of a shared input summed, projected
/// once more, with a final residual back to the input.
pub fn deepfm(row_density: f64, col_density: f64, ctx: &PropagationContext) -> Result<Graph> {
    let s = ctx.seed;
    let mut b = GraphBuilder::new();
    let x = matrix(&mut b, "X", row_density, col_density, s)?;
    let e1 = matrix(&mut b, "E1", 0.0, col_density, s.wrapping_add(2))?;
    let e2 = matrix(&mut b, "E2", 0.0, col_density, s.wrapping_add(4))?;
    let w = matrix(&mut b, "W", 0.0, col_density, s.wrapping_add(6))?;

    let o0 = output(&mut b, "O0")?;
    let o1 = output(&mut b, "O1")?;
    let o2 = output(&mut b, "O2")?;
    let o3 = output(&mut b, "O3")?;
    let o4 = output(&mut b, "O4")?;

    b.einsum(&[x, e1], o0, "ik,kj->ij")?;
    b.einsum(&[x, e2], o1, "ik,kj->ij")?;
    b.add(&[o0, o1], o2)?;
    b.einsum(&[o2, w], o3, "ik,kj->ij")?;
    b.add(&[o3, x], o4)?;

    b.build(vec![x, e1, e2, w], o4)
}

/// Single matmul, the smallest end-to-end graph.
pub fn mem_test(row_density: f64, col_density: f64, ctx: &PropagationContext) -> Result<Graph> {
    let s = ctx.seed;
    let mut b = GraphBuilder::new();
    let x = matrix(&mut b, "X", row_density, col_density, s)?;
    let w1 = matrix(&mut b, "W1", 0.0, col_density, s.wrapping_add(2))?;
    let o1 = output(&mut b, "O1")?;
    b.einsum(&[w1, x], o1, "ik,kj->ij")?;
    b.build(vec![x, w1], o1)
}

/// Default graph: a four-deep matmul chain.
pub fn chain(row_density: f64, col_density: f64, ctx: &PropagationContext) -> Result<Graph> {
    let s = ctx.seed;
    let mut b = GraphBuilder::new();
    let x = matrix(&mut b, "X", row_density, col_density, s)?;
    let w1 = matrix(&mut b, "W1", 0.0, col_density, s.wrapping_add(2))?;
    let w2 = matrix(&mut b, "W2", 0.0, col_density, s.wrapping_add(4))?;
    let w3 = matrix(&mut b, "W3", 0.0, col_density, s.wrapping_add(6))?;
    let w4 = matrix(&mut b, "W4", 0.0, col_density, s.wrapping_add(8))?;
    let o1 = output(&mut b, "O1")?;
    let o2 = output(&mut b, "O2")?;
    let o3 = output(&mut b, "O3")?;
    let o4 = output(&mut b, "O4")?;
    b.einsum(&[w1, x], o1, "ik,kj->ij")?;
    b.einsum(&[w2, o1], o2, "ik,kj->ij")?;
    b.einsum(&[w3, o2], o3, "ik,kj->ij")?;
    b.einsum(&[w4, o3], o4, "ik,kj->ij")?;
    b.build(vec![x, w1, w2, w3, w4], o4)
}

/// Look up a built-in graph by benchmark name.
pub fn by_name(
    name: &str,
    row_density: f64,
    col_density: f64,
    ctx: &PropagationContext,
) -> Result<Graph> {
    match name {
        "bert" => bert(row_density, col_density, ctx),
        "deepfm" => deepfm(row_density, col_density, ctx),
        "mem_test" => mem_test(row_density, col_density, ctx),
        _ => chain(row_density, col_density, ctx),
    }
}
