//! Subcommand implementations.

use std::fs;
use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sparseprop::bench::{build_tree, read_descriptor};
use sparseprop::{
    Direction, Graph, PropagationContext, Result, SparsityVector, SpaError, TensorId, MAX_SIZE,
};
use sparseprop_kernel::{ConcreteTensor, EinsumPlan, Format};

use crate::graphs;

fn mb(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// `einsum <file> <density> <sparse|dense> <run_fw> <run_lat> <run_bw> <seed>`
pub fn run_einsum(
    file: &Path,
    density: f64,
    sparse: bool,
    run_fw: bool,
    run_lat: bool,
    run_bw: bool,
    seed: u64,
) -> Result<()> {
    let benchmark = read_descriptor(file)?;
    if benchmark.path.is_empty() || benchmark.strings.is_empty() || benchmark.sizes.is_empty() {
        return Err(SpaError::BenchmarkParseError(format!(
            "{}: empty benchmark descriptor",
            file.display()
        )));
    }

    let ctx = PropagationContext::new(seed);
    let start = Instant::now();
    let mut graph = build_tree(&benchmark, density, &ctx)?;
    println!("create graph = {}", start.elapsed().as_secs_f64());

    println!("initial_ratio = {}", graph.sparsity_ratio());
    if run_fw {
        graph.run_direction(Direction::Forward);
        println!("fw_ratio = {}", graph.sparsity_ratio());
    }
    if run_lat {
        graph.run_direction(Direction::Intra);
        println!("lat_ratio = {}", graph.sparsity_ratio());
    }
    if run_bw {
        graph.run_direction(Direction::Backward);
        println!("bw_ratio = {}", graph.sparsity_ratio());
    }

    let bytes = if sparse {
        graph.estimated_size_bytes(ctx.threshold)
    } else {
        // Threshold above 1.0 never triggers the sparse choice.
        graph.estimated_size_bytes(2.0)
    };
    println!("estimated storage = {:.3}MB", mb(bytes));
    Ok(())
}

/// `graph <name> <row_density> <col_density> <format> <propagate> <seed>`
pub fn run_graph(
    name: &str,
    row_density: f64,
    col_density: f64,
    format_token: &str,
    propagate: bool,
    seed: u64,
) -> Result<()> {
    let format = Format::parse(format_token)?;
    let ctx = PropagationContext::new(seed);
    println!("running {name} benchmark");

    let start = Instant::now();
    let mut graph = graphs::by_name(name, row_density, col_density, &ctx)?;
    println!("create graph = {}", start.elapsed().as_secs_f64());

    graph.run_direction(Direction::Forward);
    println!("ratio before = {}", graph.sparsity_ratio());
    if propagate {
        let start = Instant::now();
        graph.run_propagation();
        println!("analysis = {}", start.elapsed().as_secs_f64());
    } else {
        println!("analysis = 0");
    }
    println!("ratio after = {}", graph.sparsity_ratio());

    let start = Instant::now();
    let ids: Vec<TensorId> = graph.tensors().map(|(id, _)| id).collect();
    for &id in &ids {
        graph.tensor_mut(id).create_concrete(format.clone())?;
    }
    let mut fill_seed = seed;
    for &id in &ids {
        if !graph.tensor(id).is_output() {
            graph.tensor_mut(id).initialize_concrete(fill_seed)?;
            fill_seed = fill_seed.wrapping_add(1);
        }
    }
    println!("load graph = {}", start.elapsed().as_secs_f64());

    let start = Instant::now();
    graph.compile()?;
    let compile_time = start.elapsed();
    let start = Instant::now();
    graph.compute()?;
    let run_time = start.elapsed();
    println!("compilation = {}", compile_time.as_secs_f64());
    println!("runtime = {}", run_time.as_secs_f64());
    println!("tensors size = {:.3}MB", mb(graph.concrete_storage_bytes()));

    fs::write("graph.dot", graph.to_dot())
        .map_err(|e| SpaError::BenchmarkParseError(format!("graph.dot: {e}")))?;
    Ok(())
}

fn fill_matrix(
    name: &str,
    rows: usize,
    cols: usize,
    row_sparsity: f64,
    col_sparsity: f64,
    format: Format,
    seed: u64,
) -> Result<ConcreteTensor> {
    let row_bits = SparsityVector::random_with_density(row_sparsity, rows, seed);
    let col_bits = SparsityVector::random_with_density(col_sparsity, cols, seed.wrapping_add(1));
    let mut tensor = ConcreteTensor::new(name, vec![rows, cols], format)?;
    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..rows {
        if !row_bits.test(i) {
            continue;
        }
        for j in 0..cols {
            if !col_bits.test(j) {
                continue;
            }
            tensor.insert(&[i, j], rng.gen::<f32>())?;
        }
    }
    tensor.pack();
    Ok(tensor)
}

/// `format <rows> <cols> <fmt_out> <fmt_left> <fmt_right>
///  <row_sp_L> <col_sp_L> <row_sp_R> <col_sp_R>`
#[allow(clippy::too_many_arguments)]
pub fn run_format(
    rows: usize,
    cols: usize,
    fmt_out: &str,
    fmt_left: &str,
    fmt_right: &str,
    row_sp_l: f64,
    col_sp_l: f64,
    row_sp_r: f64,
    col_sp_r: f64,
) -> Result<()> {
    if rows > MAX_SIZE || cols > MAX_SIZE {
        return Err(SpaError::BitsetOverflow {
            size: rows.max(cols),
            max: MAX_SIZE,
        });
    }
    let left = fill_matrix("B", rows, cols, row_sp_l, col_sp_l, Format::parse(fmt_left)?, 11)?;
    let right = fill_matrix("C", rows, cols, row_sp_r, col_sp_r, Format::parse(fmt_right)?, 13)?;
    let mut out = ConcreteTensor::new("A", vec![rows, cols], Format::parse(fmt_out)?)?;

    let plan = EinsumPlan::parse("ik,kj->ij", &[left.sizes(), right.sizes()])?;
    let start = Instant::now();
    plan.evaluate(&[&left, &right], &mut out)?;
    let elapsed = start.elapsed().as_secs_f64();

    println!(
        "rows, cols, out_format, left_format, right_format, \
         left_row_sparsity, left_col_sparsity, right_row_sparsity, right_col_sparsity, exec_time"
    );
    println!(
        "{rows},{cols},{fmt_out},{fmt_left},{fmt_right},\
         {row_sp_l},{col_sp_l},{row_sp_r},{col_sp_r},{elapsed}"
    );
    Ok(())
}

/// `proptime`: one matmul at the full bitset width, analysis only.
pub fn run_proptime() -> Result<()> {
    let n = MAX_SIZE;
    let mut b = sparseprop::GraphBuilder::new();
    let a = b.tensor(sparseprop::TensorNode::from_densities(
        vec![n, n],
        &[0.5, 0.5],
        "A",
        1,
    )?);
    let w = b.tensor(sparseprop::TensorNode::from_densities(
        vec![n, n],
        &[0.5, 0.5],
        "B",
        2,
    )?);
    let c = b.tensor(sparseprop::TensorNode::empty_output(vec![n, n], "C")?);
    b.einsum(&[a, w], c, "ik,kj->ij")?;
    let mut graph: Graph = b.build(vec![a, w], c)?;

    let start = Instant::now();
    graph.run_propagation();
    println!("{}", MAX_SIZE);
    println!("proptime = {}", start.elapsed().as_secs_f64());
    Ok(())
}
