//! End-to-end propagation scenarios and lattice invariants.

use proptest::prelude::*;

use sparseprop::bench::{build_tree, parse_descriptor};
use sparseprop::{
    Direction, Graph, GraphBuilder, PropagationContext, SparsityVector, TensorId, TensorNode,
};
use sparseprop_kernel::Format;

fn matrix(b: &mut GraphBuilder, name: &str, rows: &str, cols: &str) -> TensorId {
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

fn snapshot(g: &Graph) -> Vec<Vec<SparsityVector>> {
    g.tensors().map(|(_, t)| t.sparsities().to_vec()).collect()
}

fn subset_of(after: &[Vec<SparsityVector>], before: &[Vec<SparsityVector>], g: &Graph) -> bool {
    g.tensors().all(|(id, t)| {
        (0..t.rank()).all(|d| {
            after[id.index()][d].is_subset_of(&before[id.index()][d], t.sizes()[d])
        })
    })
}

#[test]
fn two_step_matmul_end_to_end() {
    let mut b = GraphBuilder::new();
    let x1 = matrix(&mut b, "X1", "01", "11");
    let w1 = matrix(&mut b, "W1", "11", "10");
    let x2 = matrix(&mut b, "X2", "11", "11");
    let w2 = matrix(&mut b, "W2", "11", "11");
    let o1 = matrix(&mut b, "O1", "11", "11");
    let o2 = matrix(&mut b, "O2", "11", "11");
    let o3 = matrix(&mut b, "O3", "11", "11");
    b.einsum(&[x1, w1], o1, "ik,kj->ij").unwrap();
    b.einsum(&[x2, w2], o2, "ik,kj->ij").unwrap();
    b.einsum(&[o1, o2], o3, "ik,kj->ij").unwrap();
    let mut g = b.build(vec![x1, w1, x2, w2], o3).unwrap();

    g.run_propagation();

    // The original inputs keep their stated sparsity.
    assert_eq!(bits(&g, x1, 0), "01");
    assert_eq!(bits(&g, x1, 1), "11");
    assert_eq!(bits(&g, w1, 0), "11");
    assert_eq!(bits(&g, w1, 1), "10");
    // Forward narrowing of the first product and the final output.
    assert_eq!(bits(&g, o1, 0), "01");
    assert_eq!(bits(&g, o1, 1), "10");
    assert_eq!(bits(&g, o3, 0), "01");

    let format = Format::parse("SparseDense").unwrap();
    let ids: Vec<TensorId> = g.tensors().map(|(id, _)| id).collect();
    for id in ids {
        g.tensor_mut(id).create_concrete(format.clone()).unwrap();
    }
    for (i, t) in [x1, w1, x2, w2].into_iter().enumerate() {
        g.tensor_mut(t).initialize_concrete(1000 + i as u64).unwrap();
    }
    g.compile().unwrap();
    g.compute().unwrap();

    let out = g.tensor(o3).concrete().unwrap();
    assert_eq!(out.at(&[1, 0]), 0.0);
    assert_eq!(out.at(&[1, 1]), 0.0);
    assert!(out.at(&[0, 0]) != 0.0);
    assert!(out.at(&[0, 1]) != 0.0);
}

#[test]
fn transpose_end_to_end() {
    let mut b = GraphBuilder::new();
    let x1 = matrix(&mut b, "X1", "01", "10");
    let o1 = matrix(&mut b, "O1", "11", "11");
    b.einsum(&[x1], o1, "ij->ji").unwrap();
    let mut g = b.build(vec![x1], o1).unwrap();

    g.run_propagation();
    assert_eq!(bits(&g, x1, 0), "01");
    assert_eq!(bits(&g, x1, 1), "10");
    assert_eq!(bits(&g, o1, 0), "10");
    assert_eq!(bits(&g, o1, 1), "01");

    g.tensor_mut(x1)
        .create_concrete(Format::parse("SparseDense").unwrap())
        .unwrap();
    g.tensor_mut(o1)
        .create_concrete(Format::parse("SparseDense10").unwrap())
        .unwrap();
    g.tensor_mut(x1).initialize_concrete(7).unwrap();
    g.compile().unwrap();
    g.compute().unwrap();

    let x = g.tensor(x1).concrete().unwrap();
    let o = g.tensor(o1).concrete().unwrap();
    assert_eq!(x.at(&[0, 1]), o.at(&[1, 0]));
    assert!(x.at(&[0, 1]) != 0.0);
}

#[test]
fn shared_intermediate_chain_end_to_end() {
    // X2 feeds both products; the final output loses its second row and
    // second column entirely.
    let mut b = GraphBuilder::new();
    let x1 = matrix(&mut b, "X1", "01", "01");
    let x2 = matrix(&mut b, "X2", "11", "11");
    let w1 = matrix(&mut b, "W1", "11", "01");
    let o1 = matrix(&mut b, "O1", "11", "11");
    let o2 = matrix(&mut b, "O2", "11", "11");
    let o3 = matrix(&mut b, "O3", "11", "11");
    b.einsum(&[x1, x2], o1, "ik,kj->ij").unwrap();
    b.einsum(&[x2, w1], o2, "ik,kj->ij").unwrap();
    b.einsum(&[o1, o2], o3, "ik,kj->ij").unwrap();
    let mut g = b.build(vec![x1, x2, w1], o3).unwrap();

    g.run_propagation();

    let format = Format::parse("SparseDense").unwrap();
    let ids: Vec<TensorId> = g.tensors().map(|(id, _)| id).collect();
    for id in ids {
        g.tensor_mut(id).create_concrete(format.clone()).unwrap();
    }
    for (i, t) in [x1, x2, w1].into_iter().enumerate() {
        g.tensor_mut(t).initialize_concrete(2000 + i as u64).unwrap();
    }
    g.compile().unwrap();
    g.compute().unwrap();

    // A shared operand stays as dense as its most demanding consumer.
    let x2c = g.tensor(x2).concrete().unwrap();
    for coord in [[0, 0], [0, 1], [1, 0], [1, 1]] {
        assert!(x2c.at(&coord) != 0.0);
    }
    let out = g.tensor(o3).concrete().unwrap();
    assert!(out.at(&[0, 0]) != 0.0);
    assert_eq!(out.at(&[0, 1]), 0.0);
    assert_eq!(out.at(&[1, 0]), 0.0);
    assert_eq!(out.at(&[1, 1]), 0.0);
}

#[test]
fn benchmark_tree_matches_expected_shape() {
    let descriptor = "\
[(1, 3), (0, 2), (0, 2), (0, 1)]
['ajac,acaj->a', 'ikbd,bdik->bik', 'bik,ikab->a', 'a,a->a']
[(10, 17, 10, 9), (16, 13, 16, 15), (10, 9, 16, 10), (16, 15, 16, 13), (10, 9, 10, 17)]
";
    let bench = parse_descriptor(descriptor).unwrap();
    let mut g = build_tree(&bench, 0.5, &PropagationContext::default()).unwrap();
    assert_eq!(g.tensor_count(), 9);
    assert_eq!(g.op_count(), 4);
    assert_eq!(g.tensor(g.output()).rank(), 1);

    // Propagation over the tree stays monotone.
    let before = snapshot(&g);
    g.run_propagation();
    let after = snapshot(&g);
    assert!(subset_of(&after, &before, &g));
}

/// A pair of chained matmuls with seeded random input sparsity, the
/// workhorse graph for the property tests below.
fn random_chain(p1: f64, p2: f64, seed: u64) -> Graph {
    let n = 6;
    let mut b = GraphBuilder::new();
    let x = b
        .tensor(TensorNode::from_densities(vec![n, n], &[p1, p2], "X", seed).unwrap());
    let w = b
        .tensor(TensorNode::from_densities(vec![n, n], &[p2, p1], "W", seed ^ 0x9e37).unwrap());
    let v = b
        .tensor(TensorNode::from_densities(vec![n, n], &[p1, p1], "V", seed ^ 0x79b9).unwrap());
    let o1 = b.tensor(TensorNode::empty_output(vec![n, n], "O1").unwrap());
    let o2 = b.tensor(TensorNode::empty_output(vec![n, n], "O2").unwrap());
    b.einsum(&[x, w], o1, "ik,kj->ij").unwrap();
    b.einsum(&[o1, v], o2, "ik,kj->ij").unwrap();
    b.build(vec![x, w, v], o2).unwrap()
}

fn fixed_point(g: &mut Graph, order: &[Direction]) {
    loop {
        let before = snapshot(g);
        for &dir in order {
            g.run_direction(dir);
        }
        if snapshot(g) == before {
            return;
        }
    }
}

proptest! {
    #[test]
    fn propagation_never_sets_bits(
        p1 in 0.0f64..0.9,
        p2 in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        let mut g = random_chain(p1, p2, seed);
        let mut before = snapshot(&g);
        for dir in [Direction::Forward, Direction::Intra, Direction::Backward] {
            g.run_direction(dir);
            let after = snapshot(&g);
            prop_assert!(subset_of(&after, &before, &g));
            before = after;
        }
    }

    #[test]
    fn forward_pass_is_idempotent(
        p1 in 0.0f64..0.9,
        p2 in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        let mut g = random_chain(p1, p2, seed);
        g.run_direction(Direction::Forward);
        let first = snapshot(&g);
        g.run_direction(Direction::Forward);
        prop_assert_eq!(snapshot(&g), first);
    }

    #[test]
    fn popcount_never_grows(
        p1 in 0.0f64..0.9,
        p2 in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        let mut g = random_chain(p1, p2, seed);
        let before: Vec<Vec<usize>> = g
            .tensors()
            .map(|(_, t)| {
                (0..t.rank())
                    .map(|d| t.sparsity(d).popcount_prefix(t.sizes()[d]))
                    .collect()
            })
            .collect();
        g.run_propagation();
        for (id, t) in g.tensors() {
            for d in 0..t.rank() {
                prop_assert!(
                    t.sparsity(d).popcount_prefix(t.sizes()[d]) <= before[id.index()][d]
                );
            }
        }
    }

    #[test]
    fn direction_order_agrees_at_fixed_point(
        p1 in 0.0f64..0.9,
        p2 in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        use Direction::{Backward, Forward, Intra};
        let mut a = random_chain(p1, p2, seed);
        let mut b = random_chain(p1, p2, seed);
        fixed_point(&mut a, &[Forward, Intra, Backward]);
        fixed_point(&mut b, &[Forward, Backward, Intra, Forward]);
        prop_assert_eq!(snapshot(&a), snapshot(&b));
    }

    #[test]
    fn cleared_output_bits_are_numeric_zeros(
        p1 in 0.0f64..0.9,
        p2 in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        let mut g = random_chain(p1, p2, seed);
        g.run_propagation();

        let ids: Vec<TensorId> = g.tensors().map(|(id, _)| id).collect();
        for id in &ids {
            let rank = g.tensor(*id).rank();
            g.tensor_mut(*id).create_concrete(Format::dense(rank)).unwrap();
        }
        let inputs: Vec<TensorId> = ids
            .iter()
            .copied()
            .filter(|&id| !g.tensor(id).is_output())
            .collect();
        for (i, id) in inputs.into_iter().enumerate() {
            g.tensor_mut(id).initialize_concrete(seed + i as u64).unwrap();
        }
        g.compile().unwrap();
        g.compute().unwrap();

        // Any slice the analysis cleared must be numerically zero in the
        // computed result.
        for id in ids {
            let t = g.tensor(id);
            if !t.is_output() {
                continue;
            }
            let sizes = t.sizes().to_vec();
            let c = t.concrete().unwrap();
            let total: usize = sizes.iter().product();
            for flat in 0..total {
                let mut coord = vec![0usize; sizes.len()];
                let mut rem = flat;
                for d in (0..sizes.len()).rev() {
                    coord[d] = rem % sizes[d];
                    rem /= sizes[d];
                }
                let cleared = coord
                    .iter()
                    .enumerate()
                    .any(|(d, &i)| !t.sparsity(d).test(i));
                if cleared {
                    prop_assert_eq!(c.at(&coord), 0.0);
                }
            }
        }
    }
}
