//! Property tests: replay identities that hold for any recording.

use approx::assert_relative_eq;
use chunktape::expr::{ExpressionExt, Leaf};
use chunktape::{Identifier, LinearTape, ReuseTape, TapeBehavior, TapeConfig, PASSIVE};
use proptest::prelude::*;

/// One recorded operation on earlier values, picked by index. Every
/// operation keeps values and local derivatives bounded by the inputs.
#[derive(Clone, Debug)]
enum Op {
    Add(usize, usize),
    Mul(usize, usize),
    Sin(usize),
    Scale(usize, f64),
    /// Drop an intermediate value so its identifier can be handed out again.
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Add(a, b)),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Mul(a, b)),
        any::<usize>().prop_map(Op::Sin),
        (any::<usize>(), -1.0..1.0f64).prop_map(|(a, s)| Op::Scale(a, s)),
        any::<usize>().prop_map(Op::Free),
    ]
}

/// Replay a random program on `tape`; returns the input and live value
/// identifiers. Inputs and the most recent value are never freed.
fn record<T: TapeBehavior<Real = f64>>(
    tape: &mut T,
    inputs: &[f64],
    program: &[Op],
) -> (Vec<Identifier>, Vec<Identifier>) {
    let mut ids = Vec::new();
    let mut values = Vec::new();
    for &x in inputs {
        let mut id = PASSIVE;
        tape.register_input(&mut id);
        ids.push(id);
        values.push(x);
    }
    let input_ids = ids.clone();
    for op in program {
        if let Op::Free(k) = *op {
            let intermediates = values.len() - input_ids.len();
            if intermediates > 1 {
                let at = input_ids.len() + k % (intermediates - 1);
                values.remove(at);
                let mut id = ids.remove(at);
                tape.free(&mut id);
            }
            continue;
        }
        let n = values.len();
        let leaf = |k: usize| Leaf::new(values[k % n], ids[k % n]);
        let mut lhs = PASSIVE;
        let value = match *op {
            Op::Add(a, b) => {
                let e = (leaf(a) + leaf(b)).scale(0.5);
                tape.store(&mut lhs, &e).unwrap();
                (values[a % n] + values[b % n]) * 0.5
            }
            Op::Mul(a, b) => {
                let e = leaf(a).sin() * leaf(b).cos();
                tape.store(&mut lhs, &e).unwrap();
                values[a % n].sin() * values[b % n].cos()
            }
            Op::Sin(a) => {
                tape.store(&mut lhs, &leaf(a).sin()).unwrap();
                values[a % n].sin()
            }
            Op::Scale(a, s) => {
                tape.store(&mut lhs, &leaf(a).scale(s)).unwrap();
                values[a % n] * s
            }
            Op::Free(_) => unreachable!(),
        };
        ids.push(lhs);
        values.push(value);
    }
    (input_ids, ids)
}

fn check_forward_against_reverse<T: TapeBehavior<Real = f64>>(
    tape: &mut T,
    inputs: &[f64],
    program: &[Op],
    direction: &[f64],
) -> Result<(), TestCaseError> {
    let (x, ids) = record(tape, inputs, program);
    let y = *ids.last().unwrap();
    prop_assume!(y != PASSIVE);

    for (k, &id) in x.iter().enumerate() {
        tape.set_gradient(id, direction[k]);
    }
    tape.evaluate_forward();
    let tangent = tape.gradient(y);

    tape.clear_adjoints();
    tape.set_gradient(y, 1.0);
    tape.evaluate();
    let dot: f64 = x.iter().enumerate().map(|(k, &id)| tape.gradient(id) * direction[k]).sum();
    assert_relative_eq!(tangent, dot, epsilon = 1e-9, max_relative = 1e-9);
    Ok(())
}

fn config(chunk: usize) -> TapeConfig {
    TapeConfig::builder().chunk_size(chunk).build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// <w, J v> computed by forward replay equals <J^T w, v> from reverse replay.
    #[test]
    fn forward_and_reverse_agree(
        inputs in prop::collection::vec(-1.5..1.5f64, 1..4),
        program in prop::collection::vec(op(), 1..40),
        direction in prop::collection::vec(-1.0..1.0f64, 4),
        chunk in 1usize..16,
    ) {
        let mut tape = LinearTape::<f64>::with_config(config(chunk));
        check_forward_against_reverse(&mut tape, &inputs, &program, &direction)?;
    }

    /// Same identity on the reuse tape, where freed identifiers are handed
    /// out again to later statements.
    #[test]
    fn reuse_forward_and_reverse_agree(
        inputs in prop::collection::vec(-1.5..1.5f64, 1..4),
        program in prop::collection::vec(op(), 1..60),
        direction in prop::collection::vec(-1.0..1.0f64, 4),
        chunk in 1usize..16,
    ) {
        let mut tape = ReuseTape::<f64>::with_config(config(chunk));
        check_forward_against_reverse(&mut tape, &inputs, &program, &direction)?;
    }

    /// Replaying twice from a cleared adjoint vector gives the same result,
    /// and chunk size does not change it.
    #[test]
    fn replay_is_idempotent_across_chunk_sizes(
        inputs in prop::collection::vec(-1.5..1.5f64, 1..4),
        program in prop::collection::vec(op(), 1..40),
        chunk in 1usize..16,
    ) {
        let gradient = |tape: &mut LinearTape<f64>| {
            let (x, ids) = record(tape, &inputs, &program);
            let y = *ids.last().unwrap();
            let mut runs = Vec::new();
            for _ in 0..2 {
                tape.clear_adjoints();
                tape.set_gradient(y, 1.0);
                tape.evaluate();
                runs.push(x.iter().map(|&id| tape.gradient(id)).collect::<Vec<_>>());
            }
            assert_eq!(runs[0], runs[1]);
            runs.pop().unwrap()
        };
        let small = gradient(&mut LinearTape::with_config(config(chunk)));
        let large = gradient(&mut LinearTape::new());
        prop_assert_eq!(small, large);
    }

    /// The reuse tape computes the same gradients as the linear tape.
    #[test]
    fn reuse_matches_linear(
        inputs in prop::collection::vec(-1.5..1.5f64, 1..4),
        program in prop::collection::vec(op(), 1..40),
    ) {
        let mut linear = LinearTape::<f64>::new();
        let (lx, lids) = record(&mut linear, &inputs, &program);
        let mut reuse = ReuseTape::<f64>::new();
        let (rx, rids) = record(&mut reuse, &inputs, &program);

        let (ly, ry) = (*lids.last().unwrap(), *rids.last().unwrap());
        prop_assert_eq!(ly == PASSIVE, ry == PASSIVE);
        prop_assume!(ly != PASSIVE);
        linear.set_gradient(ly, 1.0);
        linear.evaluate();
        reuse.set_gradient(ry, 1.0);
        reuse.evaluate();
        for (&l, &r) in lx.iter().zip(&rx) {
            assert_relative_eq!(linear.gradient(l), reuse.gradient(r), epsilon = 1e-12);
        }
    }

    /// Resetting to a recorded position restores the stream sizes.
    #[test]
    fn reset_to_restores_sizes(
        program in prop::collection::vec(op(), 0..30),
        extra in prop::collection::vec(op(), 1..30),
        chunk in 1usize..8,
    ) {
        let mut tape = LinearTape::<f64>::with_config(config(chunk));
        let (x, _) = record(&mut tape, &[0.3, 0.7], &program);
        let mark = tape.position();
        let stats = tape.statistics();
        let xs = [0.3, 0.7];
        for op in &extra {
            let leaf = |k: usize| Leaf::new(xs[k % 2], x[k % 2]);
            let mut lhs = PASSIVE;
            match *op {
                Op::Add(a, b) => tape.store(&mut lhs, &(leaf(a) + leaf(b))).unwrap(),
                Op::Mul(a, b) => tape.store(&mut lhs, &(leaf(a) * leaf(b))).unwrap(),
                Op::Sin(a) => tape.store(&mut lhs, &leaf(a).sin()).unwrap(),
                Op::Scale(a, s) => tape.store(&mut lhs, &leaf(a).scale(s)).unwrap(),
                Op::Free(_) => {}
            }
        }
        tape.reset_to(mark, true);
        prop_assert_eq!(tape.position(), mark);
        let after = tape.statistics();
        prop_assert_eq!(after.statements, stats.statements);
        prop_assert_eq!(after.jacobian_entries, stats.jacobian_entries);
        prop_assert_eq!(after.largest_identifier, stats.largest_identifier);
    }
}
