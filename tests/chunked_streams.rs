//! Chunk boundaries must be invisible to replay.

use approx::assert_relative_eq;
use chunktape::expr::{JacobianList, Leaf};
use chunktape::stream::{ChunkedStream, Nested, Terminator};
use chunktape::{Identifier, LinearTape, ReuseTape, TapeBehavior, TapeConfig, PASSIVE};

fn small(chunk: usize) -> TapeConfig {
    TapeConfig::builder().chunk_size(chunk).build().unwrap()
}

/// y_k = y_{k-1} * x + k, recorded on any tape; returns d y_n / d x.
fn recurrence<T: TapeBehavior<Real = f64>>(tape: &mut T, n: usize) -> f64 {
    let mut x = PASSIVE;
    tape.register_input(&mut x);
    let xv = Leaf::new(0.9, x);
    let mut y = PASSIVE;
    tape.store(&mut y, &(xv * 1.0)).unwrap();
    let mut value = 0.9;
    for k in 1..n {
        let prev = Leaf::new(value, y);
        let mut next = PASSIVE;
        tape.store(&mut next, &(prev * xv + k as f64)).unwrap();
        tape.free(&mut y);
        value = value * 0.9 + k as f64;
        y = next;
    }
    tape.set_gradient(y, 1.0);
    tape.evaluate();
    tape.gradient(x)
}

#[test]
fn gradients_do_not_depend_on_chunk_size() {
    let reference = recurrence(&mut LinearTape::<f64>::new(), 50);
    for chunk in [1, 2, 3, 7, 64] {
        let linear = recurrence(&mut LinearTape::<f64>::with_config(small(chunk)), 50);
        let reuse = recurrence(&mut ReuseTape::<f64>::with_config(small(chunk)), 50);
        assert_relative_eq!(linear, reference, max_relative = 1e-12);
        assert_relative_eq!(reuse, reference, max_relative = 1e-12);
    }
}

#[test]
fn boundary_statement_opens_a_new_chunk() {
    // chunk size 4: the input plus three two-entry statements fill the
    // Jacobian chunk after two statements and the statement chunk after four.
    let mut tape = LinearTape::<f64>::with_config(small(4));
    let mut x = PASSIVE;
    tape.register_input(&mut x);
    let xv = Leaf::new(2.0, x);
    for _ in 0..3 {
        let mut y = PASSIVE;
        tape.store(&mut y, &(xv * xv)).unwrap();
    }
    let stats = tape.statistics();
    assert_eq!(stats.statements, 4);
    assert_eq!(stats.statement_chunks, 1);
    assert_eq!(stats.jacobian_entries, 6);
    assert_eq!(stats.jacobian_chunks, 2);

    let mut y = PASSIVE;
    tape.store(&mut y, &(xv * xv)).unwrap();
    assert_eq!(tape.statistics().statement_chunks, 2);

    tape.set_gradient(y, 1.0);
    tape.evaluate();
    assert_eq!(tape.gradient(x), 4.0);
}

#[test]
fn oversized_statement_gets_its_own_chunk() {
    let mut tape = LinearTape::<f64>::with_config(small(4));
    let mut inputs = vec![PASSIVE; 10];
    for id in &mut inputs {
        tape.register_input(id);
    }
    let rows: Vec<(f64, Identifier)> = inputs.iter().enumerate().map(|(k, &id)| (k as f64 + 1.0, id)).collect();
    let mut y = PASSIVE;
    tape.store(&mut y, &JacobianList::new(0.0, &rows)).unwrap();
    assert_eq!(tape.jacobian_count(), 10);

    tape.set_gradient(y, 1.0);
    tape.evaluate();
    for (k, &id) in inputs.iter().enumerate() {
        assert_eq!(tape.gradient(id), k as f64 + 1.0);
    }
}

#[test]
fn forward_replay_crosses_chunks() {
    let mut tape = LinearTape::<f64>::with_config(small(2));
    let mut x = PASSIVE;
    tape.register_input(&mut x);
    let mut y = x;
    let mut value = 1.5;
    for _ in 0..9 {
        let prev = Leaf::new(value, y);
        let mut next = PASSIVE;
        tape.store(&mut next, &(prev * Leaf::new(1.5, x))).unwrap();
        value *= 1.5;
        y = next;
    }
    // y = x^10
    tape.set_gradient(x, 1.0);
    tape.evaluate_forward();
    assert_relative_eq!(tape.gradient(y), 10.0 * 1.5f64.powi(9), max_relative = 1e-12);
}

#[test]
fn stream_positions_track_nested_levels() {
    let statements: ChunkedStream<(u8,), Terminator> = ChunkedStream::new(2, Terminator);
    let mut entries: ChunkedStream<(f64, Identifier), _> = ChunkedStream::new(3, statements);

    let start = entries.position();
    for k in 0..5u8 {
        entries.reserve_items(2);
        entries.nested_mut().reserve_items(1);
        entries.push((1.0, 1));
        entries.push((2.0, 2));
        entries.nested_mut().push((k,));
    }
    let end = entries.position();
    assert_eq!(entries.data_size(), 10);
    assert_eq!(entries.nested().data_size(), 5);
    assert_eq!(entries.data_size_between(start, end), 10);

    let mut seen = Vec::new();
    entries.evaluate_reverse(end, start, |w| {
        entries.nested().evaluate_reverse(w.nested_end, w.nested_start, |sw| {
            let (counts,) = sw.data;
            seen.extend(counts[sw.start..sw.end].iter().rev().copied());
        });
    });
    assert_eq!(seen, vec![4, 3, 2, 1, 0]);

    entries.reset_to(start);
    assert_eq!(entries.position(), start);
    assert_eq!(entries.nested().data_size(), 0);
}
