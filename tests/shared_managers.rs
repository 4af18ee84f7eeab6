//! Reuse tapes drawing identifiers from a shared manager.

use std::thread;

use approx::assert_relative_eq;
use chunktape::expr::Leaf;
use chunktape::index::{IndexManager, SharedIndexManager, SyncIndexManager};
use chunktape::{Active, ActiveTape, ReuseTape, TapeBehavior, TapeGuard, PASSIVE};

type Shared = ReuseTape<f64, SharedIndexManager<f64>>;

#[test]
fn two_tapes_share_one_identifier_space() {
    let mut first = Shared::new();
    let mut second = Shared::new();

    let mut x = PASSIVE;
    first.register_input(&mut x);
    let mut y = PASSIVE;
    second.register_input(&mut y);
    assert_ne!(x, y);

    // A value from the first tape can be read on the second one.
    let mut z = PASSIVE;
    second
        .store(&mut z, &(Leaf::new(2.0, x) * Leaf::new(3.0, y)))
        .unwrap();
    second.set_gradient(z, 1.0);
    second.evaluate();
    assert_relative_eq!(second.gradient(x), 3.0);
    assert_relative_eq!(second.gradient(y), 2.0);

    second.free(&mut z);
    second.free(&mut y);
    first.free(&mut x);
    assert_eq!(first.indices().free_count(), 3);
}

#[test]
fn active_values_survive_switching_tapes() {
    let mut first = Shared::new();
    let mut second = Shared::new();

    let x = {
        let _guard = TapeGuard::new(&mut first);
        Active::<Shared>::new_input(1.5)
    };
    let guard = TapeGuard::new(&mut second);
    let y = Active::<Shared>::from_expr(&x * &x);
    y.set_gradient(1.0);
    Shared::with_active(|t| t.evaluate());
    assert_relative_eq!(x.gradient(), 3.0);
    drop(y);
    drop(x);
    drop(guard);
}

#[test]
fn sync_manager_serves_tapes_on_several_threads() {
    let handles: Vec<_> = (0..4)
        .map(|k| {
            thread::spawn(move || {
                let mut tape = ReuseTape::<f64, SyncIndexManager<f64>>::new();
                let mut x = PASSIVE;
                tape.register_input(&mut x);
                let value = 1.0 + k as f64;
                let mut y = PASSIVE;
                tape.store(&mut y, &(Leaf::new(value, x) * Leaf::new(value, x)))
                    .unwrap();
                tape.set_gradient(y, 1.0);
                tape.evaluate();
                let g = tape.gradient(x);
                tape.free(&mut y);
                (x, g, value)
            })
        })
        .collect();

    let mut inputs = Vec::new();
    for handle in handles {
        let (x, g, value) = handle.join().unwrap();
        assert_relative_eq!(g, 2.0 * value);
        inputs.push(x);
    }
    inputs.sort_unstable();
    inputs.dedup();
    assert_eq!(inputs.len(), 4);
}

#[test]
fn shared_managers_are_scoped_to_the_real_type() {
    thread::spawn(|| {
        let mut wide = Shared::new();
        let mut narrow = ReuseTape::<f32, SharedIndexManager<f32>>::new();
        let mut x = PASSIVE;
        wide.register_input(&mut x);
        let mut y = PASSIVE;
        wide.register_input(&mut y);
        let mut z = PASSIVE;
        narrow.register_input(&mut z);
        assert_eq!((x, y, z), (1, 2, 1));

        let stats = narrow.statistics();
        assert!(stats.shared_identifiers);
        assert!(!stats.thread_safe_identifiers);
    })
    .join()
    .unwrap();
}
