//! One-call drivers over a fresh [`LinearTape`].
//!
//! Each driver records `f` once with its inputs registered, then replays the
//! recording as many times as the requested derivative needs.

use crate::active::Active;
use crate::float::Float;
use crate::index::PASSIVE;
use crate::tape::{ActiveTape, LinearTape, TapeBehavior, TapeGuard};

type Var<F> = Active<LinearTape<F>>;

/// Record `f` at `x` on `tape` and return its inputs and outputs.
fn record<F, R>(tape: &mut LinearTape<F>, x: &[F], f: impl FnOnce(&[Var<F>]) -> R) -> (Vec<Var<F>>, R)
where
    F: Float,
    LinearTape<F>: ActiveTape + TapeBehavior<Real = F>,
{
    let _guard = TapeGuard::new(tape);
    let inputs: Vec<Var<F>> = x.iter().map(|&v| Active::new_input(v)).collect();
    let outputs = f(&inputs);
    (inputs, outputs)
}

/// Compute the gradient of a scalar function `f : R^n → R` using reverse mode.
///
/// ```
/// let g = chunktape::grad(|x: &[chunktape::Linear64]| {
///     chunktape::Linear64::from_expr(&x[0] * &x[0] + &x[1] * &x[1])
/// }, &[3.0, 4.0]);
/// assert!((g[0] - 6.0).abs() < 1e-10);
/// assert!((g[1] - 8.0).abs() < 1e-10);
/// ```
pub fn grad<F>(f: impl FnOnce(&[Var<F>]) -> Var<F>, x: &[F]) -> Vec<F>
where
    F: Float,
    LinearTape<F>: ActiveTape + TapeBehavior<Real = F>,
{
    let mut tape = LinearTape::new();
    let (inputs, output) = record(&mut tape, x, f);

    if output.identifier() != PASSIVE {
        tape.set_gradient(output.identifier(), F::one());
        tape.evaluate();
    }
    inputs.iter().map(|v| tape.gradient(v.identifier())).collect()
}

/// Vector-Jacobian product (reverse mode): `(f(x), wᵀ·J)`.
///
/// Evaluates `f` at `x` and computes the adjoint product with weights `w`.
pub fn vjp<F>(f: impl FnOnce(&[Var<F>]) -> Vec<Var<F>>, x: &[F], w: &[F]) -> (Vec<F>, Vec<F>)
where
    F: Float,
    LinearTape<F>: ActiveTape + TapeBehavior<Real = F>,
{
    let mut tape = LinearTape::new();
    let (inputs, outputs) = record(&mut tape, x, f);
    assert_eq!(
        outputs.len(),
        w.len(),
        "output length must match weight vector length"
    );

    let values = outputs.iter().map(|y| y.value()).collect();
    for (y, &wi) in outputs.iter().zip(w) {
        if y.identifier() != PASSIVE {
            let seed = tape.gradient_mut(y.identifier());
            *seed = *seed + wi;
        }
    }
    tape.evaluate();
    let grad = inputs.iter().map(|v| tape.gradient(v.identifier())).collect();
    (values, grad)
}

/// Jacobian-vector product (forward replay): `(f(x), J·v)`.
///
/// Evaluates `f` at `x` and propagates the tangent `v` through the recording.
pub fn jvp<F>(f: impl FnOnce(&[Var<F>]) -> Vec<Var<F>>, x: &[F], v: &[F]) -> (Vec<F>, Vec<F>)
where
    F: Float,
    LinearTape<F>: ActiveTape + TapeBehavior<Real = F>,
{
    assert_eq!(x.len(), v.len(), "x and v must have the same length");
    let mut tape = LinearTape::new();
    let (inputs, outputs) = record(&mut tape, x, f);

    for (input, &vi) in inputs.iter().zip(v) {
        tape.set_gradient(input.identifier(), vi);
    }
    tape.evaluate_forward();
    let values = outputs.iter().map(|y| y.value()).collect();
    let tangents = outputs
        .iter()
        .map(|y| match y.identifier() {
            PASSIVE => F::zero(),
            id => tape.gradient(id),
        })
        .collect();
    (values, tangents)
}

/// Compute the full Jacobian of `f : R^n → R^m`, one reverse sweep per
/// output.
///
/// Returns `(f(x), J)` where `J[i][j] = ∂f_i/∂x_j`.
pub fn jacobian<F>(f: impl FnOnce(&[Var<F>]) -> Vec<Var<F>>, x: &[F]) -> (Vec<F>, Vec<Vec<F>>)
where
    F: Float,
    LinearTape<F>: ActiveTape + TapeBehavior<Real = F>,
{
    let mut tape = LinearTape::new();
    let (inputs, outputs) = record(&mut tape, x, f);

    let values = outputs.iter().map(|y| y.value()).collect();
    let mut jac = vec![vec![F::zero(); inputs.len()]; outputs.len()];
    for (row, y) in jac.iter_mut().zip(&outputs) {
        if y.identifier() == PASSIVE {
            continue;
        }
        tape.clear_adjoints();
        tape.set_gradient(y.identifier(), F::one());
        tape.evaluate();
        for (entry, input) in row.iter_mut().zip(&inputs) {
            *entry = tape.gradient(input.identifier());
        }
    }
    (values, jac)
}
