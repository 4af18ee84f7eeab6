//! Right-hand sides of recorded statements.
//!
//! An expression is built with ordinary operators and is only recorded when
//! it is assigned to an [`Active`](crate::active::Active) value. Recording
//! walks the tree once through [`Expression::for_each_leaf`], which applies
//! the chain rule and reports one `(local derivative, identifier)` pair per
//! leaf.
//!
//! ```
//! use chunktape::expr::{Expression, ExpressionExt, Leaf};
//!
//! let x = Leaf::new(2.0_f64, 1);
//! let y = Leaf::new(3.0_f64, 2);
//! let e = (x * y).sin();
//!
//! let mut entries = Vec::new();
//! e.for_each_leaf(1.0, &mut |d, id| entries.push((d, id)));
//! assert_eq!(entries.len(), 2);
//! assert!((entries[0].0 - 3.0 * 6.0_f64.cos()).abs() < 1e-12);
//! assert_eq!(entries[1].1, 2);
//! ```

use std::marker::PhantomData;

use crate::float::Float;
use crate::index::{Identifier, PASSIVE};

/// Traversal contract between expression trees and the statement recorder.
pub trait Expression {
    type Real: Float;

    /// Primal value of the whole expression.
    fn value(&self) -> Self::Real;

    /// Upper bound on the number of pairs [`for_each_leaf`](Self::for_each_leaf)
    /// and [`flush_delayed`](Self::flush_delayed) report together.
    fn max_leaves(&self) -> usize;

    /// Report `(derivative * ∂self/∂leaf, leaf identifier)` for every leaf.
    ///
    /// Must not touch the tape and must be deterministic.
    fn for_each_leaf<S>(&self, derivative: Self::Real, sink: &mut S)
    where
        S: FnMut(Self::Real, Identifier);

    /// Report pairs that leaves accumulated instead of reporting directly.
    /// Called once after [`for_each_leaf`](Self::for_each_leaf).
    #[inline]
    fn flush_delayed<S>(&self, _sink: &mut S)
    where
        S: FnMut(Self::Real, Identifier),
    {
    }

    /// The identifier of a bare variable, `None` for anything computed.
    #[inline]
    fn as_leaf(&self) -> Option<Identifier> {
        None
    }
}

/// A variable given by value and identifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Leaf<F: Float> {
    pub value: F,
    pub identifier: Identifier,
}

impl<F: Float> Leaf<F> {
    #[inline]
    pub fn new(value: F, identifier: Identifier) -> Self {
        Leaf { value, identifier }
    }
}

impl<F: Float> Expression for Leaf<F> {
    type Real = F;

    #[inline]
    fn value(&self) -> F {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        1
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: F, sink: &mut S)
    where
        S: FnMut(F, Identifier),
    {
        sink(derivative, self.identifier);
    }

    #[inline]
    fn as_leaf(&self) -> Option<Identifier> {
        Some(self.identifier)
    }
}

/// A passive value inside an expression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constant<F: Float>(pub F);

impl<F: Float> Expression for Constant<F> {
    type Real = F;

    #[inline]
    fn value(&self) -> F {
        self.0
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        0
    }

    #[inline]
    fn for_each_leaf<S>(&self, _derivative: F, _sink: &mut S)
    where
        S: FnMut(F, Identifier),
    {
    }
}

macro_rules! impl_float_constant {
    ($($t:ty),*) => {
        $(
            impl Expression for $t {
                type Real = $t;

                #[inline]
                fn value(&self) -> $t {
                    *self
                }

                #[inline]
                fn max_leaves(&self) -> usize {
                    0
                }

                #[inline]
                fn for_each_leaf<S>(&self, _derivative: $t, _sink: &mut S)
                where
                    S: FnMut($t, Identifier),
                {
                }
            }
        )*
    };
}

impl_float_constant!(f32, f64);

/// A statement given directly as its Jacobian entries.
///
/// Used for manual statements and for the rows produced by preaccumulation.
#[derive(Clone, Copy, Debug)]
pub struct JacobianList<'a, F: Float> {
    value: F,
    entries: &'a [(F, Identifier)],
}

impl<'a, F: Float> JacobianList<'a, F> {
    #[inline]
    pub fn new(value: F, entries: &'a [(F, Identifier)]) -> Self {
        JacobianList { value, entries }
    }
}

impl<F: Float> Expression for JacobianList<'_, F> {
    type Real = F;

    #[inline]
    fn value(&self) -> F {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: F, sink: &mut S)
    where
        S: FnMut(F, Identifier),
    {
        for &(jacobian, identifier) in self.entries {
            sink(derivative * jacobian, identifier);
        }
    }
}

// ── Binary nodes ──

/// Primal and partial derivatives of a two-argument operation.
pub trait BinaryOp<F: Float> {
    fn primal(a: F, b: F) -> F;
    /// `(∂/∂a, ∂/∂b)` given the arguments and the already computed result.
    fn partials(a: F, b: F, result: F) -> (F, F);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AddOp;
#[derive(Clone, Copy, Debug, Default)]
pub struct SubOp;
#[derive(Clone, Copy, Debug, Default)]
pub struct MulOp;
#[derive(Clone, Copy, Debug, Default)]
pub struct DivOp;
#[derive(Clone, Copy, Debug, Default)]
pub struct PowOp;

impl<F: Float> BinaryOp<F> for AddOp {
    #[inline]
    fn primal(a: F, b: F) -> F {
        a + b
    }
    #[inline]
    fn partials(_a: F, _b: F, _result: F) -> (F, F) {
        (F::one(), F::one())
    }
}

impl<F: Float> BinaryOp<F> for SubOp {
    #[inline]
    fn primal(a: F, b: F) -> F {
        a - b
    }
    #[inline]
    fn partials(_a: F, _b: F, _result: F) -> (F, F) {
        (F::one(), -F::one())
    }
}

impl<F: Float> BinaryOp<F> for MulOp {
    #[inline]
    fn primal(a: F, b: F) -> F {
        a * b
    }
    #[inline]
    fn partials(a: F, b: F, _result: F) -> (F, F) {
        (b, a)
    }
}

impl<F: Float> BinaryOp<F> for DivOp {
    #[inline]
    fn primal(a: F, b: F) -> F {
        a / b
    }
    #[inline]
    fn partials(_a: F, b: F, result: F) -> (F, F) {
        let inv = F::one() / b;
        (inv, -result * inv)
    }
}

impl<F: Float> BinaryOp<F> for PowOp {
    #[inline]
    fn primal(a: F, b: F) -> F {
        a.powf(b)
    }
    #[inline]
    fn partials(a: F, b: F, result: F) -> (F, F) {
        let da = b * a.powf(b - F::one());
        // The exponent derivative is only defined for a positive base.
        let db = if a > F::zero() {
            result * a.ln()
        } else {
            F::zero()
        };
        (da, db)
    }
}

/// Node for a two-argument operation. The primal value is computed once at
/// construction.
#[derive(Clone, Copy, Debug)]
pub struct Binary<O, L: Expression, R> {
    lhs: L,
    rhs: R,
    value: L::Real,
    _op: PhantomData<O>,
}

impl<O, L, R> Binary<O, L, R>
where
    O: BinaryOp<L::Real>,
    L: Expression,
    R: Expression<Real = L::Real>,
{
    #[inline]
    pub fn new(lhs: L, rhs: R) -> Self {
        let value = O::primal(lhs.value(), rhs.value());
        Binary {
            lhs,
            rhs,
            value,
            _op: PhantomData,
        }
    }
}

impl<O, L, R> Expression for Binary<O, L, R>
where
    O: BinaryOp<L::Real>,
    L: Expression,
    R: Expression<Real = L::Real>,
{
    type Real = L::Real;

    #[inline]
    fn value(&self) -> L::Real {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        self.lhs.max_leaves() + self.rhs.max_leaves()
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: L::Real, sink: &mut S)
    where
        S: FnMut(L::Real, Identifier),
    {
        let (da, db) = O::partials(self.lhs.value(), self.rhs.value(), self.value);
        self.lhs.for_each_leaf(derivative * da, sink);
        self.rhs.for_each_leaf(derivative * db, sink);
    }

    #[inline]
    fn flush_delayed<S>(&self, sink: &mut S)
    where
        S: FnMut(L::Real, Identifier),
    {
        self.lhs.flush_delayed(sink);
        self.rhs.flush_delayed(sink);
    }
}

// ── Unary nodes ──

/// Primal and derivative of a one-argument operation.
pub trait UnaryOp<F: Float> {
    fn primal(a: F) -> F;
    fn derivative(a: F, result: F) -> F;
}

macro_rules! unary_op {
    ($name:ident, |$a:ident| $primal:expr, |$da:ident, $r:ident| $derivative:expr) => {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $name;

        impl<F: Float> UnaryOp<F> for $name {
            #[inline]
            fn primal($a: F) -> F {
                $primal
            }
            #[inline]
            #[allow(unused_variables)]
            fn derivative($da: F, $r: F) -> F {
                $derivative
            }
        }
    };
}

unary_op!(NegOp, |a| -a, |a, r| -F::one());
unary_op!(SinOp, |a| a.sin(), |a, r| a.cos());
unary_op!(CosOp, |a| a.cos(), |a, r| -a.sin());
unary_op!(ExpOp, |a| a.exp(), |a, r| r);
unary_op!(LnOp, |a| a.ln(), |a, r| F::one() / a);
unary_op!(SqrtOp, |a| a.sqrt(), |a, r| F::one() / (r + r));
unary_op!(TanhOp, |a| a.tanh(), |a, r| F::one() - r * r);

/// Node for a one-argument operation.
#[derive(Clone, Copy, Debug)]
pub struct Unary<O, E: Expression> {
    arg: E,
    value: E::Real,
    _op: PhantomData<O>,
}

impl<O, E> Unary<O, E>
where
    O: UnaryOp<E::Real>,
    E: Expression,
{
    #[inline]
    pub fn new(arg: E) -> Self {
        let value = O::primal(arg.value());
        Unary {
            arg,
            value,
            _op: PhantomData,
        }
    }
}

impl<O, E> Expression for Unary<O, E>
where
    O: UnaryOp<E::Real>,
    E: Expression,
{
    type Real = E::Real;

    #[inline]
    fn value(&self) -> E::Real {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        self.arg.max_leaves()
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: E::Real, sink: &mut S)
    where
        S: FnMut(E::Real, Identifier),
    {
        let d = O::derivative(self.arg.value(), self.value);
        self.arg.for_each_leaf(derivative * d, sink);
    }

    #[inline]
    fn flush_delayed<S>(&self, sink: &mut S)
    where
        S: FnMut(E::Real, Identifier),
    {
        self.arg.flush_delayed(sink);
    }
}

/// Multiplication by a passive factor.
#[derive(Clone, Copy, Debug)]
pub struct Scale<E: Expression> {
    arg: E,
    factor: E::Real,
    value: E::Real,
}

impl<E: Expression> Scale<E> {
    #[inline]
    pub fn new(arg: E, factor: E::Real) -> Self {
        let value = arg.value() * factor;
        Scale { arg, factor, value }
    }
}

impl<E: Expression> Expression for Scale<E> {
    type Real = E::Real;

    #[inline]
    fn value(&self) -> E::Real {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        self.arg.max_leaves()
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: E::Real, sink: &mut S)
    where
        S: FnMut(E::Real, Identifier),
    {
        self.arg.for_each_leaf(derivative * self.factor, sink);
    }

    #[inline]
    fn flush_delayed<S>(&self, sink: &mut S)
    where
        S: FnMut(E::Real, Identifier),
    {
        self.arg.flush_delayed(sink);
    }
}

/// Elementary functions as methods on any expression.
pub trait ExpressionExt: Expression + Sized {
    #[inline]
    fn sin(self) -> Unary<SinOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn cos(self) -> Unary<CosOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn exp(self) -> Unary<ExpOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn ln(self) -> Unary<LnOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn sqrt(self) -> Unary<SqrtOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn tanh(self) -> Unary<TanhOp, Self> {
        Unary::new(self)
    }

    #[inline]
    fn scale(self, factor: Self::Real) -> Scale<Self> {
        Scale::new(self, factor)
    }

    #[inline]
    fn powf<Rhs>(self, exponent: Rhs) -> Binary<PowOp, Self, Rhs>
    where
        Rhs: Expression<Real = Self::Real>,
    {
        Binary::new(self, exponent)
    }
}

impl<E: Expression> ExpressionExt for E {}

/// Operator overloads that turn `$ty` into an expression-tree builder.
///
/// Generic parameters go in the first bracket, bounds (each followed by a
/// comma) in the second.
macro_rules! impl_expression_ops {
    ([$($gen:tt)*] $ty:ty, [$($bound:tt)*]) => {
        $crate::expr::impl_expression_ops!(@binary [$($gen)*] $ty, [$($bound)*], Add, add, AddOp);
        $crate::expr::impl_expression_ops!(@binary [$($gen)*] $ty, [$($bound)*], Sub, sub, SubOp);
        $crate::expr::impl_expression_ops!(@binary [$($gen)*] $ty, [$($bound)*], Mul, mul, MulOp);
        $crate::expr::impl_expression_ops!(@binary [$($gen)*] $ty, [$($bound)*], Div, div, DivOp);

        impl<$($gen)*> ::std::ops::Neg for $ty
        where
            $($bound)*
        {
            type Output = $crate::expr::Unary<$crate::expr::NegOp, $ty>;

            #[inline]
            fn neg(self) -> Self::Output {
                $crate::expr::Unary::new(self)
            }
        }
    };
    (@binary [$($gen:tt)*] $ty:ty, [$($bound:tt)*], $trait:ident, $method:ident, $op:ident) => {
        impl<$($gen)*, Rhs> ::std::ops::$trait<Rhs> for $ty
        where
            $($bound)*
            Rhs: $crate::expr::Expression<Real = <$ty as $crate::expr::Expression>::Real>,
        {
            type Output = $crate::expr::Binary<$crate::expr::$op, $ty, Rhs>;

            #[inline]
            fn $method(self, rhs: Rhs) -> Self::Output {
                $crate::expr::Binary::new(self, rhs)
            }
        }
    };
}

pub(crate) use impl_expression_ops;

impl_expression_ops!([F] Leaf<F>, [F: Float,]);
impl_expression_ops!([F] Constant<F>, [F: Float,]);
impl_expression_ops!(['a, F] JacobianList<'a, F>, [F: Float,]);
impl_expression_ops!(
    [O, L, R] Binary<O, L, R>,
    [O: BinaryOp<L::Real>, L: Expression, R: Expression<Real = L::Real>,]
);
impl_expression_ops!([O, E] Unary<O, E>, [O: UnaryOp<E::Real>, E: Expression,]);
impl_expression_ops!([E] Scale<E>, [E: Expression,]);

/// Collect the pairs an expression reports, delayed ones included.
pub fn leaves<E: Expression>(expr: &E) -> Vec<(E::Real, Identifier)> {
    let mut out = Vec::with_capacity(expr.max_leaves());
    let mut sink = |d, id| {
        if id != PASSIVE {
            out.push((d, id));
        }
    };
    expr.for_each_leaf(<E::Real as num_traits::One>::one(), &mut sink);
    expr.flush_delayed(&mut sink);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn chain_rule_reaches_every_leaf() {
        let x = Leaf::new(4.0_f64, 1);
        let e = x * x * x;
        assert_eq!(e.max_leaves(), 3);
        assert_relative_eq!(e.value(), 64.0);
        let entries = leaves(&e);
        let total: f64 = entries.iter().map(|e| e.0).sum();
        assert_relative_eq!(total, 48.0);
        assert!(entries.iter().all(|e| e.1 == 1));
    }

    #[test]
    fn constants_report_nothing() {
        let e = Constant(2.0_f64) * 3.0 + Constant(1.0);
        assert_eq!(e.max_leaves(), 0);
        assert!(leaves(&e).is_empty());
        assert_relative_eq!(e.value(), 7.0);
    }

    #[test]
    fn unary_derivatives() {
        let x = Leaf::new(0.5_f64, 7);
        let cases: Vec<(Vec<(f64, Identifier)>, f64)> = vec![
            (leaves(&x.sin()), 0.5_f64.cos()),
            (leaves(&x.cos()), -(0.5_f64.sin())),
            (leaves(&x.exp()), 0.5_f64.exp()),
            (leaves(&x.ln()), 2.0),
            (leaves(&x.sqrt()), 0.5 / 0.5_f64.sqrt()),
            (leaves(&x.tanh()), 1.0 - 0.5_f64.tanh().powi(2)),
            (leaves(&-x), -1.0),
            (leaves(&x.scale(3.0)), 3.0),
        ];
        for (entries, expected) in cases {
            assert_eq!(entries.len(), 1);
            assert_relative_eq!(entries[0].0, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn quotient_and_power() {
        let a = Leaf::new(3.0_f64, 1);
        let b = Leaf::new(2.0_f64, 2);
        let q = leaves(&(a / b));
        assert_relative_eq!(q[0].0, 0.5);
        assert_relative_eq!(q[1].0, -0.75);

        let p = leaves(&a.powf(b));
        assert_relative_eq!(p[0].0, 6.0);
        assert_relative_eq!(p[1].0, 9.0 * 3.0_f64.ln(), max_relative = 1e-12);

        let negative_base = Leaf::new(-2.0_f64, 1);
        let p = leaves(&negative_base.powf(b));
        assert_relative_eq!(p[1].0, 0.0);
    }

    #[test]
    fn jacobian_list_scales_entries() {
        let entries = [(2.0_f64, 3), (-1.0, 4)];
        let list = JacobianList::new(0.0, &entries);
        let mut seen = Vec::new();
        list.for_each_leaf(0.5, &mut |d, id| seen.push((d, id)));
        assert_eq!(seen, vec![(1.0, 3), (-0.5, 4)]);
    }
}
