use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use num_traits::Zero;

use crate::error::TapeError;
use crate::expr::{impl_expression_ops, AddOp, Binary, DivOp, Expression, Leaf, MulOp, SubOp};
use crate::index::{Identifier, PASSIVE};
use crate::tape::ActiveTape;

/// Operator-overloading AD variable recording onto the active tape of type `T`.
///
/// Arithmetic on `&Active` builds an expression; assigning it (with
/// [`Active::from_expr`], [`Active::assign`] or a compound operator) records
/// one statement on the tape installed by a
/// [`TapeGuard`](crate::tape::TapeGuard). Without an installed tape values
/// are passive.
///
/// Cloning records a copy and dropping releases the identifier, so the
/// value's lifetime is what drives identifier reuse on a
/// [`ReuseTape`](crate::tape::ReuseTape).
///
/// # Examples
///
/// ```
/// use chunktape::{Active, ActiveTape, LinearTape, TapeBehavior, TapeGuard};
///
/// let mut tape = LinearTape::<f64>::new();
/// let guard = TapeGuard::new(&mut tape);
///
/// let x = Active::<LinearTape<f64>>::new_input(4.0);
/// let y = Active::<LinearTape<f64>>::from_expr(&x * &x * &x);
/// y.set_gradient(1.0);
/// LinearTape::<f64>::with_active(|tape| tape.evaluate());
/// assert_eq!(x.gradient(), 48.0);
/// drop(guard);
/// ```
pub struct Active<T: ActiveTape> {
    value: T::Real,
    identifier: Identifier,
}

impl<T: ActiveTape> Active<T> {
    /// A passive value.
    #[inline]
    pub fn new(value: T::Real) -> Self {
        Active {
            value,
            identifier: PASSIVE,
        }
    }

    /// A value registered as a tape input.
    pub fn new_input(value: T::Real) -> Self {
        let mut input = Active::new(value);
        input.register_input();
        input
    }

    /// Evaluate `rhs` and record it as a new value.
    ///
    /// Expressions do not carry the tape type, so name it at the call site:
    /// `Linear64::from_expr(..)` or `Active::<T>::from_expr(..)`.
    ///
    /// # Panics
    ///
    /// Panics when the tape rejects the statement, see [`Active::try_assign`].
    pub fn from_expr<E: Expression<Real = T::Real>>(rhs: E) -> Self {
        let mut lhs = Active::new(rhs.value());
        lhs.assign(rhs);
        lhs
    }

    #[inline]
    pub fn value(&self) -> T::Real {
        self.value
    }

    #[inline]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Whether the value depends on a registered input.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.identifier != PASSIVE
    }

    /// Snapshot as a plain expression leaf.
    #[inline]
    pub fn leaf(&self) -> Leaf<T::Real> {
        Leaf::new(self.value, self.identifier)
    }

    /// Reference leaf that merges repeated occurrences into one Jacobian
    /// entry.
    #[inline]
    pub fn delayed(&self) -> ActiveRef<'_, T> {
        ActiveRef {
            value: self.value,
            identifier: self.identifier,
            jacobian: Cell::new(T::Real::zero()),
            pending: Cell::new(false),
            _source: PhantomData,
        }
    }

    /// Record `self = rhs`.
    ///
    /// # Panics
    ///
    /// Panics when the tape rejects the statement.
    #[track_caller]
    pub fn assign<E: Expression<Real = T::Real>>(&mut self, rhs: E) {
        if let Err(e) = self.try_assign(rhs) {
            panic!("failed to record statement: {e}");
        }
    }

    /// Record `self = rhs`, leaving `self` untouched on error.
    pub fn try_assign<E: Expression<Real = T::Real>>(&mut self, rhs: E) -> Result<(), TapeError> {
        let value = rhs.value();
        let identifier = &mut self.identifier;
        match T::with_active(|tape| tape.store(identifier, &rhs)) {
            Some(result) => result?,
            None => *identifier = PASSIVE,
        }
        self.value = value;
        Ok(())
    }

    /// Record the value as an independent input.
    pub fn register_input(&mut self) {
        let identifier = &mut self.identifier;
        T::with_active(|tape| tape.register_input(identifier));
    }

    /// Give the value its own identifier as a tape output.
    pub fn register_output(&mut self) {
        let identifier = &mut self.identifier;
        T::with_active(|tape| tape.register_output(identifier));
    }

    /// Adjoint (or tangent) currently stored for this value.
    pub fn gradient(&self) -> T::Real {
        T::with_active(|tape| tape.gradient(self.identifier)).unwrap_or_else(T::Real::zero)
    }

    /// Set the adjoint (or tangent) of this value. Ignored for passive values.
    pub fn set_gradient(&self, gradient: T::Real) {
        if self.identifier == PASSIVE {
            return;
        }
        T::with_active(|tape| tape.set_gradient(self.identifier, gradient));
    }

    /// Overwrite the identifier, e.g. after preaccumulation re-recorded the
    /// value.
    #[inline]
    pub(crate) fn set_identifier(&mut self, identifier: Identifier) {
        self.identifier = identifier;
    }
}

impl<T: ActiveTape> Clone for Active<T> {
    fn clone(&self) -> Self {
        let mut copy = Active::new(self.value);
        copy.assign(self.leaf());
        copy
    }
}

impl<T: ActiveTape> Drop for Active<T> {
    fn drop(&mut self) {
        if self.identifier != PASSIVE {
            let identifier = &mut self.identifier;
            T::with_active(|tape| tape.free(identifier));
        }
    }
}

impl<T: ActiveTape> Default for Active<T> {
    fn default() -> Self {
        Active::new(T::Real::zero())
    }
}

impl<T: ActiveTape> Debug for Active<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Active")
            .field("value", &self.value)
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl<T: ActiveTape> Display for Active<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T: ActiveTape> PartialEq for Active<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: ActiveTape> PartialOrd for Active<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl<'a, T: ActiveTape> Expression for &'a Active<T> {
    type Real = T::Real;

    #[inline]
    fn value(&self) -> T::Real {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        1
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: T::Real, sink: &mut S)
    where
        S: FnMut(T::Real, Identifier),
    {
        sink(derivative, self.identifier);
    }

    #[inline]
    fn as_leaf(&self) -> Option<Identifier> {
        Some(self.identifier)
    }
}

impl_expression_ops!(['a, T] &'a Active<T>, [T: ActiveTape,]);

// Plain floats on the left of an active value.
macro_rules! impl_scalar_lhs_ops {
    ($($f:ty),*) => {
        $(
            impl_scalar_lhs_ops!(@op $f, Add, add, AddOp);
            impl_scalar_lhs_ops!(@op $f, Sub, sub, SubOp);
            impl_scalar_lhs_ops!(@op $f, Mul, mul, MulOp);
            impl_scalar_lhs_ops!(@op $f, Div, div, DivOp);
        )*
    };
    (@op $f:ty, $trait:ident, $method:ident, $op:ident) => {
        impl<'a, T: ActiveTape<Real = $f>> std::ops::$trait<&'a Active<T>> for $f {
            type Output = Binary<$op, $f, &'a Active<T>>;

            #[inline]
            fn $method(self, rhs: &'a Active<T>) -> Self::Output {
                Binary::new(self, rhs)
            }
        }
    };
}

impl_scalar_lhs_ops!(f32, f64);

macro_rules! impl_compound_assign {
    ($($trait:ident, $method:ident, $op:tt);*) => {
        $(
            impl<T, E> $trait<E> for Active<T>
            where
                T: ActiveTape,
                E: Expression<Real = T::Real>,
            {
                #[track_caller]
                fn $method(&mut self, rhs: E) {
                    let lhs = self.leaf();
                    self.assign(lhs $op rhs);
                }
            }
        )*
    };
}

impl_compound_assign!(
    AddAssign, add_assign, +;
    SubAssign, sub_assign, -;
    MulAssign, mul_assign, *;
    DivAssign, div_assign, /
);

/// Reference leaf with delayed accumulation.
///
/// Every occurrence adds its local derivative to a shared cell; one entry is
/// reported when the recorder flushes. Use it for a variable that appears
/// many times in one expression:
///
/// ```
/// use chunktape::expr::Expression;
/// use chunktape::{Active, LinearTape};
///
/// let x = Active::<LinearTape<f64>>::new(3.0);
/// let r = x.delayed();
/// let e = &r * &r + &r;
/// assert_eq!(e.value(), 12.0);
/// ```
pub struct ActiveRef<'a, T: ActiveTape> {
    value: T::Real,
    identifier: Identifier,
    jacobian: Cell<T::Real>,
    pending: Cell<bool>,
    _source: PhantomData<&'a Active<T>>,
}

impl<'a, 'b, T: ActiveTape> Expression for &'a ActiveRef<'b, T> {
    type Real = T::Real;

    #[inline]
    fn value(&self) -> T::Real {
        self.value
    }

    #[inline]
    fn max_leaves(&self) -> usize {
        1
    }

    #[inline]
    fn for_each_leaf<S>(&self, derivative: T::Real, _sink: &mut S)
    where
        S: FnMut(T::Real, Identifier),
    {
        self.jacobian.set(self.jacobian.get() + derivative);
        self.pending.set(true);
    }

    #[inline]
    fn flush_delayed<S>(&self, sink: &mut S)
    where
        S: FnMut(T::Real, Identifier),
    {
        if self.pending.replace(false) {
            sink(self.jacobian.replace(T::Real::zero()), self.identifier);
        }
    }
}

impl_expression_ops!(['a, 'b, T] &'a ActiveRef<'b, T>, [T: ActiveTape,]);

/// Reverse-mode value over a [`LinearTape`](crate::tape::LinearTape) of `f64`.
pub type Linear64 = Active<crate::tape::LinearTape<f64>>;
/// Reverse-mode value over a [`LinearTape`](crate::tape::LinearTape) of `f32`.
pub type Linear32 = Active<crate::tape::LinearTape<f32>>;
/// Reverse-mode value over a [`ReuseTape`](crate::tape::ReuseTape) of `f64`.
pub type Reuse64 = Active<crate::tape::ReuseTape<f64>>;
/// Reverse-mode value over a [`ReuseTape`](crate::tape::ReuseTape) of `f32`.
pub type Reuse32 = Active<crate::tape::ReuseTape<f32>>;

