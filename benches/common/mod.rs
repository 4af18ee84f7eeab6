#![allow(dead_code)]

use chunktape::expr::ExpressionExt;
use chunktape::{Active, ActiveTape};

// ─── Rosenbrock ────────────────────────────────────────────────────────────

pub fn rosenbrock<T: ActiveTape<Real = f64>>(x: &[Active<T>]) -> Active<T> {
    let mut sum = Active::<T>::new(0.0);
    for i in 0..x.len() - 1 {
        let t1 = Active::<T>::from_expr(1.0 - &x[i]);
        let t2 = Active::<T>::from_expr(&x[i + 1] - &x[i] * &x[i]);
        sum += &t1 * &t1 + &t2 * &t2 * 100.0;
    }
    sum
}

pub fn rosenbrock_f64(x: &[f64]) -> f64 {
    let mut sum = 0.0;
    for i in 0..x.len() - 1 {
        let t1 = 1.0 - x[i];
        let t2 = x[i + 1] - x[i] * x[i];
        sum += t1 * t1 + 100.0 * t2 * t2;
    }
    sum
}

// ─── Rastrigin ─────────────────────────────────────────────────────────────
// f(x) = 10n + Σ[x_i² - 10·cos(2π·x_i)]

pub fn rastrigin<T: ActiveTape<Real = f64>>(x: &[Active<T>]) -> Active<T> {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut sum = Active::<T>::new(10.0 * x.len() as f64);
    for xi in x {
        sum += xi * xi - xi.scale(two_pi).cos() * 10.0;
    }
    sum
}

// ─── Helpers ───────────────────────────────────────────────────────────────

pub fn make_input(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + 0.01 * i as f64).collect()
}

pub fn finite_diff_gradient(f: fn(&[f64]) -> f64, x: &[f64], h: f64) -> Vec<f64> {
    let mut xp = x.to_vec();
    let mut g = vec![0.0; x.len()];
    for i in 0..x.len() {
        let orig = xp[i];
        xp[i] = orig + h;
        let fp = f(&xp);
        xp[i] = orig - h;
        let fm = f(&xp);
        xp[i] = orig;
        g[i] = (fp - fm) / (2.0 * h);
    }
    g
}
