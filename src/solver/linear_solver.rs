use serde::{Deserialize, Serialize};
use wide::f64x4;

#[derive(Clone, Debug)]
pub struct SparseMatrix {
    pub values: Vec<f64>,
    pub col_indices: Vec<usize>,
    pub row_offsets: Vec<usize>,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl SparseMatrix {
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut row_counts = vec![0usize; n_rows];
        for &(r, _, _) in triplets {
            row_counts[r] += 1;
        }

        let mut row_offsets = vec![0usize; n_rows + 1];
        for i in 0..n_rows {
            row_offsets[i + 1] = row_offsets[i] + row_counts[i];
        }

        let mut values = vec![0.0; triplets.len()];
        let mut col_indices = vec![0usize; triplets.len()];
        let mut cursor = row_offsets.clone();
        for &(r, c, v) in triplets {
            let idx = cursor[r];
            values[idx] = v;
            col_indices[idx] = c;
            cursor[r] += 1;
        }

        Self {
            values,
            col_indices,
            row_offsets,
            n_rows,
            n_cols,
        }
    }

    pub fn mat_vec_mul(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n_cols);
        assert_eq!(y.len(), self.n_rows);
        for i in 0..self.n_rows {
            let mut sum = 0.0;
            for j in self.row_offsets[i]..self.row_offsets[i + 1] {
                sum += self.values[j] * x[self.col_indices[j]];
            }
            y[i] = sum;
        }
    }

    pub fn diagonal(&self, i: usize) -> f64 {
        for j in self.row_offsets[i]..self.row_offsets[i + 1] {
            if self.col_indices[j] == i {
                return self.values[j];
            }
        }
        0.0
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    let mut acc = f64x4::splat(0.0);
    let mut i = 0;
    while i + 4 <= n {
        acc += f64x4::from(&a[i..i + 4]) * f64x4::from(&b[i..i + 4]);
        i += 4;
    }
    let mut s = acc.reduce_add();
    while i < n {
        s += a[i] * b[i];
        i += 1;
    }
    s
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y[i] += alpha * x[i]`
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    let n = y.len();
    let va = f64x4::splat(alpha);
    let mut i = 0;
    while i + 4 <= n {
        let res: [f64; 4] = (f64x4::from(&y[i..i + 4]) + va * f64x4::from(&x[i..i + 4])).into();
        y[i..i + 4].copy_from_slice(&res);
        i += 4;
    }
    while i < n {
        y[i] += alpha * x[i];
        i += 1;
    }
}

/// `r = b - A x`
fn residual(a: &SparseMatrix, b: &[f64], x: &[f64], r: &mut [f64]) {
    a.mat_vec_mul(x, r);
    for (ri, bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
}

/// Outcome of one matrix solve.
#[derive(Clone, Copy, Debug)]
pub struct SolverRun {
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
}

impl SolverRun {
    pub fn converged(&self, tol: f64, rel_tol: f64) -> bool {
        self.final_residual <= tol
            || (rel_tol > 0.0 && self.final_residual <= rel_tol * self.initial_residual)
    }
}

/// Opaque linear solver backend. Implementations run until the absolute
/// or relative residual target is met, or the iteration cap is hit; the
/// caller decides what to do about non-convergence.
pub trait LinearSolver {
    fn name(&self) -> &'static str;
    fn solve(
        &self,
        a: &SparseMatrix,
        b: &[f64],
        x: &mut [f64],
        tol: f64,
        rel_tol: f64,
        max_iter: usize,
    ) -> SolverRun;
}

/// Stabilized bi-conjugate gradients; handles the non-symmetric systems
/// produced by constrained rows.
pub struct BiCgStab;

impl LinearSolver for BiCgStab {
    fn name(&self) -> &'static str {
        "BiCGStab"
    }

    fn solve(
        &self,
        a: &SparseMatrix,
        b: &[f64],
        x: &mut [f64],
        tol: f64,
        rel_tol: f64,
        max_iter: usize,
    ) -> SolverRun {
        let n = b.len();
        let mut r = vec![0.0; n];
        residual(a, b, x, &mut r);

        let init = norm(&r);
        let target = tol.max(rel_tol * init);
        if init <= target {
            return SolverRun {
                iterations: 0,
                initial_residual: init,
                final_residual: init,
            };
        }

        let r0 = r.clone();
        let mut rho_old = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut s = vec![0.0; n];
        let mut t = vec![0.0; n];
        let mut resid = init;

        for iter in 0..max_iter {
            let rho_new = dot(&r0, &r);
            if !rho_new.is_finite() || rho_new.abs() < 1e-300 {
                break;
            }

            if iter == 0 {
                p.copy_from_slice(&r);
            } else {
                let beta = (rho_new / rho_old) * (alpha / omega);
                for i in 0..n {
                    p[i] = r[i] + beta * (p[i] - omega * v[i]);
                }
            }

            a.mat_vec_mul(&p, &mut v);
            let r0_v = dot(&r0, &v);
            if r0_v.abs() < 1e-300 {
                break;
            }
            alpha = rho_new / r0_v;

            s.copy_from_slice(&r);
            axpy(-alpha, &v, &mut s);

            if norm(&s) <= target {
                axpy(alpha, &p, x);
                return SolverRun {
                    iterations: iter + 1,
                    initial_residual: init,
                    final_residual: norm(&s),
                };
            }

            a.mat_vec_mul(&s, &mut t);
            let t_t = dot(&t, &t);
            omega = if t_t.abs() < 1e-300 {
                0.0
            } else {
                dot(&t, &s) / t_t
            };

            axpy(alpha, &p, x);
            axpy(omega, &s, x);
            r.copy_from_slice(&s);
            axpy(-omega, &t, &mut r);

            resid = norm(&r);
            if resid <= target {
                return SolverRun {
                    iterations: iter + 1,
                    initial_residual: init,
                    final_residual: resid,
                };
            }
            if omega.abs() < 1e-300 {
                break;
            }
            rho_old = rho_new;
        }

        SolverRun {
            iterations: max_iter,
            initial_residual: init,
            final_residual: resid,
        }
    }
}

/// Plain conjugate gradients for symmetric positive-definite systems.
pub struct ConjugateGradient;

impl LinearSolver for ConjugateGradient {
    fn name(&self) -> &'static str {
        "CG"
    }

    fn solve(
        &self,
        a: &SparseMatrix,
        b: &[f64],
        x: &mut [f64],
        tol: f64,
        rel_tol: f64,
        max_iter: usize,
    ) -> SolverRun {
        let n = b.len();
        let mut r = vec![0.0; n];
        residual(a, b, x, &mut r);

        let init = norm(&r);
        let target = tol.max(rel_tol * init);
        if init <= target {
            return SolverRun {
                iterations: 0,
                initial_residual: init,
                final_residual: init,
            };
        }

        let mut p = r.clone();
        let mut q = vec![0.0; n];
        let mut rs_old = dot(&r, &r);

        for iter in 0..max_iter {
            a.mat_vec_mul(&p, &mut q);
            let p_q = dot(&p, &q);
            if p_q.abs() < 1e-300 {
                break;
            }
            let alpha = rs_old / p_q;
            axpy(alpha, &p, x);
            axpy(-alpha, &q, &mut r);

            let rs_new = dot(&r, &r);
            if rs_new.sqrt() <= target {
                return SolverRun {
                    iterations: iter + 1,
                    initial_residual: init,
                    final_residual: rs_new.sqrt(),
                };
            }
            let beta = rs_new / rs_old;
            for i in 0..n {
                p[i] = r[i] + beta * p[i];
            }
            rs_old = rs_new;
        }

        SolverRun {
            iterations: max_iter,
            initial_residual: init,
            final_residual: rs_old.sqrt(),
        }
    }
}

/// Per-field solver tolerances. The relative target tightens to
/// `final_rel_tol` on the last inner iteration so the final pressure
/// solution is not left at a loose intermediate tolerance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolverControls {
    pub tolerance: f64,
    pub rel_tol: f64,
    pub final_rel_tol: f64,
    pub max_iterations: usize,
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            rel_tol: 0.01,
            final_rel_tol: 0.0,
            max_iterations: 1000,
        }
    }
}

impl SolverControls {
    pub fn select(&self, final_inner_iter: bool) -> (f64, f64) {
        let rel = if final_inner_iter {
            self.final_rel_tol
        } else {
            self.rel_tol
        };
        (self.tolerance, rel)
    }
}

/// A labeled solve outcome, as reported back to the caller.
#[derive(Clone, Debug)]
pub struct SolverReport {
    pub field: String,
    pub solver: &'static str,
    pub iterations: usize,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub converged: bool,
}

/// Solve a labeled matrix equation, logging residual diagnostics once.
/// Non-convergence is reported as a warning, never an error: the outer
/// corrector proceeds on the best available approximation.
pub fn solve_named(
    solver: &dyn LinearSolver,
    field: &str,
    a: &SparseMatrix,
    b: &[f64],
    x: &mut [f64],
    controls: &SolverControls,
    final_inner_iter: bool,
) -> SolverReport {
    let (tol, rel_tol) = controls.select(final_inner_iter);
    let run = solver.solve(a, b, x, tol, rel_tol, controls.max_iterations);
    let converged = run.converged(tol, rel_tol);

    log::info!(
        "{}: solving for {}, initial residual = {:.6e}, final residual = {:.6e}, iterations = {}",
        solver.name(),
        field,
        run.initial_residual,
        run.final_residual,
        run.iterations
    );
    if !converged {
        log::warn!(
            "{}: {} did not reach tolerance {:.3e} (rel {:.3e}) in {} iterations, residual = {:.6e}",
            solver.name(),
            field,
            tol,
            rel_tol,
            run.iterations,
            run.final_residual
        );
    }

    SolverReport {
        field: field.to_string(),
        solver: solver.name(),
        iterations: run.iterations,
        initial_residual: run.initial_residual,
        final_residual: run.final_residual,
        converged,
    }
}
