//! Reference backward-Euler driver for a [`BdfFunctional`].
//!
//! Each step runs a preconditioned fixed-point Newton iteration,
//! `u <- u - P^-1 g(u)`, until the kernel's error norm drops below the
//! tolerance. A failed step is retried with half the step size.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::SolveError;
use crate::numerics::timing::{finalize_and_print, record_preconditioner, record_residual, reset_timing};
use crate::physics::BdfFunctional;
use crate::state::composite::CompositeVector;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientSolver {
    #[serde(default)]
    pub t_start: f64,
    pub t_end: f64,
    pub dt: f64,
    /// Smallest step tried before the run is abandoned.
    #[serde(default = "default_min_dt")]
    pub min_dt: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Error-norm threshold for convergence.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_min_dt() -> f64 {
    1e-8
}
fn default_max_iterations() -> usize {
    20
}
fn default_tolerance() -> f64 {
    1.0
}

impl Default for TransientSolver {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1.0,
            dt: 1e-2,
            min_dt: default_min_dt(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

/// Outcome of one accepted step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepResult {
    pub iterations: usize,
    pub error: f64,
}

/// One line of the run history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub time: f64,
    pub dt: f64,
    pub iterations: usize,
    pub error: f64,
}

pub struct TransientResult {
    pub solution: CompositeVector,
    pub history: Vec<StepRecord>,
    /// Step attempts that were rejected and retried.
    pub failures: usize,
}

impl TransientSolver {
    /// Solve one step of size `h` from `u_old` at `t_old`.
    pub fn step<P: BdfFunctional + ?Sized>(
        &self,
        pk: &mut P,
        t_old: f64,
        h: f64,
        u_old: &CompositeVector,
    ) -> Result<(CompositeVector, StepResult), SolveError> {
        let t_new = t_old + h;
        let mut u = u_old.clone();
        if pk.modify_predictor(h, u_old, &mut u) {
            pk.changed_solution();
        }

        let mut error = f64::INFINITY;
        for iteration in 1..=self.max_iterations {
            let r = record_residual(|| pk.residual(t_old, t_new, u_old, &u));
            record_preconditioner(|| pk.update_preconditioner(t_new, &u, h));
            let du = pk.apply_preconditioner(&r)?;

            u.update(-1.0, &du, 1.0);
            pk.changed_solution();

            let report = pk.is_admissible(&u);
            if !report.admissible {
                return Err(SolveError::Inadmissible(report.to_string()));
            }

            error = pk.error_norm(&u, &du);
            log::trace!(
                "iteration {iteration:>3} | residual {:.4e} | error {error:.4e}",
                r.norm_inf()
            );
            if error < self.tolerance {
                return Ok((u, StepResult { iterations: iteration, error }));
            }
        }
        Err(SolveError::NonConvergence {
            iterations: self.max_iterations,
            error,
        })
    }

    /// March from `t_start` to `t_end`, committing every accepted step and
    /// handing it to `callback`.
    pub fn solve<P: BdfFunctional + ?Sized>(
        &self,
        pk: &mut P,
        initial_condition: CompositeVector,
        mut callback: impl FnMut(f64, &CompositeVector),
    ) -> Result<TransientResult, SolveError> {
        reset_timing();
        let start = Instant::now();

        let mut u = initial_condition;
        let mut t = self.t_start;
        let mut dt = self.dt;
        let mut history = Vec::new();
        let mut failures = 0;
        let end_tolerance = 1e-12 * self.t_end.abs().max(1.0);

        log::info!(
            "starting transient run: t = {:.4e} -> {:.4e}, dt = {:.3e}",
            self.t_start,
            self.t_end,
            self.dt
        );

        while self.t_end - t > end_tolerance {
            let h = dt.min(self.t_end - t);
            match self.step(pk, t, h, &u) {
                Ok((u_new, result)) => {
                    t += h;
                    u = u_new;
                    pk.commit_state(h);
                    pk.calculate_diagnostics();

                    let record = StepRecord {
                        step: history.len() + 1,
                        time: t,
                        dt: h,
                        iterations: result.iterations,
                        error: result.error,
                    };
                    log::info!(
                        "step {:>4} | t = {:.4e} | dt = {:.3e} | iters = {} | error = {:.3e}",
                        record.step,
                        t,
                        h,
                        result.iterations,
                        result.error
                    );
                    history.push(record);
                    callback(t, &u);
                }
                Err(err) => {
                    failures += 1;
                    dt = 0.5 * h;
                    log::warn!("step at t = {t:.4e} with dt = {h:.3e} failed: {err}");
                    if dt < self.min_dt {
                        return Err(err);
                    }
                }
            }
        }

        finalize_and_print(start.elapsed());
        Ok(TransientResult {
            solution: u,
            history,
            failures,
        })
    }
}
