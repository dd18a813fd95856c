use std::sync::Arc;

use kryst::parallel::{NoComm, UniverseComm};
use kryst::preconditioner::PcSide;
use kryst::solver::LinearSolver as _;
use nalgebra::DVector;
use nalgebra_sparse::convert::serial::convert_csr_dense;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::error::SolveError;

/// Solves an assembled sparse system; the seam to an external linear solver.
pub trait LinearSolver: Send + Sync {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError>;
}

/// Direct solve through a dense LU factorization. Only sensible for small systems.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        convert_csr_dense(a)
            .lu()
            .solve(b)
            .ok_or(SolveError::SingularOperator)
    }
}

/// BiCGStab from `kryst` on the Jacobi row-scaled system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BiCgStab {
    /// Relative residual reduction of the scaled system.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_tolerance() -> f64 {
    1e-10
}
fn default_max_iterations() -> usize {
    1000
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Diagonal of every row, with zero or missing entries replaced by one.
fn row_scaling(a: &CsrMatrix<f64>) -> Vec<f64> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            let d = row
                .col_indices()
                .iter()
                .position(|&j| j == i)
                .map_or(0.0, |k| row.values()[k]);
            if d.abs() > f64::MIN_POSITIVE {
                d
            } else {
                1.0
            }
        })
        .collect()
}

impl LinearSolver for BiCgStab {
    fn solve(&self, a: &CsrMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        let n = b.len();
        if !b.iter().all(|v| v.is_finite()) {
            return Err(SolveError::LinearSolveFailed {
                iterations: 0,
                residual: f64::NAN,
            });
        }
        if b.amax() == 0.0 {
            return Ok(DVector::zeros(n));
        }

        let d = row_scaling(a);
        let (offsets, indices, values) = a.csr_data();
        let mut scaled = values.to_vec();
        for (row, &di) in d.iter().enumerate() {
            for v in &mut scaled[offsets[row]..offsets[row + 1]] {
                *v /= di;
            }
        }
        let matrix = kryst::matrix::sparse::CsrMatrix::from_csr(n, n, offsets.to_vec(), indices.to_vec(), scaled);
        let op = kryst::matrix::op::CsrOp::new(Arc::new(matrix));
        let rhs = DVector::from_iterator(n, b.iter().zip(&d).map(|(v, di)| v / di));

        let mut solver = kryst::solver::bicgstab::BiCgStabSolver::new(self.tolerance, self.max_iterations);
        let mut workspace = kryst::context::ksp_context::Workspace::new(n);
        solver.setup_workspace(&mut workspace);
        let mut x = DVector::<f64>::zeros(n);
        let stats = solver
            .solve(
                &op,
                None,
                rhs.as_slice(),
                x.as_mut_slice(),
                PcSide::Left,
                &UniverseComm::NoComm(NoComm {}),
                None,
                Some(&mut workspace),
            )
            .map_err(|err| {
                log::debug!("BiCGStab failed: {err:?}");
                SolveError::LinearSolveFailed {
                    iterations: self.max_iterations,
                    residual: f64::NAN,
                }
            })?;
        log::trace!("BiCGStab: {stats:?}");

        // accept on the true residual of the scaled system
        let r = b - a * &x;
        let residual = r.iter().zip(&d).map(|(v, di)| (v / di).powi(2)).sum::<f64>().sqrt();
        if !(residual <= 1e2 * self.tolerance * rhs.norm()) {
            return Err(SolveError::LinearSolveFailed {
                iterations: self.max_iterations,
                residual,
            });
        }
        Ok(x)
    }
}
