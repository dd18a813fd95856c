//! Predictor corrections applied before the first nonlinear iteration.

use crate::discretization::mesh::Mesh;
use crate::error::SolveError;
use crate::operators::diffusion::DiffusionOperator;
use crate::operators::linear::LinearSolver;
use crate::physics::composer::{BcKind, BoundaryConditions};
use crate::state::composite::{CompositeVector, Entity};

/// Replace face values by the mean of their adjacent cells.
pub fn average_cells_to_faces(mesh: &Mesh, u: &mut CompositeVector) {
    let uc = u.component(Entity::Cell).clone();
    let uf = u.component_mut(Entity::Face);
    for (f, face) in mesh.faces.iter().enumerate() {
        uf[f] = match face.neighbor_cell_ids {
            (c0, Some(c1)) => 0.5 * (uc[c0] + uc[c1]),
            (c0, None) => uc[c0],
        };
    }
}

/// Make face values consistent with the cell values: start from the cell
/// average and solve the face rows of `operator`, which must already hold
/// the stiffness and boundary conditions to honor.
pub fn consistent_faces(
    operator: &DiffusionOperator,
    u: &mut CompositeVector,
    solver: &dyn LinearSolver,
) -> Result<(), SolveError> {
    average_cells_to_faces(operator.mesh(), u);
    operator.update_consistent_faces(u, solver)
}

/// Newton solve, per prescribed-flux boundary face, for the face value that
/// reproduces the prescribed flux through a nonlinear face coefficient:
///
/// ```text
/// k(u_f) T (u_c - u_f + head) = q A
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FluxBcPredictor {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FluxBcPredictor {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 50,
        }
    }
}

impl FluxBcPredictor {
    /// `coefficient(f, u_f)` returns the coefficient of face `f` at face
    /// value `u_f` and its derivative. Returns whether any face value changed.
    pub fn modify(
        &self,
        operator: &DiffusionOperator,
        bc: &BoundaryConditions,
        u: &mut CompositeVector,
        coefficient: impl Fn(usize, f64) -> (f64, f64),
    ) -> bool {
        let mesh = operator.mesh().clone();
        let uc = u.component(Entity::Cell).clone();
        let uf = u.component_mut(Entity::Face);
        let mut changed = false;

        for &f in mesh.boundary_faces() {
            let (BcKind::Neumann, q) = bc.get(f) else {
                continue;
            };
            let c = mesh.faces[f].neighbor_cell_ids.0;
            let Some((trans, head)) = operator.cell_face_terms(c, f) else {
                continue;
            };
            let target = q * mesh.faces[f].area;

            let mut x = uf[f];
            let mut converged = false;
            for _ in 0..self.max_iterations {
                let (k, dk) = coefficient(f, x);
                let drive = uc[c] - x + head;
                let phi = k * trans * drive - target;
                let dphi = dk * trans * drive - k * trans;
                if dphi == 0.0 || !dphi.is_finite() {
                    break;
                }
                let dx = phi / dphi;
                x -= dx;
                if dx.abs() <= self.tolerance * (1.0 + x.abs()) {
                    converged = true;
                    break;
                }
            }

            if converged && x.is_finite() {
                changed |= x != uf[f];
                uf[f] = x;
            } else {
                log::warn!("flux predictor did not converge on face {f}; keeping {:.6e}", uf[f]);
            }
        }
        changed
    }
}
