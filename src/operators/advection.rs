use std::sync::Arc;

use nalgebra::DVector;

use crate::discretization::mesh::Mesh;
use crate::physics::composer::{BcKind, BoundaryConditions};

/// Upwinded transport of a cell scalar by a face flux field.
pub struct AdvectionOperator {
    mesh: Arc<Mesh>,
}

impl AdvectionOperator {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self { mesh }
    }

    /// Net advective inflow `-div(q h)` into every cell.
    ///
    /// `flux` is along the face normal (out of the first cell). The upwind
    /// value comes from the upstream cell; on inflow boundary faces it is
    /// `boundary_value(f)` where a Dirichlet condition supplies one, and the
    /// interior cell value otherwise.
    pub fn negative_divergence(
        &self,
        flux: &DVector<f64>,
        cell_values: &DVector<f64>,
        bc: &BoundaryConditions,
        boundary_value: impl Fn(usize, f64) -> f64,
    ) -> DVector<f64> {
        let mut inflow = DVector::zeros(self.mesh.num_cells());
        for (f, face) in self.mesh.faces.iter().enumerate() {
            let q = flux[f];
            let (c0, c1) = face.neighbor_cell_ids;
            let upwind = if q >= 0.0 {
                cell_values[c0]
            } else {
                match c1 {
                    Some(c1) => cell_values[c1],
                    None => match bc.get(f) {
                        (BcKind::Dirichlet, value) => boundary_value(f, value),
                        _ => cell_values[c0],
                    },
                }
            };
            let transported = q * upwind;
            inflow[c0] -= transported;
            if let Some(c1) = c1 {
                inflow[c1] += transported;
            }
        }
        inflow
    }

    /// Add the advective contribution to cell residuals. With `negate` the
    /// net inflow is subtracted (the residual receives `div(q h)`), otherwise
    /// it is added.
    pub fn add_to_residual(
        &self,
        residual: &mut DVector<f64>,
        flux: &DVector<f64>,
        cell_values: &DVector<f64>,
        bc: &BoundaryConditions,
        boundary_value: impl Fn(usize, f64) -> f64,
        negate: bool,
    ) {
        let inflow = self.negative_divergence(flux, cell_values, bc, boundary_value);
        if negate {
            *residual -= inflow;
        } else {
            *residual += inflow;
        }
    }
}
