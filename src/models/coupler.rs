//! Surface/subsurface coupling by composition: the coupler owns the
//! subsurface kernel and the surface-side values, and exchanges them only
//! through fields of the subsurface state.

use nalgebra::DVector;

use super::energy::EnergyPk;
use super::richards::RichardsPk;
use crate::discretization::mesh::Mesh;
use crate::error::{ConfigError, SolveError};
use crate::physics::composer::CouplingMode;
use crate::physics::pk::PkCore;
use crate::physics::{AdmissibilityReport, BdfFunctional};
use crate::state::composite::{CompositeVector, Entity};

/// A kernel whose core can be reached by a coupler.
pub trait CoupledKernel: BdfFunctional {
    fn core(&self) -> &PkCore;
    fn core_mut(&mut self) -> &mut PkCore;
}

impl CoupledKernel for RichardsPk {
    fn core(&self) -> &PkCore {
        RichardsPk::core(self)
    }
    fn core_mut(&mut self) -> &mut PkCore {
        RichardsPk::core_mut(self)
    }
}

impl CoupledKernel for EnergyPk {
    fn core(&self) -> &PkCore {
        EnergyPk::core(self)
    }
    fn core_mut(&mut self) -> &mut PkCore {
        EnergyPk::core_mut(self)
    }
}

/// Copy per-surface-cell values onto the subsurface cells below them.
///
/// Surface cell `i` sits on `parent_faces[i]`; its value lands on the interior
/// cell of that face, optionally negated. Every other cell gets `background`.
pub fn top_cells(
    mesh: &Mesh,
    parent_faces: &[usize],
    values: &DVector<f64>,
    background: f64,
    negate: bool,
) -> DVector<f64> {
    assert_eq!(
        values.len(),
        parent_faces.len(),
        "one value per surface cell is required"
    );
    let sign = if negate { -1.0 } else { 1.0 };
    let mut out = DVector::from_element(mesh.num_cells(), background);
    for (i, &f) in parent_faces.iter().enumerate() {
        out[mesh.faces[f].neighbor_cell_ids.0] = sign * values[i];
    }
    out
}

pub struct SurfaceSubsurfaceCoupler<P: CoupledKernel> {
    subsurface: P,
    mode: CouplingMode,
    /// Subsurface face under each surface cell.
    parent_faces: Vec<usize>,
    /// Surface pressure, or the flux leaving the subsurface, per surface cell.
    surface_values: DVector<f64>,
}

impl<P: CoupledKernel> SurfaceSubsurfaceCoupler<P> {
    /// Wrap `subsurface`, which must have been configured with a coupling mode.
    pub fn new(subsurface: P) -> Result<Self, ConfigError> {
        let mode = subsurface.core().coupling();
        if !mode.is_coupled() {
            return Err(ConfigError::Missing(format!(
                "{}: 'coupled_to_surface_via_head' or 'coupled_to_surface_via_flux'",
                subsurface.core().name()
            )));
        }
        let parent_faces = subsurface.core().coupled_faces().to_vec();
        let surface_values = match mode {
            CouplingMode::ViaHead => {
                DVector::from_element(parent_faces.len(), subsurface.core().config.atmospheric_pressure)
            }
            _ => DVector::zeros(parent_faces.len()),
        };
        log::debug!(
            "{}: coupled to {} surface cells {mode:?}",
            subsurface.core().name(),
            parent_faces.len()
        );
        Ok(Self {
            subsurface,
            mode,
            parent_faces,
            surface_values,
        })
    }

    pub fn mode(&self) -> CouplingMode {
        self.mode
    }

    pub fn parent_faces(&self) -> &[usize] {
        &self.parent_faces
    }

    pub fn subsurface(&self) -> &P {
        &self.subsurface
    }

    pub fn subsurface_mut(&mut self) -> &mut P {
        &mut self.subsurface
    }

    pub fn into_subsurface(self) -> P {
        self.subsurface
    }

    /// Surface values for the next evaluations, one per surface cell.
    pub fn set_surface_values(&mut self, values: &DVector<f64>) {
        assert_eq!(
            values.len(),
            self.parent_faces.len(),
            "one value per surface cell is required"
        );
        self.surface_values.copy_from(values);
    }

    /// Write the surface values into the subsurface state.
    pub fn push(&mut self) {
        let pairs: Vec<(usize, f64)> = self
            .parent_faces
            .iter()
            .zip(self.surface_values.iter())
            .map(|(&f, &v)| (f, v))
            .collect();
        self.subsurface.core_mut().push_coupling_values(&pairs);
    }

    /// Subsurface flux through every parent face, per surface cell. With
    /// `negate` the flux is reported into the subsurface.
    pub fn exchange_flux(&self, negate: bool) -> DVector<f64> {
        let core = self.subsurface.core();
        let flux = core.new.field(&core.keys.flux).component(Entity::Face);
        let sign = if negate { -1.0 } else { 1.0 };
        DVector::from_iterator(
            self.parent_faces.len(),
            self.parent_faces.iter().map(|&f| sign * flux[f]),
        )
    }

    /// Surface values spread onto the subsurface cells below them.
    pub fn to_top_cells(&self, background: f64, negate: bool) -> DVector<f64> {
        top_cells(
            self.subsurface.core().mesh(),
            &self.parent_faces,
            &self.surface_values,
            background,
            negate,
        )
    }
}

impl<P: CoupledKernel> BdfFunctional for SurfaceSubsurfaceCoupler<P> {
    fn modify_predictor(&mut self, h: f64, u_old: &CompositeVector, u: &mut CompositeVector) -> bool {
        self.push();
        self.subsurface.modify_predictor(h, u_old, u)
    }

    fn residual(
        &mut self,
        t_old: f64,
        t_new: f64,
        u_old: &CompositeVector,
        u_new: &CompositeVector,
    ) -> CompositeVector {
        self.push();
        self.subsurface.residual(t_old, t_new, u_old, u_new)
    }

    fn update_preconditioner(&mut self, t: f64, u: &CompositeVector, h: f64) {
        self.push();
        self.subsurface.update_preconditioner(t, u, h);
    }

    fn apply_preconditioner(&self, r: &CompositeVector) -> Result<CompositeVector, SolveError> {
        self.subsurface.apply_preconditioner(r)
    }

    fn error_norm(&mut self, u: &CompositeVector, du: &CompositeVector) -> f64 {
        self.subsurface.error_norm(u, du)
    }

    fn is_admissible(&mut self, u: &CompositeVector) -> AdmissibilityReport {
        self.subsurface.is_admissible(u)
    }

    fn changed_solution(&mut self) {
        self.subsurface.changed_solution();
    }

    fn commit_state(&mut self, h: f64) {
        self.subsurface.commit_state(h);
    }

    fn calculate_diagnostics(&mut self) {
        self.subsurface.calculate_diagnostics();
    }
}
