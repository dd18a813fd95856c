//! Richards equation for variably saturated liquid flow, in pressure form.
//!
//! The conserved quantity is water content in moles,
//! `WC = phi n_l s_l(p_atm - p) V`, and the diffusion coefficient is the
//! upwinded `kr n_l / mu`. Absolute permeabilities are divided by
//! `permeability_rescaling` (default 1) and relative permeabilities multiplied
//! by it. The Darcy flux direction used for upwinding is always in physical
//! units.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use serde::{Deserialize, Serialize};

use super::{key_or, liquid_density, MASS_DENSITY, MOLAR_DENSITY, POROSITY, SATURATION};
use crate::closure::eos::{EosParams, LinearEos};
use crate::closure::van_genuchten::{VanGenuchten, VanGenuchtenParams};
use crate::closure::{EquationOfState, RetentionModel};
use crate::config::{ErrorNormParams, PkConfig, UpdateFluxMode};
use crate::discretization::comm::Communicator;
use crate::discretization::mesh::Mesh;
use crate::error::{ConfigError, SolveError};
use crate::operators::upwind::UpwindMethod;
use crate::physics::composer::{BoundaryConditionComposer, CouplingMode};
use crate::physics::pk::{PkCore, PkDefaults, PkKeys};
use crate::physics::predictor::{average_cells_to_faces, consistent_faces, FluxBcPredictor};
use crate::physics::{AdmissibilityReport, BdfFunctional};
use crate::state::composite::{CompositeVector, Entity};
use crate::state::evaluator::Evaluator;
use crate::state::State;

pub const PRESSURE: &str = "pressure";
pub const TEMPERATURE: &str = "temperature";
pub const WATER_CONTENT: &str = "water_content";
pub const REL_PERM: &str = "relative_permeability";
pub const UPWINDED_REL_PERM: &str = "numerical_rel_perm";
pub const DARCY_FLUX: &str = "darcy_flux";
pub const DARCY_FLUX_DIRECTION: &str = "darcy_flux_direction";
/// Face field written by a surface coupled through its pressure.
pub const SURFACE_PRESSURE: &str = "surface_pressure";
/// Face field written by a surface coupled through its exchange flux.
pub const SURFACE_FLUX: &str = "surface_subsurface_flux";

/// Material and fluid parameters of the flow problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichardsParams {
    #[serde(default)]
    pub water_retention: VanGenuchtenParams,
    #[serde(default)]
    pub eos: EosParams,
    #[serde(default = "default_porosity")]
    pub porosity: f64,
    /// Dynamic viscosity [Pa s].
    #[serde(default = "default_viscosity")]
    pub viscosity: f64,
    /// Uniform temperature the density is evaluated at [K].
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_porosity() -> f64 {
    0.25
}
fn default_viscosity() -> f64 {
    8.9e-4
}
fn default_temperature() -> f64 {
    283.15
}

impl Default for RichardsParams {
    fn default() -> Self {
        Self {
            water_retention: VanGenuchtenParams::default(),
            eos: EosParams::default(),
            porosity: default_porosity(),
            viscosity: default_viscosity(),
            temperature: default_temperature(),
        }
    }
}

/// Pressure of a liquid column in hydrostatic equilibrium with a water table
/// at elevation `water_table`, on cells and faces.
pub fn hydrostatic_pressure(
    mesh: &Mesh,
    water_table: f64,
    density: f64,
    gravity: f64,
    p_atm: f64,
) -> CompositeVector {
    let mut u = CompositeVector::cells_and_faces(mesh);
    let p = |z: f64| p_atm + density * gravity * (water_table - z);
    for (c, cell) in mesh.cells.iter().enumerate() {
        u.component_mut(Entity::Cell)[c] = p(cell.centroid[2]);
    }
    for (f, face) in mesh.faces.iter().enumerate() {
        u.component_mut(Entity::Face)[f] = p(face.centroid[2]);
    }
    u
}

#[inline]
fn k_relative_at(wrm: &VanGenuchten, p_atm: f64, p: f64) -> f64 {
    wrm.k_relative(wrm.saturation(p_atm - p))
}

/// `d kr / d p` through the saturation.
#[inline]
fn d_k_relative_at(wrm: &VanGenuchten, p_atm: f64, p: f64) -> f64 {
    let pc = p_atm - p;
    -wrm.d_k_relative(wrm.saturation(pc)) * wrm.d_saturation(pc)
}

fn saturation_evaluator(wrm: Arc<VanGenuchten>, pressure: &str) -> Evaluator {
    let (value_wrm, vp) = (wrm.clone(), pressure.to_string());
    let p_key = pressure.to_string();
    Evaluator::secondary(&[SATURATION], &[pressure], move |ctx, out| {
        let p_atm = ctx.scalar("atmospheric_pressure");
        let p = ctx.field(&vp).component(Entity::Cell);
        for (s, &p) in out[0].component_mut(Entity::Cell).iter_mut().zip(p.iter()) {
            *s = value_wrm.saturation(p_atm - p);
        }
    })
    .with_derivative(move |ctx, _, _, out| {
        let p_atm = ctx.scalar("atmospheric_pressure");
        let p = ctx.field(&p_key).component(Entity::Cell);
        for (ds, &p) in out.component_mut(Entity::Cell).iter_mut().zip(p.iter()) {
            *ds = -wrm.d_saturation(p_atm - p);
        }
    })
}

fn water_content_evaluator(key: &str, pressure: &str, wrm: Arc<VanGenuchten>, eos: Arc<LinearEos>) -> Evaluator {
    let p_key = pressure.to_string();
    Evaluator::secondary(
        &[key],
        &[POROSITY, MOLAR_DENSITY, SATURATION, pressure, TEMPERATURE],
        |ctx, out| {
            let phi = ctx.field(POROSITY).component(Entity::Cell);
            let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
            let s = ctx.field(SATURATION).component(Entity::Cell);
            let wc = out[0].component_mut(Entity::Cell);
            for (c, cell) in ctx.mesh.cells.iter().enumerate() {
                wc[c] = phi[c] * n[c] * s[c] * cell.volume;
            }
        },
    )
    .with_derivative(move |ctx, _, wrt, out| {
        let p_atm = ctx.scalar("atmospheric_pressure");
        let phi = ctx.field(POROSITY).component(Entity::Cell);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let s = ctx.field(SATURATION).component(Entity::Cell);
        let p = ctx.field(&p_key).component(Entity::Cell);
        let t = ctx.field(TEMPERATURE).component(Entity::Cell);
        let d = out.component_mut(Entity::Cell);
        for (c, cell) in ctx.mesh.cells.iter().enumerate() {
            let v = cell.volume;
            d[c] = match wrt {
                POROSITY => n[c] * s[c] * v,
                MOLAR_DENSITY => phi[c] * s[c] * v,
                SATURATION => phi[c] * n[c] * v,
                TEMPERATURE => phi[c] * s[c] * eos.d_molar_density_dt(t[c], p[c]) * v,
                _ => {
                    let ds = -wrm.d_saturation(p_atm - p[c]);
                    let dn = eos.d_molar_density_dp(t[c], p[c]);
                    phi[c] * v * (s[c] * dn + n[c] * ds)
                }
            };
        }
    })
}

/// `kr n / mu` scaled, on cells and boundary faces. Boundary faces use the
/// face pressure and the density of their cell.
fn rel_perm_evaluator(key: &str, pressure: &str, wrm: Arc<VanGenuchten>, scale: f64) -> Evaluator {
    let (value_wrm, vp) = (wrm.clone(), pressure.to_string());
    let p_key = pressure.to_string();
    Evaluator::secondary(&[key], &[pressure, MOLAR_DENSITY], move |ctx, out| {
        let p_atm = ctx.scalar("atmospheric_pressure");
        let u = ctx.field(&vp);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let (pc, pf) = (u.component(Entity::Cell), u.component(Entity::Face));
        let kc = out[0].component_mut(Entity::Cell);
        for c in 0..kc.len() {
            kc[c] = k_relative_at(&value_wrm, p_atm, pc[c]) * n[c] * scale;
        }
        let kb = out[0].component_mut(Entity::BoundaryFace);
        for (bf, &f) in ctx.mesh.boundary_faces().iter().enumerate() {
            let c = ctx.mesh.faces[f].neighbor_cell_ids.0;
            kb[bf] = k_relative_at(&value_wrm, p_atm, pf[f]) * n[c] * scale;
        }
    })
    .with_derivative(move |ctx, _, wrt, out| {
        let p_atm = ctx.scalar("atmospheric_pressure");
        let u = ctx.field(&p_key);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let (pc, pf) = (u.component(Entity::Cell), u.component(Entity::Face));
        let by_density = wrt == MOLAR_DENSITY;
        let dk = |p: f64, n: f64| {
            if by_density {
                k_relative_at(&wrm, p_atm, p) * scale
            } else {
                d_k_relative_at(&wrm, p_atm, p) * n * scale
            }
        };
        let dc = out.component_mut(Entity::Cell);
        for c in 0..dc.len() {
            dc[c] = dk(pc[c], n[c]);
        }
        let db = out.component_mut(Entity::BoundaryFace);
        for (bf, &f) in ctx.mesh.boundary_faces().iter().enumerate() {
            db[bf] = dk(pf[f], n[ctx.mesh.faces[f].neighbor_cell_ids.0]);
        }
    })
}

fn build_state(
    mesh: &Arc<Mesh>,
    keys: &PkKeys,
    params: &RichardsParams,
    wrm: &Arc<VanGenuchten>,
    eos: &Arc<LinearEos>,
    rel_perm_scale: f64,
    source: Option<Evaluator>,
) -> Result<State, ConfigError> {
    let cells = CompositeVector::cells(mesh);
    let cells_and_faces = CompositeVector::cells_and_faces(mesh);
    let faces = CompositeVector::faces(mesh);
    let p = keys.primary.as_str();

    let mut state = State::new(mesh.clone());
    state.require_evaluator(Evaluator::primary(p), cells_and_faces.clone())?;
    state.require_evaluator(Evaluator::primary(TEMPERATURE), cells_and_faces)?;
    state.require_evaluator(Evaluator::constant(POROSITY, params.porosity), cells.clone())?;
    state.require_evaluator(liquid_density(eos.clone(), TEMPERATURE, p), cells.clone())?;
    state.require_evaluator(saturation_evaluator(wrm.clone(), p), cells.clone())?;
    state.require_evaluator(
        water_content_evaluator(&keys.conserved, p, wrm.clone(), eos.clone()),
        cells.clone(),
    )?;
    state.require_evaluator(
        rel_perm_evaluator(&keys.cell_coefficient, p, wrm.clone(), rel_perm_scale),
        CompositeVector::cells_and_boundary(mesh),
    )?;
    for key in [&keys.face_coefficient, &keys.flux] {
        state.require_evaluator(Evaluator::primary(key), faces.clone())?;
    }
    if let Some(key) = &keys.flux_direction {
        state.require_evaluator(Evaluator::primary(key), faces.clone())?;
    }
    if let Some(key) = &keys.coupling {
        state.require_evaluator(Evaluator::primary(key), faces.clone())?;
    }
    if let Some(source) = source {
        state.require_evaluator(source, cells)?;
    }
    state.finalize()?;
    state.primary_mut(TEMPERATURE).put_scalar(params.temperature);
    Ok(state)
}

/// Resolve the source key against the evaluator supplied for it.
pub(crate) fn source_key(
    configured: &Option<String>,
    source: Option<&Evaluator>,
) -> Result<Option<String>, ConfigError> {
    match (source, configured) {
        (Some(ev), Some(key)) if &ev.keys[0] != key => Err(ConfigError::invalid(
            "source_key",
            key,
            &format!("the supplied source evaluator computes '{}'", ev.keys[0]),
        )),
        (Some(ev), _) => Ok(Some(ev.keys[0].clone())),
        (None, Some(key)) => Err(ConfigError::Missing(format!("source evaluator for '{key}'"))),
        (None, None) => Ok(None),
    }
}

/// Flow process kernel.
pub struct RichardsPk {
    core: PkCore,
    wrm: Arc<VanGenuchten>,
    viscosity: f64,
}

impl RichardsPk {
    /// Set up the kernel on `mesh` with one absolute permeability tensor per
    /// cell. `source`, when given, must compute volume-integrated moles per
    /// second on cells.
    pub fn new(
        mesh: Arc<Mesh>,
        config: PkConfig,
        params: RichardsParams,
        permeability: &[Matrix3<f64>],
        source: Option<Evaluator>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(params.viscosity > 0.0) {
            return Err(ConfigError::invalid("viscosity", params.viscosity, "must be positive"));
        }
        if !(0.0..=1.0).contains(&params.porosity) {
            return Err(ConfigError::invalid("porosity", params.porosity, "must lie in [0, 1]"));
        }
        let wrm = Arc::new(VanGenuchten::new(&params.water_retention)?);
        let eos = Arc::new(LinearEos::new(params.eos.clone()));

        let coupling = config.coupling()?;
        let keys = PkKeys {
            primary: key_or(&config.primary_key, PRESSURE),
            conserved: key_or(&config.conserved_key, WATER_CONTENT),
            cell_coefficient: key_or(&config.conductivity_key, REL_PERM),
            face_coefficient: UPWINDED_REL_PERM.to_string(),
            flux: DARCY_FLUX.to_string(),
            flux_direction: Some(DARCY_FLUX_DIRECTION.to_string()),
            density: Some(MASS_DENSITY.to_string()),
            source: source_key(&config.source_key, source.as_ref())?,
            coupling: match coupling {
                CouplingMode::ViaHead => Some(SURFACE_PRESSURE.to_string()),
                CouplingMode::ViaFlux => Some(SURFACE_FLUX.to_string()),
                CouplingMode::None => None,
            },
            temperature: Some(TEMPERATURE.to_string()),
        };

        let rescale = config.permeability_rescaling;
        let mut state = build_state(&mesh, &keys, &params, &wrm, &eos, rescale / params.viscosity, source)?;
        if coupling == CouplingMode::ViaHead {
            state
                .primary_mut(SURFACE_PRESSURE)
                .put_scalar(config.atmospheric_pressure);
        }

        let defaults = PkDefaults {
            upwind: UpwindMethod::TotalFlux {
                tolerance: config.flux_tolerance,
            },
            error_norm: ErrorNormParams::richards(),
            admissible_min: -1e9,
            admissible_max: 1e8,
            tensor_scale: rescale,
        };
        let tensors: Vec<Matrix3<f64>> = permeability.iter().map(|k| k / rescale).collect();
        let mut core = PkCore::new("richards", keys, config, state, &tensors, comm, defaults)?;
        if coupling == CouplingMode::ViaHead && core.update_flux != UpdateFluxMode::Iteration {
            log::info!("richards: coupling via head forces flux updates every iteration");
            core.update_flux = UpdateFluxMode::Iteration;
        }

        Ok(Self {
            core,
            wrm,
            viscosity: params.viscosity,
        })
    }

    pub fn core(&self) -> &PkCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut PkCore {
        &mut self.core
    }

    /// Boundary data sources; composed anew on every evaluation.
    pub fn boundary_conditions_mut(&mut self) -> &mut BoundaryConditionComposer {
        &mut self.core.composer
    }

    pub fn initialize(&mut self, t0: f64, u0: &CompositeVector) {
        self.core.initialize(t0, u0);
        log::info!(
            "richards: initialized {} cells at t = {t0:.6e}",
            self.core.mesh().num_cells()
        );
    }

    pub fn solution(&self) -> &CompositeVector {
        self.core.solution()
    }

    /// Darcy flux of the new level as last written, moles per second.
    pub fn darcy_flux(&self) -> &DVector<f64> {
        self.core.new.field(DARCY_FLUX).component(Entity::Face)
    }

    pub fn saturation(&mut self) -> DVector<f64> {
        self.core.new.has_changed(SATURATION, "richards:output");
        self.core.new.field(SATURATION).component(Entity::Cell).clone()
    }

    pub fn water_content(&mut self) -> DVector<f64> {
        let key = self.core.keys.conserved.clone();
        self.core.new.has_changed(&key, "richards:output");
        self.core.new.field(&key).component(Entity::Cell).clone()
    }

    /// Newton-solve the face pressure of every prescribed-flux face so the
    /// nonlinear flux matches the prescribed one.
    fn predict_flux_bc_faces(&mut self, u: &mut CompositeVector) -> bool {
        self.core.solution_to_state(u);
        self.core.update_boundary_conditions();
        self.core.setup_diffusion();

        let p_atm = self.core.config.atmospheric_pressure;
        let scale = self.core.config.permeability_rescaling / self.viscosity;
        self.core.new.has_changed(MOLAR_DENSITY, "richards:predictor");
        let n = self.core.new.field(MOLAR_DENSITY).component(Entity::Cell).clone();
        let mesh = self.core.mesh().clone();
        let wrm = &self.wrm;

        let changed = FluxBcPredictor::default().modify(self.core.diffusion(), self.core.bc(), u, |f, p| {
            let k = n[mesh.faces[f].neighbor_cell_ids.0] * scale;
            (k * k_relative_at(wrm, p_atm, p), k * d_k_relative_at(wrm, p_atm, p))
        });
        if changed {
            self.core.solution_to_state(u);
        }
        changed
    }

    /// Replace face pressures by those consistent with the cell pressures.
    fn predict_consistent_faces(&mut self, u: &mut CompositeVector) -> bool {
        let mesh = self.core.mesh().clone();
        average_cells_to_faces(&mesh, u);
        self.core.solution_to_state(u);
        self.core.update_face_coefficient();
        self.core.composer.divide_flux_by_coefficient = true;
        self.core.update_boundary_conditions();
        self.core.composer.divide_flux_by_coefficient = false;
        self.core.setup_unit_diffusion();

        let solver = self.core.config.linear_solver.clone();
        match consistent_faces(self.core.diffusion(), u, &solver) {
            Ok(()) => {
                self.core.solution_to_state(u);
                true
            }
            Err(err) => {
                log::warn!("richards: consistent-face predictor failed: {err}");
                false
            }
        }
    }
}

impl BdfFunctional for RichardsPk {
    fn modify_predictor(&mut self, _h: f64, _u_old: &CompositeVector, u: &mut CompositeVector) -> bool {
        let config = &self.core.config;
        let flux_bcs = config.modify_predictor_for_flux_bcs
            || (config.modify_predictor_for_initial_flux_bcs && self.core.new.cycle() == 0);
        let faces = config.modify_predictor_with_consistent_faces;

        let mut changed = false;
        if flux_bcs {
            changed |= self.predict_flux_bc_faces(u);
        }
        if faces {
            changed |= self.predict_consistent_faces(u);
        }
        changed
    }

    fn residual(
        &mut self,
        t_old: f64,
        t_new: f64,
        _u_old: &CompositeVector,
        u_new: &CompositeVector,
    ) -> CompositeVector {
        self.core.standard_residual(t_old, t_new, u_new)
    }

    fn update_preconditioner(&mut self, t: f64, u: &CompositeVector, h: f64) {
        self.core.update_preconditioner(t, u, h);
    }

    fn apply_preconditioner(&self, r: &CompositeVector) -> Result<CompositeVector, SolveError> {
        self.core.apply_preconditioner(r)
    }

    fn error_norm(&mut self, _u: &CompositeVector, du: &CompositeVector) -> f64 {
        self.core.error_norm(du)
    }

    fn is_admissible(&mut self, u: &CompositeVector) -> AdmissibilityReport {
        self.core.admissibility(u)
    }

    fn changed_solution(&mut self) {
        self.core.changed_solution();
    }

    fn commit_state(&mut self, h: f64) {
        self.core.commit_state(h);
    }

    fn calculate_diagnostics(&mut self) {
        self.core.calculate_diagnostics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::comm::SerialComm;
    use crate::discretization::generator::create_column_mesh;
    use crate::physics::bc::{BoundarySelector, Normal, Point};
    use crate::physics::composer::BcKind;
    use approx::assert_relative_eq;

    fn column(n: usize, config: PkConfig) -> RichardsPk {
        let mesh = Arc::new(create_column_mesh(n, n as f64));
        let perm = vec![Matrix3::identity() * 1e-12; n];
        RichardsPk::new(mesh, config, RichardsParams::default(), &perm, None, Arc::new(SerialComm)).unwrap()
    }

    fn hydrostatic(pk: &RichardsPk, water_table: f64) -> CompositeVector {
        hydrostatic_pressure(pk.core().mesh(), water_table, 1000.0, 9.80665, 101325.0)
    }

    #[test]
    fn hydrostatic_column_has_zero_residual() {
        let mut pk = column(5, PkConfig::default());
        let u = hydrostatic(&pk, -2.0);
        pk.initialize(0.0, &u);
        let g = pk.residual(0.0, 10.0, &u, &u);
        let scale = pk.core().diffusion().local_matrices()[0].matrix[(0, 0)] * 1e5;
        assert!(g.norm_inf() < 1e-9 * scale, "residual {}", g.norm_inf());
    }

    #[test]
    fn darcy_upwinding_takes_the_upstream_cell() {
        for rescale in [1.0, 1e7] {
            let config = PkConfig {
                permeability_rescaling: rescale,
                ..Default::default()
            };
            let tolerance = config.flux_tolerance;
            let mut pk = column(2, config);
            let mut u = hydrostatic(&pk, -0.5);
            u.component_mut(Entity::Cell)[0] -= 5e4;
            pk.initialize(0.0, &u);
            pk.residual(0.0, 10.0, &u, &u);

            let mesh = pk.core().mesh().clone();
            let f = mesh
                .faces
                .iter()
                .position(|face| face.neighbor_cell_ids.1.is_some())
                .unwrap();
            let (c0, c1) = (
                mesh.faces[f].neighbor_cell_ids.0,
                mesh.faces[f].neighbor_cell_ids.1.unwrap(),
            );
            let p = u.component(Entity::Cell);
            let head = |c: usize| p[c] + 1000.0 * 9.80665 * mesh.cells[c].centroid[2];
            let upstream = if head(c0) > head(c1) { c0 } else { c1 };

            let direction = pk.core().new.field(DARCY_FLUX_DIRECTION).component(Entity::Face)[f];
            assert!(direction.abs() > 10.0 * tolerance, "direction {direction:e}");
            let kr = pk.core().new.field(REL_PERM).component(Entity::Cell);
            assert!((kr[c0] - kr[c1]).abs() > 1e-3 * kr[upstream]);
            let face = pk.core().new.field(UPWINDED_REL_PERM).component(Entity::Face)[f];
            assert_relative_eq!(face, kr[upstream], max_relative = 1e-12);
        }
    }

    #[test]
    fn flux_direction_follows_time_dependent_boundary_data() {
        let build = || {
            let mut pk = column(3, PkConfig::default());
            pk.boundary_conditions_mut().dirichlet.add(
                BoundarySelector::label("surface"),
                |t: f64, _: Point, _: Normal| 101325.0 + 2e3 * t,
            );
            pk
        };
        let mut fresh = build();
        let u = hydrostatic(&fresh, -1.0);
        fresh.initialize(0.0, &u);
        fresh.residual(0.0, 10.0, &u, &u);

        // same iterate, only the boundary data moves on
        let mut stepped = build();
        stepped.initialize(0.0, &u);
        stepped.residual(0.0, 5.0, &u, &u);
        let early = stepped.core().new.field(DARCY_FLUX_DIRECTION).clone();
        stepped.residual(5.0, 10.0, &u, &u);

        let late = stepped.core().new.field(DARCY_FLUX_DIRECTION);
        assert_eq!(fresh.core().bc(), stepped.core().bc());
        assert_eq!(fresh.core().new.field(DARCY_FLUX_DIRECTION), late);
        assert_ne!(&early, late);
    }

    #[test]
    fn preconditioner_composes_boundary_data_at_its_own_time() {
        let mut pk = column(2, PkConfig::default());
        pk.boundary_conditions_mut().dirichlet.add(
            BoundarySelector::label("surface"),
            |t: f64, _: Point, _: Normal| 101325.0 + 2e3 * t,
        );
        let u = hydrostatic(&pk, -1.0);
        pk.initialize(0.0, &u);
        pk.residual(0.0, 5.0, &u, &u);

        pk.update_preconditioner(10.0, &u, 10.0);
        let top = pk.core().mesh().faces_with_label("surface").next().unwrap();
        assert_eq!(pk.core().new.time(), 10.0);
        assert_eq!(pk.core().bc().get(top), (BcKind::Dirichlet, 101325.0 + 2e4));
    }

    #[test]
    fn water_content_derivative_matches_finite_difference() {
        let mut pk = column(1, PkConfig::default());
        let mut u = hydrostatic(&pk, -3.0);
        pk.initialize(0.0, &u);
        let p0 = u.component(Entity::Cell)[0];
        let wc0 = pk.water_content()[0];
        pk.core_mut().new.has_derivative_changed(WATER_CONTENT, "test", PRESSURE);
        let dwc = pk.core().new.field("dwater_content_dpressure").component(Entity::Cell)[0];

        let eps = 1.0;
        u.component_mut(Entity::Cell)[0] = p0 + eps;
        pk.core_mut().solution_to_state(&u);
        let wc1 = pk.water_content()[0];
        assert_relative_eq!(dwc, (wc1 - wc0) / eps, max_relative = 1e-4);
    }

    #[test]
    fn mismatched_source_key_is_rejected() {
        let mesh = Arc::new(create_column_mesh(2, 2.0));
        let config = PkConfig {
            source_key: Some("mass_source".into()),
            ..Default::default()
        };
        let source = Evaluator::constant("other_source", 0.0);
        let err = RichardsPk::new(
            mesh,
            config,
            RichardsParams::default(),
            &[Matrix3::identity(); 2],
            Some(source),
            Arc::new(SerialComm),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("source_key"));
    }

    #[test]
    fn head_coupling_forces_iteration_flux_updates() {
        let config = PkConfig {
            coupled_to_surface_via_head: true,
            update_flux_mode: "vis".into(),
            ..Default::default()
        };
        let pk = column(3, config);
        assert_eq!(pk.core().update_flux, UpdateFluxMode::Iteration);
        assert_eq!(pk.core().coupled_faces().len(), 1);
    }
}
