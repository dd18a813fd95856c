//! Energy transport in a liquid-saturated or partially saturated porous
//! medium: conduction, storage in liquid and rock, and advection of liquid
//! enthalpy by a prescribed mass flux.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use serde::{Deserialize, Serialize};

use super::richards::source_key;
use super::{key_or, liquid_density, MOLAR_DENSITY, POROSITY, SATURATION};
use crate::closure::eos::{EosParams, LinearEos};
use crate::closure::iem::LinearIem;
use crate::closure::EquationOfState;
use crate::config::{ErrorNormParams, PkConfig};
use crate::discretization::comm::Communicator;
use crate::discretization::mesh::Mesh;
use crate::error::{ConfigError, SolveError};
use crate::operators::advection::AdvectionOperator;
use crate::operators::upwind::UpwindMethod;
use crate::physics::composer::{BoundaryConditionComposer, CouplingMode};
use crate::physics::pk::{PkCore, PkDefaults, PkKeys};
use crate::physics::preconditioner::{AccumulationMask, AssemblyMode, PreconditionerBuilder};
use crate::physics::{AdmissibilityReport, BdfFunctional};
use crate::state::composite::{CompositeVector, Entity};
use crate::state::evaluator::Evaluator;
use crate::state::State;

pub const TEMPERATURE: &str = "temperature";
pub const PRESSURE: &str = "pressure";
pub const ENERGY: &str = "energy";
pub const INTERNAL_ENERGY: &str = "internal_energy_liquid";
pub const ENTHALPY: &str = "enthalpy_liquid";
pub const CONDUCTIVITY: &str = "thermal_conductivity";
pub const UPWINDED_CONDUCTIVITY: &str = "upwinded_thermal_conductivity";
pub const DIFFUSIVE_FLUX: &str = "diffusive_energy_flux";
/// Liquid flux on faces, moles per second along the face normal.
pub const MASS_FLUX: &str = "mass_flux";
/// Cell field masking the accumulation derivative when coupled to a surface.
pub const SURFACE_PRESSURE: &str = "surface_pressure";
/// Face field written by a surface coupled through its temperature.
pub const SURFACE_TEMPERATURE: &str = "surface_temperature";
/// Face field written by a surface coupled through its energy exchange flux.
pub const SURFACE_ENERGY_FLUX: &str = "surface_subsurface_energy_flux";

pub const ADVECTED_SOURCE: &str = "advected_energy_source";
/// Volumetric liquid source rate [1/s]; positive injects.
pub const MASS_SOURCE: &str = "mass_source";
pub const SOURCE_MOLAR_DENSITY: &str = "source_molar_density";
pub const SOURCE_ENTHALPY: &str = "mass_source_enthalpy";
/// Conducted energy source per volume [W/m^3].
pub const CONDUCTED_SOURCE: &str = "conducted_energy_source";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyParams {
    #[serde(default)]
    pub eos: EosParams,
    #[serde(default)]
    pub liquid_internal_energy: LinearIem,
    /// Rock internal energy per unit mass.
    #[serde(default = "default_rock_iem")]
    pub rock_internal_energy: LinearIem,
    #[serde(default = "default_rock_density")]
    pub rock_density: f64,
    #[serde(default = "default_porosity")]
    pub porosity: f64,
    #[serde(default = "default_liquid_conductivity")]
    pub liquid_conductivity: f64,
    #[serde(default = "default_rock_conductivity")]
    pub rock_conductivity: f64,
    /// Initial liquid saturation until a flow solution is pushed.
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    /// Build the advected energy source from the mass source fields.
    #[serde(default)]
    pub advected_source: bool,
    /// Add the conducted energy source to the advected one.
    #[serde(default)]
    pub conducted_source: bool,
}

fn default_rock_iem() -> LinearIem {
    LinearIem::new(830.0)
}
fn default_rock_density() -> f64 {
    2650.0
}
fn default_porosity() -> f64 {
    0.25
}
fn default_liquid_conductivity() -> f64 {
    0.6
}
fn default_rock_conductivity() -> f64 {
    2.0
}
fn default_saturation() -> f64 {
    1.0
}

impl Default for EnergyParams {
    fn default() -> Self {
        Self {
            eos: EosParams::default(),
            liquid_internal_energy: LinearIem::default(),
            rock_internal_energy: default_rock_iem(),
            rock_density: default_rock_density(),
            porosity: default_porosity(),
            liquid_conductivity: default_liquid_conductivity(),
            rock_conductivity: default_rock_conductivity(),
            saturation: default_saturation(),
            advected_source: false,
            conducted_source: false,
        }
    }
}

fn internal_energy_evaluator(temperature: &str, iem: LinearIem) -> Evaluator {
    let (vt, t_key) = (temperature.to_string(), temperature.to_string());
    Evaluator::secondary(&[INTERNAL_ENERGY], &[temperature], move |ctx, out| {
        let t = ctx.field(&vt).component(Entity::Cell);
        for (u, &t) in out[0].component_mut(Entity::Cell).iter_mut().zip(t.iter()) {
            *u = iem.internal_energy(t);
        }
    })
    .with_derivative(move |ctx, _, _, out| {
        let t = ctx.field(&t_key).component(Entity::Cell);
        for (du, &t) in out.component_mut(Entity::Cell).iter_mut().zip(t.iter()) {
            *du = iem.d_internal_energy_dt(t);
        }
    })
}

/// `E = V [phi s n u + (1 - phi) rho_r u_r(T)]`.
fn energy_evaluator(key: &str, temperature: &str, params: &EnergyParams, eos: Arc<LinearEos>) -> Evaluator {
    let (rock, rho_r) = (params.rock_internal_energy, params.rock_density);
    let (vt, t_key) = (temperature.to_string(), temperature.to_string());
    let liquid = params.liquid_internal_energy;
    Evaluator::secondary(
        &[key],
        &[POROSITY, SATURATION, MOLAR_DENSITY, INTERNAL_ENERGY, PRESSURE, temperature],
        move |ctx, out| {
            let phi = ctx.field(POROSITY).component(Entity::Cell);
            let s = ctx.field(SATURATION).component(Entity::Cell);
            let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
            let u = ctx.field(INTERNAL_ENERGY).component(Entity::Cell);
            let t = ctx.field(&vt).component(Entity::Cell);
            let e = out[0].component_mut(Entity::Cell);
            for (c, cell) in ctx.mesh.cells.iter().enumerate() {
                e[c] = cell.volume
                    * (phi[c] * s[c] * n[c] * u[c] + (1.0 - phi[c]) * rho_r * rock.internal_energy(t[c]));
            }
        },
    )
    .with_derivative(move |ctx, _, wrt, out| {
        let phi = ctx.field(POROSITY).component(Entity::Cell);
        let s = ctx.field(SATURATION).component(Entity::Cell);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let u = ctx.field(INTERNAL_ENERGY).component(Entity::Cell);
        let p = ctx.field(PRESSURE).component(Entity::Cell);
        let t = ctx.field(&t_key).component(Entity::Cell);
        let d = out.component_mut(Entity::Cell);
        for (c, cell) in ctx.mesh.cells.iter().enumerate() {
            d[c] = cell.volume
                * match wrt {
                    POROSITY => s[c] * n[c] * u[c] - rho_r * rock.internal_energy(t[c]),
                    SATURATION => phi[c] * n[c] * u[c],
                    MOLAR_DENSITY => phi[c] * s[c] * u[c],
                    INTERNAL_ENERGY => phi[c] * s[c] * n[c],
                    PRESSURE => phi[c] * s[c] * u[c] * eos.d_molar_density_dp(t[c], p[c]),
                    _ => {
                        let dn = eos.d_molar_density_dt(t[c], p[c]);
                        let du = liquid.d_internal_energy_dt(t[c]);
                        phi[c] * s[c] * (dn * u[c] + n[c] * du)
                            + (1.0 - phi[c]) * rho_r * rock.d_internal_energy_dt(t[c])
                    }
                };
        }
    })
}

/// `h = u + p / n`.
fn enthalpy_evaluator() -> Evaluator {
    Evaluator::secondary(&[ENTHALPY], &[INTERNAL_ENERGY, PRESSURE, MOLAR_DENSITY], |ctx, out| {
        let u = ctx.field(INTERNAL_ENERGY).component(Entity::Cell);
        let p = ctx.field(PRESSURE).component(Entity::Cell);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let h = out[0].component_mut(Entity::Cell);
        for c in 0..h.len() {
            h[c] = u[c] + p[c] / n[c];
        }
    })
}

/// Volume-weighted mixture of liquid and rock conductivity.
fn conductivity_evaluator(key: &str, k_liquid: f64, k_rock: f64) -> Evaluator {
    Evaluator::secondary(&[key], &[POROSITY, SATURATION], move |ctx, out| {
        let phi = ctx.field(POROSITY).component(Entity::Cell);
        let s = ctx.field(SATURATION).component(Entity::Cell);
        let k = out[0].component_mut(Entity::Cell);
        for c in 0..k.len() {
            k[c] = phi[c] * s[c] * k_liquid + (1.0 - phi[c]) * k_rock;
        }
    })
}

/// Energy carried by a liquid source, `Q = V m n h`, with the upstream
/// density and enthalpy: external ones for injection, the cell's for
/// extraction. Its derivative is taken as zero.
fn advected_source_evaluator(with_conduction: bool) -> Evaluator {
    let mut deps = vec![MASS_SOURCE, SOURCE_MOLAR_DENSITY, SOURCE_ENTHALPY, ENTHALPY, MOLAR_DENSITY];
    if with_conduction {
        deps.push(CONDUCTED_SOURCE);
    }
    Evaluator::secondary(&[ADVECTED_SOURCE], &deps, move |ctx, out| {
        let m = ctx.field(MASS_SOURCE).component(Entity::Cell);
        let n_ext = ctx.field(SOURCE_MOLAR_DENSITY).component(Entity::Cell);
        let h_ext = ctx.field(SOURCE_ENTHALPY).component(Entity::Cell);
        let n = ctx.field(MOLAR_DENSITY).component(Entity::Cell);
        let h = ctx.field(ENTHALPY).component(Entity::Cell);
        let conducted = with_conduction.then(|| ctx.field(CONDUCTED_SOURCE).component(Entity::Cell));
        let q = out[0].component_mut(Entity::Cell);
        for (c, cell) in ctx.mesh.cells.iter().enumerate() {
            let (n_up, h_up) = if m[c] > 0.0 {
                (n_ext[c], h_ext[c])
            } else {
                (n[c], h[c])
            };
            q[c] = cell.volume * (m[c] * n_up * h_up + conducted.map_or(0.0, |k| k[c]));
        }
    })
    .with_derivative(|_, _, _, out| out.put_scalar(0.0))
}

fn build_state(
    mesh: &Arc<Mesh>,
    keys: &PkKeys,
    params: &EnergyParams,
    eos: &Arc<LinearEos>,
    p_atm: f64,
    source: Option<Evaluator>,
) -> Result<State, ConfigError> {
    let cells = CompositeVector::cells(mesh);
    let faces = CompositeVector::faces(mesh);
    let t = keys.primary.as_str();

    let mut state = State::new(mesh.clone());
    state.require_evaluator(Evaluator::primary(t), CompositeVector::cells_and_faces(mesh))?;
    state.require_evaluator(Evaluator::primary(PRESSURE), cells.clone())?;
    state.require_evaluator(Evaluator::primary(SATURATION), cells.clone())?;
    state.require_evaluator(Evaluator::primary(MASS_FLUX), faces.clone())?;
    state.require_evaluator(Evaluator::constant(POROSITY, params.porosity), cells.clone())?;
    state.require_evaluator(liquid_density(eos.clone(), t, PRESSURE), cells.clone())?;
    state.require_evaluator(internal_energy_evaluator(t, params.liquid_internal_energy), cells.clone())?;
    state.require_evaluator(energy_evaluator(&keys.conserved, t, params, eos.clone()), cells.clone())?;
    state.require_evaluator(enthalpy_evaluator(), cells.clone())?;
    state.require_evaluator(
        conductivity_evaluator(&keys.cell_coefficient, params.liquid_conductivity, params.rock_conductivity),
        cells.clone(),
    )?;
    for key in [&keys.face_coefficient, &keys.flux] {
        state.require_evaluator(Evaluator::primary(key), faces.clone())?;
    }
    if let Some(key) = &keys.coupling {
        state.require_evaluator(Evaluator::primary(key), faces.clone())?;
        state.require_evaluator(Evaluator::primary(SURFACE_PRESSURE), cells.clone())?;
    }
    if params.advected_source {
        for key in [MASS_SOURCE, SOURCE_MOLAR_DENSITY, SOURCE_ENTHALPY] {
            state.require_evaluator(Evaluator::primary(key), cells.clone())?;
        }
        if params.conducted_source {
            state.require_evaluator(Evaluator::primary(CONDUCTED_SOURCE), cells.clone())?;
        }
        state.require_evaluator(advected_source_evaluator(params.conducted_source), cells.clone())?;
    }
    if let Some(source) = source {
        state.require_evaluator(source, cells)?;
    }
    state.finalize()?;

    state.primary_mut(PRESSURE).put_scalar(p_atm);
    state.primary_mut(SATURATION).put_scalar(params.saturation);
    if keys.coupling.is_some() {
        state.primary_mut(SURFACE_PRESSURE).put_scalar(p_atm);
    }
    Ok(state)
}

/// Energy process kernel.
pub struct EnergyPk {
    core: PkCore,
    advection: AdvectionOperator,
    liquid: LinearIem,
}

impl EnergyPk {
    /// Set up the kernel on `mesh`; conductivities are isotropic. `source`,
    /// when given, must compute volume-integrated watts on cells and cannot
    /// be combined with the advected source.
    pub fn new(
        mesh: Arc<Mesh>,
        config: PkConfig,
        params: EnergyParams,
        source: Option<Evaluator>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if !(0.0..=1.0).contains(&params.porosity) {
            return Err(ConfigError::invalid("porosity", params.porosity, "must lie in [0, 1]"));
        }
        if params.conducted_source && !params.advected_source {
            return Err(ConfigError::invalid(
                "conducted_source",
                true,
                "requires 'advected_source'",
            ));
        }
        let eos = Arc::new(LinearEos::new(params.eos.clone()));

        let coupling = config.coupling()?;
        let source_key = if params.advected_source {
            if source.is_some() {
                return Err(ConfigError::invalid(
                    "advected_source",
                    true,
                    "an explicit source evaluator was also supplied",
                ));
            }
            Some(ADVECTED_SOURCE.to_string())
        } else {
            source_key(&config.source_key, source.as_ref())?
        };
        let keys = PkKeys {
            primary: key_or(&config.primary_key, TEMPERATURE),
            conserved: key_or(&config.conserved_key, ENERGY),
            cell_coefficient: key_or(&config.conductivity_key, CONDUCTIVITY),
            face_coefficient: UPWINDED_CONDUCTIVITY.to_string(),
            flux: DIFFUSIVE_FLUX.to_string(),
            flux_direction: None,
            density: None,
            source: source_key,
            coupling: match coupling {
                CouplingMode::ViaHead => Some(SURFACE_TEMPERATURE.to_string()),
                CouplingMode::ViaFlux => Some(SURFACE_ENERGY_FLUX.to_string()),
                CouplingMode::None => None,
            },
            temperature: Some(key_or(&config.primary_key, TEMPERATURE)),
        };

        let state = build_state(&mesh, &keys, &params, &eos, config.atmospheric_pressure, source)?;
        let tensors = vec![Matrix3::identity(); mesh.num_cells()];
        let defaults = PkDefaults {
            upwind: UpwindMethod::ArithmeticMean,
            error_norm: ErrorNormParams::energy(),
            admissible_min: 200.0,
            admissible_max: 300.0,
            tensor_scale: 1.0,
        };
        let mut core = PkCore::new("energy", keys, config, state, &tensors, comm, defaults)?;

        if coupling.is_coupled() {
            let mask = AccumulationMask {
                key: SURFACE_PRESSURE.to_string(),
                threshold: core.config.atmospheric_pressure,
            };
            let preconditioner = PreconditionerBuilder::new(
                mesh.clone(),
                &tensors,
                Box::new(core.config.linear_solver.clone()),
                AssemblyMode::Global,
                "energy:preconditioner",
            )
            .with_mask(mask);
            core = core.with_preconditioner(preconditioner);
        }

        Ok(Self {
            core,
            advection: AdvectionOperator::new(mesh),
            liquid: params.liquid_internal_energy,
        })
    }

    pub fn core(&self) -> &PkCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut PkCore {
        &mut self.core
    }

    pub fn boundary_conditions_mut(&mut self) -> &mut BoundaryConditionComposer {
        &mut self.core.composer
    }

    pub fn initialize(&mut self, t0: f64, u0: &CompositeVector) {
        self.core.initialize(t0, u0);
        log::info!(
            "energy: initialized {} cells at t = {t0:.6e}",
            self.core.mesh().num_cells()
        );
    }

    pub fn solution(&self) -> &CompositeVector {
        self.core.solution()
    }

    /// Push the flow solution of the new level: cell pressure and
    /// saturation, and the liquid flux on faces.
    pub fn set_flow_state(&mut self, pressure: &DVector<f64>, saturation: &DVector<f64>, mass_flux: &DVector<f64>) {
        let new = &mut self.core.new;
        new.primary_mut(PRESSURE).component_mut(Entity::Cell).copy_from(pressure);
        new.primary_mut(SATURATION).component_mut(Entity::Cell).copy_from(saturation);
        new.primary_mut(MASS_FLUX).component_mut(Entity::Face).copy_from(mass_flux);
    }

    /// Liquid source rate with the density and enthalpy it enters with.
    pub fn set_mass_source(&mut self, rate: &DVector<f64>, molar_density: &DVector<f64>, enthalpy: &DVector<f64>) {
        let new = &mut self.core.new;
        new.primary_mut(MASS_SOURCE).component_mut(Entity::Cell).copy_from(rate);
        new.primary_mut(SOURCE_MOLAR_DENSITY)
            .component_mut(Entity::Cell)
            .copy_from(molar_density);
        new.primary_mut(SOURCE_ENTHALPY).component_mut(Entity::Cell).copy_from(enthalpy);
    }

    pub fn set_conducted_source(&mut self, per_volume: &DVector<f64>) {
        self.core
            .new
            .primary_mut(CONDUCTED_SOURCE)
            .component_mut(Entity::Cell)
            .copy_from(per_volume);
    }

    /// Surface pressure above every cell; cells without a surface above them
    /// carry the atmospheric pressure.
    pub fn set_surface_pressure(&mut self, per_cell: &DVector<f64>) {
        self.core
            .new
            .primary_mut(SURFACE_PRESSURE)
            .component_mut(Entity::Cell)
            .copy_from(per_cell);
    }

    pub fn energy(&mut self) -> DVector<f64> {
        let key = self.core.keys.conserved.clone();
        self.core.new.has_changed(&key, "energy:output");
        self.core.new.field(&key).component(Entity::Cell).clone()
    }

    /// Subtract the net enthalpy inflow carried by the mass flux.
    fn add_advection(&mut self, g: &mut CompositeVector) {
        let requester = "energy:advection";
        self.core.new.has_changed(ENTHALPY, requester);
        self.core.new.has_changed(MOLAR_DENSITY, requester);
        let new = &self.core.new;
        let h = new.field(ENTHALPY).component(Entity::Cell);
        let n = new.field(MOLAR_DENSITY).component(Entity::Cell);
        let p = new.field(PRESSURE).component(Entity::Cell);
        let flux = new.field(MASS_FLUX).component(Entity::Face);
        let mesh = self.core.mesh();
        let liquid = self.liquid;

        // boundary enthalpy from the prescribed temperature and the cell state
        let boundary_enthalpy = |f: usize, t: f64| {
            let c = mesh.faces[f].neighbor_cell_ids.0;
            liquid.internal_energy(t) + p[c] / n[c]
        };
        self.advection.add_to_residual(
            g.component_mut(Entity::Cell),
            flux,
            h,
            self.core.bc(),
            boundary_enthalpy,
            true,
        );
    }
}

impl BdfFunctional for EnergyPk {
    fn modify_predictor(&mut self, _h: f64, _u_old: &CompositeVector, _u: &mut CompositeVector) -> bool {
        false
    }

    fn residual(
        &mut self,
        t_old: f64,
        t_new: f64,
        _u_old: &CompositeVector,
        u_new: &CompositeVector,
    ) -> CompositeVector {
        self.core.begin_residual(t_old, t_new, u_new);
        self.core.update_boundary_conditions();
        let mut g = u_new.like();
        self.core.apply_diffusion(&mut g);
        self.core.add_accumulation(&mut g);
        self.add_advection(&mut g);
        self.core.add_sources(&mut g);
        g
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
    use crate::discretization::generator::create_line_mesh;
    use approx::assert_relative_eq;

    fn line(n: usize, params: EnergyParams) -> EnergyPk {
        let mesh = Arc::new(create_line_mesh(n, n as f64));
        EnergyPk::new(mesh, PkConfig::default(), params, None, Arc::new(SerialComm)).unwrap()
    }

    fn uniform(pk: &EnergyPk, t: f64) -> CompositeVector {
        let mut u = CompositeVector::cells_and_faces(pk.core().mesh());
        u.put_scalar(t);
        u
    }

    #[test]
    fn energy_derivative_matches_finite_difference() {
        let mut pk = line(1, EnergyParams::default());
        let mut u = uniform(&pk, 280.0);
        pk.initialize(0.0, &u);
        let e0 = pk.energy()[0];
        pk.core_mut().new.has_derivative_changed(ENERGY, "test", TEMPERATURE);
        let de = pk.core().new.field("denergy_dtemperature").component(Entity::Cell)[0];

        u.put_scalar(280.5);
        pk.core_mut().solution_to_state(&u);
        let e1 = pk.energy()[0];
        assert_relative_eq!(de, (e1 - e0) / 0.5, max_relative = 1e-9);
    }

    #[test]
    fn uniform_advection_cancels_in_the_interior() {
        let mut pk = line(3, EnergyParams::default());
        let u = uniform(&pk, 285.0);
        pk.initialize(0.0, &u);
        let mesh = pk.core().mesh().clone();
        let flux = DVector::from_fn(mesh.num_faces(), |f, _| if mesh.faces[f].is_boundary() { 0.0 } else { 3.0 });
        let p = pk.core().new.field(PRESSURE).component(Entity::Cell).clone();
        pk.set_flow_state(&p, &DVector::from_element(3, 1.0), &flux);

        let g = pk.residual(0.0, 1.0, &u, &u);
        let gc = g.component(Entity::Cell);
        // enthalpy leaves the first cell and enters the last
        assert!(gc[0] > 0.0);
        assert!(gc[2] < 0.0);
        assert_relative_eq!(gc[1], 0.0, epsilon = 1e-9 * gc[0].abs());
        assert_relative_eq!(gc.sum(), 0.0, epsilon = 1e-9 * gc[0].abs());
    }

    #[test]
    fn advected_source_upwinds_on_injection() {
        let params = EnergyParams {
            advected_source: true,
            ..Default::default()
        };
        let mut pk = line(2, params);
        let u = uniform(&pk, 280.0);
        pk.initialize(0.0, &u);
        pk.set_mass_source(
            &DVector::from_vec(vec![1e-3, -1e-3]),
            &DVector::from_element(2, 50000.0),
            &DVector::from_element(2, 2000.0),
        );
        let state = &mut pk.core_mut().new;
        state.has_changed(ADVECTED_SOURCE, "test");
        let q = state.field(ADVECTED_SOURCE).component(Entity::Cell).clone();
        let h = state.field(ENTHALPY).component(Entity::Cell)[1];
        let n = state.field(MOLAR_DENSITY).component(Entity::Cell)[1];
        assert_relative_eq!(q[0], 1e-3 * 50000.0 * 2000.0);
        assert_relative_eq!(q[1], -1e-3 * n * h);
        assert!(!state.depends_on(ADVECTED_SOURCE, TEMPERATURE));
    }

    #[test]
    fn explicit_source_conflicts_with_advected_source() {
        let mesh = Arc::new(create_line_mesh(2, 2.0));
        let params = EnergyParams {
            advected_source: true,
            ..Default::default()
        };
        let source = Evaluator::constant("heat", 1.0);
        let err = EnergyPk::new(mesh, PkConfig::default(), params, Some(source), Arc::new(SerialComm))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "advected_source"));
    }
}
