//! Residual and preconditioner steps shared by every diffusion-dominated
//! process kernel. Models own a [`PkCore`] and sequence its steps.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};

use crate::config::{ErrorNormParams, PkConfig, UpdateFluxMode};
use crate::discretization::comm::Communicator;
use crate::discretization::mesh::Mesh;
use crate::error::{ConfigError, SolveError};
use crate::operators::diffusion::DiffusionOperator;
use crate::operators::upwind::{gravity_directions, UpwindMethod, Upwinding};
use crate::operators::NumericalTolerances;
use crate::physics::composer::{BoundaryConditionComposer, BoundaryConditions, BoundaryData, CouplingMode};
use crate::physics::preconditioner::{AssemblyMode, PreconditionerBuilder};
use crate::physics::AdmissibilityReport;
use crate::state::composite::{CompositeVector, Entity};
use crate::state::State;

/// Field names a kernel reads and writes.
#[derive(Clone, Debug)]
pub struct PkKeys {
    /// Solution field, on cells and faces.
    pub primary: String,
    /// Conserved quantity per cell, already multiplied by volume.
    pub conserved: String,
    /// Diffusion coefficient on cells (and boundary faces when available).
    pub cell_coefficient: String,
    /// Upwinded coefficient on faces.
    pub face_coefficient: String,
    /// Diffusive flux on faces.
    pub flux: String,
    /// Unit-coefficient flux used as upwind direction.
    pub flux_direction: Option<String>,
    /// Mass density on cells; enables the gravity term.
    pub density: Option<String>,
    pub source: Option<String>,
    /// Face field holding the values pushed by a coupled surface domain.
    pub coupling: Option<String>,
    /// Face temperatures for freeze-gated infiltration.
    pub temperature: Option<String>,
}

/// Per-kernel choices that are not user configuration.
#[derive(Clone, Copy, Debug)]
pub struct PkDefaults {
    pub upwind: UpwindMethod,
    pub error_norm: ErrorNormParams,
    pub admissible_min: f64,
    pub admissible_max: f64,
    /// Factor the kernel divided its tensors by; the flux direction is
    /// multiplied back so the upwind tolerance applies to physical fluxes.
    pub tensor_scale: f64,
}

pub struct PkCore {
    name: String,
    pub keys: PkKeys,
    pub config: PkConfig,
    mesh: Arc<Mesh>,
    comm: Arc<dyn Communicator>,
    /// Committed time level.
    pub old: State,
    /// Time level being solved for.
    pub new: State,
    pub composer: BoundaryConditionComposer,
    upwinding: Upwinding,
    diffusion: DiffusionOperator,
    direction_operator: DiffusionOperator,
    /// Boundary conditions the flux direction was last computed with.
    direction_bc: Option<BoundaryConditions>,
    tensor_scale: f64,
    preconditioner: PreconditionerBuilder,
    bc: BoundaryConditions,
    coupling: CouplingMode,
    coupled_faces: Vec<usize>,
    pub update_flux: UpdateFluxMode,
    error_norm: ErrorNormParams,
    bounds: (f64, f64),
    h: f64,
    iteration: usize,
}

impl PkCore {
    /// Build the core around a finalized `state`; it becomes both time levels.
    pub fn new(
        name: &str,
        keys: PkKeys,
        config: PkConfig,
        mut state: State,
        tensors: &[Matrix3<f64>],
        comm: Arc<dyn Communicator>,
        defaults: PkDefaults,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mesh = state.mesh().clone();
        if tensors.len() != mesh.num_cells() {
            return Err(ConfigError::invalid(
                "permeability",
                tensors.len(),
                "one tensor per cell is required",
            ));
        }

        let coupling = config.coupling()?;
        let update_flux = config.update_flux()?;
        let method = config.upwind(defaults.upwind)?;

        let gravity = if keys.density.is_some() {
            config.gravity
        } else {
            [0.0; 3]
        };
        state.gravity = config.gravity;
        state.set_scalar("atmospheric_pressure", config.atmospheric_pressure);

        let mut upwinding = Upwinding::new(method, &keys.cell_coefficient, &keys.face_coefficient);
        match method {
            UpwindMethod::TotalFlux { .. } => {
                let dir = keys
                    .flux_direction
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing(format!("{name}: flux direction field")))?;
                upwinding = upwinding.with_direction(dir);
            }
            UpwindMethod::GravityFlux => {
                upwinding = upwinding.with_gravity_direction(gravity_directions(&mesh, tensors, config.gravity));
            }
            _ => {}
        }

        let tolerances = NumericalTolerances::default();
        let mut diffusion = DiffusionOperator::new(mesh.clone(), tensors, gravity, tolerances);
        diffusion.symbolic_assemble();
        let mut direction_operator = DiffusionOperator::new(mesh.clone(), tensors, gravity, tolerances);
        direction_operator.symbolic_assemble();

        let mode = if coupling.is_coupled() || config.assemble_preconditioner {
            AssemblyMode::Global
        } else {
            AssemblyMode::Local
        };
        let mut preconditioner = PreconditionerBuilder::new(
            mesh.clone(),
            tensors,
            Box::new(config.linear_solver.clone()),
            mode,
            &format!("{name}:preconditioner"),
        );
        preconditioner.symbolic_assemble();

        let mut composer = BoundaryConditionComposer::new(coupling);
        composer.infiltrate_only_if_unfrozen = config.infiltrate_only_if_unfrozen;
        composer.freezing_temperature = config.freezing_temperature;
        if config.infiltrate_only_if_unfrozen && keys.temperature.is_none() {
            return Err(ConfigError::Missing(format!(
                "{name}: temperature field for 'infiltrate_only_if_unfrozen'"
            )));
        }

        let coupled_faces: Vec<usize> = if coupling.is_coupled() {
            if keys.coupling.is_none() {
                return Err(ConfigError::Missing(format!("{name}: surface coupling field")));
            }
            let faces: Vec<usize> = mesh.faces_with_label(&config.surface_label).collect();
            if faces.is_empty() {
                return Err(ConfigError::invalid(
                    "surface_label",
                    &config.surface_label,
                    "no mesh face carries this label",
                ));
            }
            faces
        } else {
            Vec::new()
        };

        let error_norm = config.error_norm.unwrap_or(defaults.error_norm);
        let bounds = (
            config.admissible_min.unwrap_or(defaults.admissible_min),
            config.admissible_max.unwrap_or(defaults.admissible_max),
        );

        log::debug!(
            "{name}: upwinding {method:?}, preconditioner {mode:?}, coupling {coupling:?}, flux update {update_flux:?}"
        );

        Ok(Self {
            name: name.to_string(),
            keys,
            config,
            bc: BoundaryConditions::new(mesh.num_faces()),
            mesh,
            comm,
            old: state.clone(),
            new: state,
            composer,
            upwinding,
            diffusion,
            direction_operator,
            direction_bc: None,
            tensor_scale: defaults.tensor_scale,
            preconditioner,
            coupling,
            coupled_faces,
            update_flux,
            error_norm,
            bounds,
            h: 0.0,
            iteration: 0,
        })
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerBuilder) -> Self {
        self.preconditioner = preconditioner;
        if !self.preconditioner.operator().is_symbolic() {
            self.preconditioner.symbolic_assemble();
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn coupling(&self) -> CouplingMode {
        self.coupling
    }

    pub fn coupled_faces(&self) -> &[usize] {
        &self.coupled_faces
    }

    /// Boundary conditions of the last composition.
    pub fn bc(&self) -> &BoundaryConditions {
        &self.bc
    }

    /// Step size of the last residual evaluation.
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Residual evaluations since the last committed step.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn diffusion(&self) -> &DiffusionOperator {
        &self.diffusion
    }

    pub fn diffusion_mut(&mut self) -> &mut DiffusionOperator {
        &mut self.diffusion
    }

    pub fn preconditioner(&self) -> &PreconditionerBuilder {
        &self.preconditioner
    }

    /// Set both time levels to `u0` at time `t0`.
    pub fn initialize(&mut self, t0: f64, u0: &CompositeVector) {
        for state in [&mut self.old, &mut self.new] {
            state.set_time(t0);
            state.set_primary(&self.keys.primary, u0.clone());
        }
    }

    /// Current solution of the new time level.
    pub fn solution(&self) -> &CompositeVector {
        self.new.field(&self.keys.primary)
    }

    /// Copy `u` into the new level, marking it changed only if it differs.
    pub fn solution_to_state(&mut self, u: &CompositeVector) {
        if self.new.field(&self.keys.primary) != u {
            self.new.set_primary(&self.keys.primary, u.clone());
        }
    }

    /// Start a residual evaluation between `t_old` and `t_new`.
    pub fn begin_residual(&mut self, t_old: f64, t_new: f64, u_new: &CompositeVector) {
        self.iteration += 1;
        self.h = t_new - t_old;
        self.new.set_time(t_new);
        self.solution_to_state(u_new);
        log::trace!(
            "{}: residual {} at t = {:.6e}, h = {:.3e}",
            self.name,
            self.iteration,
            t_new,
            self.h
        );
    }

    /// Write coupled-surface data onto the coupling faces of the new level.
    pub fn push_coupling_values(&mut self, values: &[(usize, f64)]) {
        let key = self
            .keys
            .coupling
            .as_deref()
            .unwrap_or_else(|| panic!("{}: kernel has no surface coupling field", self.name));
        let field = self.new.primary_mut(key).component_mut(Entity::Face);
        for &(f, v) in values {
            field[f] = v;
        }
    }

    /// Compose boundary conditions at the time of the new level.
    pub fn update_boundary_conditions(&mut self) {
        let t = self.new.time();
        let coupled: Option<Vec<(usize, f64)>> = match (&self.keys.coupling, self.coupling) {
            (Some(key), mode) if mode.is_coupled() => {
                let values = self.new.field(key).component(Entity::Face);
                Some(self.coupled_faces.iter().map(|&f| (f, values[f])).collect())
            }
            _ => None,
        };
        let temperatures = match &self.keys.temperature {
            Some(key) if self.composer.infiltrate_only_if_unfrozen => {
                Some(self.new.field(key).component(Entity::Face))
            }
            _ => None,
        };
        let data = BoundaryData {
            face_values: Some(self.new.field(&self.keys.primary).component(Entity::Face)),
            face_coefficients: Some(self.new.field(&self.keys.face_coefficient).component(Entity::Face)),
            face_temperatures: temperatures,
            coupled: coupled.as_deref(),
        };
        self.bc = self.composer.compose(t, &self.mesh, &data);
    }

    /// Mass density on cells, brought up to date; `None` without gravity.
    pub fn density(&mut self) -> Option<DVector<f64>> {
        let key = self.keys.density.as_ref()?;
        self.new.has_changed(key, &self.name);
        Some(self.new.field(key).component(Entity::Cell).clone())
    }

    /// Refresh the upwinded face coefficient. Returns whether it may have changed.
    pub fn update_face_coefficient(&mut self) -> bool {
        let requester = format!("{}:coefficient", self.name);
        let mut update = self.new.has_changed(&self.keys.cell_coefficient, &requester);

        if let (UpwindMethod::TotalFlux { .. }, Some(dir_key)) =
            (self.upwinding.method, self.keys.flux_direction.clone())
        {
            let mut update_dir = self.new.has_changed(&self.keys.primary, &requester);
            if let Some(rho) = &self.keys.density {
                update_dir |= self.new.has_changed(rho, &requester);
            }
            update_dir |= self.direction_bc.as_ref() != Some(&self.bc);
            if update_dir {
                let density = self.density();
                let ones = DVector::from_element(self.mesh.num_faces(), 1.0);
                self.direction_operator.init();
                self.direction_operator.setup(&ones, density.as_ref());
                self.direction_operator.apply_bcs(&self.bc);
                let direction =
                    self.direction_operator.fluxes(self.new.field(&self.keys.primary)) * self.tensor_scale;
                self.direction_bc = Some(self.bc.clone());
                self.new
                    .primary_mut(&dir_key)
                    .component_mut(Entity::Face)
                    .copy_from(&direction);
            }
            update |= update_dir;
        }

        if update && self.upwinding.update(&mut self.new) && self.config.clobber_surface_rel_perm {
            self.clobber_boundary_coefficient();
        }
        update
    }

    /// Overwrite boundary faces of the face coefficient with the boundary
    /// values of the cell coefficient.
    fn clobber_boundary_coefficient(&mut self) {
        let Some(boundary) = self
            .new
            .field(&self.keys.cell_coefficient)
            .get(Entity::BoundaryFace)
            .cloned()
        else {
            return;
        };
        let mesh = self.mesh.clone();
        let faces = self
            .new
            .primary_mut(&self.keys.face_coefficient)
            .component_mut(Entity::Face);
        for (bf, &f) in mesh.boundary_faces().iter().enumerate() {
            faces[f] = boundary[bf];
        }
    }

    /// Rebuild the residual operator with unit face coefficients.
    pub fn setup_unit_diffusion(&mut self) {
        let ones = DVector::from_element(self.mesh.num_faces(), 1.0);
        let density = self.density();
        self.diffusion.init();
        self.diffusion.setup(&ones, density.as_ref());
        self.diffusion.apply_bcs(&self.bc);
    }

    /// Rebuild the residual operator from the current coefficients and BCs.
    pub fn setup_diffusion(&mut self) {
        self.update_face_coefficient();
        let coef = self
            .new
            .field(&self.keys.face_coefficient)
            .component(Entity::Face)
            .clone();
        let density = self.density();
        self.diffusion.init();
        self.diffusion.setup(&coef, density.as_ref());
        self.diffusion.apply_bcs(&self.bc);
    }

    fn write_flux(&mut self) {
        let flux = self.diffusion.fluxes(self.new.field(&self.keys.primary));
        self.new
            .primary_mut(&self.keys.flux)
            .component_mut(Entity::Face)
            .copy_from(&flux);
    }

    /// Add the diffusion residual `A u - b` into `g`.
    pub fn apply_diffusion(&mut self, g: &mut CompositeVector) {
        self.setup_diffusion();
        if self.update_flux == UpdateFluxMode::Iteration {
            self.write_flux();
        }
        let r = self.diffusion.residual(self.new.field(&self.keys.primary));
        g.update(1.0, &r, 1.0);
    }

    /// Recompute the flux field from the new level.
    pub fn update_flux(&mut self) {
        self.update_boundary_conditions();
        self.setup_diffusion();
        self.write_flux();
        log::debug!("{}: updated '{}'", self.name, self.keys.flux);
    }

    /// Add `(Q_new - Q_old) / h` on cells.
    pub fn add_accumulation(&mut self, g: &mut CompositeVector) {
        let key = &self.keys.conserved;
        self.new.has_changed(key, &self.name);
        self.old.has_changed(key, &self.name);
        let q1 = self.new.field(key).component(Entity::Cell);
        let q0 = self.old.field(key).component(Entity::Cell);
        let acc = (q1 - q0) / self.h;
        *g.component_mut(Entity::Cell) += acc;
    }

    /// Subtract the (volume-integrated) source from cells.
    pub fn add_sources(&mut self, g: &mut CompositeVector) {
        let Some(key) = &self.keys.source else {
            return;
        };
        self.new.has_changed(key, &self.name);
        *g.component_mut(Entity::Cell) -= self.new.field(key).component(Entity::Cell);
    }

    /// Diffusion, accumulation and source for the standard diffusion equation.
    pub fn standard_residual(
        &mut self,
        t_old: f64,
        t_new: f64,
        u_new: &CompositeVector,
    ) -> CompositeVector {
        self.begin_residual(t_old, t_new, u_new);
        self.update_boundary_conditions();
        let mut g = u_new.like();
        self.apply_diffusion(&mut g);
        self.add_accumulation(&mut g);
        self.add_sources(&mut g);
        g
    }

    /// Linearize at `u` and time `t`: diffusion with frozen coefficients,
    /// accumulation derivative, source derivative and boundary conditions.
    pub fn update_preconditioner(&mut self, t: f64, u: &CompositeVector, h: f64) {
        if self.new.time() != t {
            log::debug!(
                "{}: preconditioner requested at t = {t:.6e}, new level was at {:.6e}",
                self.name,
                self.new.time()
            );
            self.new.set_time(t);
        }
        self.solution_to_state(u);
        self.update_boundary_conditions();
        self.update_face_coefficient();
        let coef = self
            .new
            .field(&self.keys.face_coefficient)
            .component(Entity::Face)
            .clone();

        let pc = &mut self.preconditioner;
        pc.init();
        pc.add_diffusion(&coef);
        pc.add_accumulation(&mut self.new, &self.keys.conserved, &self.keys.primary, h);
        if let Some(source) = &self.keys.source {
            pc.add_source_derivative(&mut self.new, source, &self.keys.primary);
        }
        pc.apply_bcs(&self.bc);
        pc.assemble();
    }

    pub fn apply_preconditioner(&self, r: &CompositeVector) -> Result<CompositeVector, SolveError> {
        self.preconditioner.apply_inverse(r)
    }

    /// Max over cells and faces of the scaled correction, reduced over
    /// partitions. Infinite when any scaled term is not finite.
    pub fn error_norm(&mut self, du: &CompositeVector) -> f64 {
        let key = &self.keys.conserved;
        self.new.has_changed(key, &self.name);
        let q = self.new.field(key).component(Entity::Cell);
        let p = &self.error_norm;
        let dc = du.component(Entity::Cell);

        let mut enorm_cell = 0.0;
        let mut bad_cell = None;
        for cell in self.mesh.owned_cells() {
            let c = cell.id;
            let tmp = (self.h * dc[c]).abs() / (p.atol * cell.volume * p.cell_scale + p.rtol * q[c].abs());
            if !tmp.is_finite() {
                log::warn!("{}: non-finite correction in cell {c}", self.name);
                return self.comm.max_all(f64::INFINITY);
            }
            if tmp > enorm_cell {
                enorm_cell = tmp;
                bad_cell = Some(c);
            }
        }

        let enorm_face = du.get(Entity::Face).map_or(0.0, |df| {
            df.iter()
                .map(|v| p.face_factor * v.abs() / (p.atol + p.rtol * p.face_reference))
                .fold(0.0, |acc: f64, v| if v.is_finite() { acc.max(v) } else { f64::INFINITY })
        });

        log::debug!(
            "{}: ENorm (cells) = {:.4e} [{:?}], ENorm (faces) = {:.4e}",
            self.name,
            enorm_cell,
            bad_cell,
            enorm_face
        );
        self.comm.max_all(enorm_cell.max(enorm_face))
    }

    pub fn admissibility(&self, u: &CompositeVector) -> AdmissibilityReport {
        let (lower, upper) = self.bounds;
        let mut report = AdmissibilityReport::check(u, lower, upper);
        report.min_value = self.comm.min_all(report.min_value);
        report.max_value = self.comm.max_all(report.max_value);
        let any_non_finite = self.comm.max_all(if report.non_finite.is_some() { 1.0 } else { 0.0 }) > 0.0;
        report.admissible = !any_non_finite && report.min_value >= lower && report.max_value <= upper;
        if report.admissible {
            log::trace!("{}: admissible ({report})", self.name);
        } else {
            log::warn!(
                "{}: iterate outside [{lower:.3e}, {upper:.3e}]: {report}",
                self.name
            );
        }
        report
    }

    pub fn changed_solution(&mut self) {
        self.new.mark_changed(&self.keys.primary);
    }

    /// The new level becomes the committed one. The flux field is refreshed
    /// first in iteration and timestep modes; the last residual saw the
    /// iterate before the final correction.
    pub fn commit_state(&mut self, h: f64) {
        if matches!(self.update_flux, UpdateFluxMode::Iteration | UpdateFluxMode::Timestep) {
            self.update_flux();
        }
        self.new.advance_cycle();
        self.old = self.new.clone();
        self.iteration = 0;
        log::debug!(
            "{}: committed step h = {h:.3e} at t = {:.6e}",
            self.name,
            self.new.time()
        );
    }

    /// Refresh output-only fields.
    pub fn calculate_diagnostics(&mut self) {
        if self.update_flux == UpdateFluxMode::Vis {
            self.update_flux();
        }
    }
}
