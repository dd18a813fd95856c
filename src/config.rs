//! Process-kernel configuration, read from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::operators::linear::BiCgStab;
use crate::operators::upwind::UpwindMethod;
use crate::physics::composer::CouplingMode;

/// When the diagnostic flux field is recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateFluxMode {
    /// Every residual evaluation.
    Iteration,
    /// Once per accepted step.
    Timestep,
    /// Only before output.
    Vis,
    Never,
}

/// Scaling of the nonlinear error norm.
///
/// Cell term `|h r_c| / (atol V_c cell_scale + rtol |Q_c|)`, face term
/// `face_factor |r_f| / (atol + rtol face_reference)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorNormParams {
    #[serde(default = "default_tolerance")]
    pub atol: f64,
    #[serde(default = "default_tolerance")]
    pub rtol: f64,
    pub cell_scale: f64,
    pub face_factor: f64,
    pub face_reference: f64,
}

fn default_tolerance() -> f64 {
    1.0
}

impl ErrorNormParams {
    pub fn richards() -> Self {
        Self {
            atol: 1.0,
            rtol: 1.0,
            cell_scale: 27500.0,
            face_factor: 1.0,
            face_reference: 1e5,
        }
    }

    pub fn energy() -> Self {
        Self {
            atol: 1.0,
            rtol: 1.0,
            cell_scale: 2e6,
            face_factor: 1e-4,
            face_reference: 273.15,
        }
    }
}

/// Settings shared by the flow and energy kernels. Options left unset take
/// the defaults of the kernel reading them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkConfig {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub conserved_key: Option<String>,
    #[serde(default)]
    pub conductivity_key: Option<String>,
    /// Source field; no source term when unset.
    #[serde(default)]
    pub source_key: Option<String>,

    /// "cell centered", "arithmetic mean", "upwind with gravity" or
    /// "upwind with Darcy flux".
    #[serde(default)]
    pub upwind_method: Option<String>,
    #[serde(default = "default_flux_tolerance")]
    pub flux_tolerance: f64,
    /// "iteration", "timestep", "vis" or "never".
    #[serde(default = "default_update_flux_mode")]
    pub update_flux_mode: String,

    #[serde(default)]
    pub coupled_to_surface_via_head: bool,
    #[serde(default)]
    pub coupled_to_surface_via_flux: bool,
    /// Label of the boundary faces shared with the surface domain.
    #[serde(default = "default_surface_label")]
    pub surface_label: String,

    #[serde(default)]
    pub infiltrate_only_if_unfrozen: bool,
    #[serde(default = "default_freezing_temperature")]
    pub freezing_temperature: f64,

    #[serde(default)]
    pub assemble_preconditioner: bool,
    #[serde(default)]
    pub linear_solver: BiCgStab,

    #[serde(default)]
    pub modify_predictor_with_consistent_faces: bool,
    #[serde(default)]
    pub modify_predictor_for_flux_bcs: bool,
    #[serde(default)]
    pub modify_predictor_for_initial_flux_bcs: bool,
    #[serde(default)]
    pub clobber_surface_rel_perm: bool,

    #[serde(default)]
    pub error_norm: Option<ErrorNormParams>,
    #[serde(default)]
    pub admissible_min: Option<f64>,
    #[serde(default)]
    pub admissible_max: Option<f64>,

    #[serde(default = "default_atmospheric_pressure")]
    pub atmospheric_pressure: f64,
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    #[serde(default = "default_permeability_rescaling")]
    pub permeability_rescaling: f64,
}

fn default_flux_tolerance() -> f64 {
    1e-8
}
fn default_update_flux_mode() -> String {
    "iteration".to_string()
}
fn default_surface_label() -> String {
    "surface".to_string()
}
fn default_freezing_temperature() -> f64 {
    273.15
}
fn default_atmospheric_pressure() -> f64 {
    101325.0
}
fn default_gravity() -> [f64; 3] {
    [0.0, 0.0, -9.80665]
}
fn default_permeability_rescaling() -> f64 {
    1.0
}

impl Default for PkConfig {
    fn default() -> Self {
        Self {
            primary_key: None,
            conserved_key: None,
            conductivity_key: None,
            source_key: None,
            upwind_method: None,
            flux_tolerance: default_flux_tolerance(),
            update_flux_mode: default_update_flux_mode(),
            coupled_to_surface_via_head: false,
            coupled_to_surface_via_flux: false,
            surface_label: default_surface_label(),
            infiltrate_only_if_unfrozen: false,
            freezing_temperature: default_freezing_temperature(),
            assemble_preconditioner: false,
            linear_solver: BiCgStab::default(),
            modify_predictor_with_consistent_faces: false,
            modify_predictor_for_flux_bcs: false,
            modify_predictor_for_initial_flux_bcs: false,
            clobber_surface_rel_perm: false,
            error_norm: None,
            admissible_min: None,
            admissible_max: None,
            atmospheric_pressure: default_atmospheric_pressure(),
            gravity: default_gravity(),
            permeability_rescaling: default_permeability_rescaling(),
        }
    }
}

impl PkConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every setting; the first bad one is reported by key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upwind(UpwindMethod::CellCentered)?;
        self.update_flux()?;
        self.coupling()?;

        if !(self.flux_tolerance >= 0.0) {
            return Err(ConfigError::invalid(
                "flux_tolerance",
                self.flux_tolerance,
                "must be non-negative",
            ));
        }
        if let Some(norm) = &self.error_norm {
            for (key, value) in [
                ("error_norm.atol", norm.atol),
                ("error_norm.rtol", norm.rtol),
                ("error_norm.cell_scale", norm.cell_scale),
                ("error_norm.face_reference", norm.face_reference),
            ] {
                if !(value >= 0.0) {
                    return Err(ConfigError::invalid(key, value, "must be non-negative"));
                }
            }
            if norm.atol == 0.0 && norm.rtol == 0.0 {
                return Err(ConfigError::invalid(
                    "error_norm.atol",
                    norm.atol,
                    "atol and rtol cannot both be zero",
                ));
            }
        }
        if let (Some(lo), Some(hi)) = (self.admissible_min, self.admissible_max) {
            if lo >= hi {
                return Err(ConfigError::invalid(
                    "admissible_min",
                    lo,
                    "must be below admissible_max",
                ));
            }
        }
        if !(self.permeability_rescaling > 0.0) {
            return Err(ConfigError::invalid(
                "permeability_rescaling",
                self.permeability_rescaling,
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Upwinding method, or `default` when unset.
    pub fn upwind(&self, default: UpwindMethod) -> Result<UpwindMethod, ConfigError> {
        let Some(name) = self.upwind_method.as_deref() else {
            return Ok(default);
        };
        match name {
            "cell centered" => Ok(UpwindMethod::CellCentered),
            "arithmetic mean" => Ok(UpwindMethod::ArithmeticMean),
            "upwind with gravity" => Ok(UpwindMethod::GravityFlux),
            "upwind with Darcy flux" => Ok(UpwindMethod::TotalFlux {
                tolerance: self.flux_tolerance,
            }),
            other => Err(ConfigError::invalid(
                "upwind_method",
                other,
                "expected one of 'cell centered', 'arithmetic mean', \
                 'upwind with gravity', 'upwind with Darcy flux'",
            )),
        }
    }

    pub fn update_flux(&self) -> Result<UpdateFluxMode, ConfigError> {
        match self.update_flux_mode.as_str() {
            "iteration" => Ok(UpdateFluxMode::Iteration),
            "timestep" => Ok(UpdateFluxMode::Timestep),
            "vis" => Ok(UpdateFluxMode::Vis),
            "never" => Ok(UpdateFluxMode::Never),
            other => Err(ConfigError::invalid(
                "update_flux_mode",
                other,
                "expected one of 'iteration', 'timestep', 'vis', 'never'",
            )),
        }
    }

    pub fn coupling(&self) -> Result<CouplingMode, ConfigError> {
        CouplingMode::from_flags(
            self.coupled_to_surface_via_head,
            self.coupled_to_surface_via_flux,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        let config = PkConfig::from_json_str("{}").unwrap();
        assert_eq!(config.flux_tolerance, 1e-8);
        assert_eq!(config.update_flux().unwrap(), UpdateFluxMode::Iteration);
        assert_eq!(config.coupling().unwrap(), CouplingMode::None);
        assert_eq!(config.linear_solver.max_iterations, 1000);
        assert_eq!(
            config.upwind(UpwindMethod::GravityFlux).unwrap(),
            UpwindMethod::GravityFlux
        );
    }

    #[test]
    fn darcy_upwinding_carries_flux_tolerance() {
        let config = PkConfig::from_json_str(
            r#"{ "upwind_method": "upwind with Darcy flux", "flux_tolerance": 1e-6 }"#,
        )
        .unwrap();
        assert_eq!(
            config.upwind(UpwindMethod::CellCentered).unwrap(),
            UpwindMethod::TotalFlux { tolerance: 1e-6 }
        );
    }

    #[test]
    fn unknown_update_flux_mode_names_key() {
        let err = PkConfig::from_json_str(r#"{ "update_flux_mode": "sometimes" }"#).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "update_flux_mode");
                assert_eq!(value, "sometimes");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn both_coupling_modes_conflict() {
        let err = PkConfig::from_json_str(
            r#"{ "coupled_to_surface_via_head": true, "coupled_to_surface_via_flux": true }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCoupling { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            PkConfig::from_json_str("{ flux_tolerance: }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("richards.json");
        std::fs::write(&path, r#"{ "assemble_preconditioner": true }"#).unwrap();
        let config = PkConfig::from_file(&path).unwrap();
        assert!(config.assemble_preconditioner);
    }
}
