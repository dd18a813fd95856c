use serde::{Deserialize, Serialize};

use super::EquationOfState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EosParams {
    #[serde(default = "default_molar_mass")]
    pub molar_mass: f64,
    /// Mass density at the reference state [kg/m^3].
    #[serde(default = "default_density")]
    pub reference_density: f64,
    #[serde(default = "default_reference_temperature")]
    pub reference_temperature: f64,
    #[serde(default = "default_reference_pressure")]
    pub reference_pressure: f64,
    /// Volumetric thermal expansion [1/K].
    #[serde(default)]
    pub thermal_expansion: f64,
    /// Isothermal compressibility [1/Pa].
    #[serde(default)]
    pub compressibility: f64,
}

fn default_molar_mass() -> f64 {
    0.0180153
}
fn default_density() -> f64 {
    1000.0
}
fn default_reference_temperature() -> f64 {
    273.15
}
fn default_reference_pressure() -> f64 {
    101325.0
}

impl Default for EosParams {
    fn default() -> Self {
        Self {
            molar_mass: default_molar_mass(),
            reference_density: default_density(),
            reference_temperature: default_reference_temperature(),
            reference_pressure: default_reference_pressure(),
            thermal_expansion: 0.0,
            compressibility: 0.0,
        }
    }
}

/// Density linear in temperature and pressure about a reference state.
/// With zero expansion and compressibility this is a constant-density liquid.
#[derive(Debug, Clone)]
pub struct LinearEos {
    params: EosParams,
}

impl LinearEos {
    pub fn new(params: EosParams) -> Self {
        Self { params }
    }

    pub fn constant(reference_density: f64) -> Self {
        Self::new(EosParams {
            reference_density,
            ..Default::default()
        })
    }
}

impl EquationOfState for LinearEos {
    fn molar_mass(&self) -> f64 {
        self.params.molar_mass
    }

    fn mass_density(&self, t: f64, p: f64) -> f64 {
        let q = &self.params;
        q.reference_density
            * (1.0 - q.thermal_expansion * (t - q.reference_temperature)
                + q.compressibility * (p - q.reference_pressure))
    }

    fn d_mass_density_dt(&self, _t: f64, _p: f64) -> f64 {
        -self.params.reference_density * self.params.thermal_expansion
    }

    fn d_mass_density_dp(&self, _t: f64, _p: f64) -> f64 {
        self.params.reference_density * self.params.compressibility
    }
}
