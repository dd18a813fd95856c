//! Pointwise constitutive relations.
//!
//! Every model here is a pure function of scalar state and fixed parameters,
//! so evaluators may call them anywhere the residual is evaluated.

pub mod eos;
pub mod iem;
pub mod van_genuchten;

/// Water retention curve and relative permeability as functions of
/// capillary pressure `pc` or liquid saturation `s`.
pub trait RetentionModel: Send + Sync {
    fn saturation(&self, pc: f64) -> f64;
    fn d_saturation(&self, pc: f64) -> f64;
    fn capillary_pressure(&self, s: f64) -> f64;
    fn d_capillary_pressure(&self, s: f64) -> f64;
    fn k_relative(&self, s: f64) -> f64;
    /// Derivative of `k_relative` with respect to saturation.
    fn d_k_relative(&self, s: f64) -> f64;
}

/// Liquid density as a function of temperature `t` and pressure `p`.
pub trait EquationOfState: Send + Sync {
    /// Molar mass [kg/mol].
    fn molar_mass(&self) -> f64;
    fn mass_density(&self, t: f64, p: f64) -> f64;
    fn d_mass_density_dt(&self, t: f64, p: f64) -> f64;
    fn d_mass_density_dp(&self, t: f64, p: f64) -> f64;

    fn molar_density(&self, t: f64, p: f64) -> f64 {
        self.mass_density(t, p) / self.molar_mass()
    }

    fn d_molar_density_dt(&self, t: f64, p: f64) -> f64 {
        self.d_mass_density_dt(t, p) / self.molar_mass()
    }

    fn d_molar_density_dp(&self, t: f64, p: f64) -> f64 {
        self.d_mass_density_dp(t, p) / self.molar_mass()
    }
}
