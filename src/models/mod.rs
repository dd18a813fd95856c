//! Process kernels built on [`PkCore`](crate::physics::pk::PkCore), and the
//! surface coupler that drives them.

pub mod coupler;
pub mod energy;
pub mod richards;

use std::sync::Arc;

use crate::closure::EquationOfState;
use crate::state::composite::Entity;
use crate::state::evaluator::Evaluator;

pub const MOLAR_DENSITY: &str = "molar_density_liquid";
pub const MASS_DENSITY: &str = "mass_density_liquid";
pub const SATURATION: &str = "saturation_liquid";
pub const POROSITY: &str = "porosity";

/// Molar and mass density of the liquid on cells, from one equation of state.
pub fn liquid_density(eos: Arc<dyn EquationOfState>, temperature: &str, pressure: &str) -> Evaluator {
    let (t_key, p_key) = (temperature.to_string(), pressure.to_string());
    let value_eos = eos.clone();
    let (vt, vp) = (t_key.clone(), p_key.clone());
    Evaluator::secondary(&[MOLAR_DENSITY, MASS_DENSITY], &[temperature, pressure], move |ctx, out| {
        let t = ctx.field(&vt).component(Entity::Cell);
        let p = ctx.field(&vp).component(Entity::Cell);
        let (molar, mass) = out.split_at_mut(1);
        let n = molar[0].component_mut(Entity::Cell);
        let rho = mass[0].component_mut(Entity::Cell);
        for c in 0..n.len() {
            n[c] = value_eos.molar_density(t[c], p[c]);
            rho[c] = value_eos.mass_density(t[c], p[c]);
        }
    })
    .with_derivative(move |ctx, key, wrt, out| {
        let t = ctx.field(&t_key).component(Entity::Cell);
        let p = ctx.field(&p_key).component(Entity::Cell);
        let wrt_t = wrt == t_key;
        let molar = key == MOLAR_DENSITY;
        let d = out.component_mut(Entity::Cell);
        for c in 0..d.len() {
            d[c] = match (molar, wrt_t) {
                (true, true) => eos.d_molar_density_dt(t[c], p[c]),
                (true, false) => eos.d_molar_density_dp(t[c], p[c]),
                (false, true) => eos.d_mass_density_dt(t[c], p[c]),
                (false, false) => eos.d_mass_density_dp(t[c], p[c]),
            };
        }
    })
}

pub(crate) fn key_or(configured: &Option<String>, default: &str) -> String {
    configured.clone().unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::eos::{EosParams, LinearEos};
    use crate::discretization::generator::create_line_mesh;
    use crate::state::composite::CompositeVector;
    use crate::state::State;
    use approx::assert_relative_eq;

    #[test]
    fn density_evaluator_fills_both_outputs() {
        let mesh = Arc::new(create_line_mesh(2, 2.0));
        let mut state = State::new(mesh.clone());
        let cells = CompositeVector::cells(&mesh);
        state
            .require_evaluator(Evaluator::constant("temperature", 283.15), cells.clone())
            .unwrap();
        state
            .require_evaluator(Evaluator::primary("pressure"), cells.clone())
            .unwrap();
        let eos = LinearEos::new(EosParams {
            thermal_expansion: 2e-4,
            ..Default::default()
        });
        state
            .require_evaluator(liquid_density(Arc::new(eos.clone()), "temperature", "pressure"), cells)
            .unwrap();
        state.finalize().unwrap();
        state.primary_mut("pressure").put_scalar(101325.0);

        state.has_changed(MASS_DENSITY, "test");
        assert_relative_eq!(
            state.field(MASS_DENSITY).component(Entity::Cell)[0],
            eos.mass_density(283.15, 101325.0)
        );
        assert_relative_eq!(
            state.field(MOLAR_DENSITY).component(Entity::Cell)[1],
            eos.molar_density(283.15, 101325.0)
        );
        // one evaluation produced both fields
        assert_eq!(state.evaluation_count(MOLAR_DENSITY), 1);

        state.has_derivative_changed(MOLAR_DENSITY, "test", "temperature");
        assert_relative_eq!(
            state.field("dmolar_density_liquid_dtemperature").component(Entity::Cell)[0],
            eos.d_molar_density_dt(283.15, 101325.0)
        );
    }
}
