use serde::{Deserialize, Serialize};

/// Internal energy linear in temperature: `u = cv (T - T_ref)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinearIem {
    /// Heat capacity [J/mol/K] for the liquid, [J/kg/K] when used for rock.
    pub heat_capacity: f64,
    #[serde(default = "default_reference_temperature")]
    pub reference_temperature: f64,
}

fn default_reference_temperature() -> f64 {
    273.15
}

impl LinearIem {
    pub fn new(heat_capacity: f64) -> Self {
        Self {
            heat_capacity,
            reference_temperature: default_reference_temperature(),
        }
    }

    #[inline]
    pub fn internal_energy(&self, t: f64) -> f64 {
        self.heat_capacity * (t - self.reference_temperature)
    }

    #[inline]
    pub fn d_internal_energy_dt(&self, _t: f64) -> f64 {
        self.heat_capacity
    }
}

impl Default for LinearIem {
    fn default() -> Self {
        // liquid water, per mole
        Self::new(76.0)
    }
}
