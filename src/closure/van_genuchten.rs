use serde::{Deserialize, Serialize};

use super::RetentionModel;
use crate::error::ConfigError;

/// Below this distance from full saturation `d_k_relative` is taken as zero.
const WRM_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KrelFunction {
    #[default]
    Mualem,
    Burdine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VanGenuchtenParams {
    /// Inverse air-entry pressure [Pa^-1].
    pub alpha: f64,
    #[serde(default)]
    pub n: Option<f64>,
    #[serde(default)]
    pub m: Option<f64>,
    #[serde(default)]
    pub residual_saturation: f64,
    #[serde(default = "default_mualem_l")]
    pub mualem_l: f64,
    #[serde(default)]
    pub krel_function: KrelFunction,
    /// Width of the saturation interval below 1 over which `k_relative` is smoothed.
    #[serde(default)]
    pub smoothing_interval_width: f64,
}

fn default_mualem_l() -> f64 {
    0.5
}

impl Default for VanGenuchtenParams {
    fn default() -> Self {
        Self {
            alpha: 1.5e-4,
            n: Some(1.8),
            m: None,
            residual_saturation: 0.0,
            mualem_l: default_mualem_l(),
            krel_function: KrelFunction::Mualem,
            smoothing_interval_width: 0.0,
        }
    }
}

/// Cubic Hermite interpolant on `[x0, x1]`.
#[derive(Debug, Clone, Copy)]
struct HermiteFit {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    dy0: f64,
    dy1: f64,
}

impl HermiteFit {
    fn value(&self, x: f64) -> f64 {
        let h = self.x1 - self.x0;
        let t = (x - self.x0) / h;
        let (t2, t3) = (t * t, t * t * t);
        (2.0 * t3 - 3.0 * t2 + 1.0) * self.y0
            + (t3 - 2.0 * t2 + t) * h * self.dy0
            + (-2.0 * t3 + 3.0 * t2) * self.y1
            + (t3 - t2) * h * self.dy1
    }

    fn derivative(&self, x: f64) -> f64 {
        let h = self.x1 - self.x0;
        let t = (x - self.x0) / h;
        let t2 = t * t;
        ((6.0 * t2 - 6.0 * t) * self.y0
            + (3.0 * t2 - 4.0 * t + 1.0) * h * self.dy0
            + (-6.0 * t2 + 6.0 * t) * self.y1
            + (3.0 * t2 - 2.0 * t) * h * self.dy1)
            / h
    }
}

/// Van Genuchten retention curve with Mualem or Burdine relative permeability.
#[derive(Debug, Clone)]
pub struct VanGenuchten {
    alpha: f64,
    n: f64,
    m: f64,
    sr: f64,
    l: f64,
    function: KrelFunction,
    s0: f64,
    fit: Option<HermiteFit>,
}

impl VanGenuchten {
    pub fn new(params: &VanGenuchtenParams) -> Result<Self, ConfigError> {
        if !(params.alpha > 0.0) {
            return Err(ConfigError::invalid(
                "van Genuchten alpha",
                params.alpha,
                "must be positive",
            ));
        }
        if !(0.0..1.0).contains(&params.residual_saturation) {
            return Err(ConfigError::invalid(
                "residual saturation",
                params.residual_saturation,
                "must lie in [0, 1)",
            ));
        }
        let (n, m) = match (params.m, params.n, params.krel_function) {
            (Some(m), _, KrelFunction::Mualem) => (1.0 / (1.0 - m), m),
            (Some(m), _, KrelFunction::Burdine) => (2.0 / (1.0 - m), m),
            (None, Some(n), KrelFunction::Mualem) => (n, 1.0 - 1.0 / n),
            (None, Some(n), KrelFunction::Burdine) => (n, 1.0 - 2.0 / n),
            (None, None, _) => return Err(ConfigError::Missing("van Genuchten n".into())),
        };
        if !(m > 0.0 && m < 1.0) {
            return Err(ConfigError::invalid(
                "van Genuchten m",
                m,
                "must lie in (0, 1)",
            ));
        }

        let mut wrm = Self {
            alpha: params.alpha,
            n,
            m,
            sr: params.residual_saturation,
            l: params.mualem_l,
            function: params.krel_function,
            s0: 1.0 - params.smoothing_interval_width,
            fit: None,
        };
        if wrm.s0 < 1.0 {
            let s0 = wrm.s0;
            wrm.fit = Some(HermiteFit {
                x0: s0,
                x1: 1.0,
                y0: wrm.k_relative(s0),
                y1: 1.0,
                dy0: wrm.d_k_relative(s0),
                dy1: 0.0,
            });
        }
        Ok(wrm)
    }

    pub fn n(&self) -> f64 {
        self.n
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    #[inline]
    fn effective(&self, s: f64) -> f64 {
        (s - self.sr) / (1.0 - self.sr)
    }
}

impl RetentionModel for VanGenuchten {
    fn saturation(&self, pc: f64) -> f64 {
        if pc > 0.0 {
            (1.0 + (self.alpha * pc).powf(self.n)).powf(-self.m) * (1.0 - self.sr) + self.sr
        } else {
            1.0
        }
    }

    fn d_saturation(&self, pc: f64) -> f64 {
        if pc > 0.0 {
            -self.m
                * self.n
                * (1.0 + (self.alpha * pc).powf(self.n)).powf(-self.m - 1.0)
                * (self.alpha * pc).powf(self.n - 1.0)
                * self.alpha
                * (1.0 - self.sr)
        } else {
            0.0
        }
    }

    fn capillary_pressure(&self, s: f64) -> f64 {
        let se = self.effective(s).clamp(1e-40, 1.0);
        if se < 1e-8 {
            se.powf(-1.0 / (self.m * self.n)) / self.alpha
        } else {
            (se.powf(-1.0 / self.m) - 1.0).powf(1.0 / self.n) / self.alpha
        }
    }

    fn d_capillary_pressure(&self, s: f64) -> f64 {
        let se = self.effective(s).clamp(1e-40, 1.0);
        let mn = self.m * self.n;
        if se < 1e-8 {
            -1.0 / (mn * self.alpha) * se.powf(-1.0 / mn - 1.0) / (1.0 - self.sr)
        } else {
            -1.0 / (mn * self.alpha)
                * (se.powf(-1.0 / self.m) - 1.0).powf(1.0 / self.n - 1.0)
                * se.powf(-1.0 / self.m - 1.0)
                / (1.0 - self.sr)
        }
    }

    fn k_relative(&self, s: f64) -> f64 {
        if s <= self.s0 {
            let se = self.effective(s);
            let inner = 1.0 - (1.0 - se.powf(1.0 / self.m)).powf(self.m);
            match self.function {
                KrelFunction::Mualem => se.powf(self.l) * inner * inner,
                KrelFunction::Burdine => se * se * inner,
            }
        } else if s >= 1.0 {
            1.0
        } else {
            self.fit.map_or(1.0, |fit| fit.value(s))
        }
    }

    fn d_k_relative(&self, s: f64) -> f64 {
        if s <= self.s0 {
            let se = self.effective(s);
            let x = se.powf(1.0 / self.m);
            if (1.0 - x).abs() < WRM_TOLERANCE {
                return 0.0;
            }
            let y = (1.0 - x).powf(self.m);
            let dkdse = match self.function {
                KrelFunction::Mualem => {
                    (1.0 - y)
                        * (self.l * (1.0 - y) + 2.0 * x * y / (1.0 - x))
                        * se.powf(self.l - 1.0)
                }
                KrelFunction::Burdine => (2.0 * (1.0 - y) + x / (1.0 - x)) * se,
            };
            dkdse / (1.0 - self.sr)
        } else if s >= 1.0 {
            0.0
        } else {
            self.fit.map_or(0.0, |fit| fit.derivative(s))
        }
    }
}
