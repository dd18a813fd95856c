//! Discrete operators acting on composite vectors: upwinding, two-point
//! diffusion with face unknowns, upwinded advection and linear solvers.

pub mod advection;
pub mod diffusion;
pub mod linear;
pub mod upwind;

#[derive(Clone, Copy, Debug)]
pub struct NumericalTolerances {
    pub min_distance: f64,
    pub min_face_area: f64,
    pub eps_diagonal: f64,
}

impl Default for NumericalTolerances {
    fn default() -> Self {
        Self {
            min_distance: 1e-14,
            min_face_area: 1e-20,
            eps_diagonal: 1e-12,
        }
    }
}

impl NumericalTolerances {
    /// Distance between two points, clamped below by `min_distance`.
    #[inline]
    pub fn safe_distance(&self, p1: [f64; 3], p2: [f64; 3]) -> f64 {
        let d = glam::DVec3::from_array(p1).distance(glam::DVec3::from_array(p2));
        if d < self.min_distance {
            log::warn!(
                "clamped distance {:.3e} -> {:.3e} between {:?} and {:?}",
                d,
                self.min_distance,
                p1,
                p2
            );
            return self.min_distance;
        }
        d
    }
}
