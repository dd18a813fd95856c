//! Process-kernel machinery shared by every physical model: boundary data,
//! boundary-condition composition, the preconditioner, predictors, and the
//! callback surface driven by an implicit time integrator.

pub mod bc;
pub mod composer;
pub mod pk;
pub mod preconditioner;
pub mod predictor;

use std::fmt;

use crate::error::SolveError;
use crate::state::composite::{CompositeVector, Entity};

/// Callbacks a backward-difference integrator invokes on a process kernel.
///
/// Per step the integrator calls, in order: `modify_predictor` once, then per
/// nonlinear iteration `residual`, `update_preconditioner`,
/// `apply_preconditioner`, `is_admissible` on the updated iterate, and
/// `error_norm`; finally `commit_state` on acceptance. `changed_solution` is
/// called whenever the integrator rewrites the solution vector.
pub trait BdfFunctional {
    /// Adjust the predicted solution `u` before the first iteration.
    /// Returns whether `u` was modified.
    fn modify_predictor(&mut self, h: f64, u_old: &CompositeVector, u: &mut CompositeVector) -> bool;

    /// Nonlinear residual `g(t_new, u_new)`; zero at the implicit solution.
    fn residual(
        &mut self,
        t_old: f64,
        t_new: f64,
        u_old: &CompositeVector,
        u_new: &CompositeVector,
    ) -> CompositeVector;

    fn update_preconditioner(&mut self, t: f64, u: &CompositeVector, h: f64);

    /// Approximate `J^-1 r`.
    fn apply_preconditioner(&self, r: &CompositeVector) -> Result<CompositeVector, SolveError>;

    /// Scaled size of the correction `du` at `u`; the step converged below 1.
    fn error_norm(&mut self, u: &CompositeVector, du: &CompositeVector) -> f64;

    fn is_admissible(&mut self, u: &CompositeVector) -> AdmissibilityReport;

    /// The solution vector was rewritten outside `residual`.
    fn changed_solution(&mut self);

    /// Accept the step of size `h`: the new time level becomes the old one.
    fn commit_state(&mut self, h: f64);

    /// Refresh fields only needed for output.
    fn calculate_diagnostics(&mut self) {}
}

/// Extrema of an iterate checked against hard bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct AdmissibilityReport {
    pub admissible: bool,
    pub min_value: f64,
    pub min_location: (Entity, usize),
    pub max_value: f64,
    pub max_location: (Entity, usize),
    /// First NaN or infinite entry; such an iterate is never admissible.
    pub non_finite: Option<(Entity, usize)>,
}

impl AdmissibilityReport {
    /// Locate the extrema over every component of `u` and compare them with
    /// `[lower, upper]`.
    pub fn check(u: &CompositeVector, lower: f64, upper: f64) -> Self {
        let mut min_value = f64::INFINITY;
        let mut max_value = f64::NEG_INFINITY;
        let mut min_location = (Entity::Cell, 0);
        let mut max_location = (Entity::Cell, 0);
        let mut non_finite = None;
        for entity in [Entity::Cell, Entity::Face] {
            let Some(values) = u.get(entity) else {
                continue;
            };
            for (i, &v) in values.iter().enumerate() {
                if !v.is_finite() {
                    non_finite.get_or_insert((entity, i));
                    continue;
                }
                if v < min_value {
                    min_value = v;
                    min_location = (entity, i);
                }
                if v > max_value {
                    max_value = v;
                    max_location = (entity, i);
                }
            }
        }
        Self {
            admissible: non_finite.is_none() && min_value >= lower && max_value <= upper,
            min_value,
            min_location,
            max_value,
            max_location,
            non_finite,
        }
    }
}

impl fmt::Display for AdmissibilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {:.6e} at {:?} {}, max {:.6e} at {:?} {}",
            self.min_value,
            self.min_location.0,
            self.min_location.1,
            self.max_value,
            self.max_location.0,
            self.max_location.1
        )?;
        if let Some((entity, i)) = self.non_finite {
            write!(f, ", non-finite value at {entity:?} {i}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn report_locates_face_extremum() {
        let mut u = CompositeVector::new()
            .with_component(Entity::Cell, 3)
            .with_component(Entity::Face, 4);
        u.put_scalar(250.0);
        u.component_mut(Entity::Face)[2] = 310.0;
        u.component_mut(Entity::Cell)[1] = 240.0;

        let report = AdmissibilityReport::check(&u, 200.0, 300.0);
        assert!(!report.admissible);
        assert_eq!(report.max_location, (Entity::Face, 2));
        assert_eq!(report.min_location, (Entity::Cell, 1));
        assert_eq!(report.max_value, 310.0);
    }

    #[test]
    fn bounds_are_inclusive() {
        let u = CompositeVector::from_cells(DVector::from_vec(vec![200.0, 300.0]));
        assert!(AdmissibilityReport::check(&u, 200.0, 300.0).admissible);
    }

    #[test]
    fn nan_entry_is_inadmissible() {
        let mut u = CompositeVector::new()
            .with_component(Entity::Cell, 3)
            .with_component(Entity::Face, 4);
        u.put_scalar(250.0);
        u.component_mut(Entity::Face)[3] = f64::NAN;
        u.component_mut(Entity::Cell)[2] = f64::INFINITY;

        let report = AdmissibilityReport::check(&u, 200.0, 300.0);
        assert!(!report.admissible);
        assert_eq!(report.non_finite, Some((Entity::Cell, 2)));
        assert_eq!(report.max_value, 250.0);
        assert!(report.to_string().contains("non-finite value at Cell 2"));
    }
}
