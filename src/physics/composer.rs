use nalgebra::DVector;

use crate::discretization::mesh::Mesh;
use crate::error::ConfigError;
use crate::physics::bc::BoundaryFunction;

/// Kind of condition imposed on a face after composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcKind {
    /// Interior face, no condition.
    None,
    Dirichlet,
    /// Prescribed outward flux per unit area.
    Neumann,
}

/// One (kind, value) pair per mesh face.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryConditions {
    pub markers: Vec<BcKind>,
    pub values: Vec<f64>,
}

impl BoundaryConditions {
    pub fn new(num_faces: usize) -> Self {
        Self {
            markers: vec![BcKind::None; num_faces],
            values: vec![0.0; num_faces],
        }
    }

    #[inline]
    pub fn get(&self, f: usize) -> (BcKind, f64) {
        (self.markers[f], self.values[f])
    }

    #[inline]
    fn set(&mut self, f: usize, kind: BcKind, value: f64) {
        self.markers[f] = kind;
        self.values[f] = value;
    }

    pub fn count(&self, kind: BcKind) -> usize {
        self.markers.iter().filter(|&&m| m == kind).count()
    }
}

/// How a subsurface domain exchanges data with the surface above it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CouplingMode {
    #[default]
    None,
    /// Surface pressure is imposed as a Dirichlet condition.
    ViaHead,
    /// Surface-subsurface exchange flux is imposed as a Neumann condition.
    ViaFlux,
}

impl CouplingMode {
    pub const HEAD_KEY: &'static str = "coupled to surface via head";
    pub const FLUX_KEY: &'static str = "coupled to surface via flux";

    /// The two coupling modes are exclusive.
    pub fn from_flags(via_head: bool, via_flux: bool) -> Result<Self, ConfigError> {
        match (via_head, via_flux) {
            (true, true) => Err(ConfigError::ConflictingCoupling {
                head_key: Self::HEAD_KEY.to_string(),
                flux_key: Self::FLUX_KEY.to_string(),
            }),
            (true, false) => Ok(CouplingMode::ViaHead),
            (false, true) => Ok(CouplingMode::ViaFlux),
            (false, false) => Ok(CouplingMode::None),
        }
    }

    pub fn is_coupled(&self) -> bool {
        !matches!(self, CouplingMode::None)
    }
}

/// Per-evaluation data the composer reads, all indexed by face id.
#[derive(Default)]
pub struct BoundaryData<'a> {
    /// Current value of the primary unknown on faces; required for seepage.
    pub face_values: Option<&'a DVector<f64>>,
    /// Upwinded coefficient on faces, used to linearize prescribed fluxes.
    pub face_coefficients: Option<&'a DVector<f64>>,
    /// Companion temperature on faces, used for freeze gating.
    pub face_temperatures: Option<&'a DVector<f64>>,
    /// Values from the coupled domain: pressure (head) or total flux (flux).
    pub coupled: Option<&'a [(usize, f64)]>,
}

/// Merges every boundary data source into one condition per face.
///
/// Precedence, highest first: coupled domain, seepage, prescribed flux,
/// prescribed value, default zero flux on boundary faces.
#[derive(Clone, Default)]
pub struct BoundaryConditionComposer {
    pub dirichlet: BoundaryFunction,
    pub flux: BoundaryFunction,
    /// Seepage faces; the value is the threshold pressure.
    pub seepage: BoundaryFunction,
    pub coupling: CouplingMode,
    pub infiltrate_only_if_unfrozen: bool,
    pub freezing_temperature: f64,
    pub divide_flux_by_coefficient: bool,
}

impl BoundaryConditionComposer {
    pub fn new(coupling: CouplingMode) -> Self {
        Self {
            coupling,
            freezing_temperature: 273.15,
            ..Default::default()
        }
    }

    /// Recompute all boundary data at time `t` and compose the conditions.
    pub fn compose(&mut self, t: f64, mesh: &Mesh, data: &BoundaryData<'_>) -> BoundaryConditions {
        self.dirichlet.compute(t, mesh);
        self.flux.compute(t, mesh);
        self.seepage.compute(t, mesh);

        // Lowest precedence first; later writes win.
        let mut bc = BoundaryConditions::new(mesh.num_faces());
        for &f in mesh.boundary_faces() {
            bc.set(f, BcKind::Neumann, 0.0);
        }

        for (f, value) in self.dirichlet.iter() {
            bc.set(f, BcKind::Dirichlet, value);
        }

        for (f, mut q) in self.flux.iter() {
            if self.infiltrate_only_if_unfrozen {
                let temps = data
                    .face_temperatures
                    .unwrap_or_else(|| panic!("freeze-gated flux condition needs face temperatures"));
                if temps[f] <= self.freezing_temperature {
                    q = 0.0;
                }
            }
            if self.divide_flux_by_coefficient {
                if let Some(coef) = data.face_coefficients {
                    if coef[f] > 0.0 {
                        q /= coef[f];
                    }
                }
            }
            bc.set(f, BcKind::Neumann, q);
        }

        if !self.seepage.is_empty() {
            let p = data
                .face_values
                .unwrap_or_else(|| panic!("seepage condition needs the current face values"));
            for (f, threshold) in self.seepage.iter() {
                if p[f] < threshold {
                    bc.set(f, BcKind::Neumann, 0.0);
                } else {
                    bc.set(f, BcKind::Dirichlet, threshold);
                }
            }
        }

        if let Some(coupled) = data.coupled {
            match self.coupling {
                CouplingMode::ViaHead => {
                    for &(f, p) in coupled {
                        bc.set(f, BcKind::Dirichlet, p);
                    }
                }
                CouplingMode::ViaFlux => {
                    for &(f, q) in coupled {
                        bc.set(f, BcKind::Neumann, q / mesh.faces[f].area);
                    }
                }
                CouplingMode::None => {}
            }
        }

        log::debug!(
            "composed boundary conditions at t = {t:.6e}: {} Dirichlet, {} Neumann",
            bc.count(BcKind::Dirichlet),
            bc.count(BcKind::Neumann)
        );
        bc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::create_column_mesh;
    use crate::physics::bc::BoundarySelector;

    fn surface_face(mesh: &Mesh) -> usize {
        mesh.faces_with_label("surface").next().unwrap()
    }

    #[test]
    fn interior_faces_stay_unconstrained() {
        let mesh = create_column_mesh(3, 3.0);
        let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
        let bc = composer.compose(0.0, &mesh, &BoundaryData::default());
        for (f, face) in mesh.faces.iter().enumerate() {
            let expected = if face.is_boundary() {
                BcKind::Neumann
            } else {
                BcKind::None
            };
            assert_eq!(bc.markers[f], expected);
        }
    }

    #[test]
    fn seepage_follows_face_pressure() {
        let mesh = create_column_mesh(2, 2.0);
        let top = surface_face(&mesh);
        let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
        composer.seepage.add(BoundarySelector::label("surface"), 0.0);

        let mut p = DVector::zeros(mesh.num_faces());
        p[top] = 5.0;
        let data = BoundaryData {
            face_values: Some(&p),
            ..Default::default()
        };
        assert_eq!(composer.compose(0.0, &mesh, &data).get(top), (BcKind::Dirichlet, 0.0));

        p[top] = -5.0;
        let data = BoundaryData {
            face_values: Some(&p),
            ..Default::default()
        };
        assert_eq!(composer.compose(0.0, &mesh, &data).get(top), (BcKind::Neumann, 0.0));
    }

    #[test]
    fn seepage_beats_prescribed_value() {
        let mesh = create_column_mesh(2, 2.0);
        let top = surface_face(&mesh);
        let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
        composer.dirichlet.add(BoundarySelector::label("surface"), 3.0);
        composer.flux.add(BoundarySelector::label("surface"), -1.0);
        composer.seepage.add(BoundarySelector::label("surface"), 101325.0);

        let p = DVector::from_element(mesh.num_faces(), 2e5);
        let data = BoundaryData {
            face_values: Some(&p),
            ..Default::default()
        };
        let bc = composer.compose(0.0, &mesh, &data);
        assert_eq!(bc.get(top), (BcKind::Dirichlet, 101325.0));
    }

    #[test]
    fn flux_gating_and_linearization() {
        let mesh = create_column_mesh(2, 2.0);
        let top = surface_face(&mesh);
        let mut composer = BoundaryConditionComposer::new(CouplingMode::None);
        composer.flux.add(BoundarySelector::label("surface"), -4.0);
        composer.infiltrate_only_if_unfrozen = true;
        composer.divide_flux_by_coefficient = true;

        let coef = DVector::from_element(mesh.num_faces(), 2.0);
        let mut temps = DVector::from_element(mesh.num_faces(), 280.0);
        let data = BoundaryData {
            face_coefficients: Some(&coef),
            face_temperatures: Some(&temps),
            ..Default::default()
        };
        assert_eq!(composer.compose(0.0, &mesh, &data).get(top), (BcKind::Neumann, -2.0));

        temps[top] = 273.15;
        let data = BoundaryData {
            face_coefficients: Some(&coef),
            face_temperatures: Some(&temps),
            ..Default::default()
        };
        assert_eq!(composer.compose(0.0, &mesh, &data).get(top), (BcKind::Neumann, 0.0));
    }

    #[test]
    fn coupling_overrides_everything() {
        let mesh = create_column_mesh(2, 2.0);
        let top = surface_face(&mesh);
        let mut composer = BoundaryConditionComposer::new(CouplingMode::ViaFlux);
        composer.dirichlet.add(BoundarySelector::label("surface"), 3.0);
        let coupled = [(top, -0.5)];
        let data = BoundaryData {
            coupled: Some(&coupled),
            ..Default::default()
        };
        let bc = composer.compose(0.0, &mesh, &data);
        assert_eq!(bc.get(top), (BcKind::Neumann, -0.5 / mesh.faces[top].area));

        composer.coupling = CouplingMode::ViaHead;
        let coupled = [(top, 9e4)];
        let data = BoundaryData {
            coupled: Some(&coupled),
            ..Default::default()
        };
        assert_eq!(composer.compose(0.0, &mesh, &data).get(top), (BcKind::Dirichlet, 9e4));
    }

    #[test]
    fn both_coupling_modes_is_an_error() {
        let err = CouplingMode::from_flags(true, true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(CouplingMode::HEAD_KEY) && msg.contains(CouplingMode::FLUX_KEY));
        assert_eq!(CouplingMode::from_flags(false, true).unwrap(), CouplingMode::ViaFlux);
    }
}
