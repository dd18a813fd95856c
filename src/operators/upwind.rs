use nalgebra::{DVector, Matrix3, Vector3};

use crate::discretization::mesh::Mesh;
use crate::state::composite::Entity;
use crate::state::State;

/// Tolerance used to decide the gravity direction is parallel to a face.
const GRAVITY_TOLERANCE: f64 = 1e-12;

/// How face values of a cell field are chosen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpwindMethod {
    /// Symmetric average of both sides.
    CellCentered,
    /// Average weighted by cell-to-face distances.
    ArithmeticMean,
    /// Upwind along `(K g) . n` of the first cell.
    GravityFlux,
    /// Upwind along the sign of a face flux field; averaged within `tolerance`.
    TotalFlux { tolerance: f64 },
}

/// Blend two candidates by direction. Positive direction selects the first
/// cell, negative the second, anything within the tolerance band averages.
#[inline]
pub fn upwind_select(a: f64, b: f64, direction: f64, tolerance: f64) -> f64 {
    if direction > tolerance {
        a
    } else if direction < -tolerance {
        b
    } else {
        0.5 * (a + b)
    }
}

/// `(K_c g) . n_f` for the first cell of every face.
pub fn gravity_directions(mesh: &Mesh, tensors: &[Matrix3<f64>], gravity: [f64; 3]) -> DVector<f64> {
    let g = Vector3::from(gravity);
    DVector::from_iterator(
        mesh.num_faces(),
        mesh.faces.iter().map(|face| {
            let n = Vector3::from(face.normal);
            (tensors[face.neighbor_cell_ids.0] * g).dot(&n)
        }),
    )
}

/// Lazily maps a cell field (optionally with boundary-face values) onto faces.
pub struct Upwinding {
    pub method: UpwindMethod,
    /// Name this upwinding uses when asking the graph for changes.
    requester: String,
    cell_key: String,
    face_key: String,
    direction_key: Option<String>,
    gravity_direction: Option<DVector<f64>>,
    updates: usize,
}

impl Upwinding {
    /// `face_key` must be a primary field with a face component; this
    /// upwinding is its only writer.
    pub fn new(method: UpwindMethod, cell_key: &str, face_key: &str) -> Self {
        Self {
            method,
            requester: format!("upwind:{face_key}"),
            cell_key: cell_key.to_string(),
            face_key: face_key.to_string(),
            direction_key: None,
            gravity_direction: None,
            updates: 0,
        }
    }

    /// Face flux field giving the direction for [`UpwindMethod::TotalFlux`].
    pub fn with_direction(mut self, direction_key: &str) -> Self {
        self.direction_key = Some(direction_key.to_string());
        self
    }

    /// Precomputed `(K g) . n` for [`UpwindMethod::GravityFlux`].
    pub fn with_gravity_direction(mut self, directions: DVector<f64>) -> Self {
        self.gravity_direction = Some(directions);
        self
    }

    pub fn face_key(&self) -> &str {
        &self.face_key
    }

    /// Number of times face values were actually recomputed.
    pub fn update_count(&self) -> usize {
        self.updates
    }

    /// Refresh the face field if the candidate or direction field changed.
    /// Returns whether the face field was rewritten.
    pub fn update(&mut self, state: &mut State) -> bool {
        let mut changed = state.has_changed(&self.cell_key, &self.requester);
        if let Some(dir) = &self.direction_key {
            changed |= state.has_changed(dir, &self.requester);
        }
        if !changed {
            return false;
        }

        let mesh = state.mesh().clone();
        let candidates = state.field(&self.cell_key);
        let cells = candidates.component(Entity::Cell);
        let boundary = candidates.get(Entity::BoundaryFace);
        let direction = self
            .direction_key
            .as_ref()
            .map(|key| state.field(key).component(Entity::Face));

        let mut out = DVector::zeros(mesh.num_faces());
        for (f, face) in mesh.faces.iter().enumerate() {
            let (c0, c1) = face.neighbor_cell_ids;
            let a = cells[c0];
            let b = match c1 {
                Some(c1) => cells[c1],
                None => match (boundary, mesh.boundary_face_index(f)) {
                    (Some(bv), Some(bf)) => bv[bf],
                    _ => a,
                },
            };

            out[f] = match self.method {
                UpwindMethod::CellCentered => 0.5 * (a + b),
                UpwindMethod::ArithmeticMean => {
                    let x_f = face.centroid_vec();
                    let d0 = mesh.cells[c0].centroid_vec().distance(x_f);
                    let d1 = c1.map_or(0.0, |c1| mesh.cells[c1].centroid_vec().distance(x_f));
                    if d0 + d1 > 0.0 {
                        (d1 * a + d0 * b) / (d0 + d1)
                    } else {
                        0.5 * (a + b)
                    }
                }
                UpwindMethod::GravityFlux => {
                    let dirs = self.gravity_direction.as_ref().unwrap_or_else(|| {
                        panic!("gravity upwinding of '{}' has no gravity directions", self.face_key)
                    });
                    upwind_select(a, b, dirs[f], GRAVITY_TOLERANCE)
                }
                UpwindMethod::TotalFlux { tolerance } => {
                    let dir = direction.unwrap_or_else(|| {
                        panic!("total-flux upwinding of '{}' has no direction field", self.face_key)
                    });
                    upwind_select(a, b, dir[f], tolerance)
                }
            };
        }

        state
            .primary_mut(&self.face_key)
            .component_mut(Entity::Face)
            .copy_from(&out);
        self.updates += 1;
        log::debug!("upwinded '{}' onto '{}'", self.cell_key, self.face_key);
        true
    }
}
