use std::collections::BTreeMap;
use std::sync::Arc;

use crate::discretization::mesh::{Face, Mesh};

/// Geometric point in space.
#[derive(Clone, Copy, Debug)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Outward pointing unit normal.
#[derive(Clone, Copy, Debug)]
pub struct Normal {
    pub nx: f64,
    pub ny: f64,
    pub nz: f64,
}

/// Shared function type for boundary data that may depend on time, position and normal.
pub type SFn = Arc<dyn Fn(f64, Point, Normal) -> f64 + Send + Sync>;

/// Local trait allowing convenient conversion into [`SFn`].
pub trait IntoSFn {
    fn into_sfn(self) -> SFn;
}

fn c(val: f64) -> SFn {
    Arc::new(move |_, _, _| val)
}

impl IntoSFn for f64 {
    fn into_sfn(self) -> SFn {
        c(self)
    }
}

impl<F> IntoSFn for F
where
    F: Fn(f64, Point, Normal) -> f64 + Send + Sync + 'static,
{
    fn into_sfn(self) -> SFn {
        Arc::new(self)
    }
}

#[derive(Clone)]
pub enum BoundarySelector {
    Label(String),
    Faces(Vec<usize>),
    Predicate(Arc<dyn Fn(Point, Normal) -> bool + Send + Sync>),
}

impl BoundarySelector {
    pub fn label(label: &str) -> Self {
        BoundarySelector::Label(label.to_string())
    }

    fn matches(&self, f: usize, face: &Face) -> bool {
        match self {
            BoundarySelector::Label(l) => face.label.as_deref() == Some(l.as_str()),
            BoundarySelector::Faces(ids) => ids.contains(&f),
            BoundarySelector::Predicate(pred) => {
                let (p, n) = face_geometry(face);
                pred(p, n)
            }
        }
    }
}

#[derive(Clone)]
struct BcRule {
    on: BoundarySelector,
    value: SFn,
}

/// Boundary data on a set of boundary faces, evaluated on demand at a time.
///
/// When several rules select the same face the one added last wins.
#[derive(Clone, Default)]
pub struct BoundaryFunction {
    rules: Vec<BcRule>,
    values: BTreeMap<usize, f64>,
    computed_at: Option<f64>,
}

impl BoundaryFunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, on: BoundarySelector, value: impl IntoSFn) {
        self.rules.push(BcRule {
            on,
            value: value.into_sfn(),
        });
        self.computed_at = None;
    }

    pub fn with(mut self, on: BoundarySelector, value: impl IntoSFn) -> Self {
        self.add(on, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule on the boundary faces it selects at time `t`.
    pub fn compute(&mut self, t: f64, mesh: &Mesh) {
        self.values.clear();
        for &f in mesh.boundary_faces() {
            let face = &mesh.faces[f];
            if let Some(rule) = self.rules.iter().rev().find(|r| r.on.matches(f, face)) {
                let (p, n) = face_geometry(face);
                self.values.insert(f, (rule.value)(t, p, n));
            }
        }
        self.computed_at = Some(t);
    }

    pub fn computed_at(&self) -> Option<f64> {
        self.computed_at
    }

    /// (face, value) pairs from the last [`compute`](Self::compute), by face id.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.values.iter().map(|(&f, &v)| (f, v))
    }

    pub fn get(&self, f: usize) -> Option<f64> {
        self.values.get(&f).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Create Point and Normal from face geometry.
#[inline]
pub fn face_geometry(face: &Face) -> (Point, Normal) {
    let p = Point {
        x: face.centroid[0],
        y: face.centroid[1],
        z: face.centroid[2],
    };
    let n = Normal {
        nx: face.normal[0],
        ny: face.normal[1],
        nz: face.normal[2],
    };
    (p, n)
}
