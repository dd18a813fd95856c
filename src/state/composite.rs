use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::discretization::mesh::Mesh;

/// Mesh entity kind a component of a [`CompositeVector`] lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Cell,
    Face,
    BoundaryFace,
}

/// A field defined over one or more mesh entity kinds, one dof per entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeVector {
    components: BTreeMap<Entity, DVector<f64>>,
}

impl CompositeVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, entity: Entity, n: usize) -> Self {
        self.components.insert(entity, DVector::zeros(n));
        self
    }

    /// Zero vector on cells only.
    pub fn cells(mesh: &Mesh) -> Self {
        Self::new().with_component(Entity::Cell, mesh.num_cells())
    }

    /// Zero vector on cells and all faces.
    pub fn cells_and_faces(mesh: &Mesh) -> Self {
        Self::cells(mesh).with_component(Entity::Face, mesh.num_faces())
    }

    /// Zero vector on cells and boundary faces.
    pub fn cells_and_boundary(mesh: &Mesh) -> Self {
        Self::cells(mesh).with_component(Entity::BoundaryFace, mesh.num_boundary_faces())
    }

    pub fn faces(mesh: &Mesh) -> Self {
        Self::new().with_component(Entity::Face, mesh.num_faces())
    }

    pub fn from_cells(values: DVector<f64>) -> Self {
        let mut cv = Self::new();
        cv.components.insert(Entity::Cell, values);
        cv
    }

    /// Zero vector with the same components and sizes as `self`.
    pub fn like(&self) -> Self {
        Self {
            components: self
                .components
                .iter()
                .map(|(e, v)| (*e, DVector::zeros(v.len())))
                .collect(),
        }
    }

    pub fn has_component(&self, entity: Entity) -> bool {
        self.components.contains_key(&entity)
    }

    pub fn get(&self, entity: Entity) -> Option<&DVector<f64>> {
        self.components.get(&entity)
    }

    pub fn component(&self, entity: Entity) -> &DVector<f64> {
        self.components
            .get(&entity)
            .unwrap_or_else(|| panic!("composite vector has no {entity:?} component"))
    }

    pub fn component_mut(&mut self, entity: Entity) -> &mut DVector<f64> {
        self.components
            .get_mut(&entity)
            .unwrap_or_else(|| panic!("composite vector has no {entity:?} component"))
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.components.keys().copied()
    }

    pub fn put_scalar(&mut self, value: f64) {
        for v in self.components.values_mut() {
            v.fill(value);
        }
    }

    /// `self = alpha * other + beta * self`, component by component.
    pub fn update(&mut self, alpha: f64, other: &CompositeVector, beta: f64) {
        for (e, v) in self.components.iter_mut() {
            let o = other.component(*e);
            v.axpy(alpha, o, beta);
        }
    }

    pub fn scale(&mut self, alpha: f64) {
        for v in self.components.values_mut() {
            *v *= alpha;
        }
    }

    pub fn norm_inf(&self) -> f64 {
        self.components
            .values()
            .map(|v| v.amax())
            .fold(0.0, f64::max)
    }

    pub fn dot(&self, other: &CompositeVector) -> f64 {
        self.components
            .iter()
            .map(|(e, v)| v.dot(other.component(*e)))
            .sum()
    }

    /// Total number of dofs across all components.
    pub fn len(&self) -> usize {
        self.components.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate the components in entity order.
    pub fn to_flat(&self) -> DVector<f64> {
        let mut flat = DVector::zeros(self.len());
        let mut offset = 0;
        for v in self.components.values() {
            flat.rows_mut(offset, v.len()).copy_from(v);
            offset += v.len();
        }
        flat
    }

    /// Inverse of [`to_flat`](Self::to_flat), shaped like `self`.
    pub fn from_flat_like(&self, flat: &DVector<f64>) -> Self {
        assert_eq!(flat.len(), self.len(), "flat vector has the wrong length");
        let mut out = self.like();
        let mut offset = 0;
        for v in out.components.values_mut() {
            let n = v.len();
            v.copy_from(&flat.rows(offset, n));
            offset += n;
        }
        out
    }
}
