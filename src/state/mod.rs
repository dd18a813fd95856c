//! Field container and the lazy evaluation walk over its evaluator graph.
//!
//! A [`State`] owns every field of one time level together with its own copy
//! of the evaluator graph, so change tracking is independent per level.
//! Cloning a state yields an independent level sharing only the immutable
//! evaluator closures and the mesh.

pub mod composite;
pub mod evaluator;
pub mod graph;

use std::collections::HashMap;
use std::sync::Arc;

use crate::discretization::mesh::Mesh;
use crate::error::ConfigError;
use composite::CompositeVector;
use evaluator::{derivative_key, EvalContext, Evaluator, EvaluatorKind, FieldKey};
use graph::EvaluatorGraph;

#[derive(Clone)]
pub struct State {
    mesh: Arc<Mesh>,
    fields: HashMap<FieldKey, CompositeVector>,
    graph: EvaluatorGraph,
    scalars: HashMap<String, f64>,
    pub gravity: [f64; 3],
    time: f64,
    cycle: usize,
}

impl State {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            fields: HashMap::new(),
            graph: EvaluatorGraph::new(),
            scalars: HashMap::new(),
            gravity: [0.0, 0.0, -9.80665],
            time: 0.0,
            cycle: 0,
        }
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// Register `evaluator` and allocate its output fields shaped like `structure`.
    pub fn require_evaluator(
        &mut self,
        evaluator: Evaluator,
        structure: CompositeVector,
    ) -> Result<(), ConfigError> {
        let keys = evaluator.keys.clone();
        self.graph.register(evaluator)?;
        for key in keys {
            self.fields.entry(key).or_insert_with(|| structure.clone());
        }
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        self.graph.finalize()
    }

    pub fn graph(&self) -> &EvaluatorGraph {
        &self.graph
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Current value of `key`, as last computed. Does not trigger an update.
    pub fn field(&self, key: &str) -> &CompositeVector {
        self.fields
            .get(key)
            .unwrap_or_else(|| panic!("field '{key}' was never declared"))
    }

    /// Mutable access to a primary field; marks it changed.
    pub fn primary_mut(&mut self, key: &str) -> &mut CompositeVector {
        self.mark_changed(key);
        self.fields
            .get_mut(key)
            .unwrap_or_else(|| panic!("field '{key}' was never declared"))
    }

    pub fn set_primary(&mut self, key: &str, value: CompositeVector) {
        *self.primary_mut(key) = value;
    }

    /// Bump the version of a primary field after it was written.
    pub fn mark_changed(&mut self, key: &str) {
        let n = self.graph.node_of(key);
        let node = &mut self.graph.nodes[n];
        if !node.evaluator.is_primary() {
            panic!("field '{key}' is owned by its evaluator and cannot be written directly");
        }
        node.version += 1;
        node.computed = true;
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) {
        self.scalars.insert(name.to_string(), value);
    }

    pub fn scalar(&self, name: &str) -> f64 {
        *self
            .scalars
            .get(name)
            .unwrap_or_else(|| panic!("scalar '{name}' was never set"))
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn advance_cycle(&mut self) {
        self.cycle += 1;
    }

    /// Number of times the model behind `key` has been evaluated.
    pub fn evaluation_count(&self, key: &str) -> usize {
        self.graph.nodes[self.graph.node_of(key)].evaluations
    }

    pub fn depends_on(&self, key: &str, dependency: &str) -> bool {
        self.graph.depends_on(key, dependency)
    }

    /// Bring `key` up to date and report whether it changed since `requester`
    /// last asked.
    pub fn has_changed(&mut self, key: &str, requester: &str) -> bool {
        let n = self.graph.node_of(key);
        self.update_chain(n);
        let node = &mut self.graph.nodes[n];
        let version = node.version;
        node.reported.insert(requester.to_string(), version) != Some(version)
    }

    /// Bring `d{key}_d{wrt}` up to date and report whether it changed since
    /// `requester` last asked. `wrt` must be `key` itself or a direct dependency.
    pub fn has_derivative_changed(&mut self, key: &str, requester: &str, wrt: &str) -> bool {
        let n = self.graph.node_of(key);
        self.update_chain(n);
        let dkey = derivative_key(key, wrt);
        let evaluator = Arc::clone(&self.graph.nodes[n].evaluator);

        let current: Vec<u64> = if wrt == key {
            Vec::new()
        } else {
            let EvaluatorKind::Secondary { dependencies, .. } = &evaluator.kind else {
                panic!("'{key}' has no dependencies; cannot differentiate with respect to '{wrt}'");
            };
            if !dependencies.iter().any(|d| d == wrt) {
                panic!(
                    "derivative of '{key}' with respect to '{wrt}' requested, but '{wrt}' is not a direct dependency"
                );
            }
            self.graph.nodes[n]
                .dep_nodes
                .iter()
                .map(|&d| self.graph.nodes[d].version)
                .collect()
        };

        let stale = self.graph.nodes[n]
            .derivatives
            .get(&dkey)
            .and_then(|r| r.consumed.as_ref())
            != Some(&current);

        if stale {
            let mut out = self
                .fields
                .remove(&dkey)
                .unwrap_or_else(|| self.field(key).like());
            if wrt == key {
                out.put_scalar(1.0);
            } else {
                let EvaluatorKind::Secondary {
                    derivative: Some(derivative),
                    ..
                } = &evaluator.kind
                else {
                    panic!("evaluator for '{key}' provides no partial derivatives");
                };
                let ctx = EvalContext {
                    fields: &self.fields,
                    mesh: &self.mesh,
                    time: self.time,
                    gravity: self.gravity,
                    scalars: &self.scalars,
                };
                derivative(&ctx, key, wrt, &mut out);
            }
            self.fields.insert(dkey.clone(), out);
            log::trace!("recomputed derivative '{dkey}'");

            let record = self.graph.nodes[n].derivatives.entry(dkey.clone()).or_default();
            record.consumed = Some(current);
            record.version += 1;
        }

        let record = self.graph.nodes[n].derivatives.entry(dkey).or_default();
        let version = record.version;
        record.reported.insert(requester.to_string(), version) != Some(version)
    }

    fn update_chain(&mut self, n: usize) {
        assert!(
            self.graph.is_finalized(),
            "evaluator graph used before finalize()"
        );
        for i in 0..self.graph.ancestors[n].len() {
            let m = self.graph.ancestors[n][i];
            self.update_node(m);
        }
    }

    fn update_node(&mut self, n: usize) {
        let evaluator = Arc::clone(&self.graph.nodes[n].evaluator);
        match &evaluator.kind {
            EvaluatorKind::Primary => {}
            EvaluatorKind::Independent {
                func,
                time_dependent,
            } => {
                let node = &self.graph.nodes[n];
                let stale =
                    !node.computed || (*time_dependent && node.computed_at != Some(self.time));
                if !stale {
                    return;
                }
                for key in &evaluator.keys {
                    let out = self
                        .fields
                        .get_mut(key)
                        .unwrap_or_else(|| panic!("field '{key}' was never declared"));
                    func(self.time, &self.mesh, out);
                }
                let node = &mut self.graph.nodes[n];
                node.computed = true;
                node.computed_at = Some(self.time);
                node.version += 1;
                node.evaluations += 1;
                log::debug!("evaluated independent field '{}'", evaluator.keys[0]);
            }
            EvaluatorKind::Secondary { value, .. } => {
                let current: Vec<u64> = self.graph.nodes[n]
                    .dep_nodes
                    .iter()
                    .map(|&d| self.graph.nodes[d].version)
                    .collect();
                let node = &self.graph.nodes[n];
                if node.computed && node.consumed == current {
                    return;
                }

                let mut outputs: Vec<CompositeVector> = evaluator
                    .keys
                    .iter()
                    .map(|k| {
                        self.fields
                            .remove(k)
                            .unwrap_or_else(|| panic!("field '{k}' was never declared"))
                    })
                    .collect();
                {
                    let ctx = EvalContext {
                        fields: &self.fields,
                        mesh: &self.mesh,
                        time: self.time,
                        gravity: self.gravity,
                        scalars: &self.scalars,
                    };
                    value(&ctx, &mut outputs);
                }
                for (k, v) in evaluator.keys.iter().zip(outputs) {
                    self.fields.insert(k.clone(), v);
                }

                let node = &mut self.graph.nodes[n];
                node.consumed = current;
                node.computed = true;
                node.version += 1;
                node.evaluations += 1;
                log::debug!(
                    "recomputed '{}' (version {})",
                    evaluator.keys[0],
                    node.version
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::create_line_mesh;
    use crate::state::composite::Entity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doubling_state(counter: Arc<AtomicUsize>) -> State {
        let mesh = Arc::new(create_line_mesh(3, 3.0));
        let mut state = State::new(mesh.clone());
        let cells = CompositeVector::cells(&mesh);
        state
            .require_evaluator(Evaluator::primary("pressure"), cells.clone())
            .unwrap();
        state
            .require_evaluator(Evaluator::constant("porosity", 0.5), cells.clone())
            .unwrap();
        let ev = Evaluator::secondary(&["storage"], &["pressure", "porosity"], move |ctx, out| {
            counter.fetch_add(1, Ordering::SeqCst);
            let p = ctx.field("pressure").component(Entity::Cell);
            let phi = ctx.field("porosity").component(Entity::Cell);
            out[0].component_mut(Entity::Cell).copy_from(&p.component_mul(phi));
        })
        .with_derivative(|ctx, _key, wrt, out| match wrt {
            "pressure" => out
                .component_mut(Entity::Cell)
                .copy_from(ctx.field("porosity").component(Entity::Cell)),
            _ => out
                .component_mut(Entity::Cell)
                .copy_from(ctx.field("pressure").component(Entity::Cell)),
        });
        state.require_evaluator(ev, cells).unwrap();
        state.finalize().unwrap();
        state
    }

    #[test]
    fn unchanged_dependencies_do_no_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter.clone());

        assert!(state.has_changed("storage", "test"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(!state.has_changed("storage", "test"));
        assert!(!state.has_changed("storage", "test"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(state.evaluation_count("storage"), 1);

        state.primary_mut("pressure").put_scalar(4.0);
        assert!(state.has_changed("storage", "test"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(state.field("storage").component(Entity::Cell)[1], 2.0);
    }

    #[test]
    fn requesters_are_tracked_separately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter.clone());
        assert!(state.has_changed("storage", "a"));
        assert!(state.has_changed("storage", "b"));
        assert!(!state.has_changed("storage", "a"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derivative_is_memoized() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter);
        assert!(state.has_derivative_changed("storage", "test", "pressure"));
        assert!(!state.has_derivative_changed("storage", "test", "pressure"));
        let d = state.field("dstorage_dpressure").component(Entity::Cell);
        assert_eq!(d[0], 0.5);

        state.primary_mut("pressure").put_scalar(1.0);
        assert!(state.has_derivative_changed("storage", "test", "pressure"));
    }

    #[test]
    fn derivative_with_respect_to_itself_is_one() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter);
        state.has_derivative_changed("pressure", "test", "pressure");
        assert_eq!(
            state.field("dpressure_dpressure").component(Entity::Cell)[2],
            1.0
        );
    }

    #[test]
    #[should_panic(expected = "not a direct dependency")]
    fn derivative_wrt_non_dependency_panics() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter);
        state.has_derivative_changed("storage", "test", "temperature");
    }

    #[test]
    #[should_panic(expected = "no evaluator registered")]
    fn unknown_field_panics() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut state = doubling_state(counter);
        state.has_changed("enthalpy", "test");
    }

    #[test]
    fn cloned_levels_track_changes_independently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut new = doubling_state(counter.clone());
        new.has_changed("storage", "pk");
        let mut old = new.clone();

        new.primary_mut("pressure").put_scalar(2.0);
        assert!(!old.has_changed("storage", "pk"));
        assert!(new.has_changed("storage", "pk"));
        assert_eq!(old.field("storage").component(Entity::Cell)[0], 0.0);
        assert_eq!(new.field("storage").component(Entity::Cell)[0], 1.0);
    }

    #[test]
    fn time_dependent_independent_tracks_time() {
        let mesh = Arc::new(create_line_mesh(2, 2.0));
        let mut state = State::new(mesh.clone());
        state
            .require_evaluator(
                Evaluator::independent("source", true, |t, _, out| out.put_scalar(t)),
                CompositeVector::cells(&mesh),
            )
            .unwrap();
        state.finalize().unwrap();

        state.has_changed("source", "pk");
        assert!(!state.has_changed("source", "pk"));
        state.set_time(3.0);
        assert!(state.has_changed("source", "pk"));
        assert_eq!(state.field("source").component(Entity::Cell)[1], 3.0);
    }
}
