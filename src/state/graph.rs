use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::state::evaluator::{Evaluator, FieldKey};

#[derive(Clone, Default)]
pub(crate) struct DerivativeRecord {
    pub version: u64,
    pub consumed: Option<Vec<u64>>,
    pub reported: HashMap<String, u64>,
}

/// Bookkeeping for one evaluator inside a graph.
#[derive(Clone)]
pub(crate) struct Node {
    pub evaluator: Arc<Evaluator>,
    /// Node index of each declared dependency, in declaration order.
    pub dep_nodes: Vec<usize>,
    pub version: u64,
    pub computed: bool,
    /// Dependency versions consumed by the last evaluation.
    pub consumed: Vec<u64>,
    /// Time at which an independent node was last evaluated.
    pub computed_at: Option<f64>,
    pub evaluations: usize,
    pub reported: HashMap<String, u64>,
    pub derivatives: HashMap<FieldKey, DerivativeRecord>,
}

/// Directed acyclic graph of evaluators keyed by field name.
#[derive(Clone, Default)]
pub struct EvaluatorGraph {
    pub(crate) nodes: Vec<Node>,
    index: HashMap<FieldKey, usize>,
    /// Per node: the node and its transitive dependencies in topological order.
    pub(crate) ancestors: Vec<Vec<usize>>,
    finalized: bool,
}

impl EvaluatorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an evaluator. Each field may have exactly one writer.
    pub fn register(&mut self, evaluator: Evaluator) -> Result<usize, ConfigError> {
        for key in &evaluator.keys {
            if self.index.contains_key(key) {
                return Err(ConfigError::DuplicateEvaluator { key: key.clone() });
            }
        }
        let id = self.nodes.len();
        for key in &evaluator.keys {
            self.index.insert(key.clone(), id);
        }
        self.nodes.push(Node {
            evaluator: Arc::new(evaluator),
            dep_nodes: Vec::new(),
            version: 0,
            computed: false,
            consumed: Vec::new(),
            computed_at: None,
            evaluations: 0,
            reported: HashMap::new(),
            derivatives: HashMap::new(),
        });
        self.finalized = false;
        Ok(id)
    }

    /// Resolve dependencies and check the graph is acyclic.
    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        for node in self.nodes.iter_mut() {
            let mut dep_nodes = Vec::with_capacity(node.evaluator.dependencies().len());
            for dep in node.evaluator.dependencies() {
                let Some(&d) = self.index.get(dep) else {
                    return Err(ConfigError::MissingEvaluator {
                        key: node.evaluator.keys[0].clone(),
                        dependency: dep.clone(),
                    });
                };
                dep_nodes.push(d);
            }
            node.dep_nodes = dep_nodes;
        }

        let order = self.topological_order()?;
        let mut position = vec![0; self.nodes.len()];
        for (pos, &n) in order.iter().enumerate() {
            position[n] = pos;
        }

        self.ancestors = (0..self.nodes.len())
            .map(|n| {
                let mut seen = vec![false; self.nodes.len()];
                let mut stack = vec![n];
                let mut chain = Vec::new();
                while let Some(m) = stack.pop() {
                    if seen[m] {
                        continue;
                    }
                    seen[m] = true;
                    chain.push(m);
                    stack.extend(self.nodes[m].dep_nodes.iter().copied());
                }
                chain.sort_by_key(|&m| position[m]);
                chain
            })
            .collect();

        self.finalized = true;
        log::debug!("evaluator graph finalized with {} nodes", self.nodes.len());
        Ok(())
    }

    /// Kahn's algorithm over dependency -> dependent edges.
    fn topological_order(&self) -> Result<Vec<usize>, ConfigError> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (m, node) in self.nodes.iter().enumerate() {
            let mut deps = node.dep_nodes.clone();
            deps.sort_unstable();
            deps.dedup();
            indegree[m] = deps.len();
            for d in deps {
                dependents[d].push(m);
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&m| indegree[m] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(m) = queue.pop_front() {
            order.push(m);
            for &k in &dependents[m] {
                indegree[k] -= 1;
                if indegree[k] == 0 {
                    queue.push_back(k);
                }
            }
        }

        if order.len() < n {
            let stuck = (0..n).find(|&m| indegree[m] > 0).unwrap_or(0);
            return Err(ConfigError::DependencyCycle {
                key: self.nodes[stuck].evaluator.keys[0].clone(),
            });
        }
        Ok(order)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Node index for `key`. Unknown keys are a wiring defect.
    pub(crate) fn node_of(&self, key: &str) -> usize {
        *self
            .index
            .get(key)
            .unwrap_or_else(|| panic!("no evaluator registered for field '{key}'"))
    }

    pub fn evaluator(&self, key: &str) -> &Evaluator {
        &self.nodes[self.node_of(key)].evaluator
    }

    /// Whether `dependency` is a direct dependency of `key`.
    pub fn depends_on(&self, key: &str, dependency: &str) -> bool {
        self.evaluator(key)
            .dependencies()
            .iter()
            .any(|d| d == dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_of(keys: &[&str], deps: &[&str]) -> Evaluator {
        Evaluator::secondary(keys, deps, |_, _| {})
    }

    #[test]
    fn cycle_is_a_config_error() {
        let mut graph = EvaluatorGraph::new();
        graph.register(Evaluator::primary("pressure")).unwrap();
        graph.register(sum_of(&["a"], &["pressure", "b"])).unwrap();
        graph.register(sum_of(&["b"], &["a"])).unwrap();

        match graph.finalize() {
            Err(ConfigError::DependencyCycle { key }) => assert!(key == "a" || key == "b"),
            other => panic!("expected a cycle error, got {:?}", other.err()),
        }
    }

    #[test]
    fn missing_dependency_names_both_keys() {
        let mut graph = EvaluatorGraph::new();
        graph.register(sum_of(&["water_content"], &["porosity"])).unwrap();
        let err = graph.finalize().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("water_content") && msg.contains("porosity"), "{msg}");
    }

    #[test]
    fn second_writer_is_rejected() {
        let mut graph = EvaluatorGraph::new();
        graph.register(Evaluator::primary("pressure")).unwrap();
        assert!(matches!(
            graph.register(Evaluator::constant("pressure", 1.0)),
            Err(ConfigError::DuplicateEvaluator { .. })
        ));
    }

    #[test]
    fn ancestors_are_topologically_sorted() {
        let mut graph = EvaluatorGraph::new();
        graph.register(sum_of(&["c"], &["b", "a"])).unwrap();
        graph.register(sum_of(&["b"], &["a"])).unwrap();
        graph.register(Evaluator::primary("a")).unwrap();
        graph.finalize().unwrap();

        let chain = &graph.ancestors[graph.node_of("c")];
        let keys: Vec<&str> = chain
            .iter()
            .map(|&n| graph.nodes[n].evaluator.keys[0].as_str())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
