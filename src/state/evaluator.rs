use std::collections::HashMap;
use std::sync::Arc;

use crate::discretization::mesh::Mesh;
use crate::state::composite::CompositeVector;

pub type FieldKey = String;

/// Read-only view handed to evaluator closures while they compute.
pub struct EvalContext<'a> {
    pub(crate) fields: &'a HashMap<FieldKey, CompositeVector>,
    pub mesh: &'a Mesh,
    pub time: f64,
    pub gravity: [f64; 3],
    pub(crate) scalars: &'a HashMap<String, f64>,
}

impl EvalContext<'_> {
    pub fn field(&self, key: &str) -> &CompositeVector {
        self.fields
            .get(key)
            .unwrap_or_else(|| panic!("field '{key}' is not available to this evaluator"))
    }

    pub fn scalar(&self, name: &str) -> f64 {
        *self
            .scalars
            .get(name)
            .unwrap_or_else(|| panic!("scalar '{name}' was never set"))
    }
}

/// Pointwise model: fills every output (same order as the evaluator keys).
pub type ValueFn = Arc<dyn Fn(&EvalContext<'_>, &mut [CompositeVector]) + Send + Sync>;

/// Partial derivative model: `(ctx, output key, wrt key, result)`.
pub type DerivativeFn = Arc<dyn Fn(&EvalContext<'_>, &str, &str, &mut CompositeVector) + Send + Sync>;

/// Independent model: `(time, mesh, result)`.
pub type IndependentFn = Arc<dyn Fn(f64, &Mesh, &mut CompositeVector) + Send + Sync>;

#[derive(Clone)]
pub enum EvaluatorKind {
    /// Written by the solver or by a coupler; only `mark_changed` bumps it.
    Primary,
    /// Function of time and mesh only.
    Independent {
        func: IndependentFn,
        time_dependent: bool,
    },
    /// Pointwise closure over declared dependencies.
    Secondary {
        dependencies: Vec<FieldKey>,
        value: ValueFn,
        derivative: Option<DerivativeFn>,
    },
}

/// The computation rule for one or more fields.
#[derive(Clone)]
pub struct Evaluator {
    pub keys: Vec<FieldKey>,
    pub kind: EvaluatorKind,
}

impl Evaluator {
    pub fn primary(key: &str) -> Self {
        Self {
            keys: vec![key.to_string()],
            kind: EvaluatorKind::Primary,
        }
    }

    pub fn independent<F>(key: &str, time_dependent: bool, func: F) -> Self
    where
        F: Fn(f64, &Mesh, &mut CompositeVector) + Send + Sync + 'static,
    {
        Self {
            keys: vec![key.to_string()],
            kind: EvaluatorKind::Independent {
                func: Arc::new(func),
                time_dependent,
            },
        }
    }

    /// A time-independent field holding the same value everywhere.
    pub fn constant(key: &str, value: f64) -> Self {
        Self::independent(key, false, move |_, _, out| out.put_scalar(value))
    }

    pub fn secondary<F>(keys: &[&str], dependencies: &[&str], value: F) -> Self
    where
        F: Fn(&EvalContext<'_>, &mut [CompositeVector]) + Send + Sync + 'static,
    {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            kind: EvaluatorKind::Secondary {
                dependencies: dependencies.iter().map(|k| k.to_string()).collect(),
                value: Arc::new(value),
                derivative: None,
            },
        }
    }

    /// Attach a partial derivative model. Only secondary evaluators carry one.
    pub fn with_derivative<F>(mut self, derivative: F) -> Self
    where
        F: Fn(&EvalContext<'_>, &str, &str, &mut CompositeVector) + Send + Sync + 'static,
    {
        match &mut self.kind {
            EvaluatorKind::Secondary { derivative: d, .. } => *d = Some(Arc::new(derivative)),
            _ => panic!(
                "'{}' is not a secondary evaluator and cannot carry derivatives",
                self.keys[0]
            ),
        }
        self
    }

    pub fn dependencies(&self) -> &[FieldKey] {
        match &self.kind {
            EvaluatorKind::Secondary { dependencies, .. } => dependencies,
            _ => &[],
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.kind, EvaluatorKind::Primary)
    }
}

/// Name of the field holding `d{key}/d{wrt}`.
pub fn derivative_key(key: &str, wrt: &str) -> FieldKey {
    format!("d{key}_d{wrt}")
}
