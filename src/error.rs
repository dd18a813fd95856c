use thiserror::Error;

/// Setup-time failures. Fatal; each variant names the offending key.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("'{head_key}' and '{flux_key}' cannot both be enabled")]
    ConflictingCoupling { head_key: String, flux_key: String },

    #[error("evaluator dependency cycle through field '{key}'")]
    DependencyCycle { key: String },

    #[error("field '{key}' depends on '{dependency}', which has no evaluator")]
    MissingEvaluator { key: String, dependency: String },

    #[error("field '{key}' already has an evaluator")]
    DuplicateEvaluator { key: String },
}

impl ConfigError {
    pub fn invalid(key: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Run-time numerical failures, reported to the caller for a retry decision.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("linear solve failed after {iterations} iterations (residual {residual:.3e})")]
    LinearSolveFailed { iterations: usize, residual: f64 },

    #[error("singular operator in linear solve")]
    SingularOperator,

    #[error("Newton's method failed to converge in {iterations} iterations (error {error:.3e})")]
    NonConvergence { iterations: usize, error: f64 },

    #[error("inadmissible iterate: {0}")]
    Inadmissible(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_key() {
        let err = ConfigError::invalid("upwind method", "sideways", "unknown upwinding method");
        let msg = err.to_string();
        assert!(msg.contains("upwind method"));
        assert!(msg.contains("sideways"));
    }
}
