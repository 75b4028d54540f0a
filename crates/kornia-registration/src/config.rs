use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::parallel::ExecutionStrategy;

/// Parameters shared by all the estimators.
///
/// The closed-form estimators only read `min_reciprocal_condition` and
/// `execution`; the combined-metric estimators read the term weights and the
/// iterative ones the iteration budget and tolerance as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum number of Gauss-Newton iterations.
    ///
    /// Defaults to a single linearization step, which is what an outer ICP loop
    /// re-running the correspondence search every round usually wants.
    pub max_iterations: usize,
    /// The iterations stop once the norm of the incremental update drops below this value.
    pub convergence_tolerance: f64,
    /// Global weight of the point-to-point terms.
    pub point_to_point_weight: f64,
    /// Global weight of the point-to-plane terms.
    pub point_to_plane_weight: f64,
    /// Normal-equation systems whose reciprocal condition number is below this
    /// value are reported as ill conditioned. The threshold only changes the
    /// status, never the solution. Zero only flags singular systems.
    pub min_reciprocal_condition: f64,
    /// How the per-correspondence accumulation is executed.
    pub execution: ExecutionStrategy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            convergence_tolerance: 1e-5,
            point_to_point_weight: 0.1,
            point_to_plane_weight: 1.0,
            min_reciprocal_condition: 1e-12,
            execution: ExecutionStrategy::default(),
        }
    }
}

impl SolverConfig {
    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the convergence tolerance on the update norm.
    pub fn with_convergence_tolerance(mut self, convergence_tolerance: f64) -> Self {
        self.convergence_tolerance = convergence_tolerance;
        self
    }

    /// Set the global weights of the point-to-point and point-to-plane terms.
    pub fn with_weights(mut self, point_to_point_weight: f64, point_to_plane_weight: f64) -> Self {
        self.point_to_point_weight = point_to_point_weight;
        self.point_to_plane_weight = point_to_plane_weight;
        self
    }

    /// Set the ill-conditioning threshold.
    pub fn with_min_reciprocal_condition(mut self, min_reciprocal_condition: f64) -> Self {
        self.min_reciprocal_condition = min_reciprocal_condition;
        self
    }

    /// Set the execution strategy.
    pub fn with_execution(mut self, execution: ExecutionStrategy) -> Self {
        self.execution = execution;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let non_negative = [
            ("convergence_tolerance", self.convergence_tolerance),
            ("point_to_point_weight", self.point_to_point_weight),
            ("point_to_plane_weight", self.point_to_plane_weight),
            ("min_reciprocal_condition", self.min_reciprocal_condition),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(RegistrationError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        self.execution.validate()?;
        Ok(())
    }
}
