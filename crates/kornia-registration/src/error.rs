use thiserror::Error;

use crate::parallel::ParallelError;

/// Error types for the transform estimators.
///
/// These are returned for inputs the estimators cannot run on at all. Ill-posed
/// but well-formed problems are reported through [`crate::EstimationStatus`].
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A correspondence references a point that does not exist.
    #[error("correspondence {position} references {set_name} index {index}, but the set has {len} points")]
    CorrespondenceOutOfRange {
        /// Position of the offending correspondence in its set.
        position: usize,
        /// Label of the point set being indexed.
        set_name: &'static str,
        /// The out of range index.
        index: usize,
        /// Number of points in the indexed set.
        len: usize,
    },

    /// A configuration value is not usable.
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),

    /// The parallel execution strategy failed.
    #[error(transparent)]
    Parallel(#[from] ParallelError),

    /// The linear solver failed to produce a solution.
    #[error("linear solve failed: {0}")]
    LinearSolve(&'static str),
}
