use serde::{Deserialize, Serialize};

/// Outcome of an estimation.
///
/// Only [`EstimationStatus::Success`] certifies the result. Every other status
/// still comes with a transform (the identity when nothing could be computed)
/// that callers may choose to accept, retry or discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimationStatus {
    /// The problem was well posed and, for iterative solvers, converged.
    Success,
    /// Point and normal sets, or destination and source sets, have different sizes.
    InputMismatch,
    /// No active correspondences, or fewer than the number needed to constrain
    /// the transform.
    Underdetermined,
    /// The iteration budget was exhausted before the update norm fell below the tolerance.
    NotConverged,
    /// The normal-equation system was singular or close to it.
    IllConditioned,
}

impl EstimationStatus {
    /// Whether the estimation succeeded.
    pub fn is_success(self) -> bool {
        self == EstimationStatus::Success
    }
}

/// Result of a transform estimation.
#[derive(Debug, Clone)]
pub struct Estimate<T> {
    /// The estimated transform, mapping source points onto destination points.
    pub transform: T,
    /// Outcome of the estimation.
    pub status: EstimationStatus,
    /// Number of linear solves performed.
    pub num_iterations: usize,
}

impl<T> Estimate<T> {
    pub(crate) fn new(transform: T, status: EstimationStatus, num_iterations: usize) -> Self {
        Self {
            transform,
            status,
            num_iterations,
        }
    }

    /// Whether the estimation succeeded.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
