#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// combined point-to-point and point-to-plane affine estimation.
pub mod combined;

/// iterative combined-metric rigid estimation in 2D and 3D.
pub mod combined_rigid;

/// solver parameters.
pub mod config;

/// correspondences between two point sets.
pub mod correspondence;

/// error types for the estimators.
pub mod error;

/// estimation results and their status.
pub mod estimate;

/// small fixed-size linear algebra helpers.
pub mod linalg;

/// weighted normal-equation accumulation and solving.
pub mod normal_equations;

/// module containing parallelization utilities.
pub mod parallel;

/// closed-form point-to-point rigid and affine estimation.
pub mod point_to_point;

/// alignment residuals.
pub mod residual;

/// rigid and affine transforms.
pub mod transform;

/// per-correspondence weight evaluators.
pub mod weight;

pub use combined::{estimate_affine_combined, MetricTerm, PointSets};
pub use combined_rigid::{estimate_rigid_combined_2d, estimate_rigid_combined_3d};
pub use config::SolverConfig;
pub use correspondence::{Correspondence, CorrespondenceSet};
pub use error::RegistrationError;
pub use estimate::{Estimate, EstimationStatus};
pub use parallel::ExecutionStrategy;
pub use point_to_point::{
    estimate_affine_point_to_point, estimate_affine_point_to_point_with_correspondences,
    estimate_rigid_point_to_point, estimate_rigid_point_to_point_with_correspondences,
};
pub use transform::{AffineTransform, PointTransform, RigidTransform};
pub use weight::{ConstantWeight, RbfKernelWeight, UnityWeight, ValueWeight, WeightEvaluator};
