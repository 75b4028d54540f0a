use glam::{DMat2, DMat3};

use crate::combined::{ActiveTerms, MetricTerm, PointSets};
use crate::config::SolverConfig;
use crate::error::RegistrationError;
use crate::estimate::{Estimate, EstimationStatus};
use crate::linalg;
use crate::normal_equations::{accumulate_normal_equations, NormalEquations};
use crate::transform::{PointTransform, RigidTransform};
use crate::weight::WeightEvaluator;

/// Linearization of a rigid motion in `D` dimensions with `N` parameters.
///
/// The parameters are the rotation increments followed by the `D`
/// translation increments.
trait RigidModel<const D: usize, const N: usize> {
    /// Jacobian of the point `s` moved by a small motion, one row per coordinate.
    fn point_rows(s: &[f64; D]) -> [[f64; N]; D];

    /// Jacobian of the signed distance of `s` to a plane with normal `n`.
    fn plane_row(s: &[f64; D], n: &[f64; D]) -> [f64; N];

    /// Row-major rotation given by the rotation part of `params`.
    fn increment(params: &[f64; N]) -> [[f64; D]; D];
}

/// Rigid motion in the plane: one angle and two translations.
struct Planar;

impl RigidModel<2, 3> for Planar {
    #[inline]
    fn point_rows(s: &[f64; 2]) -> [[f64; 3]; 2] {
        [[-s[1], 1.0, 0.0], [s[0], 0.0, 1.0]]
    }

    #[inline]
    fn plane_row(s: &[f64; 2], n: &[f64; 2]) -> [f64; 3] {
        [s[0] * n[1] - s[1] * n[0], n[0], n[1]]
    }

    fn increment(params: &[f64; 3]) -> [[f64; 2]; 2] {
        DMat2::from_angle(params[0]).transpose().to_cols_array_2d()
    }
}

/// Rigid motion in space: three small angles about x, y, z and three translations.
struct Spatial;

impl RigidModel<3, 6> for Spatial {
    #[inline]
    fn point_rows(s: &[f64; 3]) -> [[f64; 6]; 3] {
        // [ω]ₓ s with the sign folded so that the unknown is ω itself
        [
            [0.0, s[2], -s[1], 1.0, 0.0, 0.0],
            [-s[2], 0.0, s[0], 0.0, 1.0, 0.0],
            [s[1], -s[0], 0.0, 0.0, 0.0, 1.0],
        ]
    }

    #[inline]
    fn plane_row(s: &[f64; 3], n: &[f64; 3]) -> [f64; 6] {
        [
            n[2] * s[1] - n[1] * s[2],
            n[0] * s[2] - n[2] * s[0],
            n[1] * s[0] - n[0] * s[1],
            n[0],
            n[1],
            n[2],
        ]
    }

    fn increment(params: &[f64; 6]) -> [[f64; 3]; 3] {
        let rotation = DMat3::from_rotation_z(params[2])
            * DMat3::from_rotation_y(params[1])
            * DMat3::from_rotation_x(params[0]);
        rotation.transpose().to_cols_array_2d()
    }
}

/// Build the normal equations of the combined objective linearized at `current`.
fn linearize<M, const D: usize, const N: usize, V1, W1, V2, W2>(
    points: &PointSets<D>,
    point_to_point: &MetricTerm<V1, W1>,
    point_to_plane: &MetricTerm<V2, W2>,
    active: ActiveTerms,
    current: &RigidTransform<D>,
    config: &SolverConfig,
) -> Result<NormalEquations, RegistrationError>
where
    M: RigidModel<D, N>,
    V1: Sync,
    V2: Sync,
    W1: WeightEvaluator<V1>,
    W2: WeightEvaluator<V2>,
{
    let mut system = NormalEquations::zeros(N);

    if active.point_to_point {
        let partial = accumulate_normal_equations(
            point_to_point.correspondences,
            N,
            config.execution,
            |system, corr| {
                let weight = point_to_point.weight_of(corr, config.point_to_point_weight);
                let s = current.apply(&points.src_points[corr.index_in_second]);
                let d = &points.dst_points[corr.index_in_first];
                for (k, row) in M::point_rows(&s).iter().enumerate() {
                    system.add_equation(row, d[k] - s[k], weight);
                }
            },
        )?;
        system = system.merge(partial);
    }

    if active.point_to_plane {
        let partial = accumulate_normal_equations(
            point_to_plane.correspondences,
            N,
            config.execution,
            |system, corr| {
                let weight = point_to_plane.weight_of(corr, config.point_to_plane_weight);
                let s = current.apply(&points.src_points[corr.index_in_second]);
                let d = &points.dst_points[corr.index_in_first];
                let n = &points.dst_normals[corr.index_in_first];
                let diff: [f64; D] = std::array::from_fn(|k| d[k] - s[k]);
                system.add_equation(&M::plane_row(&s, n), linalg::dot(n, &diff), weight);
            },
        )?;
        system = system.merge(partial);
    }

    Ok(system)
}

/// Gauss-Newton loop shared by the planar and spatial estimators.
fn estimate_rigid_combined<M, const D: usize, const N: usize, V1, W1, V2, W2>(
    points: &PointSets<D>,
    point_to_point: &MetricTerm<V1, W1>,
    point_to_plane: &MetricTerm<V2, W2>,
    config: &SolverConfig,
) -> Result<Estimate<RigidTransform<D>>, RegistrationError>
where
    M: RigidModel<D, N>,
    V1: Sync,
    V2: Sync,
    W1: WeightEvaluator<V1>,
    W2: WeightEvaluator<V2>,
{
    config.validate()?;

    let active = match ActiveTerms::select(points, point_to_point, point_to_plane, config)? {
        Ok(active) => active,
        Err(status) => return Ok(Estimate::new(RigidTransform::identity(), status, 0)),
    };

    let mut transform = RigidTransform::<D>::identity();
    let mut num_iterations = 0;
    let mut converged = false;
    let mut ill_conditioned = false;

    for i in 0..config.max_iterations {
        log::debug!("Iteration: {}", i);
        let now = std::time::Instant::now();

        let system = linearize::<M, D, N, _, _, _, _>(
            points,
            point_to_point,
            point_to_plane,
            active,
            &transform,
            config,
        )?;
        let solution = system.solve(config.min_reciprocal_condition)?;
        ill_conditioned = solution.ill_conditioned;

        let delta: [f64; N] = std::array::from_fn(|k| solution.x[k]);

        // R ← R_inc R, t ← R_inc t + Δt
        let rotation_inc = M::increment(&delta);
        let rotation = linalg::project_to_rotation(&linalg::matmul(
            &rotation_inc,
            &transform.rotation,
        ))?;
        let rotated = linalg::matvec(&rotation_inc, &transform.translation);
        let translation = std::array::from_fn(|k| rotated[k] + delta[N - D + k]);
        transform = RigidTransform::new(rotation, translation);
        num_iterations += 1;

        let update_norm = delta.iter().map(|x| x * x).sum::<f64>().sqrt();
        log::debug!(
            "Update norm: {:e}, rcond: {:e}, equations: {}",
            update_norm,
            solution.reciprocal_condition,
            system.num_equations()
        );
        log::debug!("elapsed: {:?}", now.elapsed());

        if update_norm < config.convergence_tolerance {
            log::debug!("converged in {} iterations", num_iterations);
            converged = true;
            break;
        }
    }

    let num_correspondences = active.num_correspondences(point_to_point, point_to_plane);
    let status = if num_correspondences < D {
        log::debug!(
            "rigid alignment from {} correspondences is not fully constrained in {}D",
            num_correspondences,
            D
        );
        EstimationStatus::Underdetermined
    } else if ill_conditioned {
        log::warn!("combined rigid system is ill conditioned, the estimate is not reliable");
        EstimationStatus::IllConditioned
    } else if converged {
        EstimationStatus::Success
    } else {
        log::debug!("not converged after {} iterations", config.max_iterations);
        EstimationStatus::NotConverged
    };

    Ok(Estimate::new(transform, status, num_iterations))
}

/// Estimate the planar rigid transform minimizing a weighted sum of
/// point-to-point and point-to-plane (point-to-line) distances.
///
/// Starting from the identity, the objective is linearized around the current
/// estimate in one rotation angle and two translations, the normal equations
/// are accumulated in parallel over the active terms and solved, and the
/// increment is composed onto the estimate. The loop stops once the norm of
/// the increment drops below `config.convergence_tolerance`.
///
/// # Arguments
///
/// * `points` - Destination points and normals, and source points.
/// * `point_to_point` - Point-to-point correspondences and their weighting.
/// * `point_to_plane` - Point-to-plane correspondences and their weighting.
/// * `config` - Term weights, iteration budget, tolerance and execution strategy.
///
/// # Returns
///
/// The estimate with status:
/// - [`EstimationStatus::Underdetermined`] and the identity if no term is active,
/// - [`EstimationStatus::InputMismatch`] and the identity if the point-to-plane
///   term is active and points and normals differ in length,
/// - [`EstimationStatus::Underdetermined`] with the last estimate for fewer than
///   two active correspondences,
/// - [`EstimationStatus::NotConverged`] with the last estimate when the iteration
///   budget runs out,
/// - [`EstimationStatus::IllConditioned`] with the last estimate when the last
///   linear system was close to singular,
/// - [`EstimationStatus::Success`] otherwise.
pub fn estimate_rigid_combined_2d<V1, W1, V2, W2>(
    points: &PointSets<2>,
    point_to_point: &MetricTerm<V1, W1>,
    point_to_plane: &MetricTerm<V2, W2>,
    config: &SolverConfig,
) -> Result<Estimate<RigidTransform<2>>, RegistrationError>
where
    V1: Sync,
    V2: Sync,
    W1: WeightEvaluator<V1>,
    W2: WeightEvaluator<V2>,
{
    estimate_rigid_combined::<Planar, 2, 3, _, _, _, _>(
        points,
        point_to_point,
        point_to_plane,
        config,
    )
}

/// Estimate the spatial rigid transform minimizing a weighted sum of
/// point-to-point and point-to-plane distances.
///
/// Same iteration as [`estimate_rigid_combined_2d`], with the rotation
/// linearized in three small angles and the increment applied as
/// `Rz(θ₂) Ry(θ₁) Rx(θ₀)`. The composed rotation is projected back onto the
/// nearest proper rotation after every step.
///
/// For more details, see: Low, K. L. "Linear Least-Squares Optimization for
/// Point-to-Plane ICP Surface Registration." UNC TR04-004, 2004.
///
/// # Arguments
///
/// * `points` - Destination points and normals, and source points.
/// * `point_to_point` - Point-to-point correspondences and their weighting.
/// * `point_to_plane` - Point-to-plane correspondences and their weighting.
/// * `config` - Term weights, iteration budget, tolerance and execution strategy.
pub fn estimate_rigid_combined_3d<V1, W1, V2, W2>(
    points: &PointSets<3>,
    point_to_point: &MetricTerm<V1, W1>,
    point_to_plane: &MetricTerm<V2, W2>,
    config: &SolverConfig,
) -> Result<Estimate<RigidTransform<3>>, RegistrationError>
where
    V1: Sync,
    V2: Sync,
    W1: WeightEvaluator<V1>,
    W2: WeightEvaluator<V2>,
{
    estimate_rigid_combined::<Spatial, 3, 6, _, _, _, _>(
        points,
        point_to_point,
        point_to_plane,
        config,
    )
}
