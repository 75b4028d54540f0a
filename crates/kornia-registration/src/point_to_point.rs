use crate::config::SolverConfig;
use crate::correspondence::{select_corresponding_points, Correspondence};
use crate::error::RegistrationError;
use crate::estimate::{Estimate, EstimationStatus};
use crate::linalg;
use crate::normal_equations::NormalEquations;
use crate::parallel::fold_reduce_indexed;
use crate::transform::{AffineTransform, RigidTransform};

/// Compute the centroids of two sets of points.
///
/// # Arguments
///
/// * `points_dst` - A set of points.
/// * `points_src` - Another set of points, of the same length.
/// * `config` - Only the execution strategy is used.
///
/// # Returns
///
/// The centroids of the two sets of points.
pub fn compute_centroids<const D: usize>(
    points_dst: &[[f64; D]],
    points_src: &[[f64; D]],
    config: &SolverConfig,
) -> Result<([f64; D], [f64; D]), RegistrationError> {
    let (sum_dst, sum_src) = fold_reduce_indexed(
        points_dst.len().min(points_src.len()),
        config.execution,
        || ([0.0; D], [0.0; D]),
        |(acc_dst, acc_src): &mut ([f64; D], [f64; D]), i| {
            for k in 0..D {
                acc_dst[k] += points_dst[i][k];
                acc_src[k] += points_src[i][k];
            }
        },
        |(a_dst, a_src): ([f64; D], [f64; D]), (b_dst, b_src): ([f64; D], [f64; D])| {
            (
                std::array::from_fn(|k| a_dst[k] + b_dst[k]),
                std::array::from_fn(|k| a_src[k] + b_src[k]),
            )
        },
    )?;

    let n = points_dst.len().min(points_src.len()).max(1) as f64;
    Ok((sum_dst.map(|x| x / n), sum_src.map(|x| x / n)))
}

/// Compute the rigid transform best aligning two sets of corresponding points.
///
/// Minimizes `Σ ‖dst_i − (R src_i + t)‖²` in closed form (orthogonal
/// Procrustes):
///
/// 1. Compute the centroids of both sets.
/// 2. Compute the cross-covariance `Σ = 1/N Σ (dst_i − μ_dst)(src_i − μ_src)ᵀ`.
/// 3. Decompose `Σ = U S Vᵀ` and set `R = U Vᵀ`, negating the column of `U`
///    of the smallest singular value when `det(U Vᵀ) < 0`.
/// 4. Set `t = μ_dst − R μ_src`.
///
/// For more details, see: Arun, K., Huang, T. S., and Blostein, S. D.
/// "Least-squares fitting of two 3-D point sets." IEEE PAMI, 1987.
///
/// # Arguments
///
/// * `points_dst` - Destination points.
/// * `points_src` - Source points, `points_src[i]` paired with `points_dst[i]`.
/// * `config` - Solver configuration.
///
/// # Returns
///
/// The estimate with status:
/// - [`EstimationStatus::InputMismatch`] and the identity if the sets differ in length,
/// - [`EstimationStatus::Underdetermined`] and the identity if they are empty,
/// - [`EstimationStatus::Underdetermined`] with the computed transform for fewer than `D` points,
/// - [`EstimationStatus::Success`] otherwise.
pub fn estimate_rigid_point_to_point<const D: usize>(
    points_dst: &[[f64; D]],
    points_src: &[[f64; D]],
    config: &SolverConfig,
) -> Result<Estimate<RigidTransform<D>>, RegistrationError> {
    config.validate()?;

    if points_dst.len() != points_src.len() {
        log::warn!(
            "point count mismatch: {} destination vs {} source points",
            points_dst.len(),
            points_src.len()
        );
        return Ok(Estimate::new(
            RigidTransform::identity(),
            EstimationStatus::InputMismatch,
            0,
        ));
    }
    if points_src.is_empty() {
        return Ok(Estimate::new(
            RigidTransform::identity(),
            EstimationStatus::Underdetermined,
            0,
        ));
    }

    let (dst_centroid, src_centroid) = compute_centroids(points_dst, points_src, config)?;

    // cross-covariance H = Σ[(dst - dst_mean) * (src - src_mean)^T]
    let h = fold_reduce_indexed(
        points_src.len(),
        config.execution,
        || [[0.0; D]; D],
        |h: &mut [[f64; D]; D], i| {
            let src_centered: [f64; D] =
                std::array::from_fn(|k| points_src[i][k] - src_centroid[k]);
            for (r, h_row) in h.iter_mut().enumerate() {
                let dst_centered = points_dst[i][r] - dst_centroid[r];
                for (h_rc, src_c) in h_row.iter_mut().zip(src_centered.iter()) {
                    *h_rc += dst_centered * src_c;
                }
            }
        },
        |a: [[f64; D]; D], b: [[f64; D]; D]| {
            std::array::from_fn(|r| std::array::from_fn(|c| a[r][c] + b[r][c]))
        },
    )?;

    let n = points_src.len() as f64;
    let sigma = h.map(|row| row.map(|x| x / n));

    let rotation = linalg::project_to_rotation(&sigma)?;
    let rotated_centroid = linalg::matvec(&rotation, &src_centroid);
    let translation = std::array::from_fn(|k| dst_centroid[k] - rotated_centroid[k]);

    let status = if points_src.len() >= D {
        EstimationStatus::Success
    } else {
        log::debug!(
            "rigid alignment from {} points is not fully constrained in {}D",
            points_src.len(),
            D
        );
        EstimationStatus::Underdetermined
    };

    Ok(Estimate::new(
        RigidTransform::new(rotation, translation),
        status,
        1,
    ))
}

/// Rigid point-to-point estimation over a correspondence set.
///
/// Gathers the corresponding points and runs [`estimate_rigid_point_to_point`].
/// The correspondence values are ignored.
pub fn estimate_rigid_point_to_point_with_correspondences<const D: usize, V>(
    points_dst: &[[f64; D]],
    points_src: &[[f64; D]],
    correspondences: &[Correspondence<V>],
    config: &SolverConfig,
) -> Result<Estimate<RigidTransform<D>>, RegistrationError> {
    let (dst_corr, src_corr) =
        select_corresponding_points(correspondences, points_dst, points_src)?;
    estimate_rigid_point_to_point(&dst_corr, &src_corr, config)
}

/// Add the `D` equations pairing `point_src` with `point_dst` to an affine system.
///
/// The unknowns are the row-major linear part followed by the translation.
/// Equation `j` reads `Σ_k A[j][k] src[k] + t[j] = dst[j]`.
pub(crate) fn add_affine_point_equations<const D: usize>(
    system: &mut NormalEquations,
    point_src: &[f64; D],
    point_dst: &[f64; D],
    weight: f64,
) {
    for j in 0..D {
        system.add_equation_with(weight, |row| {
            row[j * D..(j + 1) * D].copy_from_slice(point_src);
            row[D * D + j] = 1.0;
            point_dst[j]
        });
    }
}

/// Compute the affine transform best aligning two sets of corresponding points.
///
/// Minimizes `Σ ‖dst_i − (A src_i + t)‖²` with an unconstrained `A` by
/// accumulating the `D (D + 1)` normal equations in parallel and solving them
/// once.
///
/// # Arguments
///
/// * `points_dst` - Destination points.
/// * `points_src` - Source points, `points_src[i]` paired with `points_dst[i]`.
/// * `config` - Solver configuration.
///
/// # Returns
///
/// The estimate with status:
/// - [`EstimationStatus::InputMismatch`] and the identity if the sets differ in length,
/// - [`EstimationStatus::Underdetermined`] and the identity if they are empty,
/// - [`EstimationStatus::Underdetermined`] with the least-norm transform for fewer than `D + 1` points,
/// - [`EstimationStatus::IllConditioned`] when the points are degenerate, e.g. coplanar in 3D,
/// - [`EstimationStatus::Success`] otherwise.
pub fn estimate_affine_point_to_point<const D: usize>(
    points_dst: &[[f64; D]],
    points_src: &[[f64; D]],
    config: &SolverConfig,
) -> Result<Estimate<AffineTransform<D>>, RegistrationError> {
    config.validate()?;

    if points_dst.len() != points_src.len() {
        log::warn!(
            "point count mismatch: {} destination vs {} source points",
            points_dst.len(),
            points_src.len()
        );
        return Ok(Estimate::new(
            AffineTransform::identity(),
            EstimationStatus::InputMismatch,
            0,
        ));
    }
    if points_src.is_empty() {
        return Ok(Estimate::new(
            AffineTransform::identity(),
            EstimationStatus::Underdetermined,
            0,
        ));
    }

    let num_unknowns = D * (D + 1);
    let system = fold_reduce_indexed(
        points_src.len(),
        config.execution,
        || NormalEquations::zeros(num_unknowns),
        |system: &mut NormalEquations, i| {
            add_affine_point_equations(system, &points_src[i], &points_dst[i], 1.0)
        },
        NormalEquations::merge,
    )?;

    let solution = system.solve(config.min_reciprocal_condition)?;
    let transform = AffineTransform::from_parameters(solution.x.as_slice());

    let status = if points_src.len() < D + 1 {
        EstimationStatus::Underdetermined
    } else if solution.ill_conditioned {
        log::warn!(
            "affine system is ill conditioned (rcond = {:e})",
            solution.reciprocal_condition
        );
        EstimationStatus::IllConditioned
    } else {
        EstimationStatus::Success
    };

    Ok(Estimate::new(transform, status, 1))
}

/// Affine point-to-point estimation over a correspondence set.
///
/// Gathers the corresponding points and runs [`estimate_affine_point_to_point`].
/// The correspondence values are ignored.
pub fn estimate_affine_point_to_point_with_correspondences<const D: usize, V>(
    points_dst: &[[f64; D]],
    points_src: &[[f64; D]],
    correspondences: &[Correspondence<V>],
    config: &SolverConfig,
) -> Result<Estimate<AffineTransform<D>>, RegistrationError> {
    let (dst_corr, src_corr) =
        select_corresponding_points(correspondences, points_dst, points_src)?;
    estimate_affine_point_to_point(&dst_corr, &src_corr, config)
}
