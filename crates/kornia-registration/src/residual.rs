use crate::correspondence::{validate_correspondences, Correspondence};
use crate::error::RegistrationError;
use crate::linalg;
use crate::transform::PointTransform;

/// Root mean square distance between the transformed source points and their
/// destination points.
///
/// # Arguments
///
/// * `transform` - The transform applied to the source points.
/// * `dst_points` - Destination points.
/// * `src_points` - Source points.
/// * `correspondences` - Pairs of (destination, source) indices.
///
/// # Returns
///
/// The RMSE over the correspondences, zero when there are none.
pub fn point_to_point_rmse<const D: usize, T, V>(
    transform: &T,
    dst_points: &[[f64; D]],
    src_points: &[[f64; D]],
    correspondences: &[Correspondence<V>],
) -> Result<f64, RegistrationError>
where
    T: PointTransform<D>,
{
    validate_correspondences(correspondences, dst_points.len(), src_points.len())?;
    if correspondences.is_empty() {
        return Ok(0.0);
    }

    let sum_sq = correspondences
        .iter()
        .map(|corr| {
            let p = transform.apply(&src_points[corr.index_in_second]);
            let d = &dst_points[corr.index_in_first];
            (0..D).map(|k| (d[k] - p[k]).powi(2)).sum::<f64>()
        })
        .sum::<f64>();

    Ok((sum_sq / correspondences.len() as f64).sqrt())
}

/// Root mean square distance between the transformed source points and the
/// planes through their destination points.
///
/// PRECONDITION: `dst_normals[i]` is a unit vector.
///
/// # Returns
///
/// The RMSE over the correspondences, zero when there are none.
pub fn point_to_plane_rmse<const D: usize, T, V>(
    transform: &T,
    dst_points: &[[f64; D]],
    dst_normals: &[[f64; D]],
    src_points: &[[f64; D]],
    correspondences: &[Correspondence<V>],
) -> Result<f64, RegistrationError>
where
    T: PointTransform<D>,
{
    validate_correspondences(
        correspondences,
        dst_points.len().min(dst_normals.len()),
        src_points.len(),
    )?;
    if correspondences.is_empty() {
        return Ok(0.0);
    }

    let sum_sq = correspondences
        .iter()
        .map(|corr| {
            let p = transform.apply(&src_points[corr.index_in_second]);
            let d = &dst_points[corr.index_in_first];
            let diff: [f64; D] = std::array::from_fn(|k| d[k] - p[k]);
            linalg::dot(&dst_normals[corr.index_in_first], &diff).powi(2)
        })
        .sum::<f64>();

    Ok((sum_sq / correspondences.len() as f64).sqrt())
}
