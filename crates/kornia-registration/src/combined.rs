use crate::config::SolverConfig;
use crate::correspondence::{validate_correspondences, Correspondence};
use crate::error::RegistrationError;
use crate::estimate::{Estimate, EstimationStatus};
use crate::linalg;
use crate::normal_equations::{accumulate_normal_equations, NormalEquations};
use crate::point_to_point::add_affine_point_equations;
use crate::transform::AffineTransform;
use crate::weight::{UnityWeight, WeightEvaluator};

/// The point sets a combined-metric estimator aligns.
///
/// `dst_normals[i]` is the surface normal at `dst_points[i]`; normals are only
/// read by the point-to-plane term and may be empty when that term is unused.
#[derive(Debug, Clone, Copy)]
pub struct PointSets<'a, const D: usize> {
    /// Destination points.
    pub dst_points: &'a [[f64; D]],
    /// Unit normals at the destination points.
    pub dst_normals: &'a [[f64; D]],
    /// Source points, moved onto the destination by the estimated transform.
    pub src_points: &'a [[f64; D]],
}

impl<'a, const D: usize> PointSets<'a, D> {
    /// Create the point sets of a combined point-to-point and point-to-plane problem.
    pub fn new(
        dst_points: &'a [[f64; D]],
        dst_normals: &'a [[f64; D]],
        src_points: &'a [[f64; D]],
    ) -> Self {
        Self {
            dst_points,
            dst_normals,
            src_points,
        }
    }

    /// Create point sets without destination normals.
    pub fn without_normals(dst_points: &'a [[f64; D]], src_points: &'a [[f64; D]]) -> Self {
        Self::new(dst_points, &[], src_points)
    }
}

/// One metric term of a combined objective: a correspondence set and the
/// evaluator weighting each of its correspondences.
#[derive(Debug, Clone, Copy)]
pub struct MetricTerm<'a, V = f64, W = UnityWeight> {
    /// Pairs of (destination, source) indices.
    pub correspondences: &'a [Correspondence<V>],
    /// Per-correspondence weight, multiplied by the global weight of the term.
    pub evaluator: W,
}

impl<'a, V> MetricTerm<'a, V, UnityWeight> {
    /// Create a term where every correspondence has unit weight.
    pub fn new(correspondences: &'a [Correspondence<V>]) -> Self {
        Self {
            correspondences,
            evaluator: UnityWeight,
        }
    }
}

impl MetricTerm<'static, f64, UnityWeight> {
    /// A term without correspondences, which never contributes.
    pub fn none() -> Self {
        Self::new(&[])
    }
}

impl<'a, V, W> MetricTerm<'a, V, W> {
    /// Replace the weight evaluator.
    pub fn with_evaluator<E>(self, evaluator: E) -> MetricTerm<'a, V, E> {
        MetricTerm {
            correspondences: self.correspondences,
            evaluator,
        }
    }

    /// Number of correspondences in the term.
    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    /// Whether the term has no correspondences.
    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }
}

impl<V, W: WeightEvaluator<V>> MetricTerm<'_, V, W> {
    /// Weight of a correspondence given the global weight of the term.
    ///
    /// Clamped at zero so `AtA` stays positive semi-definite.
    #[inline]
    pub(crate) fn weight_of(&self, corr: &Correspondence<V>, global_weight: f64) -> f64 {
        let weight = global_weight
            * self
                .evaluator
                .weight(corr.index_in_first, corr.index_in_second, &corr.value);
        weight.max(0.0)
    }
}

/// Which terms of a combined objective contribute equations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveTerms {
    pub point_to_point: bool,
    pub point_to_plane: bool,
}

impl ActiveTerms {
    /// Select the active terms and check the inputs they read.
    ///
    /// A term is active when it has correspondences and a positive global
    /// weight. Returns the status to report with the identity transform when
    /// the problem cannot be set up, and an error when a correspondence of an
    /// active term indexes out of range.
    pub(crate) fn select<const D: usize, V1, W1, V2, W2>(
        points: &PointSets<D>,
        point_to_point: &MetricTerm<V1, W1>,
        point_to_plane: &MetricTerm<V2, W2>,
        config: &SolverConfig,
    ) -> Result<Result<Self, EstimationStatus>, RegistrationError> {
        let active = Self {
            point_to_point: !point_to_point.is_empty() && config.point_to_point_weight > 0.0,
            point_to_plane: !point_to_plane.is_empty() && config.point_to_plane_weight > 0.0,
        };

        if !active.point_to_point && !active.point_to_plane {
            log::debug!("no active metric term, nothing to estimate");
            return Ok(Err(EstimationStatus::Underdetermined));
        }

        if active.point_to_plane && points.dst_normals.len() != points.dst_points.len() {
            log::warn!(
                "normal count mismatch: {} destination points vs {} normals",
                points.dst_points.len(),
                points.dst_normals.len()
            );
            return Ok(Err(EstimationStatus::InputMismatch));
        }

        if active.point_to_point {
            validate_correspondences(
                point_to_point.correspondences,
                points.dst_points.len(),
                points.src_points.len(),
            )?;
        }
        if active.point_to_plane {
            validate_correspondences(
                point_to_plane.correspondences,
                points.dst_points.len(),
                points.src_points.len(),
            )?;
        }

        Ok(Ok(active))
    }

    /// Number of correspondences over the active terms.
    pub(crate) fn num_correspondences<V1, W1, V2, W2>(
        &self,
        point_to_point: &MetricTerm<V1, W1>,
        point_to_plane: &MetricTerm<V2, W2>,
    ) -> usize {
        let mut count = 0;
        if self.point_to_point {
            count += point_to_point.len();
        }
        if self.point_to_plane {
            count += point_to_plane.len();
        }
        count
    }
}

/// Add the point-to-plane equation pairing `point_src` with the plane through
/// `point_dst` with normal `normal` to an affine system.
///
/// The residual `n · (dst − (A src + t))` is linear in the parameters: the
/// block of row `j` of `A` holds `n[j] src` and the translation block holds `n`.
fn add_affine_plane_equation<const D: usize>(
    system: &mut NormalEquations,
    point_src: &[f64; D],
    point_dst: &[f64; D],
    normal: &[f64; D],
    weight: f64,
) {
    system.add_equation_with(weight, |row| {
        for j in 0..D {
            for (dst, &s) in row[j * D..(j + 1) * D].iter_mut().zip(point_src.iter()) {
                *dst = normal[j] * s;
            }
        }
        row[D * D..].copy_from_slice(normal);
        linalg::dot(normal, point_dst)
    });
}

/// Estimate the affine transform minimizing a weighted sum of point-to-point
/// and point-to-plane distances.
///
/// The objective is quadratic in the affine parameters, so a single linear
/// solve gives the optimum:
///
/// `Σ w_p ‖d − (A s + t)‖² + Σ w_n (n · (d − (A s + t)))²`
///
/// The equations of each active term are accumulated in parallel and merged
/// into one `D (D + 1)` system.
///
/// # Arguments
///
/// * `points` - Destination points and normals, and source points.
/// * `point_to_point` - Point-to-point correspondences and their weighting.
/// * `point_to_plane` - Point-to-plane correspondences and their weighting.
/// * `config` - Global term weights, conditioning threshold and execution strategy.
///
/// # Returns
///
/// The estimate with status:
/// - [`EstimationStatus::Underdetermined`] and the identity if no term is active,
/// - [`EstimationStatus::InputMismatch`] and the identity if the point-to-plane
///   term is active and points and normals differ in length,
/// - [`EstimationStatus::Underdetermined`] with the least-norm transform for
///   fewer than `D + 1` active correspondences,
/// - [`EstimationStatus::IllConditioned`] when the system is close to singular,
/// - [`EstimationStatus::Success`] otherwise.
pub fn estimate_affine_combined<const D: usize, V1, W1, V2, W2>(
    points: &PointSets<D>,
    point_to_point: &MetricTerm<V1, W1>,
    point_to_plane: &MetricTerm<V2, W2>,
    config: &SolverConfig,
) -> Result<Estimate<AffineTransform<D>>, RegistrationError>
where
    V1: Sync,
    V2: Sync,
    W1: WeightEvaluator<V1>,
    W2: WeightEvaluator<V2>,
{
    config.validate()?;

    let active = match ActiveTerms::select(points, point_to_point, point_to_plane, config)? {
        Ok(active) => active,
        Err(status) => return Ok(Estimate::new(AffineTransform::identity(), status, 0)),
    };

    let num_unknowns = D * (D + 1);
    let mut system = NormalEquations::zeros(num_unknowns);

    if active.point_to_point {
        let partial = accumulate_normal_equations(
            point_to_point.correspondences,
            num_unknowns,
            config.execution,
            |system, corr| {
                let weight = point_to_point.weight_of(corr, config.point_to_point_weight);
                add_affine_point_equations(
                    system,
                    &points.src_points[corr.index_in_second],
                    &points.dst_points[corr.index_in_first],
                    weight,
                );
            },
        )?;
        system = system.merge(partial);
    }

    if active.point_to_plane {
        let partial = accumulate_normal_equations(
            point_to_plane.correspondences,
            num_unknowns,
            config.execution,
            |system, corr| {
                let weight = point_to_plane.weight_of(corr, config.point_to_plane_weight);
                add_affine_plane_equation(
                    system,
                    &points.src_points[corr.index_in_second],
                    &points.dst_points[corr.index_in_first],
                    &points.dst_normals[corr.index_in_first],
                    weight,
                );
            },
        )?;
        system = system.merge(partial);
    }

    let solution = system.solve(config.min_reciprocal_condition)?;
    let transform = AffineTransform::from_parameters(solution.x.as_slice());

    let num_correspondences = active.num_correspondences(point_to_point, point_to_plane);
    let status = if num_correspondences < D + 1 {
        log::debug!(
            "affine alignment from {} correspondences is not fully constrained in {}D",
            num_correspondences,
            D
        );
        EstimationStatus::Underdetermined
    } else if solution.ill_conditioned {
        log::warn!(
            "combined affine system is ill conditioned (rcond = {:e})",
            solution.reciprocal_condition
        );
        EstimationStatus::IllConditioned
    } else {
        EstimationStatus::Success
    };

    Ok(Estimate::new(transform, status, 1))
}
