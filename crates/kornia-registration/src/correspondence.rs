use crate::error::RegistrationError;

/// An asserted pairing between a destination point and a source point.
///
/// The value is an opaque payload forwarded to the weight evaluators, e.g. the
/// distance or similarity score produced by the correspondence search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence<V = f64> {
    /// Index into the destination (first) point set.
    pub index_in_first: usize,
    /// Index into the source (second) point set.
    pub index_in_second: usize,
    /// Payload used for weighting.
    pub value: V,
}

impl<V> Correspondence<V> {
    /// Create a new correspondence.
    pub fn new(index_in_first: usize, index_in_second: usize, value: V) -> Self {
        Self {
            index_in_first,
            index_in_second,
            value,
        }
    }
}

/// An ordered sequence of correspondences.
pub type CorrespondenceSet<V = f64> = Vec<Correspondence<V>>;

/// Check that every correspondence indexes into the given point sets.
///
/// # Arguments
///
/// * `correspondences` - The correspondences to check.
/// * `num_first` - Number of points in the destination set.
/// * `num_second` - Number of points in the source set.
pub fn validate_correspondences<V>(
    correspondences: &[Correspondence<V>],
    num_first: usize,
    num_second: usize,
) -> Result<(), RegistrationError> {
    for (position, corr) in correspondences.iter().enumerate() {
        if corr.index_in_first >= num_first {
            return Err(RegistrationError::CorrespondenceOutOfRange {
                position,
                set_name: "destination",
                index: corr.index_in_first,
                len: num_first,
            });
        }
        if corr.index_in_second >= num_second {
            return Err(RegistrationError::CorrespondenceOutOfRange {
                position,
                set_name: "source",
                index: corr.index_in_second,
                len: num_second,
            });
        }
    }
    Ok(())
}

/// Gather the paired points of a correspondence set into two dense sets.
///
/// # Returns
///
/// `(points_in_dst, points_in_src)` where the i-th entries of both vectors
/// come from the i-th correspondence.
pub fn select_corresponding_points<const D: usize, V>(
    correspondences: &[Correspondence<V>],
    dst_points: &[[f64; D]],
    src_points: &[[f64; D]],
) -> Result<(Vec<[f64; D]>, Vec<[f64; D]>), RegistrationError> {
    validate_correspondences(correspondences, dst_points.len(), src_points.len())?;

    Ok(correspondences
        .iter()
        .map(|corr| {
            (
                dst_points[corr.index_in_first],
                src_points[corr.index_in_second],
            )
        })
        .unzip())
}
