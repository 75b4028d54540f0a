use crate::error::RegistrationError;
use crate::linalg::{self, array_to_dmatrix, dmatrix_to_array};

/// A geometric map acting on `D`-dimensional points.
pub trait PointTransform<const D: usize> {
    /// Apply the transform to a single point.
    fn apply(&self, point: &[f64; D]) -> [f64; D];

    /// Apply the transform to a set of points.
    ///
    /// PRECONDITION: `dst_points` has the same length as `src_points`.
    fn transform_points(&self, src_points: &[[f64; D]], dst_points: &mut [[f64; D]]) {
        assert_eq!(src_points.len(), dst_points.len());
        for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
            *dst = self.apply(src);
        }
    }
}

/// A rigid transform: a proper rotation followed by a translation.
///
/// The rotation is stored row-major and maps points from the source to the
/// destination frame: `p_dst = rotation * p_src + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform<const D: usize> {
    /// Orthonormal rotation matrix with determinant +1.
    pub rotation: [[f64; D]; D],
    /// Translation vector.
    pub translation: [f64; D],
}

impl<const D: usize> Default for RigidTransform<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const D: usize> RigidTransform<D> {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: linalg::identity(),
            translation: [0.0; D],
        }
    }

    /// Create a rigid transform from a rotation and a translation.
    ///
    /// PRECONDITION: `rotation` is orthonormal with determinant +1.
    pub fn new(rotation: [[f64; D]; D], translation: [f64; D]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Compose two transforms, `self ∘ other`: `other` is applied first.
    pub fn compose(&self, other: &Self) -> Self {
        let rotated = linalg::matvec(&self.rotation, &other.translation);
        Self {
            rotation: linalg::matmul(&self.rotation, &other.rotation),
            translation: std::array::from_fn(|i| rotated[i] + self.translation[i]),
        }
    }

    /// The inverse transform: `(Rᵀ, -Rᵀ t)`.
    pub fn inverse(&self) -> Self {
        let rotation = linalg::transpose(&self.rotation);
        let rotated = linalg::matvec(&rotation, &self.translation);
        Self {
            rotation,
            translation: rotated.map(|x| -x),
        }
    }

    /// Check that the rotation is orthonormal with determinant +1 within `tol`.
    pub fn is_proper_rotation(&self, tol: f64) -> bool {
        let rtr = linalg::matmul(&linalg::transpose(&self.rotation), &self.rotation);
        let orthonormal = (0..D).all(|i| {
            (0..D).all(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                (rtr[i][j] - expected).abs() <= tol
            })
        });
        orthonormal && (linalg::determinant(&self.rotation) - 1.0).abs() <= tol
    }
}

impl<const D: usize> PointTransform<D> for RigidTransform<D> {
    #[inline]
    fn apply(&self, point: &[f64; D]) -> [f64; D] {
        let rotated = linalg::matvec(&self.rotation, point);
        std::array::from_fn(|i| rotated[i] + self.translation[i])
    }
}

/// An affine transform: an unconstrained linear map followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform<const D: usize> {
    /// Row-major linear part.
    pub linear: [[f64; D]; D],
    /// Translation vector.
    pub translation: [f64; D],
}

impl<const D: usize> Default for AffineTransform<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const D: usize> AffineTransform<D> {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            linear: linalg::identity(),
            translation: [0.0; D],
        }
    }

    /// Create an affine transform from a linear part and a translation.
    pub fn new(linear: [[f64; D]; D], translation: [f64; D]) -> Self {
        Self {
            linear,
            translation,
        }
    }

    /// Unpack a parameter vector laid out as the row-major linear part
    /// followed by the translation.
    ///
    /// PRECONDITION: `params` holds at least `D * (D + 1)` values.
    pub(crate) fn from_parameters(params: &[f64]) -> Self {
        Self {
            linear: std::array::from_fn(|i| std::array::from_fn(|j| params[i * D + j])),
            translation: std::array::from_fn(|i| params[D * D + i]),
        }
    }

    /// Compose two transforms, `self ∘ other`: `other` is applied first.
    pub fn compose(&self, other: &Self) -> Self {
        let mapped = linalg::matvec(&self.linear, &other.translation);
        Self {
            linear: linalg::matmul(&self.linear, &other.linear),
            translation: std::array::from_fn(|i| mapped[i] + self.translation[i]),
        }
    }

    /// The inverse transform, or `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let linear_inv = array_to_dmatrix(&self.linear).try_inverse()?;
        let linear: [[f64; D]; D] = dmatrix_to_array(&linear_inv);
        let mapped = linalg::matvec(&linear, &self.translation);
        Some(Self {
            linear,
            translation: mapped.map(|x| -x),
        })
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        linalg::determinant(&self.linear)
    }

    /// The closest rigid transform, keeping the translation.
    pub fn to_rigid(&self) -> Result<RigidTransform<D>, RegistrationError> {
        Ok(RigidTransform {
            rotation: linalg::project_to_rotation(&self.linear)?,
            translation: self.translation,
        })
    }
}

impl<const D: usize> PointTransform<D> for AffineTransform<D> {
    #[inline]
    fn apply(&self, point: &[f64; D]) -> [f64; D] {
        let mapped = linalg::matvec(&self.linear, point);
        std::array::from_fn(|i| mapped[i] + self.translation[i])
    }
}

impl<const D: usize> From<RigidTransform<D>> for AffineTransform<D> {
    fn from(rigid: RigidTransform<D>) -> Self {
        Self {
            linear: rigid.rotation,
            translation: rigid.translation,
        }
    }
}
