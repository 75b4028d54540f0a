use nalgebra::DMatrix;

use crate::error::RegistrationError;

/// Create a dynamic matrix view of a row-major `D x D` array.
pub(crate) fn array_to_dmatrix<const D: usize>(array: &[[f64; D]; D]) -> DMatrix<f64> {
    DMatrix::from_fn(D, D, |i, j| array[i][j])
}

/// Copy a `D x D` dynamic matrix back into a row-major array.
///
/// PRECONDITION: `mat` is `D x D`.
pub(crate) fn dmatrix_to_array<const D: usize>(mat: &DMatrix<f64>) -> [[f64; D]; D] {
    std::array::from_fn(|i| std::array::from_fn(|j| mat[(i, j)]))
}

/// Multiply two row-major `D x D` matrices.
pub fn matmul<const D: usize>(a: &[[f64; D]; D], b: &[[f64; D]; D]) -> [[f64; D]; D] {
    std::array::from_fn(|i| std::array::from_fn(|j| (0..D).map(|k| a[i][k] * b[k][j]).sum()))
}

/// Multiply a row-major `D x D` matrix with a vector.
pub fn matvec<const D: usize>(a: &[[f64; D]; D], v: &[f64; D]) -> [f64; D] {
    std::array::from_fn(|i| dot(&a[i], v))
}

/// Transpose a row-major `D x D` matrix.
pub fn transpose<const D: usize>(a: &[[f64; D]; D]) -> [[f64; D]; D] {
    std::array::from_fn(|i| std::array::from_fn(|j| a[j][i]))
}

/// Dot product of two vectors.
#[inline]
pub fn dot<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// The identity matrix.
pub fn identity<const D: usize>() -> [[f64; D]; D] {
    std::array::from_fn(|i| std::array::from_fn(|j| if i == j { 1.0 } else { 0.0 }))
}

/// Determinant of a row-major `D x D` matrix.
pub fn determinant<const D: usize>(a: &[[f64; D]; D]) -> f64 {
    array_to_dmatrix(a).determinant()
}

/// Find the proper rotation closest to `mat` in the Frobenius sense.
///
/// Computes `mat = U S Vᵀ` and returns `U Vᵀ`. When `det(U Vᵀ) < 0` the column
/// of `U` paired with the smallest singular value is negated first, so the
/// result is always a rotation with determinant +1 and never a reflection.
///
/// Used both to solve the orthogonal Procrustes problem from a cross-covariance
/// matrix and to re-orthonormalize rotations after composition.
pub fn project_to_rotation<const D: usize>(
    mat: &[[f64; D]; D],
) -> Result<[[f64; D]; D], RegistrationError> {
    let svd = array_to_dmatrix(mat)
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or(RegistrationError::LinearSolve("SVD did not converge"))?;

    let Some(mut u) = svd.u else {
        return Err(RegistrationError::LinearSolve("SVD did not return U"));
    };
    let Some(v_t) = svd.v_t else {
        return Err(RegistrationError::LinearSolve("SVD did not return V^T"));
    };

    let mut r = &u * &v_t;
    if r.determinant() < 0.0 {
        let smallest = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map_or(D - 1, |(i, _)| i);
        u.column_mut(smallest).iter_mut().for_each(|x| *x = -*x);
        r = &u * &v_t;
    }

    Ok(dmatrix_to_array(&r))
}
