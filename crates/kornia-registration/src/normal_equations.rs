use nalgebra::{DMatrix, DVector};

use crate::error::RegistrationError;
use crate::parallel::{ExecutionStrategy, ParallelError, ReduceExt};

/// Accumulator of a weighted linear least-squares problem in normal form.
///
/// Every equation `a · x ≈ b` with weight `w` adds `w a aᵀ` to `AtA` and
/// `w a b` to `Atb`. Only the upper triangle of `AtA` is accumulated and it is
/// mirrored when the system is materialized, so `AtA` is exactly symmetric.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    num_unknowns: usize,
    num_equations: usize,
    ata: Vec<f64>,
    atb: Vec<f64>,
    // scratch row reused by `add_equation_with`
    row: Vec<f64>,
}

/// Solution of a [`NormalEquations`] system.
#[derive(Debug, Clone)]
pub struct LinearSolution {
    /// The solution vector.
    pub x: DVector<f64>,
    /// Ratio between the smallest and the largest eigenvalue of `AtA`.
    ///
    /// Zero for a singular or empty system.
    pub reciprocal_condition: f64,
    /// True when `reciprocal_condition` fell below the requested threshold or
    /// the system could not be factorized.
    ///
    /// The flag does not change how the system is solved.
    pub ill_conditioned: bool,
    /// True when the Cholesky factorization failed and `x` is the least-norm
    /// least-squares solution, with the unobservable directions left at zero.
    pub least_norm: bool,
}

impl NormalEquations {
    /// Create an empty system with `num_unknowns` unknowns.
    pub fn zeros(num_unknowns: usize) -> Self {
        Self {
            num_unknowns,
            num_equations: 0,
            ata: vec![0.0; num_unknowns * num_unknowns],
            atb: vec![0.0; num_unknowns],
            row: vec![0.0; num_unknowns],
        }
    }

    /// Number of unknowns of the system.
    pub fn num_unknowns(&self) -> usize {
        self.num_unknowns
    }

    /// Number of equations accumulated so far.
    pub fn num_equations(&self) -> usize {
        self.num_equations
    }

    /// Add the weighted equation `a · x = b`.
    ///
    /// PRECONDITION: `a.len() == self.num_unknowns()`.
    pub fn add_equation(&mut self, a: &[f64], b: f64, weight: f64) {
        let n = self.num_unknowns;
        debug_assert_eq!(a.len(), n);

        for (i, &a_i) in a.iter().enumerate() {
            let wa_i = weight * a_i;
            if wa_i == 0.0 {
                continue;
            }
            let ata_row = &mut self.ata[i * n + i..(i + 1) * n];
            for (dst, &a_j) in ata_row.iter_mut().zip(&a[i..]) {
                *dst += wa_i * a_j;
            }
            self.atb[i] += wa_i * b;
        }
        self.num_equations += 1;
    }

    /// Add one weighted equation built in place.
    ///
    /// `fill` receives a zeroed row of length `num_unknowns`, writes the
    /// coefficients and returns the right hand side.
    pub fn add_equation_with<F>(&mut self, weight: f64, fill: F)
    where
        F: FnOnce(&mut [f64]) -> f64,
    {
        let mut row = std::mem::take(&mut self.row);
        row.fill(0.0);
        let b = fill(&mut row);
        self.add_equation(&row, b, weight);
        self.row = row;
    }

    /// Combine two partial systems over disjoint sets of equations.
    ///
    /// PRECONDITION: both systems have the same number of unknowns.
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.num_unknowns, other.num_unknowns);
        for (dst, src) in self.ata.iter_mut().zip(other.ata.iter()) {
            *dst += src;
        }
        for (dst, src) in self.atb.iter_mut().zip(other.atb.iter()) {
            *dst += src;
        }
        self.num_equations += other.num_equations;
        self
    }

    /// The symmetric `AtA` matrix.
    pub fn ata(&self) -> DMatrix<f64> {
        let n = self.num_unknowns;
        DMatrix::from_fn(n, n, |i, j| {
            if i <= j {
                self.ata[i * n + j]
            } else {
                self.ata[j * n + i]
            }
        })
    }

    /// The `Atb` vector.
    pub fn atb(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.atb)
    }

    /// Solve `AtA x = Atb`.
    ///
    /// The system is solved with a Cholesky factorization whenever it exists.
    /// When it does not, the system is only semi-definite and the least-norm
    /// solution is computed from an SVD, dropping singular values below
    /// `n ε σ_max`.
    ///
    /// # Arguments
    ///
    /// * `min_reciprocal_condition` - Threshold under which the system is
    ///   reported as ill conditioned. Zero only flags singular systems.
    pub fn solve(
        &self,
        min_reciprocal_condition: f64,
    ) -> Result<LinearSolution, RegistrationError> {
        let ata = self.ata();
        let atb = self.atb();

        let eigenvalues = ata.symmetric_eigenvalues();
        let max_eig = eigenvalues.iter().copied().fold(0.0, f64::max);
        let min_eig = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
        let reciprocal_condition = if max_eig > 0.0 {
            min_eig.max(0.0) / max_eig
        } else {
            0.0
        };
        let below_threshold =
            reciprocal_condition <= 0.0 || reciprocal_condition < min_reciprocal_condition;

        if let Some(cholesky) = ata.clone().cholesky() {
            return Ok(LinearSolution {
                x: cholesky.solve(&atb),
                reciprocal_condition,
                ill_conditioned: below_threshold,
                least_norm: false,
            });
        }

        let eps = max_eig * self.num_unknowns as f64 * f64::EPSILON;
        let x = ata
            .try_svd(true, true, f64::EPSILON, 0)
            .ok_or(RegistrationError::LinearSolve("SVD did not converge"))?
            .solve(&atb, eps)
            .map_err(RegistrationError::LinearSolve)?;

        Ok(LinearSolution {
            x,
            reciprocal_condition,
            ill_conditioned: true,
            least_norm: true,
        })
    }
}

/// Accumulate one normal-equation system over a set of items.
///
/// The items are split across workers according to `strategy`; each worker
/// builds a private partial system with `f` and the partial systems are merged
/// at the end.
///
/// # Arguments
///
/// * `items` - The items contributing equations, usually correspondences.
/// * `num_unknowns` - Number of unknowns of the system.
/// * `strategy` - The execution strategy.
/// * `f` - Adds the equations of one item to a partial system.
pub fn accumulate_normal_equations<T, F>(
    items: &[T],
    num_unknowns: usize,
    strategy: ExecutionStrategy,
    f: F,
) -> Result<NormalEquations, ParallelError>
where
    T: Sync,
    F: Fn(&mut NormalEquations, &T) + Sync + Send,
{
    items.fold_reduce_with(
        strategy,
        || NormalEquations::zeros(num_unknowns),
        f,
        NormalEquations::merge,
    )
}
