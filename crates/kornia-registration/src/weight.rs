/// Computes the weight of a single correspondence.
///
/// Implementations are called concurrently from the accumulation workers, so
/// they must be stateless or internally synchronized. The returned weight
/// multiplies the global weight of the metric term the correspondence belongs
/// to. Negative and NaN weights are treated as zero by the estimators.
pub trait WeightEvaluator<V>: Sync {
    /// Weight of the pair `(index_in_first, index_in_second)` carrying `value`.
    fn weight(&self, index_in_first: usize, index_in_second: usize, value: &V) -> f64;
}

/// Gives every correspondence a weight of one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnityWeight;

impl<V> WeightEvaluator<V> for UnityWeight {
    #[inline]
    fn weight(&self, _index_in_first: usize, _index_in_second: usize, _value: &V) -> f64 {
        1.0
    }
}

/// Gives every correspondence the same fixed weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantWeight(pub f64);

impl<V> WeightEvaluator<V> for ConstantWeight {
    #[inline]
    fn weight(&self, _index_in_first: usize, _index_in_second: usize, _value: &V) -> f64 {
        self.0
    }
}

/// Uses the correspondence value itself as the weight, clamped at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValueWeight;

impl WeightEvaluator<f64> for ValueWeight {
    #[inline]
    fn weight(&self, _index_in_first: usize, _index_in_second: usize, value: &f64) -> f64 {
        value.max(0.0)
    }
}

/// Gaussian kernel on the correspondence value: `exp(-v² / (2σ²))`.
///
/// Meant for values that hold a distance between the paired points, so that far
/// apart pairs contribute less to the solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfKernelWeight {
    inv_two_sigma_sq: f64,
}

impl RbfKernelWeight {
    /// Create a kernel with standard deviation `sigma`.
    ///
    /// PRECONDITION: `sigma` is strictly positive.
    pub fn new(sigma: f64) -> Self {
        Self {
            inv_two_sigma_sq: 0.5 / (sigma * sigma),
        }
    }
}

impl WeightEvaluator<f64> for RbfKernelWeight {
    #[inline]
    fn weight(&self, _index_in_first: usize, _index_in_second: usize, value: &f64) -> f64 {
        (-value * value * self.inv_two_sigma_sq).exp()
    }
}

impl<V, F> WeightEvaluator<V> for F
where
    F: Fn(usize, usize, &V) -> f64 + Sync,
{
    #[inline]
    fn weight(&self, index_in_first: usize, index_in_second: usize, value: &V) -> f64 {
        self(index_in_first, index_in_second, value)
    }
}
