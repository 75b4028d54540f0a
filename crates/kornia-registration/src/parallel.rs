use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during parallel execution.
#[derive(Error, Debug, PartialEq)]
pub enum ParallelError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),

    /// The chunk size for the chunked strategy must be valid.
    #[error("chunk size must be > 0 for the Chunked strategy")]
    InvalidChunkSize(usize),
}

/// Controls how the per-correspondence accumulation is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool and let it split the work per element.
    ///
    /// Each worker folds into a private accumulator; the partial results are
    /// merged at the join.
    #[default]
    ParallelElements,

    /// Use the global Rayon thread pool over fixed size chunks of the input.
    ///
    /// Every chunk is folded into its own accumulator.
    Chunked(usize),

    /// Run sequentially on the current thread.
    ///
    /// Useful for small correspondence sets, debugging, or when bit-exact
    /// reproducibility between runs is required.
    Serial,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every call, which has significant overhead.
    /// Use this primarily for benchmarking or specific isolation needs.
    Fixed(usize),
}

impl ExecutionStrategy {
    /// Check that the strategy parameters are usable.
    pub fn validate(&self) -> Result<(), ParallelError> {
        match *self {
            ExecutionStrategy::Chunked(0) => Err(ParallelError::InvalidChunkSize(0)),
            ExecutionStrategy::Fixed(0) => Err(ParallelError::InvalidThreadCount(0)),
            _ => Ok(()),
        }
    }
}

/// Fold the indices `0..len` into accumulators and reduce the partial results.
///
/// Every index is visited by exactly one worker. Each worker owns its
/// accumulator; the only synchronization is the final reduction.
///
/// # Arguments
///
/// * `len` - Number of items to visit.
/// * `strategy` - The execution strategy.
/// * `identity` - Creates an empty accumulator.
/// * `fold` - Adds the contribution of one index to an accumulator.
/// * `merge` - Combines two partial accumulators. Must be associative and
///   commutative so the partitioning does not change the result beyond
///   floating point rounding.
///
/// # Returns
///
/// The combined accumulator over all the indices.
pub fn fold_reduce_indexed<A, I, F, M>(
    len: usize,
    strategy: ExecutionStrategy,
    identity: I,
    fold: F,
    merge: M,
) -> Result<A, ParallelError>
where
    A: Send,
    I: Fn() -> A + Sync + Send,
    F: Fn(&mut A, usize) + Sync + Send,
    M: Fn(A, A) -> A + Sync + Send,
{
    strategy.validate()?;

    let fold_range = |range: std::ops::Range<usize>| {
        let mut acc = identity();
        range.for_each(|i| fold(&mut acc, i));
        acc
    };

    let par_fold_reduce = || {
        (0..len)
            .into_par_iter()
            .fold(&identity, |mut acc, i| {
                fold(&mut acc, i);
                acc
            })
            .reduce(&identity, &merge)
    };

    let acc = match strategy {
        ExecutionStrategy::Serial => fold_range(0..len),
        ExecutionStrategy::ParallelElements => par_fold_reduce(),
        ExecutionStrategy::Chunked(chunk_size) => (0..len.div_ceil(chunk_size))
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * chunk_size;
                fold_range(start..len.min(start + chunk_size))
            })
            .reduce(&identity, &merge),
        ExecutionStrategy::Fixed(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ParallelError::BuildError(e.to_string()))?;
            pool.install(par_fold_reduce)
        }
    };

    Ok(acc)
}

/// Trait to fold a slice into an accumulator and reduce the partial results.
pub trait ReduceExt<T> {
    /// Fold every element into an accumulator and combine the partial accumulators.
    ///
    /// Same contract as [`fold_reduce_indexed`], with the element handed to
    /// `fold` instead of its index.
    fn fold_reduce_with<A, I, F, M>(
        &self,
        strategy: ExecutionStrategy,
        identity: I,
        fold: F,
        merge: M,
    ) -> Result<A, ParallelError>
    where
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, &T) + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send;
}

impl<T: Sync> ReduceExt<T> for [T] {
    fn fold_reduce_with<A, I, F, M>(
        &self,
        strategy: ExecutionStrategy,
        identity: I,
        fold: F,
        merge: M,
    ) -> Result<A, ParallelError>
    where
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, &T) + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send,
    {
        fold_reduce_indexed(
            self.len(),
            strategy,
            identity,
            |acc, i| fold(acc, &self[i]),
            merge,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_with(strategy: ExecutionStrategy, data: &[u64]) -> Result<u64, ParallelError> {
        data.fold_reduce_with(strategy, || 0u64, |acc, x| *acc += *x, |a, b| a + b)
    }

    #[test]
    fn test_reduce_serial() -> Result<(), ParallelError> {
        let data = (1..=100).collect::<Vec<u64>>();
        assert_eq!(sum_with(ExecutionStrategy::Serial, &data)?, 5050);
        Ok(())
    }

    #[test]
    fn test_reduce_parallel_elements() -> Result<(), ParallelError> {
        let data = (1..=1000).collect::<Vec<u64>>();
        assert_eq!(
            sum_with(ExecutionStrategy::ParallelElements, &data)?,
            500500
        );
        Ok(())
    }

    #[test]
    fn test_reduce_chunked() -> Result<(), ParallelError> {
        let data = (1..=10).collect::<Vec<u64>>();
        assert_eq!(sum_with(ExecutionStrategy::Chunked(3), &data)?, 55);
        Ok(())
    }

    #[test]
    fn test_reduce_chunked_invalid() {
        let res = sum_with(ExecutionStrategy::Chunked(0), &[1, 2, 3]);
        assert_eq!(res, Err(ParallelError::InvalidChunkSize(0)));
    }

    #[test]
    fn test_reduce_fixed() -> Result<(), ParallelError> {
        let data = (1..=64).collect::<Vec<u64>>();
        assert_eq!(sum_with(ExecutionStrategy::Fixed(2), &data)?, 2080);
        Ok(())
    }

    #[test]
    fn test_reduce_fixed_invalid() {
        let res = sum_with(ExecutionStrategy::Fixed(0), &[1]);
        assert_eq!(res, Err(ParallelError::InvalidThreadCount(0)));
    }

    #[test]
    fn test_reduce_empty_returns_identity() -> Result<(), ParallelError> {
        let data: Vec<u64> = vec![];
        for strategy in [
            ExecutionStrategy::Serial,
            ExecutionStrategy::ParallelElements,
            ExecutionStrategy::Chunked(4),
        ] {
            assert_eq!(sum_with(strategy, &data)?, 0);
        }
        Ok(())
    }

    #[test]
    fn test_indexed_chunked_uneven_tail() -> Result<(), ParallelError> {
        let total = fold_reduce_indexed(
            10,
            ExecutionStrategy::Chunked(4),
            || 0usize,
            |acc, i| *acc += i,
            |a, b| a + b,
        )?;
        assert_eq!(total, 45);
        Ok(())
    }

    #[test]
    fn test_every_element_visited_once() -> Result<(), ParallelError> {
        let data = (0..257).collect::<Vec<u64>>();
        let mut visited = data.fold_reduce_with(
            ExecutionStrategy::Chunked(16),
            Vec::new,
            |acc: &mut Vec<u64>, x| acc.push(*x),
            |mut a, mut b| {
                a.append(&mut b);
                a
            },
        )?;
        visited.sort_unstable();
        assert_eq!(visited, data);
        Ok(())
    }
}
