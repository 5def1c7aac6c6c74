//! Data-parallel kernel dispatch over contiguous index ranges.
//!
//! Kernels are pure functions of the index with no cross-index mutable
//! aliasing, so they may run in any order on any number of workers. With the
//! `rayon` feature the work is dispatched to the rayon pool; otherwise it
//! runs as a plain serial loop with identical results.

/// Run `f(i)` for every `i` in `[0, n)`.
pub fn parallel_for<F>(n: usize, f: F)
where
    F: Fn(usize) + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..n).into_par_iter().for_each(f);
    }
    #[cfg(not(feature = "rayon"))]
    {
        for i in 0..n {
            f(i);
        }
    }
}

/// Collect `f(i)` for every `i` in `[0, n)`, in index order.
pub fn parallel_map<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..n).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).collect()
    }
}
