//! Best-effort Rayon pool for partition-local phases.
//!
//! Rayon normally uses a global thread pool, whose initialization can fail
//! under tight resource constraints and then panics on first use. The driver
//! instead builds a crate-local pool once and falls back to sequential
//! execution when no pool can be created (or the `parallel` feature is off).

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static RAYON_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_rayon_pool() -> Option<ThreadPool> {
    let requested = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let try_build = |n| rayon::ThreadPoolBuilder::new().num_threads(n).build();

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(_) if requested > 1 => try_build(1).ok(),
        Err(_) => None,
    }
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn rayon_pool() -> Option<&'static ThreadPool> {
    RAYON_POOL.get_or_init(build_rayon_pool).as_ref()
}

/// Apply `f` to every partition id, collecting results in partition order.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn map_partitions<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    use rayon::prelude::*;

    match rayon_pool() {
        Some(pool) if n > 1 => pool.install(|| (0..n).into_par_iter().map(&f).collect()),
        _ => (0..n).map(f).collect(),
    }
}

#[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
pub(crate) fn map_partitions<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    (0..n).map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_arrive_in_partition_order() {
        let out = map_partitions(8, |p| p * 2);
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }
}
