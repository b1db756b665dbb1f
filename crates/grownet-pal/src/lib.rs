//! Deterministic parallelism layer for the GrowNet engine
//!
//! The engine's tick is single-threaded end-to-end; the only parallelism it
//! ever uses goes through this crate. `parallel_for` and `parallel_map`
//! split a domain into fixed-size tiles, run the kernel per tile (on a rayon
//! pool when the `parallel` feature is enabled, inline otherwise), and hand
//! per-item results to a single-threaded reducer in domain order. Results
//! are therefore bitwise-stable regardless of worker count.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod domains;
pub mod rng;

pub use domains::{build_layer_neuron_tiles, IndexDomain, Tile};
pub use rng::{counter_rng, mix64};

use parking_lot::Mutex;

/// Environment variable overriding the resolved worker count.
pub const MAX_WORKERS_ENV: &str = "GROWNET_PAL_MAX_WORKERS";

/// Default number of domain items per tile.
pub const DEFAULT_TILE_SIZE: usize = 4096;

/// Options controlling tile size and worker resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelOptions {
    /// Worker cap; `None` resolves from the environment, then CPU count.
    pub max_workers: Option<usize>,
    /// Number of domain items per tile.
    pub tile_size: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_workers: None,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

impl ParallelOptions {
    /// Create options with an explicit worker cap.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers.max(1));
        self
    }

    /// Create options with an explicit tile size (clamped to at least 1).
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }
}

static GLOBAL_OPTIONS: Mutex<ParallelOptions> = Mutex::new(ParallelOptions {
    max_workers: None,
    tile_size: DEFAULT_TILE_SIZE,
});

/// Replace the process-wide default options.
pub fn configure(options: ParallelOptions) {
    *GLOBAL_OPTIONS.lock() = options;
}

/// Snapshot the process-wide default options.
pub fn current_options() -> ParallelOptions {
    GLOBAL_OPTIONS.lock().clone()
}

fn resolve_max_workers(options: &ParallelOptions) -> usize {
    if let Some(workers) = options.max_workers {
        return workers.max(1);
    }
    if let Ok(raw) = std::env::var(MAX_WORKERS_ENV) {
        if let Ok(parsed) = raw.trim().parse::<usize>() {
            return parsed.max(1);
        }
    }
    num_cpus::get().max(1)
}

fn resolve_tile_size(options: &ParallelOptions) -> usize {
    options.tile_size.max(1)
}

/// Run `kernel` over every item of `items`.
///
/// Tiles are dispatched concurrently when the `parallel` feature is on;
/// the kernel must not rely on cross-item ordering. Mutation of shared
/// state from the kernel is the caller's responsibility to avoid.
pub fn parallel_for<T, F>(items: &[T], kernel: F, options: Option<&ParallelOptions>)
where
    T: Sync,
    F: Fn(&T) + Send + Sync,
{
    if items.is_empty() {
        return;
    }
    let defaults = current_options();
    let opts = options.unwrap_or(&defaults);
    let tile = resolve_tile_size(opts);

    #[cfg(feature = "parallel")]
    {
        let workers = resolve_max_workers(opts);
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                pool.install(|| {
                    use rayon::prelude::*;
                    items.par_chunks(tile).for_each(|chunk| {
                        for item in chunk {
                            kernel(item);
                        }
                    });
                });
                return;
            }
            Err(err) => {
                log::warn!("PAL pool construction failed ({err}); running serially");
            }
        }
    }

    for chunk in items.chunks(tile) {
        for item in chunk {
            kernel(item);
        }
    }
}

/// Map every item of `items` through `kernel`, then reduce all results in
/// domain order on the calling thread.
///
/// The ordered reduction is the determinism contract of this crate: partial
/// results are concatenated tile-by-tile in enumeration order before
/// `reduce_in_order` sees them, so the reducer observes exactly the same
/// sequence no matter how many workers ran the kernels.
pub fn parallel_map<T, R, F, G>(
    items: &[T],
    kernel: F,
    reduce_in_order: G,
    options: Option<&ParallelOptions>,
) -> R
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Send + Sync,
    G: FnOnce(Vec<R>) -> R,
{
    if items.is_empty() {
        return reduce_in_order(Vec::new());
    }
    let defaults = current_options();
    let opts = options.unwrap_or(&defaults);
    let tile = resolve_tile_size(opts);

    #[cfg(feature = "parallel")]
    {
        let workers = resolve_max_workers(opts);
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                let partials: Vec<Vec<R>> = pool.install(|| {
                    use rayon::prelude::*;
                    items
                        .par_chunks(tile)
                        .map(|chunk| chunk.iter().map(&kernel).collect())
                        .collect()
                });
                let mut flat = Vec::with_capacity(items.len());
                for part in partials {
                    flat.extend(part);
                }
                return reduce_in_order(flat);
            }
            Err(err) => {
                log::warn!("PAL pool construction failed ({err}); running serially");
            }
        }
    }

    let flat: Vec<R> = items.iter().map(&kernel).collect();
    reduce_in_order(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_parallel_for_visits_every_item() {
        let items: Vec<u64> = (0..10_000).collect();
        let sum = AtomicU64::new(0);
        parallel_for(&items, |v| {
            sum.fetch_add(*v, Ordering::Relaxed);
        }, None);
        assert_eq!(sum.load(Ordering::Relaxed), 10_000 * 9_999 / 2);
    }

    #[test]
    fn test_parallel_map_ordered_reduction() {
        let items: Vec<i64> = (0..5_000).collect();
        let reduced = parallel_map(
            &items,
            |v| v * 2,
            |partials| {
                // Ordered concatenation means this is exactly 0,2,4,...
                for (index, value) in partials.iter().enumerate() {
                    assert_eq!(*value, index as i64 * 2);
                }
                partials.iter().sum::<i64>()
            },
            None,
        );
        assert_eq!(reduced, 5_000 * 4_999);
    }

    #[test]
    fn test_results_stable_across_worker_counts() {
        let items: Vec<f64> = (0..2_048).map(|v| v as f64 * 0.001).collect();
        let run = |workers: usize| {
            let opts = ParallelOptions::default()
                .with_max_workers(workers)
                .with_tile_size(64);
            parallel_map(
                &items,
                |v| v.sin(),
                |partials| partials.into_iter().fold(0.0_f64, |acc, v| acc + v),
                Some(&opts),
            )
        };
        let serial = run(1);
        let wide = run(8);
        assert_eq!(serial.to_bits(), wide.to_bits());
    }

    #[test]
    fn test_empty_domain() {
        let items: Vec<u32> = Vec::new();
        let reduced = parallel_map(&items, |v| *v, |partials| partials.len() as u32, None);
        assert_eq!(reduced, 0);
    }

    #[test]
    fn test_options_roundtrip() {
        let original = current_options();
        configure(ParallelOptions::default().with_tile_size(128).with_max_workers(2));
        assert_eq!(current_options().tile_size, 128);
        assert_eq!(current_options().max_workers, Some(2));
        configure(original);
    }
}
