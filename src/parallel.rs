use crate::error::{DatasetError, Result};
use crate::sample::{Item, Sample};
use rayon::prelude::*;
use tracing::info;

/// Probe the validity of candidate samples in parallel, keeping the valid
/// ones in candidate order.
pub fn probe_validity_parallel(candidates: Vec<Sample>, label: &str) -> Result<Vec<Sample>> {
    info!(
        "Probing {} {} candidates in parallel using {} threads",
        candidates.len(),
        label,
        rayon::current_num_threads()
    );

    let flags: Result<Vec<bool>> = candidates.par_iter().map(Sample::is_valid).collect();
    let flags = flags?;

    Ok(candidates
        .into_iter()
        .zip(flags)
        .filter_map(|(sample, valid)| valid.then_some(sample))
        .collect())
}

/// Chunk-based probing for large candidate sets, logging progress per chunk
pub fn probe_validity_chunked(candidates: Vec<Sample>, label: &str, chunk_size: usize) -> Result<Vec<Sample>> {
    let chunk_size = chunk_size.max(1);
    let total = candidates.len();
    let n_chunks = total.div_ceil(chunk_size);
    let mut valid = Vec::with_capacity(total);
    let mut remaining = candidates;

    for chunk_idx in 0..n_chunks {
        let rest = remaining.split_off(chunk_size.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, rest);
        info!(
            "{} validation: chunk {} of {} (candidates {}-{})",
            label,
            chunk_idx + 1,
            n_chunks,
            chunk_idx * chunk_size + 1,
            chunk_idx * chunk_size + chunk.len()
        );
        valid.extend(probe_validity_parallel(chunk, label)?);
    }
    Ok(valid)
}

/// Load samples in parallel, results in input order
pub fn load_items_parallel(samples: &[&Sample]) -> Result<Vec<Item>> {
    samples.par_iter().map(|sample| sample.load()).collect()
}

/// Dedicated pool of `num_threads` workers for batch loading
pub fn thread_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("gridwindow-loader-{}", i))
        .build()
        .map_err(|e| DatasetError::configuration(format!("Failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_pool_size() {
        let pool = thread_pool(2).unwrap();
        assert_eq!(pool.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(probe_validity_chunked(Vec::new(), "train", 8).unwrap().is_empty());
        assert!(load_items_parallel(&[]).unwrap().is_empty());
    }
}
