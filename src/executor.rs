//! Drives the reduction over groups of sky pixels.
//!
//! The work is described by a [`GroupReduction`]: a fixed number of groups,
//! each of which independently produces an [`AccumulationMatrix`]. An
//! [`Executor`] decides how the groups are run. Regardless of the executor,
//! the partial results are always merged in group order, which means that
//! all executors produce bitwise identical results for a given number of
//! groups.
//!
//! Progress is reported through a channel to a single aggregator thread (see
//! [`with_progress`]), so workers never contend on a lock.

use crate::Error;
use crate::pixelization::PixelId;
use crossbeam_channel::{Receiver, Sender, unbounded};
use forestpair_internal::AccumulationMatrix;
use rayon::prelude::*;
use std::num::NonZeroUsize;

/// Describes a reduction that has been split into independent groups
pub trait GroupReduction: Sync {
    /// the number of bins of every partial result
    fn n_bins(&self) -> usize;

    fn n_groups(&self) -> usize;

    /// Compute the partial result of a single group
    fn reduce_group(&self, group_id: usize) -> Result<AccumulationMatrix, Error>;
}

/// Runs the groups of a [`GroupReduction`] and combines their results.
pub trait Executor {
    fn drive_reduce(
        &mut self,
        reduce_spec: &impl GroupReduction,
    ) -> Result<AccumulationMatrix, Error>;
}

fn merge_in_order(
    n_bins: usize,
    partials: impl IntoIterator<Item = AccumulationMatrix>,
) -> Result<AccumulationMatrix, Error> {
    let mut total = AccumulationMatrix::zeros(n_bins).map_err(Error::internal_legacy_adhoc)?;
    for partial in partials {
        total
            .merge(&partial)
            .map_err(Error::internal_legacy_adhoc)?;
    }
    Ok(total)
}

/// Runs every group on the calling thread.
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn drive_reduce(
        &mut self,
        reduce_spec: &impl GroupReduction,
    ) -> Result<AccumulationMatrix, Error> {
        let mut total =
            AccumulationMatrix::zeros(reduce_spec.n_bins()).map_err(Error::internal_legacy_adhoc)?;
        for group_id in 0..reduce_spec.n_groups() {
            let partial = reduce_spec.reduce_group(group_id)?;
            total
                .merge(&partial)
                .map_err(Error::internal_legacy_adhoc)?;
        }
        Ok(total)
    }
}

/// Runs the groups on a dedicated pool of worker threads.
///
/// The first error reported by any group aborts the whole reduction.
pub struct PoolExecutor {
    pool: rayon::ThreadPool,
}

impl PoolExecutor {
    pub fn new(n_workers: NonZeroUsize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers.get())
            .thread_name(|i| format!("forestpair-worker-{i}"))
            .build()
            .map_err(|e| Error::worker_pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn n_workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for PoolExecutor {
    fn drive_reduce(
        &mut self,
        reduce_spec: &impl GroupReduction,
    ) -> Result<AccumulationMatrix, Error> {
        // collect preserves the order of the groups
        let partials = self.pool.install(|| {
            (0..reduce_spec.n_groups())
                .into_par_iter()
                .map(|group_id| reduce_spec.reduce_group(group_id))
                .collect::<Result<Vec<_>, Error>>()
        })?;
        merge_in_order(reduce_spec.n_bins(), partials)
    }
}

/// Assign the (sorted) pixel ids to `n_groups` groups in round-robin order.
///
/// Empty groups are never produced, so there may be fewer than `n_groups`
/// groups.
pub fn round_robin(pixel_ids: &[PixelId], n_groups: NonZeroUsize) -> Vec<Vec<PixelId>> {
    let n_groups = n_groups.get().min(pixel_ids.len());
    let mut groups = vec![Vec::new(); n_groups];
    for (i, pixel) in pixel_ids.iter().enumerate() {
        groups[i % n_groups].push(*pixel);
    }
    groups
}

/// Handle used by workers to report progress
#[derive(Clone)]
pub struct ProgressSender {
    sender: Sender<usize>,
}

impl ProgressSender {
    /// Report that `n` more forests have been processed
    pub fn forests_done(&self, n: usize) {
        // the aggregator outlives every sender
        let _ = self.sender.send(n);
    }
}

/// Run `f` while a dedicated thread aggregates the progress reports.
///
/// The aggregator logs a line every time another 10% of `total` forests have
/// been processed. It shuts down once `f` returns (and every clone of the
/// [`ProgressSender`] has been dropped).
pub fn with_progress<T>(total: usize, f: impl FnOnce(&ProgressSender) -> T) -> T {
    let (sender, receiver) = unbounded();
    std::thread::scope(|scope| {
        scope.spawn(move || aggregate_progress(receiver, total));
        let progress = ProgressSender { sender };
        f(&progress)
        // `progress` is dropped here, which lets the aggregator finish
    })
}

fn aggregate_progress(receiver: Receiver<usize>, total: usize) {
    let mut done = 0;
    let mut next_report = 10;
    for n in receiver.iter() {
        done += n;
        let percent = (100 * done) / total.max(1);
        if percent >= next_report {
            tracing::info!(done, total, percent, "computing the distortion matrix");
            next_report = (percent / 10 + 1) * 10;
        }
    }
    tracing::debug!(done, total, "progress aggregator finished");
}
