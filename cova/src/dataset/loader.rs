use super::{Batch, PageDataset, SamplingFraction};
use crate::common::*;
use tokio::runtime::Handle;

/// Configuration of a [BatchLoader].
#[derive(Debug, Clone)]
pub struct BatchLoaderInit {
    pub batch_size: usize,
    /// Shuffle the page order in every epoch.
    pub shuffle: bool,
    /// Subsample background boxes. `None` keeps all boxes.
    pub sampling: Option<SamplingFraction>,
    /// Number of batches decoded concurrently.
    pub num_workers: usize,
    /// Capacity of the batch channel.
    pub prefetch: usize,
    pub seed: u64,
}

impl BatchLoaderInit {
    /// Builds the loader. It must be called within a tokio runtime.
    pub fn build(self, dataset: Arc<PageDataset>) -> Result<BatchLoader> {
        let Self {
            batch_size,
            shuffle,
            sampling,
            num_workers,
            prefetch,
            seed,
        } = self;
        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(num_workers > 0, "num_workers must be positive");
        let handle = Handle::try_current()
            .map_err(|_| format_err!("the batch loader must be built within a tokio runtime"))?;

        Ok(BatchLoader {
            batch_size,
            shuffle,
            sampling,
            num_workers,
            prefetch: prefetch.max(1),
            seed,
            epoch: 0,
            dataset,
            handle,
        })
    }
}

/// Loads shuffled or ordered batches in the background.
///
/// Batches are decoded on the blocking thread pool of the runtime and are
/// received from a channel, so the consumer can run on a plain thread.
#[derive(Debug)]
pub struct BatchLoader {
    batch_size: usize,
    shuffle: bool,
    sampling: Option<SamplingFraction>,
    num_workers: usize,
    prefetch: usize,
    seed: u64,
    epoch: u64,
    dataset: Arc<PageDataset>,
    handle: Handle,
}

impl BatchLoader {
    pub fn num_batches(&self) -> usize {
        (self.dataset.num_pages() + self.batch_size - 1) / self.batch_size
    }

    /// Starts a pass over the dataset.
    ///
    /// The receiver yields batches in order and disconnects at the end of the
    /// pass. The page order and the box sampling depend only on the seed and
    /// the number of previous passes.
    pub fn epoch(&mut self) -> flume::Receiver<Result<Batch>> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
        self.epoch += 1;

        let mut order: Vec<usize> = (0..self.dataset.num_pages()).collect();
        if self.shuffle {
            order.shuffle(&mut rng);
        }
        let jobs: Vec<(u64, Vec<usize>)> = order
            .chunks(self.batch_size)
            .map(|chunk| (rng.gen(), chunk.to_vec()))
            .collect();

        let (tx, rx) = flume::bounded(self.prefetch);
        let dataset = self.dataset.clone();
        let sampling = self.sampling;
        let num_workers = self.num_workers;

        self.handle.spawn(async move {
            let mut batches = stream::iter(jobs)
                .map(move |(batch_seed, indexes)| {
                    let dataset = dataset.clone();

                    async move {
                        let batch = tokio::task::spawn_blocking(move || {
                            load_batch(&dataset, &indexes, sampling, batch_seed)
                        })
                        .await??;
                        Ok(batch)
                    }
                })
                .buffered(num_workers);

            while let Some(result) = batches.next().await {
                let failed = result.is_err();
                if tx.send_async(result).await.is_err() || failed {
                    break;
                }
            }
        });

        rx
    }
}

fn load_batch(
    dataset: &PageDataset,
    indexes: &[usize],
    sampling: Option<SamplingFraction>,
    seed: u64,
) -> Result<Batch> {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples: Vec<_> = indexes
        .iter()
        .map(|&index| dataset.load_sample(&dataset.pages()[index], sampling, &mut rng))
        .try_collect()?;
    Batch::collate(samples, dataset.extra_dim())
}
