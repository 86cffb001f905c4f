//! Epoch-shuffled batch sampling.
//!
//! Used by the prompt builder to draw in-context examples and subject items:
//! within one epoch every element is drawn at most once, and the order is
//! reshuffled whenever the subset is exhausted.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Creates the random generator for a sampling run.
///
/// A seed makes the run reproducible; otherwise the generator is seeded from
/// the thread-local RNG.
pub fn create_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

/// One drawn batch: original indices and the elements they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<'a, T> {
    pub indices: Vec<usize>,
    pub items: Vec<&'a T>,
}

/// Draws batches from a subset of `samples` without replacement per epoch.
///
/// The last batch of an epoch may be shorter than `batch_size`.
#[derive(Debug, Clone)]
pub struct SubsetBatchSampler<'a, T> {
    samples: &'a [T],
    subset: Vec<usize>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
}

impl<'a, T> SubsetBatchSampler<'a, T> {
    /// Sample from the whole of `samples`.
    pub fn new(samples: &'a [T], batch_size: usize) -> Self {
        Self::with_subset(samples, batch_size, (0..samples.len()).collect())
    }

    /// Sample only from the given indices of `samples`. Out-of-range indices
    /// are dropped.
    pub fn with_subset(samples: &'a [T], batch_size: usize, mut subset: Vec<usize>) -> Self {
        subset.retain(|&i| i < samples.len());
        Self {
            samples,
            subset,
            batch_size,
            order: Vec::new(),
            cursor: 0,
        }
    }

    pub fn subset_len(&self) -> usize {
        self.subset.len()
    }

    fn reset(&mut self, rng: &mut ChaCha8Rng) {
        self.order = (0..self.subset.len()).collect();
        self.order.shuffle(rng);
        self.cursor = 0;
    }

    /// Draw the next batch, starting a new epoch first if the current one is
    /// exhausted. An empty subset yields empty batches.
    pub fn next_batch(&mut self, rng: &mut ChaCha8Rng) -> Batch<'a, T> {
        if self.cursor >= self.order.len() {
            self.reset(rng);
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let picked = &self.order[self.cursor..end];
        self.cursor = end;

        let indices: Vec<usize> = picked.iter().map(|&i| self.subset[i]).collect();
        let items = indices.iter().map(|&i| &self.samples[i]).collect();
        Batch { indices, items }
    }

    /// Draw a single element.
    pub fn next_one(&mut self, rng: &mut ChaCha8Rng) -> Option<(usize, &'a T)> {
        let saved = self.batch_size;
        self.batch_size = 1;
        let batch = self.next_batch(rng);
        self.batch_size = saved;
        batch.indices.first().copied().zip(batch.items.first().copied())
    }
}
