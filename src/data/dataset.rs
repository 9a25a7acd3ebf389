//! Split datasets and seeded batch iteration

use ndarray::{Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One split (train, val or test) of windowed samples
#[derive(Debug, Clone)]
pub struct SplitData {
    /// `(samples, features, nodes, time)`
    pub week: Array4<f32>,
    pub day: Array4<f32>,
    pub recent: Array4<f32>,
    /// `(samples, nodes, horizon)`
    pub target: Array3<f32>,
}

/// Recent-window inputs and targets for one mini-batch
#[derive(Debug, Clone)]
pub struct Batch {
    pub recent: Array4<f32>,
    pub target: Array3<f32>,
}

impl SplitData {
    /// Get number of samples
    pub fn len(&self) -> usize {
        self.target.dim().0
    }

    /// Check if the split is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sensor nodes
    pub fn num_nodes(&self) -> usize {
        self.target.dim().1
    }

    /// Take rows `start..end` of every component
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let take4 = |a: &Array4<f32>| a.slice(ndarray::s![start..end, .., .., ..]).to_owned();
        Self {
            week: take4(&self.week),
            day: take4(&self.day),
            recent: take4(&self.recent),
            target: self
                .target
                .slice(ndarray::s![start..end, .., ..])
                .to_owned(),
        }
    }

    /// Gather the recent windows and targets of `indices`
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            recent: self.recent.select(Axis(0), indices),
            target: self.target.select(Axis(0), indices),
        }
    }
}

/// Data loader for batched iteration
///
/// Shuffling draws from a `StdRng` seeded at construction, so the sequence of
/// epoch orders is reproducible for a given seed.
pub struct DataLoader {
    indices: Vec<usize>,
    batch_size: usize,
    current_pos: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Create a new data loader
    pub fn new(dataset_size: usize, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..dataset_size).collect();
        if shuffle {
            indices.shuffle(&mut rng);
        }

        Self {
            indices,
            batch_size: batch_size.max(1),
            current_pos: 0,
            shuffle,
            rng,
        }
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }

    /// Reset the loader for a new epoch
    pub fn reset(&mut self) {
        self.current_pos = 0;
        if self.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    /// Get next batch of indices
    pub fn next_batch(&mut self) -> Option<Vec<usize>> {
        if self.current_pos >= self.indices.len() {
            return None;
        }

        let end = (self.current_pos + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.current_pos..end].to_vec();
        self.current_pos = end;

        Some(batch)
    }
}

impl Iterator for DataLoader {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
