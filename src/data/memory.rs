//! Loader over batches held in memory

use ndarray::{concatenate, Axis, Slice};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::model::{Batch, BatchLoader};

/// Batch loader over a fixed set of in-memory batches.
///
/// With shuffling enabled the traversal order is drawn from a seeded RNG,
/// so two loaders built with the same seed replay the same order.
pub struct InMemoryLoader {
    batches: Vec<Batch>,
    shuffle: bool,
    rng: StdRng,
}

impl InMemoryLoader {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches,
            shuffle: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Shuffle batch order on every traversal, reproducibly from `seed`
    #[must_use]
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// First batch in storage order, untouched by shuffling
    pub fn first(&self) -> Option<&Batch> {
        self.batches.first()
    }

    /// Regroup the stored images into batches of `batch_size` (the last
    /// batch may be smaller). `batch_size == 0` keeps the stored grouping.
    /// Fails when images or label maps have mixed spatial dimensions.
    pub fn rebatched(self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Ok(self);
        }

        let mut images = Vec::new();
        let mut labels = Vec::new();
        for batch in &self.batches {
            for i in 0..batch.len() {
                images.push(
                    batch
                        .images
                        .slice_axis(Axis(0), Slice::from(i..i + 1))
                        .to_owned(),
                );
                labels.push(
                    batch
                        .labels
                        .slice_axis(Axis(0), Slice::from(i..i + 1))
                        .to_owned(),
                );
            }
        }

        let mixed =
            || Error::Config("dataset images have mixed shapes; cannot re-batch".to_string());
        let batches = images
            .chunks(batch_size)
            .zip(labels.chunks(batch_size))
            .map(|(im, lb)| {
                let im: Vec<_> = im.iter().map(|a| a.view()).collect();
                let lb: Vec<_> = lb.iter().map(|a| a.view()).collect();
                Ok(Batch::new(
                    concatenate(Axis(0), &im).map_err(|_| mixed())?,
                    concatenate(Axis(0), &lb).map_err(|_| mixed())?,
                ))
            })
            .collect::<Result<Vec<Batch>>>()?;

        Ok(Self { batches, ..self })
    }

    /// Number of batches per traversal
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchLoader for InMemoryLoader {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let mut order: Vec<usize> = (0..self.batches.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let batches = &self.batches;
        Box::new(order.into_iter().map(move |i| batches[i].clone()))
    }
}
