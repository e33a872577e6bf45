//! Deterministic train/validation partition.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Disjoint index sets over an ordered sample list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

impl Split {
    /// `max(1, floor(total * fraction))`, never more than `total`.
    pub fn validation_size(total: usize, fraction: f64) -> usize {
        (((total as f64) * fraction).floor() as usize)
            .max(1)
            .min(total)
    }

    /// Shuffle `0..total` with a generator seeded by `seed`; the first
    /// `validation_size` indices are validation, the rest train.
    pub fn new(total: usize, seed: u64, fraction: f64) -> Self {
        let mut indices: Vec<usize> = (0..total).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let train = indices.split_off(Self::validation_size(total, fraction));
        Self {
            train,
            validation: indices,
        }
    }
}
