//! Usage sampling.
//!
//! Widely-called definitions can have hundreds of call sites; the reviewer
//! only needs a handful. Sampling is uniform without replacement and keeps
//! the sampled items in their original order.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Default number of usages kept per definition.
pub const DEFAULT_USAGE_CAP: usize = 10;

/// Caps a list of usages at a fixed size.
#[derive(Debug, Clone)]
pub struct UsageSampler {
    cap: usize,
    seed: Option<u64>,
}

impl Default for UsageSampler {
    fn default() -> Self {
        Self::new(DEFAULT_USAGE_CAP)
    }
}

impl UsageSampler {
    pub fn new(cap: usize) -> Self {
        Self { cap, seed: None }
    }

    /// Use a fixed seed so repeated runs pick the same sample.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Return at most `cap` items. Inputs at or under the cap come back unchanged.
    pub fn sample<T>(&self, items: Vec<T>) -> Vec<T> {
        if items.len() <= self.cap {
            return items;
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut picked = index::sample(&mut rng, items.len(), self.cap).into_vec();
        picked.sort_unstable();

        let mut picked = picked.into_iter().peekable();
        items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| {
                if picked.peek() == Some(&i) {
                    picked.next();
                    Some(item)
                } else {
                    None
                }
            })
            .collect()
    }
}
