//! Deterministic pseudo-random numbers
//!
//! A linear congruential generator, so a story replays identically from the same
//! seed and a snapshot carries the whole generator in two integers.

const A: u64 = 1_103_515_245;
const C: u64 = 12_345;
const M: u64 = 1 << 31;

pub const DEFAULT_SEED: u32 = 1337;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prng {
    /// Seed given to the last `srand`, mixed into sequence shuffles
    seed: u32,
    state: u32,
}

impl Prng {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u32) -> Self {
        Prng {
            seed,
            state: seed % M as u32,
        }
    }

    /// Rebuild a generator from its serialised parts
    pub fn from_parts(seed: u32, state: u32) -> Self {
        Prng { seed, state }
    }

    pub fn srand(&mut self, seed: u32) {
        *self = Self::with_seed(seed);
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Next value in `[0, 2^31)`
    pub fn rand(&mut self) -> u32 {
        self.state = ((A * self.state as u64 + C) % M) as u32;
        self.state
    }

    /// Uniform value in `[min, max]`
    pub fn range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (max as i64 - min as i64 + 1) as u64;
        (min as i64 + (self.rand() as u64 % span) as i64) as i32
    }
}

impl Default for Prng {
    fn default() -> Self {
        Self::new()
    }
}

/// Element a shuffle sequence shows on its `count`-th visit
///
/// Every element is shown exactly once per loop through the sequence; the order of
/// each loop is fixed by `container`, the loop number and the story seed.
pub fn shuffle_index(container: u32, count: i32, elements: i32, story_seed: u32) -> i32 {
    if elements <= 0 {
        return 0;
    }
    let count = count.max(0);
    let loop_index = count / elements;
    let iteration = count % elements;

    let seed = container
        .wrapping_add(loop_index as u32)
        .wrapping_add(story_seed);
    let mut rng = Prng::with_seed(seed);

    let mut unpicked: Vec<i32> = (0..elements).collect();
    let mut chosen = 0;
    for _ in 0..=iteration {
        let pick = rng.rand() as usize % unpicked.len();
        chosen = unpicked.remove(pick);
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = Prng::with_seed(42);
        let mut b = Prng::with_seed(42);
        let xs: Vec<u32> = (0..5).map(|_| a.rand()).collect();
        let ys: Vec<u32> = (0..5).map(|_| b.rand()).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|x| *x < (1 << 31)));
    }

    #[test]
    fn test_range_is_inclusive() {
        let mut rng = Prng::new();
        let mut seen = [false; 3];
        for _ in 0..200 {
            let v = rng.range(1, 3);
            assert!((1..=3).contains(&v));
            seen[(v - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_shuffle_visits_every_element_per_loop() {
        for lap in 0..3 {
            let mut shown: Vec<i32> = (0..4).map(|i| shuffle_index(7, lap * 4 + i, 4, 1337)).collect();
            shown.sort();
            assert_eq!(shown, vec![0, 1, 2, 3]);
        }
    }
}
