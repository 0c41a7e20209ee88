//! Seeded random number generator for reproducible link and sender runs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A thread-safe, seeded random number generator.
///
/// Every random decision in a simulated run (packet loss, on/off switching)
/// goes through one of these so a seed replays the same run.
#[derive(Clone)]
pub struct SimulationRng {
    inner: Arc<Mutex<SmallRng>>,
    seed: u64,
}

impl SimulationRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `true` with the given probability, which is clamped to `[0, 1]`.
    pub fn gen_bool(&self, probability: f64) -> bool {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self.inner.lock().random_bool(probability)
    }

    /// Uniform in `[0, 1)`.
    pub fn gen_f64(&self) -> f64 {
        self.inner.lock().random()
    }

    /// Exponentially distributed duration with the given mean.
    pub fn gen_exponential(&self, mean: Duration) -> Duration {
        // inverse CDF; 1 - u keeps the argument of ln in (0, 1]
        let u = self.gen_f64();
        let sample = -mean.as_secs_f64() * (1.0 - u).ln();
        Duration::try_from_secs_f64(sample).unwrap_or(Duration::ZERO)
    }

    /// Derives an independent generator for `index`, stable regardless of
    /// the order children are requested in.
    pub fn child_with_index(&self, index: u64) -> Self {
        let derived_seed = self
            .seed
            .wrapping_mul(0x517c_c1b7_2722_0a95)
            .wrapping_add(index);
        Self::new(derived_seed)
    }
}

impl std::fmt::Debug for SimulationRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRng")
            .field("seed", &self.seed)
            .finish()
    }
}
