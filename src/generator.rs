use crate::sample::{EntityId, Sample, VALUE_MAX, VALUE_MIN};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

const MAX_STEP: f64 = 10.0;
/// Draws of `k` below this value step against the current drift direction.
const REVERSE_PROBABILITY: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RandomWalk,
    Uniform,
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random_walk" | "walk" => Ok(Strategy::RandomWalk),
            "uniform" => Ok(Strategy::Uniform),
            other => Err(anyhow::anyhow!("unknown generator strategy {other:?}")),
        }
    }
}

/// Produces synthetic readings for equipment entities.
pub trait SignalGenerator: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn generate_next(&self, entity_id: EntityId) -> Sample;

    /// Drops any per-entity state. Returns whether state existed.
    fn forget(&self, entity_id: EntityId) -> bool;
}

pub fn build(strategy: Strategy, seed: Option<u64>) -> Arc<dyn SignalGenerator> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    match strategy {
        Strategy::RandomWalk => Arc::new(RandomWalk::new(rng)),
        Strategy::Uniform => Arc::new(UniformNoise::new(rng)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkState {
    pub current_value: f64,
    pub direction: Direction,
}

impl Default for WalkState {
    fn default() -> Self {
        Self {
            current_value: VALUE_MIN,
            direction: Direction::Up,
        }
    }
}

impl WalkState {
    /// Applies one step given `k` in [0, 1) and magnitude `m` in [0, 10). Hitting a bound
    /// clamps the value and turns the drift back toward the range.
    pub fn advance(&mut self, k: f64, m: f64) -> f64 {
        let sign = if k < REVERSE_PROBABILITY { -1.0 } else { 1.0 };
        let tentative = self.current_value + sign * m * self.direction.sign();

        let value = if tentative > VALUE_MAX {
            self.direction = Direction::Down;
            VALUE_MAX
        } else if tentative < VALUE_MIN {
            self.direction = Direction::Up;
            VALUE_MIN
        } else {
            tentative
        };
        self.current_value = value;
        value
    }
}

/// Bounded random walk with one independent walk per entity.
pub struct RandomWalk {
    rng: Mutex<StdRng>,
    walks: Mutex<HashMap<EntityId, Arc<Mutex<WalkState>>>>,
}

impl RandomWalk {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            walks: Mutex::new(HashMap::new()),
        }
    }

    fn walk_for(&self, entity_id: EntityId) -> Arc<Mutex<WalkState>> {
        lock(&self.walks).entry(entity_id).or_default().clone()
    }

    #[cfg(test)]
    pub fn state(&self, entity_id: EntityId) -> Option<WalkState> {
        let walk = lock(&self.walks).get(&entity_id).cloned()?;
        let state = *lock(&walk);
        Some(state)
    }
}

impl SignalGenerator for RandomWalk {
    fn strategy(&self) -> Strategy {
        Strategy::RandomWalk
    }

    fn generate_next(&self, entity_id: EntityId) -> Sample {
        let walk = self.walk_for(entity_id);
        let mut state = lock(&walk);
        let (k, m) = {
            let mut rng = lock(&self.rng);
            (rng.gen::<f64>(), rng.gen_range(0.0..MAX_STEP))
        };
        let value = state.advance(k, m);
        tracing::trace!(entity = entity_id, value, direction = ?state.direction, "random walk step");
        Sample::new(entity_id, value)
    }

    fn forget(&self, entity_id: EntityId) -> bool {
        lock(&self.walks).remove(&entity_id).is_some()
    }
}

/// Memoryless uniform readings in [0, 100).
pub struct UniformNoise {
    rng: Mutex<StdRng>,
}

impl UniformNoise {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl SignalGenerator for UniformNoise {
    fn strategy(&self) -> Strategy {
        Strategy::Uniform
    }

    fn generate_next(&self, entity_id: EntityId) -> Sample {
        let value = lock(&self.rng).gen_range(VALUE_MIN..VALUE_MAX);
        Sample::new(entity_id, value)
    }

    fn forget(&self, _entity_id: EntityId) -> bool {
        false
    }
}
