//! Loss simulation for transmission attempts.
//!
//! The stream underneath the protocol never loses anything, so loss is
//! injected on the sending side: before every transmission attempt (first
//! send or retransmission) the run loop asks a [`LossModel`] whether the
//! attempt is dropped.  A dropped attempt never reaches the wire.
//!
//! | Model            | Behaviour                                          |
//! |------------------|----------------------------------------------------|
//! | [`RandomLoss`]   | Independent Bernoulli draw against `drop_rate`.    |
//! | [`ScriptedLoss`] | Drops the attempts whose ordinals were listed.     |
//!
//! Models carry no protocol state; [`RandomLoss`] only owns its RNG, which
//! can be seeded so runs are reproducible.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides, once per transmission attempt, whether that attempt is lost.
pub trait LossModel: Send {
    /// `true` when the attempt must be treated as dropped.
    fn should_drop(&mut self) -> bool;
}

/// Uniform random loss with a fixed drop probability.
#[derive(Debug, Clone)]
pub struct RandomLoss {
    drop_rate: f64,
    rng: StdRng,
}

impl RandomLoss {
    /// Random loss seeded from the operating system.
    pub fn new(drop_rate: f64) -> Self {
        Self {
            drop_rate,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Random loss with a fixed seed, for reproducible runs.
    pub fn seeded(drop_rate: f64, seed: u64) -> Self {
        Self {
            drop_rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build from an optional seed.
    pub fn with_seed(drop_rate: f64, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(drop_rate, seed),
            None => Self::new(drop_rate),
        }
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }
}

impl LossModel for RandomLoss {
    fn should_drop(&mut self) -> bool {
        self.rng.random::<f64>() < self.drop_rate
    }
}

/// Drops exactly the attempts whose 1-based ordinals are listed.
///
/// `ScriptedLoss::dropping([3])` loses the third attempt and delivers every
/// other one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLoss {
    drops: BTreeSet<u64>,
    attempts: u64,
}

impl ScriptedLoss {
    /// A model that never drops.
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn dropping(ordinals: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drops: ordinals.into_iter().collect(),
            attempts: 0,
        }
    }

    /// Number of attempts seen so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

impl LossModel for ScriptedLoss {
    fn should_drop(&mut self) -> bool {
        self.attempts += 1;
        self.drops.contains(&self.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_drops() {
        let mut loss = RandomLoss::seeded(0.0, 7);
        assert!((0..10_000).all(|_| !loss.should_drop()));
    }

    #[test]
    fn seeded_models_agree() {
        let mut a = RandomLoss::seeded(0.3, 42);
        let mut b = RandomLoss::seeded(0.3, 42);
        let run_a: Vec<bool> = (0..500).map(|_| a.should_drop()).collect();
        let run_b: Vec<bool> = (0..500).map(|_| b.should_drop()).collect();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn observed_rate_tracks_configured_rate() {
        let mut loss = RandomLoss::seeded(0.25, 1);
        let drops = (0..40_000).filter(|_| loss.should_drop()).count();
        let rate = drops as f64 / 40_000.0;
        assert!((rate - 0.25).abs() < 0.02, "observed rate {rate}");
    }

    #[test]
    fn scripted_drops_listed_attempts_only() {
        let mut loss = ScriptedLoss::dropping([3, 5]);
        let outcome: Vec<bool> = (0..6).map(|_| loss.should_drop()).collect();
        assert_eq!(outcome, [false, false, true, false, true, false]);
        assert_eq!(loss.attempts(), 6);
    }
}
