//! Fault-injection dice for simulated datagram loss.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::config::RdtConfig;

/// Decides, per outgoing datagram, whether to drop it on the floor.
///
/// Every connection rolls its own dice so that a fixed seed makes a test
/// run reproducible.
pub(crate) struct LossDice {
    percent: u8,
    rng: Mutex<StdRng>,
}

impl LossDice {
    pub(crate) fn new(config: &RdtConfig) -> Self {
        let rng = match config.loss_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            percent: config.loss_percent,
            rng: Mutex::new(rng),
        }
    }

    /// Whether the next outgoing datagram should be dropped.
    pub(crate) fn roll(&self) -> bool {
        self.percent > 0 && self.rng.lock().random_range(0..100) < self.percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_percent_never_drops() {
        let dice = LossDice::new(&RdtConfig::default());
        assert!((0..1000).all(|_| !dice.roll()));
    }

    #[test]
    fn seeded_dice_are_reproducible() {
        let config = RdtConfig {
            loss_percent: 30,
            loss_seed: Some(7),
            ..Default::default()
        };
        let a: Vec<bool> = {
            let dice = LossDice::new(&config);
            (0..100).map(|_| dice.roll()).collect()
        };
        let b: Vec<bool> = {
            let dice = LossDice::new(&config);
            (0..100).map(|_| dice.roll()).collect()
        };
        assert_eq!(a, b);
        assert!(a.iter().any(|&dropped| dropped));
        assert!(a.iter().any(|&dropped| !dropped));
    }
}
