//! Synthetic failure injection used for resilience testing.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use rand::Rng;

/// Source of fair coin flips. `true` means "fail".
pub trait Coin: Send + Sync {
    fn flip(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FairCoin;

impl Coin for FairCoin {
    fn flip(&self) -> bool {
        rand::thread_rng().gen_bool(0.5)
    }
}

/// Always lands the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedCoin(pub bool);

impl Coin for FixedCoin {
    fn flip(&self) -> bool {
        self.0
    }
}

/// Wraps another coin and counts how many times it was flipped.
#[derive(Default)]
pub struct CountingCoin<C> {
    inner: C,
    flips: AtomicUsize,
}

impl<C: Coin> CountingCoin<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            flips: AtomicUsize::new(0),
        }
    }

    pub fn flips(&self) -> usize {
        self.flips.load(Ordering::Relaxed)
    }
}

impl<C: Coin> Coin for CountingCoin<C> {
    fn flip(&self) -> bool {
        self.flips.fetch_add(1, Ordering::Relaxed);
        self.inner.flip()
    }
}

impl<C: Coin> Coin for Arc<C> {
    fn flip(&self) -> bool {
        self.as_ref().flip()
    }
}

#[derive(Clone)]
pub struct ChaosController {
    coin: Arc<dyn Coin>,
}

impl ChaosController {
    pub fn new() -> Self {
        Self::with_coin(FairCoin)
    }

    pub fn with_coin(coin: impl Coin + 'static) -> Self {
        Self {
            coin: Arc::new(coin),
        }
    }

    /// One independent draw when `chaos_enabled`, otherwise always `false` without drawing.
    pub fn should_fail(&self, chaos_enabled: bool) -> bool {
        chaos_enabled && self.coin.flip()
    }
}

impl Default for ChaosController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChaosController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaosController").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tests/chaos_tests.rs"]
mod tests;
