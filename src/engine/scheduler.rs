//! Politeness scheduler.
//!
//! Enforces a randomized inter-request delay, escalating backoff on blocking
//! responses, and a rotating pool of browser identities. One scheduler per
//! independent traversal; sharing an instance across concurrent traversals
//! would serialize delays that are meant to be per-target.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Base backoff after the first blocking response.
pub const BACKOFF_BASE_MS: u64 = 30_000;
/// Fixed long cooldown served when the block threshold is reached.
pub const COOLDOWN_MS: u64 = 300_000;
/// Consecutive blocks that trigger the long cooldown and a state reset.
pub const MAX_CONSECUTIVE_BLOCKS: u32 = 3;

/// Realistic browser identities for the rotation pool (updated Nov 2024).
pub const IDENTITY_POOL: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    // Firefox on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Consecutive-block count and current backoff multiplier for one traversal.
///
/// Reset to initial values on any successful response and after the long
/// cooldown fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCounterState {
    /// Blocking responses seen since the last success or cooldown.
    pub consecutive: u32,
    /// Multiplier applied to the base backoff (1, 2, 4, ...).
    pub multiplier: u64,
}

impl BlockCounterState {
    fn initial() -> Self {
        Self {
            consecutive: 0,
            multiplier: 1,
        }
    }
}

/// What `on_blocked` will do for a given blocking response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Sleep this long, then retry.
    Retry(Duration),
    /// Serve the fixed long cooldown, reset all state, then retry.
    Cooldown(Duration),
}

/// Pure backoff schedule: the step taken for the nth consecutive block
/// (1-based) with the multiplier in effect before that block.
pub fn backoff_step(consecutive: u32, multiplier: u64) -> BackoffStep {
    if consecutive >= MAX_CONSECUTIVE_BLOCKS {
        BackoffStep::Cooldown(Duration::from_millis(COOLDOWN_MS))
    } else {
        BackoffStep::Retry(Duration::from_millis(BACKOFF_BASE_MS * multiplier))
    }
}

/// Politeness scheduler for one traversal.
#[derive(Debug)]
pub struct Scheduler {
    min_delay: Duration,
    max_delay: Duration,
    blocks: BlockCounterState,
    identity_cursor: usize,
}

impl Scheduler {
    /// Create a scheduler from engine configuration. The identity cursor
    /// starts at a random offset so concurrent traversals do not all present
    /// the same identity first.
    pub fn new(config: &EngineConfig) -> Self {
        let offset = rand::thread_rng().gen_range(0..IDENTITY_POOL.len());
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            blocks: BlockCounterState::initial(),
            identity_cursor: offset,
        }
    }

    /// Suspend for a duration drawn uniformly from the politeness window.
    /// Must be called before every outbound request.
    pub async fn wait(&self) {
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.min_delay..=self.max_delay)
        };
        debug!("politeness delay {:?}", delay);
        tokio::time::sleep(delay).await;
    }

    /// Handle a blocking response (rate limit or equivalent).
    ///
    /// Sleeps per the backoff schedule: 30s, 60s, then a fixed 5 minute
    /// cooldown that resets the counter and multiplier. Always returns true;
    /// abandonment is the caller's decision, made against
    /// [`Scheduler::consecutive_blocks`] and its own cooldown ceiling.
    pub async fn on_blocked(&mut self) -> bool {
        self.blocks.consecutive += 1;
        match backoff_step(self.blocks.consecutive, self.blocks.multiplier) {
            BackoffStep::Retry(delay) => {
                warn!(
                    "blocked ({} consecutive), backing off {:?}",
                    self.blocks.consecutive, delay
                );
                self.blocks.multiplier *= 2;
                tokio::time::sleep(delay).await;
            }
            BackoffStep::Cooldown(delay) => {
                warn!(
                    "blocked {} times in a row, cooling down {:?} before retrying",
                    self.blocks.consecutive, delay
                );
                tokio::time::sleep(delay).await;
                self.blocks = BlockCounterState::initial();
                info!("cooldown complete, block counter reset");
            }
        }
        true
    }

    /// Reset the block counter and backoff multiplier. Called after every
    /// successful response.
    pub fn on_success(&mut self) {
        self.blocks = BlockCounterState::initial();
    }

    /// Blocking responses seen since the last success or cooldown.
    pub fn consecutive_blocks(&self) -> u32 {
        self.blocks.consecutive
    }

    /// Next browser identity from the rotation pool.
    pub fn next_identity(&mut self) -> &'static str {
        let identity = IDENTITY_POOL[self.identity_cursor % IDENTITY_POOL.len()];
        self.identity_cursor = self.identity_cursor.wrapping_add(1);
        identity
    }
}
