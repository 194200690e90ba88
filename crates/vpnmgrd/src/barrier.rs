//! Barrier between the delete and add phases of a route update.
//!
//! The downstream route engine must retire withdrawn routes before
//! replacements for the same prefix are installed. Without an explicit
//! acknowledgement from it, the barrier is a fixed delay.

use std::time::Duration;

use async_trait::async_trait;
use vpn_types::VpnId;

#[async_trait]
pub trait InterPhaseBarrier: Send + Sync {
    /// Returns once deletes issued for `vpn` may be considered retired.
    async fn wait(&self, vpn: &VpnId);
}

/// Sleeps for a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelayBarrier {
    delay: Duration,
}

impl FixedDelayBarrier {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl InterPhaseBarrier for FixedDelayBarrier {
    async fn wait(&self, _vpn: &VpnId) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
