//! Lifetime of the page-side execution context.
//!
//! Invalidation is the only cancellation signal: once latched it never
//! resets, pending delays wake immediately and no further requests leave the
//! context.

use crate::error::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct PageContext {
    invalid: Arc<watch::Sender<bool>>,
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PageContext {
    pub fn new() -> Self {
        let (invalid, _) = watch::channel(false);
        Self {
            invalid: Arc::new(invalid),
        }
    }

    /// Latch the context as torn down. Idempotent.
    pub fn invalidate(&self) {
        let was_invalid = self.invalid.send_replace(true);
        if !was_invalid {
            ::log::info!("Page context invalidated, halting further work");
        }
    }

    pub fn is_valid(&self) -> bool {
        !*self.invalid.borrow()
    }

    /// `Err(Cancelled)` once invalidated
    pub fn check(&self) -> Result<(), TransportError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TransportError::Cancelled)
        }
    }

    /// Resolves once the context is invalidated
    pub async fn invalidated(&self) {
        let mut rx = self.invalid.subscribe();
        loop {
            let invalid = *rx.borrow_and_update();
            if invalid {
                return;
            }
            if rx.changed().await.is_err() {
                // sender is held by self, so this cannot happen while we are alive
                return;
            }
        }
    }

    /// Settle delay that ends early with `Err(Cancelled)` on invalidation
    pub async fn sleep(&self, duration: Duration) -> Result<(), TransportError> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check(),
            _ = self.invalidated() => Err(TransportError::Cancelled),
        }
    }
}
