//! Event handler binding for one connected period
//!
//! A [`Subscription`] exists exactly while the session is connected. It is
//! created when the transport reports `Connected` and dropped when the
//! connection goes away or the session closes. Events arriving without a
//! live subscription are not dispatched.

use tracing::debug;

/// Handlers bound for one connected period
#[derive(Debug)]
pub struct Subscription {
    period: u64,
}

impl Subscription {
    /// Bind handlers for every protocol event
    pub(crate) fn bind(period: u64) -> Self {
        debug!("Bound event handlers for connected period {}", period);
        Subscription { period }
    }

    /// Which connected period this subscription belongs to (1-based)
    pub fn period(&self) -> u64 {
        self.period
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Unbound event handlers for connected period {}", self.period);
    }
}
