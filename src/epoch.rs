//! Generation counter for forest-replacing loads.
//!
//! Every load that may replace the root list takes a [LoadToken] before it suspends on the
//! store. When the result arrives it is applied only if no newer token was issued in the
//! meantime: last-issued wins, and a superseded response is dropped at apply time rather than
//! cancelled in transport.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LoadEpoch(AtomicU64);

/// Captured generation of one in-flight load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadToken(u64);

impl LoadToken {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

impl LoadEpoch {
    /// Start a new generation, superseding every token issued before.
    pub fn advance(&self) -> LoadToken {
        LoadToken(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, token: LoadToken) -> bool {
        self.current() == token.0
    }
}
