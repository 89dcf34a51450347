//! Transaction store configuration.

use std::time::Duration;

/// Configuration for opening a [`crate::TransactionStore`].
#[derive(Debug, Clone)]
pub struct Config {
    /// How long a blocking write waits for a key locked by another open
    /// transaction before failing with a lock timeout.
    ///
    /// `Duration::ZERO` (the default) fails on the first conflicting
    /// attempt.
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::ZERO,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
