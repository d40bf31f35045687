//! Wire Subscription Ids
//!
//! Monotonic `sub-<n>` identifiers, one sequence per manager instance.
//! Ids are never reused, even after the subscription is released.

/// Generates `sub-1`, `sub-2`, ...
#[derive(Debug, Default)]
pub struct SubscriptionIdGenerator {
    issued: u64,
}

impl SubscriptionIdGenerator {
    /// Create a generator starting at `sub-1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { issued: 0 }
    }

    /// Issue the next id.
    pub fn next_id(&mut self) -> String {
        self.issued += 1;
        format!("sub-{}", self.issued)
    }

    /// Number of ids issued so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.issued
    }
}
