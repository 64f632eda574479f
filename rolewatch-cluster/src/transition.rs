//! Primary transition tracking across polling cycles

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::DurableStore;

/// Outcome of comparing a cycle's primary with the stored one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: String,
    pub current: String,
    pub changed: bool,
}

impl Transition {
    /// Gauge value of the switch-over flag
    #[must_use]
    pub const fn flag(&self) -> i64 {
        if self.changed {
            1
        } else {
            0
        }
    }
}

/// Remembers the last primary of one cluster in a [`DurableStore`]
///
/// Losing the primary is a change like any other: the record is overwritten
/// with the empty string and the next primary raises the flag again.
pub struct TransitionTracker {
    store: Arc<dyn DurableStore>,
    key: String,
}

impl TransitionTracker {
    pub fn new(store: Arc<dyn DurableStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compare `primary` with the record and update it when they differ
    ///
    /// The record is written only after the comparison, so an aborted call
    /// leaves it untouched.
    pub async fn observe(&self, primary: Option<&str>) -> Result<Transition> {
        let previous = self.store.read(&self.key).await?;
        let current = primary.unwrap_or_default().to_string();

        if previous == current {
            debug!(key = %self.key, primary = %current, "Primary unchanged");
            return Ok(Transition {
                previous,
                current,
                changed: false,
            });
        }

        self.store.write(&self.key, &current).await?;
        info!(key = %self.key, previous = %previous, current = %current, "Primary changed");

        Ok(Transition {
            previous,
            current,
            changed: true,
        })
    }
}
