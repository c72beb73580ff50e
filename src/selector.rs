//! Account selection: availability filter, priority ordering, pick policy.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::Account;
use crate::error::{RelayError, Result};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Always take the best (priority, name) candidate.
    #[default]
    BestPriority,
    /// Rotate among candidates tied at the best priority.
    RoundRobin,
}

pub struct AccountSelector {
    policy: SelectionPolicy,
    cursor: AtomicUsize,
}

impl AccountSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Pick one available account from the pool, or fail with
    /// [`RelayError::NoAvailableAccount`]. Retry policy belongs to the
    /// caller; this never loops.
    pub fn select<'a>(&self, pool: &'a [Account], now: DateTime<Utc>) -> Result<&'a Account> {
        let mut candidates: Vec<&Account> = pool
            .iter()
            .filter(|account| account.is_selectable(now))
            .collect();
        if candidates.is_empty() {
            debug!(pool_size = pool.len(), "no selectable account in pool");
            return Err(RelayError::NoAvailableAccount);
        }

        candidates.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.cmp(&b.name))
        });

        match self.policy {
            SelectionPolicy::BestPriority => Ok(candidates[0]),
            SelectionPolicy::RoundRobin => {
                let best = candidates[0].priority;
                let tied: Vec<&Account> = candidates
                    .into_iter()
                    .take_while(|account| account.priority == best)
                    .collect();
                let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % tied.len();
                Ok(tied[slot])
            }
        }
    }
}
