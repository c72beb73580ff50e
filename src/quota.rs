//! Daily spend tracking against per-account quota caps.
//!
//! Day rollover is lazy and read-triggered: every spend or exceeded-check
//! first reconciles `last_reset_date` against "today" in the configured
//! timezone, so no background timer is required. An external scheduler may
//! additionally call [`QuotaTracker::reset_all`]; both paths are idempotent.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::account::{Account, HealthState};
use crate::clock::Clock;
use crate::error::Result;
use crate::notify::{AnomalyEvent, AnomalyNotifier};
use crate::store::AccountStore;

pub struct QuotaTracker {
    accounts: Arc<AccountStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn AnomalyNotifier>,
    timezone_offset_hours: i32,
}

impl QuotaTracker {
    pub fn new(
        accounts: Arc<AccountStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn AnomalyNotifier>,
        timezone_offset_hours: i32,
    ) -> Self {
        Self {
            accounts,
            clock,
            notifier,
            timezone_offset_hours,
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock.today_in_offset(self.timezone_offset_hours)
    }

    /// Reconcile the account against the current calendar day. Returns true
    /// if a rollover was applied. A rollover also recovers a
    /// `quota_exceeded` account (next-day recovery per the state machine).
    fn apply_rollover(account: &mut Account, today: NaiveDate) -> bool {
        if account.last_reset_date == Some(today) {
            return false;
        }
        account.daily_usage_usd = 0.0;
        account.last_reset_date = Some(today);
        if account.health == HealthState::QuotaExceeded {
            account.health = HealthState::Active;
            account.quota_stopped_at = None;
        }
        true
    }

    /// Add spend and flip the account to `quota_exceeded` when a finite cap
    /// is crossed. The anomaly notification is best-effort: a failed
    /// dispatch is logged, never surfaced.
    pub async fn record_spend(&self, account_id: &str, amount_usd: f64) -> Result<()> {
        let mut account = self.accounts.load(account_id).await?;
        let today = self.today();
        Self::apply_rollover(&mut account, today);

        account.daily_usage_usd += amount_usd.max(0.0);

        let crossed = !account.quota_unlimited()
            && account.daily_usage_usd >= account.daily_quota_usd
            && account.health != HealthState::QuotaExceeded;
        if crossed {
            account.health = HealthState::QuotaExceeded;
            account.quota_stopped_at = Some(self.clock.now());
            warn!(
                account = %account.id,
                usage = account.daily_usage_usd,
                quota = account.daily_quota_usd,
                "daily quota exceeded"
            );
        }

        account.updated_at = self.clock.now();
        self.accounts.save(&account).await?;

        if crossed {
            let event = AnomalyEvent {
                account_id: account.id.clone(),
                account_name: account.name.clone(),
                platform: self.accounts.provider().to_string(),
                status: "quota_exceeded".to_string(),
                error_code: None,
                reason: format!(
                    "daily usage ${:.4} reached quota ${:.4}",
                    account.daily_usage_usd, account.daily_quota_usd
                ),
                timestamp: self.clock.now(),
            };
            if let Err(err) = self.notifier.notify(event).await {
                warn!(account = %account.id, %err, "quota anomaly notification failed");
            }
        }
        Ok(())
    }

    /// Read with the same lazy rollover side effect as `record_spend`.
    pub async fn is_exceeded(&self, account_id: &str) -> Result<bool> {
        let mut account = self.accounts.load(account_id).await?;
        let today = self.today();
        if Self::apply_rollover(&mut account, today) {
            account.updated_at = self.clock.now();
            self.accounts.save(&account).await?;
        }
        Ok(!account.quota_unlimited() && account.daily_usage_usd >= account.daily_quota_usd)
    }

    /// Sweep every account for this provider and reset stale days.
    /// Idempotent and order-independent; safe to run from a scheduler
    /// concurrently with the lazy paths.
    pub async fn reset_all(&self) -> Result<usize> {
        let today = self.today();
        let accounts = self.accounts.list_accounts().await?;
        let mut reset = 0usize;
        for mut account in accounts {
            if Self::apply_rollover(&mut account, today) {
                account.updated_at = self.clock.now();
                self.accounts.save(&account).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            info!(provider = %self.accounts.provider(), reset, "daily quota sweep reset accounts");
        }
        Ok(reset)
    }
}
