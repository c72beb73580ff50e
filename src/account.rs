//! Account records: provider credentials plus scheduling and health metadata.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::vault::StoredCredential;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Active,
    RateLimited,
    Overloaded,
    Unauthorized,
    QuotaExceeded,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Dedicated,
    Shared,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub credential: StoredCredential,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_endpoint: Option<String>,
    /// 1..=100, lower is preferred. Ties break on `name`.
    pub priority: u8,
    pub kind: AccountKind,
    pub schedulable: bool,
    pub is_active: bool,
    pub health: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_at: Option<DateTime<Utc>>,
    /// Cooldown window for 429 exclusion. `0` disables auto-exclusion
    /// entirely: a 429 never flips this account out of rotation.
    #[serde(default)]
    pub rate_limit_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// `<= 0` means unlimited.
    #[serde(default)]
    pub daily_quota_usd: f64,
    #[serde(default)]
    pub daily_usage_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reset_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .field("schedulable", &self.schedulable)
            .field("is_active", &self.is_active)
            .field("health", &self.health)
            .finish()
    }
}

impl Account {
    pub fn quota_unlimited(&self) -> bool {
        self.daily_quota_usd <= 0.0
    }

    pub fn rate_limit_expired(&self, now: DateTime<Utc>) -> bool {
        match self.rate_limited_at {
            Some(limited_at) => {
                now >= limited_at + chrono::Duration::minutes(i64::from(self.rate_limit_minutes))
            }
            None => true,
        }
    }

    /// Health as seen by the selector: an elapsed rate-limit cooldown counts
    /// as recovered without waiting for a write-back.
    pub fn effective_health(&self, now: DateTime<Utc>) -> HealthState {
        match self.health {
            HealthState::RateLimited if self.rate_limit_expired(now) => HealthState::Active,
            other => other,
        }
    }

    pub fn subscription_expired(&self, now: DateTime<Utc>) -> bool {
        self.subscription_expires_at
            .is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.schedulable
            && !self.subscription_expired(now)
            && self.effective_health(now) == HealthState::Active
    }
}

/// Creation payload; id and timestamps are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub name: String,
    pub description: String,
    pub credential_plaintext: String,
    pub region: Option<String>,
    pub base_endpoint: Option<String>,
    pub priority: u8,
    pub kind: AccountKind,
    pub schedulable: bool,
    pub rate_limit_minutes: u32,
    pub default_model: Option<String>,
    pub daily_quota_usd: f64,
    pub subscription_expires_at: Option<DateTime<Utc>>,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, credential_plaintext: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            credential_plaintext: credential_plaintext.into(),
            region: None,
            base_endpoint: None,
            priority: 50,
            kind: AccountKind::Shared,
            schedulable: true,
            rate_limit_minutes: 60,
            default_model: None,
            daily_quota_usd: 0.0,
            subscription_expires_at: None,
        }
    }
}

/// Partial update: only fields carried as `Some` are applied.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub credential_plaintext: Option<String>,
    pub region: Option<String>,
    pub base_endpoint: Option<String>,
    pub priority: Option<u8>,
    pub kind: Option<AccountKind>,
    pub schedulable: Option<bool>,
    pub is_active: Option<bool>,
    pub rate_limit_minutes: Option<u32>,
    pub default_model: Option<String>,
    pub daily_quota_usd: Option<f64>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
}

/// Administrative listing shape: never carries the secret, only whether one
/// is present.
#[derive(Clone, Debug, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub has_credentials: bool,
    pub priority: u8,
    pub kind: AccountKind,
    pub schedulable: bool,
    pub is_active: bool,
    pub health: HealthState,
    pub daily_quota_usd: f64,
    pub daily_usage_usd: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountSummary {
    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            description: account.description.clone(),
            has_credentials: true,
            priority: account.priority,
            kind: account.kind,
            schedulable: account.schedulable,
            is_active: account.is_active,
            health: account.health,
            daily_quota_usd: account.daily_quota_usd,
            daily_usage_usd: account.daily_usage_usd,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_account(id: &str, name: &str) -> Account {
    use chrono::TimeZone;

    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    Account {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        credential: StoredCredential::LegacyPlaintext("sk-test".to_string()),
        region: None,
        base_endpoint: None,
        priority: 50,
        kind: AccountKind::Shared,
        schedulable: true,
        is_active: true,
        health: HealthState::Active,
        rate_limited_at: None,
        rate_limit_minutes: 60,
        default_model: None,
        daily_quota_usd: 0.0,
        daily_usage_usd: 0.0,
        last_reset_date: None,
        quota_stopped_at: None,
        subscription_expires_at: None,
        created_at: now,
        updated_at: now,
    }
}
