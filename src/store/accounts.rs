//! Account persistence and health-state transitions.
//!
//! One JSON record per account under a provider-prefixed key. A shared-set
//! index per provider lets the selector fetch the shared pool without
//! scanning every key.

use std::sync::Arc;

use rand::RngCore;
use tracing::{debug, info, warn};

use crate::account::{Account, AccountKind, AccountSummary, AccountUpdate, HealthState, NewAccount};
use crate::clock::{Clock, SystemClock};
use crate::error::{RelayError, Result};
use crate::store::KvStore;
use crate::vault::{CredentialVault, StoredCredential};

const DEFAULT_PREFIX: &str = "relaymux";

pub struct AccountStore {
    kv: Arc<dyn KvStore>,
    vault: Arc<CredentialVault>,
    provider: String,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl AccountStore {
    pub fn new(kv: Arc<dyn KvStore>, vault: Arc<CredentialVault>, provider: impl Into<String>) -> Self {
        Self::with_clock(kv, vault, provider, Arc::new(SystemClock))
    }

    pub fn with_clock(
        kv: Arc<dyn KvStore>,
        vault: Arc<CredentialVault>,
        provider: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            vault,
            provider: provider.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            clock,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    fn account_key(&self, id: &str) -> String {
        format!("{}:{}:account:{id}", self.prefix, self.provider)
    }

    fn account_key_prefix(&self) -> String {
        format!("{}:{}:account:", self.prefix, self.provider)
    }

    fn shared_set_key(&self) -> String {
        format!("{}:{}:shared_accounts", self.prefix, self.provider)
    }

    pub async fn create(&self, new: NewAccount) -> Result<Account> {
        if new.name.trim().is_empty() {
            return Err(RelayError::Configuration(
                "account name must not be empty".to_string(),
            ));
        }
        if new.credential_plaintext.trim().is_empty() {
            return Err(RelayError::Configuration(
                "account credential must not be empty".to_string(),
            ));
        }
        if !(1..=100).contains(&new.priority) {
            return Err(RelayError::Configuration(format!(
                "priority must be 1..=100, got {}",
                new.priority
            )));
        }

        let now = self.clock.now();
        let account = Account {
            id: generate_id(),
            name: new.name,
            description: new.description,
            credential: StoredCredential::Encrypted(self.vault.encrypt(&new.credential_plaintext)),
            region: new.region,
            base_endpoint: new.base_endpoint,
            priority: new.priority,
            kind: new.kind,
            schedulable: new.schedulable,
            is_active: true,
            health: HealthState::Active,
            rate_limited_at: None,
            rate_limit_minutes: new.rate_limit_minutes,
            default_model: new.default_model,
            daily_quota_usd: new.daily_quota_usd,
            daily_usage_usd: 0.0,
            last_reset_date: None,
            quota_stopped_at: None,
            subscription_expires_at: new.subscription_expires_at,
            created_at: now,
            updated_at: now,
        };

        self.save(&account).await?;
        if account.kind == AccountKind::Shared {
            self.kv.sadd(&self.shared_set_key(), &account.id).await?;
        }
        info!(provider = %self.provider, account = %account.id, "created account");
        Ok(account)
    }

    /// Raw record fetch; credential stays encrypted.
    pub async fn load(&self, id: &str) -> Result<Account> {
        let raw = self
            .kv
            .get(&self.account_key(id))
            .await?
            .ok_or_else(|| RelayError::AccountNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Fetch with the credential decrypted for use.
    pub async fn get(&self, id: &str) -> Result<(Account, String)> {
        let account = self.load(id).await?;
        let credential = self.vault.decrypt(&account.credential)?;
        Ok((account, credential))
    }

    /// Full pool for the selector; credentials stay encrypted.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let keys = self.kv.keys(&self.account_key_prefix()).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Account>(&raw) {
                Ok(account) => out.push(account),
                Err(err) => warn!(%key, %err, "skipping malformed account record"),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Administrative listing: masked, never decrypts.
    pub async fn list(&self) -> Result<Vec<AccountSummary>> {
        let accounts = self.list_accounts().await?;
        Ok(accounts.iter().map(AccountSummary::from_account).collect())
    }

    /// Partial merge: only fields present in the payload change.
    pub async fn update(&self, id: &str, update: AccountUpdate) -> Result<Account> {
        let mut account = self.load(id).await?;
        let previous_kind = account.kind;

        if let Some(name) = update.name {
            account.name = name;
        }
        if let Some(description) = update.description {
            account.description = description;
        }
        if let Some(plaintext) = update.credential_plaintext {
            account.credential = StoredCredential::Encrypted(self.vault.encrypt(&plaintext));
        }
        if let Some(region) = update.region {
            account.region = Some(region);
        }
        if let Some(base_endpoint) = update.base_endpoint {
            account.base_endpoint = Some(base_endpoint);
        }
        if let Some(priority) = update.priority {
            if !(1..=100).contains(&priority) {
                return Err(RelayError::Configuration(format!(
                    "priority must be 1..=100, got {priority}"
                )));
            }
            account.priority = priority;
        }
        if let Some(kind) = update.kind {
            account.kind = kind;
        }
        if let Some(schedulable) = update.schedulable {
            account.schedulable = schedulable;
        }
        if let Some(is_active) = update.is_active {
            account.is_active = is_active;
        }
        if let Some(minutes) = update.rate_limit_minutes {
            account.rate_limit_minutes = minutes;
        }
        if let Some(default_model) = update.default_model {
            account.default_model = Some(default_model);
        }
        if let Some(quota) = update.daily_quota_usd {
            account.daily_quota_usd = quota;
        }
        if let Some(expires_at) = update.subscription_expires_at {
            account.subscription_expires_at = Some(expires_at);
        }

        account.updated_at = self.clock.now();
        self.save(&account).await?;

        if previous_kind != account.kind {
            match account.kind {
                AccountKind::Shared => self.kv.sadd(&self.shared_set_key(), id).await?,
                AccountKind::Dedicated => self.kv.srem(&self.shared_set_key(), id).await?,
            }
        }
        Ok(account)
    }

    /// Unconditional delete. Usage records live with the telemetry
    /// collaborator and are not cascaded.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.kv.del(&self.account_key(id)).await?;
        self.kv.srem(&self.shared_set_key(), id).await?;
        info!(provider = %self.provider, account = %id, "deleted account");
        Ok(())
    }

    pub async fn shared_account_ids(&self) -> Result<Vec<String>> {
        Ok(self.kv.smembers(&self.shared_set_key()).await?)
    }

    pub(crate) async fn save(&self, account: &Account) -> Result<()> {
        let raw = serde_json::to_string(account)?;
        self.kv.set(&self.account_key(&account.id), &raw).await?;
        Ok(())
    }

    // Health transitions (spec state machine). All callers on the relay path
    // treat failures here as best-effort bookkeeping.

    pub async fn mark_rate_limited(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        if account.rate_limit_minutes == 0 {
            debug!(account = %id, "rate-limit marking disabled for account (cooldown = 0)");
            return Ok(());
        }
        account.health = HealthState::RateLimited;
        account.rate_limited_at = Some(self.clock.now());
        account.updated_at = self.clock.now();
        warn!(provider = %self.provider, account = %id, minutes = account.rate_limit_minutes, "account rate limited");
        self.save(&account).await
    }

    pub async fn mark_overloaded(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        account.health = HealthState::Overloaded;
        account.updated_at = self.clock.now();
        warn!(provider = %self.provider, account = %id, "account overloaded");
        self.save(&account).await
    }

    pub async fn mark_unauthorized(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        account.health = HealthState::Unauthorized;
        account.updated_at = self.clock.now();
        warn!(provider = %self.provider, account = %id, "account unauthorized; requires explicit reset");
        self.save(&account).await
    }

    pub async fn mark_quota_exceeded(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        account.health = HealthState::QuotaExceeded;
        account.quota_stopped_at = Some(self.clock.now());
        account.updated_at = self.clock.now();
        warn!(provider = %self.provider, account = %id, "account daily quota exceeded");
        self.save(&account).await
    }

    /// 2xx self-heal: clears rate_limited and overloaded, never
    /// unauthorized or quota_exceeded.
    pub async fn clear_transient_errors(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        match account.health {
            HealthState::RateLimited | HealthState::Overloaded => {
                account.health = HealthState::Active;
                account.rate_limited_at = None;
                account.updated_at = self.clock.now();
                self.save(&account).await
            }
            _ => Ok(()),
        }
    }

    /// Explicit administrative reset; recovers from any health state.
    pub async fn reset_health(&self, id: &str) -> Result<()> {
        let mut account = self.load(id).await?;
        account.health = HealthState::Active;
        account.rate_limited_at = None;
        account.quota_stopped_at = None;
        account.updated_at = self.clock.now();
        info!(provider = %self.provider, account = %id, "health state reset");
        self.save(&account).await
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vault::VaultOptions;

    fn test_store() -> AccountStore {
        let kv = Arc::new(MemoryStore::new());
        let vault = Arc::new(CredentialVault::new(
            "unit-master",
            "unit-salt",
            VaultOptions::default(),
        ));
        AccountStore::new(kv, vault, "bedrock")
    }

    #[tokio::test]
    async fn create_get_round_trips_credential() {
        let store = test_store();
        let account = store
            .create(NewAccount::new("prod-east", "AKIA-secret-material"))
            .await
            .expect("create");

        let (loaded, credential) = store.get(&account.id).await.expect("get");
        assert_eq!(loaded.name, "prod-east");
        assert_eq!(credential, "AKIA-secret-material");
        assert!(matches!(loaded.credential, StoredCredential::Encrypted(_)));
    }

    #[tokio::test]
    async fn list_masks_credentials() {
        let store = test_store();
        store
            .create(NewAccount::new("a", "secret-a"))
            .await
            .expect("create");

        let summaries = store.list().await.expect("list");
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].has_credentials);
        let rendered = serde_json::to_string(&summaries).expect("json");
        assert!(!rendered.contains("secret-a"));
        assert!(!rendered.contains("ciphertext"));
    }

    #[tokio::test]
    async fn update_merges_only_present_fields() {
        let store = test_store();
        let account = store
            .create(NewAccount {
                description: "original".to_string(),
                priority: 10,
                ..NewAccount::new("a", "secret")
            })
            .await
            .expect("create");

        let updated = store
            .update(
                &account.id,
                AccountUpdate {
                    priority: Some(5),
                    ..AccountUpdate::default()
                },
            )
            .await
            .expect("update");

        assert_eq!(updated.priority, 5);
        assert_eq!(updated.description, "original");
        assert_eq!(updated.name, "a");

        let (_, credential) = store.get(&account.id).await.expect("get");
        assert_eq!(credential, "secret");
    }

    #[tokio::test]
    async fn delete_removes_record_and_index() {
        let store = test_store();
        let account = store
            .create(NewAccount::new("a", "secret"))
            .await
            .expect("create");
        assert_eq!(store.shared_account_ids().await.unwrap().len(), 1);

        store.delete(&account.id).await.expect("delete");
        assert!(store.load(&account.id).await.is_err());
        assert!(store.shared_account_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_mark_is_noop_when_cooldown_disabled() {
        let store = test_store();
        let account = store
            .create(NewAccount {
                rate_limit_minutes: 0,
                ..NewAccount::new("a", "secret")
            })
            .await
            .expect("create");

        store.mark_rate_limited(&account.id).await.expect("mark");
        let loaded = store.load(&account.id).await.expect("load");
        assert_eq!(loaded.health, HealthState::Active);
    }

    #[tokio::test]
    async fn transient_clear_spares_unauthorized() {
        let store = test_store();
        let account = store
            .create(NewAccount::new("a", "secret"))
            .await
            .expect("create");

        store.mark_unauthorized(&account.id).await.expect("mark");
        store
            .clear_transient_errors(&account.id)
            .await
            .expect("clear");
        assert_eq!(
            store.load(&account.id).await.unwrap().health,
            HealthState::Unauthorized
        );

        store.reset_health(&account.id).await.expect("reset");
        assert_eq!(
            store.load(&account.id).await.unwrap().health,
            HealthState::Active
        );
    }

    #[tokio::test]
    async fn rate_limited_then_cleared_by_success() {
        let store = test_store();
        let account = store
            .create(NewAccount::new("a", "secret"))
            .await
            .expect("create");

        store.mark_rate_limited(&account.id).await.expect("mark");
        assert_eq!(
            store.load(&account.id).await.unwrap().health,
            HealthState::RateLimited
        );

        store
            .clear_transient_errors(&account.id)
            .await
            .expect("clear");
        let loaded = store.load(&account.id).await.unwrap();
        assert_eq!(loaded.health, HealthState::Active);
        assert!(loaded.rate_limited_at.is_none());
    }
}
