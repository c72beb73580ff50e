pub mod account;
pub mod clock;
pub mod config;
mod error;
pub mod notify;
pub mod quota;
pub mod relay;
pub mod selector;
pub mod sse;
pub mod store;
pub mod translate;
pub mod types;
pub mod vault;

pub use error::{RelayError, Result};

pub use account::{Account, AccountKind, AccountSummary, AccountUpdate, HealthState, NewAccount};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use notify::{AnomalyEvent, AnomalyNotifier, NullNotifier, WebhookNotifier};
pub use quota::QuotaTracker;
pub use relay::{RelayExecutor, RelayOutcome};
pub use selector::{AccountSelector, SelectionPolicy};
pub use store::{AccountStore, KvStore, MemoryStore, StoreError};
pub use translate::{
    BedrockTranslator, CcrTranslator, ProviderTranslator, ResponsesTranslator,
    parse_vendor_prefix,
};
pub use types::{ChatRequest, ChatResponse, Message, Role, StreamEvent, TokenUsage};
pub use vault::{CredentialVault, EncryptedBlob, StoredCredential, VaultError, VaultOptions};

#[cfg(feature = "store-redis")]
pub use store::RedisStore;
