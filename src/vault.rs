//! Credential vault: AES-256-CBC encryption of provider secrets at rest.
//!
//! The symmetric key is derived once per vault from the master secret
//! (PBKDF2 is deliberately expensive; re-deriving per call would dominate
//! the relay hot path). Decrypt results are held in a bounded TTL cache
//! keyed by a content hash of the blob, so repeated selections of the same
//! account do not repeat the cipher work.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::clock::{Clock, SystemClock};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 100_000;
const DECRYPT_CACHE_TTL_SECS: u64 = 300;
const DECRYPT_CACHE_MAX_ENTRIES: usize = 256;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("malformed credential record: {0}")]
    MalformedRecord(String),
    #[error("cipher verification failed")]
    Cipher,
    #[error("invalid hex in credential record: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("decrypted credential is not valid UTF-8")]
    Utf8,
    #[error("legacy plaintext credential rejected (migration flag disabled)")]
    LegacyDisabled,
}

/// Encrypted credential as persisted: hex-encoded IV and ciphertext.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EncryptedBlob {
    pub iv: String,
    pub ciphertext: String,
}

/// Stored credential record, decided at deserialization time.
///
/// A bare JSON string is pre-migration legacy plaintext; anything that is
/// neither that nor an `{iv, ciphertext}` object fails to deserialize.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoredCredential {
    Encrypted(EncryptedBlob),
    LegacyPlaintext(String),
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredCredential::Encrypted(blob) => f
                .debug_struct("Encrypted")
                .field("iv", &blob.iv)
                .field("ciphertext", &"<redacted>")
                .finish(),
            StoredCredential::LegacyPlaintext(_) => {
                f.debug_tuple("LegacyPlaintext").field(&"<redacted>").finish()
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VaultOptions {
    /// Accept pre-migration plaintext credential records. Off by default;
    /// new deployments should never enable this.
    pub allow_legacy_plaintext: bool,
}

struct CacheEntry {
    plaintext: String,
    expires_at: u64,
}

#[derive(Default)]
struct DecryptCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl DecryptCache {
    fn get(&mut self, key: &str, now: u64) -> Option<String> {
        let expires_at = self.entries.get(key)?.expires_at;
        if now >= expires_at {
            self.entries.remove(key);
            self.order.retain(|candidate| candidate != key);
            return None;
        }
        // Refresh recency on hit.
        self.order.retain(|candidate| candidate != key);
        self.order.push_back(key.to_string());
        Some(self.entries.get(key)?.plaintext.clone())
    }

    fn insert(&mut self, key: String, plaintext: String, now: u64) {
        let expires_at = now.saturating_add(DECRYPT_CACHE_TTL_SECS);
        if self
            .entries
            .insert(
                key.clone(),
                CacheEntry {
                    plaintext,
                    expires_at,
                },
            )
            .is_some()
        {
            self.order.retain(|candidate| candidate != &key);
        }
        self.order.push_back(key);

        while self.entries.len() > DECRYPT_CACHE_MAX_ENTRIES {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

/// One vault per provider. Decrypt caches are never shared across vaults.
pub struct CredentialVault {
    key: [u8; KEY_LEN],
    options: VaultOptions,
    cache: Mutex<DecryptCache>,
    clock: Arc<dyn Clock>,
    cipher_calls: AtomicU64,
}

impl CredentialVault {
    pub fn new(master_secret: &str, salt: &str, options: VaultOptions) -> Self {
        Self::with_clock(master_secret, salt, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        master_secret: &str,
        salt: &str,
        options: VaultOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            master_secret.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ROUNDS,
            &mut key,
        );
        Self {
            key,
            options,
            cache: Mutex::new(DecryptCache::default()),
            clock,
            cipher_calls: AtomicU64::new(0),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> EncryptedBlob {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        self.cipher_calls.fetch_add(1, Ordering::Relaxed);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        EncryptedBlob {
            iv: hex::encode(iv),
            ciphertext: hex::encode(ciphertext),
        }
    }

    pub fn decrypt(&self, stored: &StoredCredential) -> Result<String, VaultError> {
        let blob = match stored {
            StoredCredential::Encrypted(blob) => blob,
            StoredCredential::LegacyPlaintext(plaintext) => {
                if !self.options.allow_legacy_plaintext {
                    return Err(VaultError::LegacyDisabled);
                }
                warn!("credential record is legacy plaintext; passing through unencrypted");
                return Ok(plaintext.clone());
            }
        };

        if blob.iv.is_empty() || blob.ciphertext.is_empty() {
            return Err(VaultError::MalformedRecord(
                "missing iv or ciphertext".to_string(),
            ));
        }

        let cache_key = content_hash(blob);
        let now = self.now_epoch_seconds();
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(plaintext) = cache.get(&cache_key, now) {
                return Ok(plaintext);
            }
        }

        let iv_bytes = hex::decode(&blob.iv)?;
        let ciphertext = hex::decode(&blob.ciphertext)?;
        let iv: [u8; IV_LEN] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::MalformedRecord(format!("iv must be {IV_LEN} bytes")))?;

        self.cipher_calls.fetch_add(1, Ordering::Relaxed);
        let padded = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| VaultError::Cipher)?;
        let plaintext = String::from_utf8(padded).map_err(|_| VaultError::Utf8)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(cache_key, plaintext.clone(), now);
        }
        Ok(plaintext)
    }

    /// Number of raw cipher invocations so far. Instrumentation seam for
    /// verifying the decrypt cache actually short-circuits.
    pub fn cipher_invocations(&self) -> u64 {
        self.cipher_calls.load(Ordering::Relaxed)
    }

    fn now_epoch_seconds(&self) -> u64 {
        self.clock.now().timestamp().max(0) as u64
    }
}

fn content_hash(blob: &EncryptedBlob) -> String {
    let mut hasher = Sha256::new();
    hasher.update(blob.iv.as_bytes());
    hasher.update(b":");
    hasher.update(blob.ciphertext.as_bytes());
    hex::encode(hasher.finalize())
}
