//! At-rest handling for provider API keys.
//!
//! The session is agnostic to which codec is active: a platform keystore
//! can be wired in behind `SecretCodec`, and where none is available the
//! plaintext fallback keeps the same shape. Decrypted key material lives in
//! a `Secret` that is wiped on drop.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use zeroize::Zeroize;

use crate::store::ChatStore;

/// Setting key for the completion-provider credential.
pub const API_KEY: &str = "api_key";
/// Setting key for the search-provider credential.
pub const SEARCH_KEY: &str = "tavily_key";

/// Decrypted key material; zeroed when dropped.
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

pub trait SecretCodec: Send + Sync {
    /// Whether a real encryption backend is active.
    fn is_encryption_available(&self) -> bool;
    fn encrypt(&self, text: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, blob: &[u8]) -> Result<Secret>;
}

/// Fallback codec for hosts without a secure keystore: stores the raw key
/// bytes unchanged.
pub struct PlaintextCodec;

impl SecretCodec for PlaintextCodec {
    fn is_encryption_available(&self) -> bool {
        false
    }

    fn encrypt(&self, text: &str) -> Result<Vec<u8>> {
        Ok(text.as_bytes().to_vec())
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Secret> {
        let text = String::from_utf8(blob.to_vec())
            .map_err(|_| anyhow!("stored secret is not valid UTF-8"))?;
        Ok(Secret::new(text))
    }
}

/// Settings-backed credential storage.
pub struct KeyStore {
    store: Arc<ChatStore>,
    codec: Box<dyn SecretCodec>,
}

impl KeyStore {
    pub fn new(store: Arc<ChatStore>, codec: Box<dyn SecretCodec>) -> Self {
        Self { store, codec }
    }

    pub fn save_key(&self, key: &str, value: &str) -> Result<()> {
        let blob = self.codec.encrypt(value)?;
        self.store.set_setting(key, &blob)
    }

    /// Load and decrypt a stored credential. `None` when never saved.
    pub fn load_key(&self, key: &str) -> Result<Option<Secret>> {
        match self.store.get_setting(key)? {
            Some(blob) => Ok(Some(self.codec.decrypt(&blob)?)),
            None => Ok(None),
        }
    }

    /// Presence flags only; key material never travels to the consumer.
    pub fn keys_status(&self) -> Result<(bool, bool)> {
        let has_api = self.store.get_setting(API_KEY)?.is_some();
        let has_search = self.store.get_setting(SEARCH_KEY)?.is_some();
        Ok((has_api, has_search))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_store() -> KeyStore {
        let store = Arc::new(ChatStore::open_in_memory().unwrap());
        KeyStore::new(store, Box::new(PlaintextCodec))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let keys = key_store();
        keys.save_key(API_KEY, "sk-test-123").unwrap();
        let secret = keys.load_key(API_KEY).unwrap().unwrap();
        assert_eq!(secret.expose(), "sk-test-123");
    }

    #[test]
    fn test_missing_key_is_none() {
        let keys = key_store();
        assert!(keys.load_key(SEARCH_KEY).unwrap().is_none());
    }

    #[test]
    fn test_keys_status_flags() {
        let keys = key_store();
        assert_eq!(keys.keys_status().unwrap(), (false, false));
        keys.save_key(API_KEY, "a").unwrap();
        assert_eq!(keys.keys_status().unwrap(), (true, false));
        keys.save_key(SEARCH_KEY, "b").unwrap();
        assert_eq!(keys.keys_status().unwrap(), (true, true));
    }

    #[test]
    fn test_plaintext_codec_rejects_binary_garbage() {
        let codec = PlaintextCodec;
        assert!(codec.decrypt(&[0xff, 0xfe, 0x00, 0x80]).is_err());
    }
}
