//! Optional password cache.
//!
//! Failures here never end a login: a broken or missing keyring just means
//! the user is prompted again.

use keyring::Entry;

const SERVICE_NAME: &str = "aws-okta-auth";

pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Option<String>;

    fn set_secret(&self, key: &str, value: &str);

    fn delete_secret(&self, key: &str);
}

/// OS keyring (Keychain, Secret Service / keyutils, Credential Manager).
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Option<Entry> {
        match Entry::new(&self.service, key) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("keyring unavailable: {}", e);
                None
            }
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn get_secret(&self, key: &str) -> Option<String> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Some(secret),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                log::warn!("unable to read {} from keyring: {}", key, e);
                None
            }
        }
    }

    fn set_secret(&self, key: &str, value: &str) {
        if let Some(entry) = self.entry(key) {
            if let Err(e) = entry.set_password(value) {
                log::warn!("unable to store {} in keyring: {}", key, e);
            }
        }
    }

    fn delete_secret(&self, key: &str) {
        if let Some(entry) = self.entry(key) {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => log::warn!("unable to delete {} from keyring: {}", key, e),
            }
        }
    }
}

pub struct NoSecretStore;

impl SecretStore for NoSecretStore {
    fn get_secret(&self, _key: &str) -> Option<String> {
        None
    }

    fn set_secret(&self, _key: &str, _value: &str) {}

    fn delete_secret(&self, _key: &str) {}
}
