use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use keyring::credential::{CredentialBuilderApi, CredentialPersistence};
use keyring::Entry;
use tracing::warn;

use crate::config::{Config, CredentialBackend, APP_NAME};

/// Name of the single persisted slot holding the bearer token.
pub const TOKEN_SLOT: &str = "auth_token";

/// File used by [`FileStore`] inside the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Durable slot for the credential. Survives restarts, never touches the network.
pub trait CredentialStore: Send + Sync {
    /// Saved credential, or `None` when nothing is stored
    fn get(&self) -> Result<Option<String>>;

    fn set(&self, credential: &str) -> Result<()>;

    /// Remove the saved credential. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;
}

/// Credential held in the OS keychain
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(APP_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Whether the compiled-in platform store keeps entries after this
    /// process exits. False where keyring falls back to its in-memory mock.
    pub fn persists_across_restarts() -> bool {
        !matches!(
            keyring::default::default_credential_builder().persistence(),
            CredentialPersistence::EntryOnly | CredentialPersistence::ProcessOnly
        )
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, TOKEN_SLOT).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve token from keychain"),
        }
    }

    fn set(&self, credential: &str) -> Result<()> {
        self.entry()?
            .set_password(credential)
            .context("Failed to store token in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// Credential held in a small JSON object file, keyed by slot name
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by `credentials.json` inside `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_slots(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn write_slots(&self, slots: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(slots)?;
        std::fs::write(&self.path, contents).context("Failed to write credentials file")
    }
}

impl CredentialStore for FileStore {
    fn get(&self) -> Result<Option<String>> {
        Ok(self.read_slots()?.remove(TOKEN_SLOT))
    }

    fn set(&self, credential: &str) -> Result<()> {
        let mut slots = self.read_slots()?;
        slots.insert(TOKEN_SLOT.to_string(), credential.to_string());
        self.write_slots(&slots)
    }

    fn clear(&self) -> Result<()> {
        let mut slots = self.read_slots()?;
        slots.remove(TOKEN_SLOT);
        if slots.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove credentials file")?;
            }
            Ok(())
        } else {
            self.write_slots(&slots)
        }
    }
}

/// Open the store selected by `config.credential_backend`.
///
/// Falls back to the file store when no keychain on this platform outlives
/// the process.
pub fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let backend = effective_backend(
        config.credential_backend,
        KeyringStore::persists_across_restarts(),
    );
    Ok(match backend {
        CredentialBackend::Keyring => Arc::new(KeyringStore::new()),
        CredentialBackend::File => Arc::new(FileStore::new(config.data_dir()?)),
    })
}

fn effective_backend(requested: CredentialBackend, keyring_persists: bool) -> CredentialBackend {
    match requested {
        CredentialBackend::Keyring if !keyring_persists => {
            warn!("No persistent keychain available, storing the credential in a file");
            CredentialBackend::File
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_empty_by_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        assert_eq!(store.get().expect("get"), None);
        // Clearing nothing is fine
        store.clear().expect("clear");
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        FileStore::new(dir.path()).set("tok123").expect("set");

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get().expect("get").as_deref(), Some("tok123"));
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        store.set("tok123").expect("set");
        assert!(store.path().exists());

        store.clear().expect("clear");
        assert_eq!(store.get().expect("get"), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_file_store_keeps_unrelated_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        std::fs::write(store.path(), r#"{"auth_token": "tok", "theme": "dark"}"#).expect("write");

        store.clear().expect("clear");
        let contents = std::fs::read_to_string(store.path()).expect("read");
        assert!(contents.contains("theme"));
        assert!(!contents.contains("auth_token"));
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn test_platform_keychain_outlives_process() {
        assert!(KeyringStore::persists_across_restarts());
    }

    #[test]
    fn test_non_persistent_keychain_falls_back_to_file() {
        assert_eq!(
            effective_backend(CredentialBackend::Keyring, false),
            CredentialBackend::File
        );
        assert_eq!(
            effective_backend(CredentialBackend::Keyring, true),
            CredentialBackend::Keyring
        );
        assert_eq!(
            effective_backend(CredentialBackend::File, true),
            CredentialBackend::File
        );
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        std::fs::write(store.path(), "not json").expect("write");
        assert!(store.get().is_err());
    }
}
