//! File-backed registry of managed signing identities.
//!
//! One `<alias>.json` file per identity, written atomically. Reads go to
//! disk so keys imported by the CLI while the server runs are picked up.
//! A read/write lock allows concurrent lookups and exclusive writes.

mod file;
mod identity;

pub use identity::{parse_secret_key, rollapp_address, router_address, SigningIdentity};
pub(crate) use identity::secp;

use alloy_primitives::Address;
use file::KeyFileCodec;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

/// Env var holding the optional base64 AES-256 key for key files.
pub const ENCRYPTION_KEY_ENV: &str = "ELDER_WRAP_KEYSTORE_KEY";

const KEY_FILE_EXT: &str = "json";

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredKey {
    alias: String,
    rollapp_address: String,
    router_address: String,
    private_key: String,
}

impl StoredKey {
    fn from_identity(identity: &SigningIdentity) -> Self {
        Self {
            alias: identity.alias().to_string(),
            rollapp_address: identity.rollapp_address().to_string(),
            router_address: identity.router_address().to_string(),
            private_key: hex::encode(identity.secret_key().secret_bytes()),
        }
    }

    fn into_identity(self) -> Result<SigningIdentity, crate::Error> {
        let rollapp_address: Address = self.rollapp_address.parse().map_err(|e| {
            crate::Error::KeyStore(format!("key {}: bad rollapp address: {e}", self.alias))
        })?;
        let secret_key = parse_secret_key(&self.private_key)?;
        Ok(SigningIdentity::from_parts(
            self.alias,
            rollapp_address,
            self.router_address,
            secret_key,
        ))
    }
}

/// The key registry.
pub struct KeyRegistry {
    dir: PathBuf,
    bech32_prefix: String,
    codec: KeyFileCodec,
    lock: RwLock<()>,
}

impl KeyRegistry {
    /// Open (creating if needed) a plaintext registry at `dir`.
    pub fn open(dir: impl Into<PathBuf>, bech32_prefix: &str) -> Result<Self, crate::Error> {
        Self::with_codec(dir.into(), bech32_prefix, KeyFileCodec::plaintext())
    }

    /// Open a registry whose key files are AES-256-GCM encrypted.
    pub fn open_encrypted(
        dir: impl Into<PathBuf>,
        bech32_prefix: &str,
        key_b64: &str,
    ) -> Result<Self, crate::Error> {
        Self::with_codec(dir.into(), bech32_prefix, KeyFileCodec::encrypted(key_b64)?)
    }

    /// Open using [`ENCRYPTION_KEY_ENV`] when set, plaintext otherwise.
    pub fn open_from_env(
        dir: impl Into<PathBuf>,
        bech32_prefix: &str,
    ) -> Result<Self, crate::Error> {
        match std::env::var(ENCRYPTION_KEY_ENV) {
            Ok(key) if !key.is_empty() => Self::open_encrypted(dir, bech32_prefix, &key),
            _ => {
                warn!("{ENCRYPTION_KEY_ENV} not set, key files are stored in plaintext (dev mode)");
                Self::open(dir, bech32_prefix)
            }
        }
    }

    fn with_codec(
        dir: PathBuf,
        bech32_prefix: &str,
        codec: KeyFileCodec,
    ) -> Result<Self, crate::Error> {
        // Fail fast on a bad prefix rather than at first import.
        bech32::Hrp::parse(bech32_prefix).map_err(|e| {
            crate::Error::Config(format!("invalid bech32 prefix {bech32_prefix}: {e}"))
        })?;
        file::create_private_dir(&dir)?;
        info!(path = %dir.display(), encrypted = codec.is_encrypted(), "Key store opened");
        Ok(Self {
            dir,
            bech32_prefix: bech32_prefix.to_string(),
            codec,
            lock: RwLock::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Import a hex private key under `alias`. Never overwrites.
    pub fn import_key(&self, alias: &str, raw_private_key: &str) -> Result<SigningIdentity, crate::Error> {
        validate_alias(alias)?;
        let secret_key = parse_secret_key(raw_private_key)?;
        let identity = SigningIdentity::derive(alias, secret_key, &self.bech32_prefix)?;

        let _w = self.lock.write().unwrap_or_else(|e| e.into_inner());

        let path = self.key_path(alias);
        if path.exists() {
            return Err(crate::Error::KeyExists(alias.to_string()));
        }
        // One alias per key: lookups by address must be unambiguous.
        if let Some(existing) = self
            .read_all()?
            .into_iter()
            .find(|k| k.rollapp_address() == identity.rollapp_address())
        {
            return Err(crate::Error::KeyExists(format!(
                "{alias} (same key already imported as {})",
                existing.alias()
            )));
        }

        let json = serde_json::to_vec_pretty(&StoredKey::from_identity(&identity))
            .map_err(|e| crate::Error::KeyStore(format!("Failed to serialize key: {e}")))?;
        file::write_new(&path, &self.codec.encode(json)?)?;

        info!(
            alias,
            rollapp_address = %identity.rollapp_address(),
            router_address = identity.router_address(),
            "Key imported"
        );
        Ok(identity)
    }

    /// Load one identity by alias.
    pub fn get(&self, alias: &str) -> Result<SigningIdentity, crate::Error> {
        validate_alias(alias)?;
        let _r = self.lock.read().unwrap_or_else(|e| e.into_inner());
        let path = self.key_path(alias);
        if !path.exists() {
            return Err(crate::Error::KeyNotFound(alias.to_string()));
        }
        self.read_key(&path)
    }

    pub fn find_by_rollapp_address(
        &self,
        address: &Address,
    ) -> Result<Option<SigningIdentity>, crate::Error> {
        Ok(self
            .list()?
            .into_iter()
            .find(|k| k.rollapp_address() == *address))
    }

    pub fn find_by_router_address(
        &self,
        address: &str,
    ) -> Result<Option<SigningIdentity>, crate::Error> {
        Ok(self
            .list()?
            .into_iter()
            .find(|k| k.router_address() == address))
    }

    /// All readable identities, sorted by alias. Undecodable files are
    /// logged and skipped.
    pub fn list(&self) -> Result<Vec<SigningIdentity>, crate::Error> {
        let _r = self.lock.read().unwrap_or_else(|e| e.into_inner());
        self.read_all()
    }

    /// Remove an identity's key file.
    pub fn delete(&self, alias: &str) -> Result<(), crate::Error> {
        validate_alias(alias)?;
        let _w = self.lock.write().unwrap_or_else(|e| e.into_inner());
        match std::fs::remove_file(self.key_path(alias)) {
            Ok(()) => {
                info!(alias, "Key deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(crate::Error::KeyNotFound(alias.to_string()))
            }
            Err(e) => Err(crate::Error::KeyStore(format!(
                "Failed to delete key file: {e}"
            ))),
        }
    }

    // Callers hold `lock`.
    fn read_all(&self) -> Result<Vec<SigningIdentity>, crate::Error> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| crate::Error::KeyStore(format!("Failed to read directory: {e}")))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| crate::Error::KeyStore(format!("Failed to read entry: {e}")))?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || path.extension().and_then(|e| e.to_str()) != Some(KEY_FILE_EXT) {
                continue;
            }
            match self.read_key(&path) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable key file"),
            }
        }
        keys.sort_by(|a, b| a.alias().cmp(b.alias()));
        Ok(keys)
    }

    fn read_key(&self, path: &Path) -> Result<SigningIdentity, crate::Error> {
        let data = std::fs::read(path).map_err(|e| {
            crate::Error::KeyStore(format!("Failed to read {}: {e}", path.display()))
        })?;
        let json = self.codec.decode(data)?;
        let stored: StoredKey = serde_json::from_slice(&json).map_err(|e| {
            crate::Error::KeyStore(format!("Failed to decode {}: {e}", path.display()))
        })?;
        stored.into_identity()
    }

    fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.{KEY_FILE_EXT}"))
    }
}

/// Aliases become file names: `[A-Za-z0-9._-]`, not starting with `.`.
fn validate_alias(alias: &str) -> Result<(), crate::Error> {
    if alias.is_empty() {
        return Err(crate::Error::KeyStore("alias cannot be empty".into()));
    }
    let ok = !alias.starts_with('.')
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(crate::Error::KeyStore(format!("invalid alias: {alias}")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const KEY_A: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    pub(crate) const KEY_B: &str = "0x8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";

    fn registry() -> (tempfile::TempDir, KeyRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let reg = KeyRegistry::open(dir.path().join("keys"), "elder").unwrap();
        (dir, reg)
    }

    #[test]
    fn test_import_and_lookup_by_both_addresses() {
        let (_dir, reg) = registry();
        let id = reg.import_key("alice", KEY_A).unwrap();

        let by_evm = reg
            .find_by_rollapp_address(&id.rollapp_address())
            .unwrap()
            .unwrap();
        let by_router = reg
            .find_by_router_address(id.router_address())
            .unwrap()
            .unwrap();
        assert_eq!(by_evm, id);
        assert_eq!(by_router, id);
        assert_eq!(reg.get("alice").unwrap(), id);
    }

    #[test]
    fn test_addresses_survive_reload_unchanged() {
        let (dir, reg) = registry();
        let id = reg.import_key("alice", KEY_A).unwrap();
        drop(reg);

        let reopened = KeyRegistry::open(dir.path().join("keys"), "elder").unwrap();
        let loaded = reopened.get("alice").unwrap();
        assert_eq!(loaded.rollapp_address(), id.rollapp_address());
        assert_eq!(loaded.router_address(), id.router_address());
    }

    #[test]
    fn test_corrupt_file_does_not_hide_other_keys() {
        let (dir, reg) = registry();
        let id = reg.import_key("alice", KEY_A).unwrap();
        std::fs::write(dir.path().join("keys").join("broken.json"), b"{not a key").unwrap();

        assert_eq!(reg.list().unwrap(), vec![id.clone()]);
        assert_eq!(
            reg.find_by_rollapp_address(&id.rollapp_address()).unwrap(),
            Some(id.clone())
        );
        assert!(matches!(reg.get("broken"), Err(crate::Error::KeyStore(_))));
    }

    #[test]
    fn test_duplicate_alias_fails_and_file_unchanged() {
        let (_dir, reg) = registry();
        reg.import_key("alice", KEY_A).unwrap();
        let path = reg.key_path("alice");
        let before = std::fs::read(&path).unwrap();

        let err = reg.import_key("alice", KEY_B).unwrap_err();
        assert!(matches!(err, crate::Error::KeyExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_same_key_under_second_alias_rejected() {
        let (_dir, reg) = registry();
        reg.import_key("alice", KEY_A).unwrap();
        let err = reg.import_key("alice2", KEY_A).unwrap_err();
        assert!(matches!(err, crate::Error::KeyExists(_)));
        assert_eq!(reg.list().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_lookups() {
        let (_dir, reg) = registry();
        assert!(matches!(
            reg.get("nobody").unwrap_err(),
            crate::Error::KeyNotFound(_)
        ));
        assert!(reg
            .find_by_rollapp_address(&Address::ZERO)
            .unwrap()
            .is_none());
        assert!(reg.find_by_router_address("elder1xyz").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (_dir, reg) = registry();
        reg.import_key("alice", KEY_A).unwrap();
        reg.delete("alice").unwrap();
        assert!(reg.list().unwrap().is_empty());
        assert!(matches!(
            reg.delete("alice").unwrap_err(),
            crate::Error::KeyNotFound(_)
        ));
    }

    #[test]
    fn test_list_sorted_and_ignores_other_files() {
        let (_dir, reg) = registry();
        reg.import_key("bob", KEY_B).unwrap();
        reg.import_key("alice", KEY_A).unwrap();
        std::fs::write(reg.dir().join("notes.txt"), b"hi").unwrap();
        std::fs::write(reg.dir().join(".alice.json.tmp-0"), b"partial").unwrap();

        let aliases: Vec<String> = reg
            .list()
            .unwrap()
            .iter()
            .map(|k| k.alias().to_string())
            .collect();
        assert_eq!(aliases, vec!["alice", "bob"]);
    }

    #[test]
    fn test_alias_validation() {
        let (_dir, reg) = registry();
        for bad in ["", "../evil", "a/b", ".hidden", "sp ace"] {
            assert!(reg.import_key(bad, KEY_A).is_err(), "{bad}");
        }
        assert!(reg.import_key("ok-alias_1.v2", KEY_A).is_ok());
    }

    #[test]
    fn test_encrypted_registry_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [7u8; 32]);
        let reg = KeyRegistry::open_encrypted(dir.path(), "elder", &key_b64).unwrap();
        let id = reg.import_key("alice", KEY_A).unwrap();

        let raw = std::fs::read(dir.path().join("alice.json")).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());
        assert_eq!(reg.get("alice").unwrap(), id);

        let plain = KeyRegistry::open(dir.path(), "elder").unwrap();
        assert!(plain.get("alice").is_err());
    }
}
