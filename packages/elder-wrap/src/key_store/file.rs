//! Durable key files: tmp + fsync + hard link, optional AES-256-GCM at rest.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Key file codec: encrypted (AES-256-GCM) for production, plaintext for dev.
#[derive(Clone)]
pub(crate) struct KeyFileCodec {
    encryption_key: Option<[u8; 32]>,
}

impl KeyFileCodec {
    pub(crate) fn plaintext() -> Self {
        Self {
            encryption_key: None,
        }
    }

    pub(crate) fn encrypted(key_b64: &str) -> Result<Self, crate::Error> {
        let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
            .map_err(|e| crate::Error::Config(format!("Invalid encryption key base64: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(crate::Error::Config(format!(
                "Encryption key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Ok(Self {
            encryption_key: Some(key),
        })
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub(crate) fn encode(&self, json: Vec<u8>) -> Result<Vec<u8>, crate::Error> {
        match &self.encryption_key {
            Some(key) => encrypt_aes256gcm(key, &json),
            None => Ok(json),
        }
    }

    pub(crate) fn decode(&self, data: Vec<u8>) -> Result<Vec<u8>, crate::Error> {
        match &self.encryption_key {
            Some(key) => decrypt_aes256gcm(key, &data),
            None => Ok(data),
        }
    }
}

/// Create `dir` (and parents) restricted to the owner.
pub(crate) fn create_private_dir(dir: &Path) -> Result<(), crate::Error> {
    fs::create_dir_all(dir)
        .map_err(|e| crate::Error::KeyStore(format!("Failed to create key store directory: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            crate::Error::KeyStore(format!("Failed to restrict key store directory: {e}"))
        })?;
    }
    Ok(())
}

/// Create-only durable write: the target is either absent or the complete
/// content. An existing target is left untouched and yields `KeyExists`,
/// including one created by another process since the caller last looked.
pub(crate) fn write_new(target: &Path, content: &[u8]) -> Result<(), crate::Error> {
    let dir = target
        .parent()
        .ok_or_else(|| crate::Error::KeyStore(format!("No parent dir for {}", target.display())))?;
    create_private_dir(dir)?;

    let tmp = temp_path(target);
    let result = write_synced(&tmp, content).and_then(|()| {
        fs::hard_link(&tmp, target).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => crate::Error::KeyExists(
                target
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            _ => crate::Error::KeyStore(format!("Failed to publish key file: {e}")),
        })
    });
    let _ = fs::remove_file(&tmp);
    result?;

    // Persist the new directory entry.
    #[cfg(unix)]
    {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), crate::Error> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut f = options
        .open(path)
        .map_err(|e| crate::Error::KeyStore(format!("Failed to create temporary file: {e}")))?;
    f.write_all(content)
        .map_err(|e| crate::Error::KeyStore(format!("Failed to write key file: {e}")))?;
    f.sync_all()
        .map_err(|e| crate::Error::KeyStore(format!("Failed to sync key file: {e}")))
}

/// `.{name}.tmp-{random}` in the target's directory (hidden from listings).
fn temp_path(target: &Path) -> PathBuf {
    use rand::Rng;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen();
    target.with_file_name(format!(".{name}.tmp-{suffix:016x}"))
}

fn encrypt_aes256gcm(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::KeyStore(format!("AES init failed: {e}")))?;

    let mut nonce_bytes = [0u8; 12];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| crate::Error::KeyStore(format!("Encryption failed: {e}")))?;

    // Nonce prefix
    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn decrypt_aes256gcm(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(crate::Error::KeyStore(
            "Encrypted data too short (missing nonce)".into(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::KeyStore(format!("AES init failed: {e}")))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| crate::Error::KeyStore(format!("Decryption failed (wrong key?): {e}")))
}
