use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use super::error::{CredentialError, CredentialResult};

/// AES-256 key size in bytes
const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
const NONCE_SIZE: usize = 12;

/// Plaintext secret material with zeroize-on-drop.
///
/// Has no `Display` and a redacted `Debug`, so it cannot end up in logs or
/// error messages by accident.
pub struct Secret {
    value: String,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Encryption key for stored credentials
#[derive(Clone)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Create a new random encryption key
    pub fn generate() -> CredentialResult<Self> {
        let mut key = [0u8; KEY_SIZE];
        getrandom::fill(&mut key)
            .map_err(|e| CredentialError::InvalidKey(format!("OS RNG unavailable: {}", e)))?;
        Ok(Self { key })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CredentialResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CredentialError::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Create from base64-encoded string
    pub fn from_base64(encoded: &str) -> CredentialResult<Self> {
        let mut bytes = BASE64
            .decode(encoded)
            .map_err(|e| CredentialError::InvalidKey(format!("Invalid base64 key: {}", e)))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Export as base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Encrypt a plaintext string using AES-256-GCM
///
/// Returns a base64-encoded string containing: nonce (12 bytes) + ciphertext
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> CredentialResult<String> {
    let cipher = Aes256Gcm::new_from_slice(&key.key)
        .map_err(|e| CredentialError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::fill(&mut nonce_bytes)
        .map_err(|e| CredentialError::Encryption(format!("Failed to generate nonce: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CredentialError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(combined))
}

/// Decrypt a base64-encoded ciphertext using AES-256-GCM
///
/// Expects format: base64(nonce (12 bytes) + ciphertext)
pub fn decrypt(encrypted: &str, key: &EncryptionKey) -> CredentialResult<Secret> {
    let combined = BASE64
        .decode(encrypted)
        .map_err(|e| CredentialError::Decryption(format!("Invalid base64: {}", e)))?;

    if combined.len() < NONCE_SIZE {
        return Err(CredentialError::Decryption(
            "Ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key.key)
        .map_err(|e| CredentialError::Decryption(format!("Failed to create cipher: {}", e)))?;

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CredentialError::Decryption("Decryption failed (wrong key or corrupted data)".to_string())
    })?;

    match String::from_utf8(plaintext) {
        Ok(value) => Ok(Secret::new(value)),
        Err(e) => {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            Err(CredentialError::Decryption(
                "Invalid UTF-8 in decrypted credential".to_string(),
            ))
        }
    }
}

/// File-backed storage for the credential encryption key
pub struct KeyStore {
    key_path: PathBuf,
}

impl KeyStore {
    pub fn with_path(path: PathBuf) -> Self {
        Self { key_path: path }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Get or create the encryption key
    pub fn get_or_create_key(&self) -> CredentialResult<EncryptionKey> {
        if self.key_path.exists() {
            self.load_key()
        } else {
            let key = EncryptionKey::generate()?;
            self.save_key(&key)?;
            tracing::info!(path = %self.key_path.display(), "Created credential encryption key");
            Ok(key)
        }
    }

    /// Load the encryption key from storage
    pub fn load_key(&self) -> CredentialResult<EncryptionKey> {
        let mut encoded = fs::read_to_string(&self.key_path)
            .map_err(|e| CredentialError::KeyRead(self.key_path.clone(), e))?;
        let key = EncryptionKey::from_base64(encoded.trim());
        encoded.zeroize();
        key
    }

    /// Save the encryption key to storage
    pub fn save_key(&self, key: &EncryptionKey) -> CredentialResult<()> {
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CredentialError::KeyWrite(parent.to_path_buf(), e))?;
        }

        let mut encoded = key.to_base64();
        let written = fs::write(&self.key_path, &encoded);
        encoded.zeroize();
        written.map_err(|e| CredentialError::KeyWrite(self.key_path.clone(), e))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.key_path, permissions)
                .map_err(|e| CredentialError::KeyWrite(self.key_path.clone(), e))?;
        }

        Ok(())
    }

    pub fn key_exists(&self) -> bool {
        self.key_path.exists()
    }
}
