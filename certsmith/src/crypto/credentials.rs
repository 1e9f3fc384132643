use certsmith_core::{AuthKind, SealedCredential};

use super::error::CredentialResult;
use super::secrets::{EncryptionKey, KeyStore, Secret, decrypt, encrypt};
use crate::ssh::SshAuth;

/// Seals credentials for storage and reveals them for a single connection
pub trait CredentialProvider: Send + Sync {
    /// Encrypt a plaintext credential of the given kind
    fn seal(&self, kind: AuthKind, plaintext: &Secret) -> CredentialResult<SealedCredential>;

    /// Decrypt a stored credential into connection auth
    fn reveal(&self, credential: &SealedCredential) -> CredentialResult<SshAuth>;
}

/// [`CredentialProvider`] using a local AES-256-GCM key
pub struct KeyCredentialProvider {
    key: EncryptionKey,
}

impl KeyCredentialProvider {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Load the key from `store`, creating it on first use
    pub fn from_key_store(store: &KeyStore) -> CredentialResult<Self> {
        Ok(Self::new(store.get_or_create_key()?))
    }
}

impl CredentialProvider for KeyCredentialProvider {
    fn seal(&self, kind: AuthKind, plaintext: &Secret) -> CredentialResult<SealedCredential> {
        let sealed = encrypt(plaintext.expose(), &self.key)?;
        Ok(match kind {
            AuthKind::Password => SealedCredential::Password(sealed),
            AuthKind::Key => SealedCredential::PrivateKey(sealed),
        })
    }

    fn reveal(&self, credential: &SealedCredential) -> CredentialResult<SshAuth> {
        let secret = decrypt(credential.sealed(), &self.key)?;
        Ok(match credential.kind() {
            AuthKind::Password => SshAuth::Password(secret),
            AuthKind::Key => SshAuth::PrivateKey(secret),
        })
    }
}

/// Stores credentials unencrypted; for tests only
#[cfg(test)]
pub(crate) struct PlainCredentialProvider;

#[cfg(test)]
impl CredentialProvider for PlainCredentialProvider {
    fn seal(&self, kind: AuthKind, plaintext: &Secret) -> CredentialResult<SealedCredential> {
        let value = plaintext.expose().to_string();
        Ok(match kind {
            AuthKind::Password => SealedCredential::Password(value),
            AuthKind::Key => SealedCredential::PrivateKey(value),
        })
    }

    fn reveal(&self, credential: &SealedCredential) -> CredentialResult<SshAuth> {
        let secret = Secret::new(credential.sealed());
        Ok(match credential.kind() {
            AuthKind::Password => SshAuth::Password(secret),
            AuthKind::Key => SshAuth::PrivateKey(secret),
        })
    }
}
