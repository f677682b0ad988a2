//! Encrypting storage decorator.
//!
//! Wraps another backend and encrypts every payload with AES-256-GCM before
//! it reaches the inner backend. The key is derived from an operator-supplied
//! passphrase and a random salt that is created on first use and stored,
//! unencrypted, next to the payloads.
//!
//! Stored layout of every file: `nonce (12 bytes) || ciphertext || tag`.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use sha2::Sha256;
use std::path::Path;

use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, StorageBackend, validate_path};

/// Where the key-derivation salt lives inside the wrapped backend.
pub const SALT_PATH: &str = ".salt";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
/// PBKDF2-HMAC-SHA256 rounds used to stretch the passphrase.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive a 256-bit payload key from a passphrase and salt.
///
/// PBKDF2-HMAC-SHA256 with [`PBKDF2_ITERATIONS`] rounds; the same passphrase
/// and salt always produce the same key.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypting storage backend.
///
/// Reads are decrypted transparently; a wrong passphrase or tampered file
/// surfaces as [`ErrorKind::Crypto`] rather than garbage bytes.
#[derive(Clone)]
pub struct EncryptedBackend {
    inner: BackendHandle,
    cipher: Aes256Gcm,
}
impl EncryptedBackend {
    /// Wrap `inner` using an already-derived key.
    pub fn with_key(inner: BackendHandle, key: [u8; 32]) -> Self {
        Self { inner, cipher: Aes256Gcm::new(&key.into()) }
    }

    /// Wrap `inner`, deriving the key from `passphrase` and the salt stored
    /// in `inner` (generating and persisting a fresh salt when none exists).
    pub async fn with_passphrase(inner: BackendHandle, passphrase: &str) -> Result<Self> {
        let salt = Self::load_or_create_salt(&inner).await?;
        Ok(Self::with_key(inner, derive_key(passphrase.as_bytes(), &salt)))
    }

    async fn load_or_create_salt(inner: &BackendHandle) -> Result<Vec<u8>> {
        let path = Path::new(SALT_PATH);
        match inner.read(path).await {
            Ok(salt) if salt.len() == SALT_LEN => Ok(salt),
            Ok(_) => exn::bail!(ErrorKind::Crypto("stored salt is corrupt")),
            Err(e) if e.is_not_found() => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                inner.write(path, &salt).await?;
                tracing::info!(backend = inner.name(), "Generated new payload encryption salt");
                Ok(salt)
            },
            Err(e) => Err(e),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext =
            self.cipher.encrypt(&nonce, plaintext).map_err(|_| exn::Exn::from(ErrorKind::Crypto("encryption failed")))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            exn::bail!(ErrorKind::Crypto("ciphertext too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| exn::Exn::from(ErrorKind::Crypto("decryption failed")))
    }

    /// The salt is off limits under every spelling of its path.
    fn reject_salt_path(path: &Path) -> Result<()> {
        if validate_path(path)? == Path::new(SALT_PATH) {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for EncryptedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Self::reject_salt_path(path)?;
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Self::reject_salt_path(path)?;
        let sealed = self.inner.read(path).await?;
        // Decryption is CPU-bound; keep large payloads off the async workers.
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.decrypt(&sealed))
            .await
            .map_err(|e| exn::Exn::from(ErrorKind::BackendError(e.to_string())))?
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Self::reject_salt_path(path)?;
        let this = self.clone();
        let plaintext = data.to_vec();
        let sealed = tokio::task::spawn_blocking(move || this.encrypt(&plaintext))
            .await
            .map_err(|e| exn::Exn::from(ErrorKind::BackendError(e.to_string())))??;
        tracing::trace!(path = %path.display(), bytes = data.len(), "Writing encrypted payload");
        self.inner.write(path, &sealed).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        Self::reject_salt_path(path)?;
        self.inner.delete(path).await
    }
}
