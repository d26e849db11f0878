//! AES-256-GCM envelope encryption for cloud-sync payloads. Wire format is
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)` — a fresh random nonce
//! per call, never reused across encryptions of the same key.

use aes_gcm::aead::{Aead, AeadCore, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit};

use super::SyncError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

pub struct DataEncryptor {
    cipher: Aes256Gcm,
}

impl DataEncryptor {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self { cipher: Aes256Gcm::new(key) }
    }

    pub fn generate_key() -> [u8; KEY_SIZE] {
        Aes256Gcm::generate_key(OsRng).into()
    }

    /// Encrypts `data`, binding `aad` (if any) to the ciphertext. The same
    /// `aad` must be supplied to `decrypt` or the call fails.
    pub fn encrypt(&self, data: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, SyncError> {
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let payload = Payload { msg: data, aad: aad.unwrap_or(&[]) };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|e| SyncError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Any AAD mismatch, truncated input, or corrupted tag surfaces as a
    /// single opaque [`SyncError::Decryption`] — never a partial result.
    pub fn decrypt(&self, encrypted: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, SyncError> {
        if encrypted.len() < NONCE_SIZE {
            return Err(SyncError::Decryption("ciphertext shorter than nonce".to_string()));
        }
        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);
        let payload = Payload { msg: ciphertext, aad: aad.unwrap_or(&[]) };
        self.cipher
            .decrypt(nonce, payload)
            .map_err(|e| SyncError::Decryption(e.to_string()))
    }
}

/// Writes `key` to `path` with owner-only permissions on unix, refusing to
/// clobber an existing file unless `overwrite` is set.
pub fn save_key(key: &[u8; KEY_SIZE], path: &std::path::Path, overwrite: bool) -> std::io::Result<()> {
    if path.exists() && !overwrite {
        return Err(std::io::Error::new(std::io::ErrorKind::AlreadyExists, "key file already exists"));
    }
    std::fs::write(path, key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Loads the key at `path`, generating and persisting a new one if absent
/// (or if `force` is set).
pub fn initialize_key(path: &std::path::Path, force: bool) -> std::io::Result<[u8; KEY_SIZE]> {
    if !force && path.exists() {
        let bytes = std::fs::read(path)?;
        let mut key = [0u8; KEY_SIZE];
        if bytes.len() != KEY_SIZE {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "key file has wrong length"));
        }
        key.copy_from_slice(&bytes);
        return Ok(key);
    }
    let key = DataEncryptor::generate_key();
    save_key(&key, path, force)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_matching_aad() {
        let key = DataEncryptor::generate_key();
        let enc = DataEncryptor::new(&key);
        let ciphertext = enc.encrypt(b"hello world", Some(b"project-1")).unwrap();
        let plaintext = enc.decrypt(&ciphertext, Some(b"project-1")).unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[test]
    fn aad_mismatch_fails_decryption() {
        let key = DataEncryptor::generate_key();
        let enc = DataEncryptor::new(&key);
        let ciphertext = enc.encrypt(b"hello world", Some(b"project-1")).unwrap();
        assert!(enc.decrypt(&ciphertext, Some(b"project-2")).is_err());
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = DataEncryptor::generate_key();
        let enc = DataEncryptor::new(&key);
        let a = enc.encrypt(b"same plaintext", None).unwrap();
        let b = enc.encrypt(b"same plaintext", None).unwrap();
        assert_ne!(a, b);
    }
}
