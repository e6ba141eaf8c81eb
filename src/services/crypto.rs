//! Cryptography unit: tenant key derivation, artifact encryption, checksums.
//!
//! Keys are derived per tenant from the platform secret with PBKDF2-HMAC-SHA256
//! so the same tenant always yields the same key (required to decrypt old
//! artifacts) while different tenants yield unrelated keys. Artifacts are
//! sealed with AES-256-GCM, so tampering or a wrong key fails authentication
//! instead of producing garbage plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// PBKDF2 iteration count for tenant key derivation.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
}

/// A 256-bit symmetric key scoped to one tenant (or to the platform).
#[derive(Clone, PartialEq, Eq)]
pub struct TenantKey([u8; 32]);

impl TenantKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// URL-safe base64 encoding of the key material.
    pub fn encoded(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0)
    }
}

// Key material must never leak through Debug output.
impl std::fmt::Debug for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TenantKey(..)")
    }
}

/// Key derivation and artifact sealing over an explicit platform secret.
///
/// Constructed once at startup from config; no ambient global state.
#[derive(Clone)]
pub struct BackupCrypto {
    platform_secret: String,
}

impl BackupCrypto {
    pub fn new(platform_secret: impl Into<String>) -> Self {
        Self {
            platform_secret: platform_secret.into(),
        }
    }

    /// Derive the symmetric key for one tenant's backup artifacts.
    ///
    /// Deterministic: the same tenant id always yields the same key.
    pub fn derive_tenant_key(&self, tenant_id: Uuid) -> TenantKey {
        self.derive(&format!("tenant:{}", tenant_id))
    }

    /// Derive the key used for platform-wide backup artifacts.
    pub fn derive_platform_key(&self) -> TenantKey {
        self.derive("platform")
    }

    fn derive(&self, scope: &str) -> TenantKey {
        let salt = format!("ledgerbook/backup-key/v1/{}", scope);
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.platform_secret.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ITERATIONS,
            &mut key,
        );
        TenantKey(key)
    }
}

/// Encrypt plaintext with AES-256-GCM.
/// Returns: nonce (12 bytes) || ciphertext+tag
pub fn encrypt(plaintext: &[u8], key: &TenantKey) -> Vec<u8> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .expect("AES-256-GCM key length is always 32 bytes");

    // Random 96-bit nonce per artifact
    let nonce_bytes: [u8; 12] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption should not fail with valid key and nonce");

    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    result
}

/// Decrypt AES-256-GCM data produced by [`encrypt`].
///
/// A wrong key or tampered ciphertext fails authentication and returns
/// `CryptoError::DecryptionFailed`, never wrong plaintext.
pub fn decrypt(data: &[u8], key: &TenantKey) -> Result<Vec<u8>, CryptoError> {
    // Minimum size: nonce (12) + tag (16) = 28 bytes
    if data.len() < 28 {
        return Err(CryptoError::CiphertextTooShort);
    }

    let nonce = Nonce::from_slice(&data[0..12]);
    let ciphertext = &data[12..];

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Hex SHA-256 digest of a byte slice.
pub fn checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Streaming hex SHA-256 digest of a file.
pub fn checksum_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> BackupCrypto {
        BackupCrypto::new("test-platform-secret")
    }

    #[test]
    fn test_key_derivation_deterministic() {
        let tenant = Uuid::new_v4();
        let k1 = crypto().derive_tenant_key(tenant);
        let k2 = crypto().derive_tenant_key(tenant);
        assert_eq!(k1, k2);
        assert_eq!(k1.encoded(), k2.encoded());
    }

    #[test]
    fn test_key_derivation_tenant_scoped() {
        let c = crypto();
        let k1 = c.derive_tenant_key(Uuid::new_v4());
        let k2 = c.derive_tenant_key(Uuid::new_v4());
        assert_ne!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), c.derive_platform_key().as_bytes());
    }

    #[test]
    fn test_key_depends_on_platform_secret() {
        let tenant = Uuid::new_v4();
        let k1 = BackupCrypto::new("secret-a").derive_tenant_key(tenant);
        let k2 = BackupCrypto::new("secret-b").derive_tenant_key(tenant);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = crypto().derive_tenant_key(Uuid::new_v4());
        let plaintext = b"-- tenant dump\nINSERT INTO invoices VALUES (1);\n";

        let encrypted = encrypt(plaintext, &key);
        let decrypted = decrypt(&encrypted, &key).unwrap();

        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_wrong_tenant_key_fails() {
        let c = crypto();
        let encrypted = encrypt(b"secret rows", &c.derive_tenant_key(Uuid::new_v4()));
        let result = decrypt(&encrypted, &c.derive_tenant_key(Uuid::new_v4()));
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_data_fails() {
        let key = crypto().derive_tenant_key(Uuid::new_v4());
        let mut encrypted = encrypt(b"secret rows", &key);

        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;

        assert!(decrypt(&encrypted, &key).is_err());
    }

    #[test]
    fn test_too_short_data_fails() {
        let key = crypto().derive_tenant_key(Uuid::new_v4());
        let result = decrypt(&[0u8; 10], &key);
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));
    }

    #[test]
    fn test_nonce_freshness() {
        let key = crypto().derive_tenant_key(Uuid::new_v4());
        let enc1 = encrypt(b"same artifact", &key);
        let enc2 = encrypt(b"same artifact", &key);
        assert_ne!(enc1, enc2);
        assert_eq!(decrypt(&enc1, &key).unwrap(), decrypt(&enc2, &key).unwrap());
    }

    #[test]
    fn test_checksum_deterministic() {
        let data = b"artifact bytes";
        assert_eq!(checksum(data), checksum(data));
        assert_eq!(checksum(data).len(), 64);
    }

    #[test]
    fn test_checksum_detects_mutation() {
        let data = b"artifact bytes".to_vec();
        let mut mutated = data.clone();
        mutated[3] ^= 0x01;
        assert_ne!(checksum(&data), checksum(&mutated));
    }

    #[test]
    fn test_checksum_file_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        let content = vec![0xA7u8; 200_000];
        std::fs::write(&path, &content).unwrap();

        assert_eq!(checksum_file(&path).unwrap(), checksum(&content));
    }
}
