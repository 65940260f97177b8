//! Key derivation and blob sealing
//!
//! Blob layout: `MAGIC || nonce (12 bytes) || ciphertext+tag`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{Result, VaultError};

/// File magic identifying a sealed vault
pub const MAGIC: &[u8] = b"OMNIVAULT1";
/// Salt length in bytes
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 of the PIN, 32 bytes
pub fn derive_key(pin: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, iterations.max(1), &mut key[..]);
    key
}

/// Fresh random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypt `plaintext` under `key` with a fresh nonce
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| VaultError::Corrupt("encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a sealed blob.
///
/// A blob without the magic header is [`VaultError::Corrupt`]; an
/// authentication failure (wrong PIN, tampered bytes) is
/// [`VaultError::Decryption`].
pub fn open(key: &[u8; KEY_LEN], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let body = blob
        .strip_prefix(MAGIC)
        .ok_or_else(|| VaultError::Corrupt("missing vault header".to_string()))?;
    if body.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::Corrupt("vault blob truncated".to_string()));
    }
    let (nonce, ciphertext) = body.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST_ITERATIONS: u32 = 1_000;

    #[test]
    fn test_derive_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("12345", &salt, FAST_ITERATIONS);
        let b = derive_key("12345", &salt, FAST_ITERATIONS);
        let c = derive_key("54321", &salt, FAST_ITERATIONS);
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_salt_changes_key() {
        let a = derive_key("12345", &[1u8; SALT_LEN], FAST_ITERATIONS);
        let b = derive_key("12345", &[2u8; SALT_LEN], FAST_ITERATIONS);
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_seal_layout_and_open() {
        let key = derive_key("12345", &[0u8; SALT_LEN], FAST_ITERATIONS);
        let blob = seal(&key, b"{}").unwrap();

        assert!(blob.starts_with(MAGIC));
        assert_eq!(blob.len(), MAGIC.len() + NONCE_LEN + 2 + TAG_LEN);
        assert_eq!(open(&key, &blob).unwrap().as_slice(), b"{}");
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = derive_key("12345", &[0u8; SALT_LEN], FAST_ITERATIONS);
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_is_decryption_error() {
        let key = derive_key("12345", &[0u8; SALT_LEN], FAST_ITERATIONS);
        let other = derive_key("99999", &[0u8; SALT_LEN], FAST_ITERATIONS);
        let blob = seal(&key, b"secret").unwrap();
        assert!(matches!(open(&other, &blob), Err(VaultError::Decryption)));
    }

    #[test]
    fn test_tampered_blob_is_decryption_error() {
        let key = derive_key("12345", &[0u8; SALT_LEN], FAST_ITERATIONS);
        let mut blob = seal(&key, b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(open(&key, &blob), Err(VaultError::Decryption)));
    }

    #[test]
    fn test_missing_header_is_corrupt() {
        let key = derive_key("12345", &[0u8; SALT_LEN], FAST_ITERATIONS);
        assert!(matches!(
            open(&key, b"garbage"),
            Err(VaultError::Corrupt(_))
        ));
        assert!(matches!(open(&key, MAGIC), Err(VaultError::Corrupt(_))));
    }
}
