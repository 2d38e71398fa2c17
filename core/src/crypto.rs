//! Client-side authenticated encryption for secret payloads.
//!
//! Payloads are sealed with ChaCha20-Poly1305 under a random 256-bit key that
//! only ever lives on clients. The transport form of a payload is
//! `base64url(nonce || ciphertext || tag)` without padding, so it can sit in a
//! JSON body or URL untouched.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Byte length of a key (256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of a nonce (96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The key string is not valid base64url or does not decode to [`KEY_LEN`] bytes.
    #[error("invalid key format: {0}")]
    KeyFormat(String),

    /// The tag did not verify or the payload could not be unpacked.
    #[error("decryption failed (invalid key or corrupted data)")]
    Decryption,

    #[error("encryption failed")]
    Encryption,
}

/// Symmetric key for a single secret.
///
/// The bytes are zeroed when the value is dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Generate a fresh key from the OS CSPRNG.
#[must_use]
pub fn generate_key() -> SecretKey {
    let key = ChaCha20Poly1305::generate_key(&mut OsRng);
    SecretKey(key.into())
}

/// Serialize a key for the URL fragment.
#[must_use]
pub fn export_key(key: &SecretKey) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Parse a key previously produced by [`export_key`].
pub fn import_key(encoded: &str) -> Result<SecretKey, CipherError> {
    let decoded = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| CipherError::KeyFormat(e.to_string()))?,
    );

    let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
        CipherError::KeyFormat(format!(
            "expected {KEY_LEN} bytes, got {}",
            decoded.len()
        ))
    })?;

    Ok(SecretKey(bytes))
}

/// Encrypt UTF-8 text, returning the self-contained transport string.
///
/// Every call draws a new random nonce.
pub fn encrypt(plaintext: &str, key: &SecretKey) -> Result<String, CipherError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::Encryption)?;

    let mut storage = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    storage.extend_from_slice(&nonce);
    storage.extend_from_slice(&ciphertext);

    Ok(URL_SAFE_NO_PAD.encode(storage))
}

/// Decrypt a transport string produced by [`encrypt`].
pub fn decrypt(encoded: &str, key: &SecretKey) -> Result<String, CipherError> {
    let blob = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| CipherError::Decryption)?;

    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Decryption);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let long = "x".repeat(10_000);
        for text in ["", "hello world", "ünïcødé 🔐", long.as_str()] {
            let sealed = encrypt(text, &key).unwrap();
            assert_eq!(decrypt(&sealed, &key).unwrap(), text);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = generate_key();
        let a = encrypt("same", &key).unwrap();
        let b = encrypt("same", &key).unwrap();
        assert_ne!(a, b);

        let a = URL_SAFE_NO_PAD.decode(a).unwrap();
        let b = URL_SAFE_NO_PAD.decode(b).unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn output_is_url_safe_without_padding() {
        let key = generate_key();
        let sealed = encrypt("padding check!", &key).unwrap();
        let exported = export_key(&key);
        for s in [&sealed, &exported] {
            assert!(
                s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
        assert_eq!(exported.len(), 43);
    }

    #[test]
    fn zeroize_wipes_key_material() {
        let mut key = generate_key();
        assert_ne!(key.as_bytes(), &[0u8; KEY_LEN]);

        key.zeroize();
        assert_eq!(key.as_bytes(), &[0u8; KEY_LEN]);
    }

    #[test]
    fn wrong_key_rejected() {
        let k1 = generate_key();
        let k2 = generate_key();
        let sealed = encrypt("secret", &k1).unwrap();
        assert_eq!(decrypt(&sealed, &k2), Err(CipherError::Decryption));
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let key = generate_key();
        let sealed = encrypt("tamper me", &key).unwrap();
        let blob = URL_SAFE_NO_PAD.decode(&sealed).unwrap();

        for byte in 0..blob.len() {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered[byte] ^= 1 << bit;
                let encoded = URL_SAFE_NO_PAD.encode(&tampered);
                assert_eq!(
                    decrypt(&encoded, &key),
                    Err(CipherError::Decryption),
                    "flip of bit {bit} in byte {byte} went undetected"
                );
            }
        }
    }

    #[test]
    fn truncated_payload_rejected() {
        let key = generate_key();
        let short = URL_SAFE_NO_PAD.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        assert_eq!(decrypt(&short, &key), Err(CipherError::Decryption));
        assert_eq!(decrypt("not base64!", &key), Err(CipherError::Decryption));
    }

    #[test]
    fn key_export_import() {
        let key = generate_key();
        let imported = import_key(&export_key(&key)).unwrap();
        assert_eq!(imported, key);
    }

    #[test]
    fn import_rejects_bad_alphabet_and_length() {
        assert!(matches!(import_key("a+b/c="), Err(CipherError::KeyFormat(_))));
        let short = URL_SAFE_NO_PAD.encode([7u8; 16]);
        assert!(matches!(import_key(&short), Err(CipherError::KeyFormat(_))));
    }

    #[test]
    fn key_is_redacted_in_debug() {
        let key = generate_key();
        assert_eq!(format!("{key:?}"), "SecretKey([REDACTED])");
    }
}
