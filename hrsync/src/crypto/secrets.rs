//! Authenticated secret encryption built on ChaCha20-Poly1305.
//! Every secret gets its own freshly generated key. The token carries a
//! version byte, the issue timestamp and the nonce in a header that is bound
//! as associated data, followed by ciphertext and auth tag.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::integrity::fingerprint;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_SIZE: usize = 16;
const TOKEN_VERSION: u8 = 0x80;
const TIMESTAMP_LEN: usize = 8;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + NONCE_LEN;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("decryption failed: {0}")]
    DecryptionError(String),
    #[error("token issued at {issued_at} is older than {max_age_secs}s")]
    TokenExpired {
        issued_at: DateTime<Utc>,
        max_age_secs: i64,
    },
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Symmetric key for exactly one secret. The bytes are zeroed on drop and
/// never printed by `Debug`.
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Draws a new key from the OS RNG, independent of any earlier key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parses the URL-safe base64 text form written to the store.
    pub fn from_encoded(text: &str) -> Result<Self, SecretError> {
        let mut decoded = URL_SAFE
            .decode(text.trim().as_bytes())
            .map_err(|e| SecretError::DecryptionError(format!("key is not valid base64: {e}")))?;
        if decoded.len() != KEY_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SecretError::DecryptionError(format!(
                "invalid key length {len}; expected {KEY_LEN} bytes"
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    /// Log-safe identifier for this key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.bytes))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Encrypts `secret` under a brand new key and returns both. The caller must
/// persist the pair together.
pub fn encrypt(secret: &str) -> Result<(SecretKey, String), SecretError> {
    let key = SecretKey::generate();
    let token = seal(&key, secret.as_bytes(), Utc::now())?;
    Ok((key, token))
}

/// Inverse of [`encrypt`]. Any key mismatch, corruption or tag failure is a
/// `DecryptionError`.
pub fn decrypt(key: &SecretKey, token: &str) -> Result<String, SecretError> {
    open(key, token).map(|(_, plaintext)| plaintext)
}

/// Like [`decrypt`], but also rejects tokens issued more than `max_age` ago.
pub fn decrypt_with_ttl(
    key: &SecretKey,
    token: &str,
    max_age: Duration,
) -> Result<String, SecretError> {
    let (issued_at, plaintext) = open(key, token)?;
    if Utc::now() - issued_at > max_age {
        return Err(SecretError::TokenExpired {
            issued_at,
            max_age_secs: max_age.num_seconds(),
        });
    }
    Ok(plaintext)
}

/// Reads the issue timestamp from a token header without authenticating it.
pub fn token_issued_at(token: &str) -> Result<DateTime<Utc>, SecretError> {
    let raw = decode_token(token)?;
    parse_timestamp(&raw)
}

pub(crate) fn seal(
    key: &SecretKey,
    plaintext: &[u8],
    issued_at: DateTime<Utc>,
) -> Result<String, SecretError> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.push(TOKEN_VERSION);
    header.extend_from_slice(&issued_at.timestamp().to_be_bytes());
    header.extend_from_slice(&nonce);

    let sealed = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|e| SecretError::Encryption(format!("{e}")))?;

    let mut raw = header;
    raw.extend_from_slice(&sealed);
    Ok(URL_SAFE.encode(raw))
}

fn open(key: &SecretKey, token: &str) -> Result<(DateTime<Utc>, String), SecretError> {
    let raw = decode_token(token)?;
    let issued_at = parse_timestamp(&raw)?;
    let (header, sealed) = raw.split_at(HEADER_LEN);
    let nonce = Nonce::from_slice(&header[1 + TIMESTAMP_LEN..]);

    let plaintext = key
        .cipher()
        .decrypt(nonce, Payload { msg: sealed, aad: header })
        .map_err(|e| SecretError::DecryptionError(format!("{e}")))?;

    match String::from_utf8(plaintext) {
        Ok(text) => Ok((issued_at, text)),
        Err(err) => {
            let mut bytes = err.into_bytes();
            bytes.zeroize();
            Err(SecretError::DecryptionError(
                "plaintext is not valid UTF-8".to_string(),
            ))
        }
    }
}

fn decode_token(token: &str) -> Result<Vec<u8>, SecretError> {
    let raw = URL_SAFE
        .decode(token.trim().as_bytes())
        .map_err(|e| SecretError::DecryptionError(format!("token is not valid base64: {e}")))?;
    if raw.len() < HEADER_LEN + TAG_SIZE {
        return Err(SecretError::DecryptionError("token truncated".to_string()));
    }
    if raw[0] != TOKEN_VERSION {
        return Err(SecretError::DecryptionError(format!(
            "unknown token version {:#04x}",
            raw[0]
        )));
    }
    Ok(raw)
}

fn parse_timestamp(raw: &[u8]) -> Result<DateTime<Utc>, SecretError> {
    let mut stamp = [0u8; TIMESTAMP_LEN];
    stamp.copy_from_slice(&raw[1..1 + TIMESTAMP_LEN]);
    DateTime::from_timestamp(i64::from_be_bytes(stamp), 0)
        .ok_or_else(|| SecretError::DecryptionError("token timestamp out of range".to_string()))
}
