//! Field-level encryption for sensitive event columns.
//!
//! Writes are strict: with a key configured, an encryption failure is an
//! error. Reads are lenient: a value that fails to decrypt (wrong key,
//! corrupted ciphertext, or plaintext written before encryption was enabled)
//! is returned as-is rather than failing the caller, since historical
//! records may predate the current key.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;

use crate::config::EncryptionConfig;
use crate::error::Error;

/// Marker prefix identifying encrypted values at rest.
const ENCRYPTED_PREFIX: &str = "enc1:";

/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Reversible transform for sensitive string fields.
///
/// Without a configured key, `encode` and `decode` are identity functions.
pub struct FieldCodec {
    cipher: Option<Aes256Gcm>,
}

impl FieldCodec {
    /// Create a codec that passes values through unchanged.
    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Create a codec from a base64-encoded 256-bit key.
    pub fn from_key(key_b64: &str) -> Result<Self, Error> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| Error::Config(format!("Field key is not valid base64: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| Error::Config(format!("Field key must be 32 bytes, got {}", key.len())))?;

        Ok(Self {
            cipher: Some(cipher),
        })
    }

    pub fn from_config(config: &EncryptionConfig) -> Result<Self, Error> {
        match &config.field_key {
            Some(key) => Self::from_key(key),
            None => {
                warn!("No field encryption key configured, sensitive fields stored as plaintext");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt a field value for storage.
    pub fn encode(&self, plain: &str) -> Result<String, Error> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain.to_string());
        };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut raw = nonce.to_vec();
        raw.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(raw)))
    }

    /// Encrypt an optional field value; absent values pass through unchanged.
    pub fn encode_opt(&self, value: Option<&str>) -> Result<Option<String>, Error> {
        value.map(|v| self.encode(v)).transpose()
    }

    /// Recover the plaintext of a stored value.
    ///
    /// Never fails: on any decryption problem the raw stored value is
    /// returned so that a misconfigured key degrades display rather than
    /// breaking queries. The failure mode is logged so operators can tell
    /// "no key configured" apart from "decode failed".
    pub fn decode(&self, stored: &str) -> String {
        let Some(cipher) = &self.cipher else {
            if stored.starts_with(ENCRYPTED_PREFIX) {
                warn!("Encrypted field read without a configured key, returning raw value");
            }
            return stored.to_string();
        };

        // Plaintext written before encryption was enabled
        let Some(body) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return stored.to_string();
        };

        match decrypt_envelope(cipher, body) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("Field decode failed ({}), returning raw value", e);
                stored.to_string()
            }
        }
    }

    pub fn decode_opt(&self, stored: Option<String>) -> Option<String> {
        stored.map(|v| self.decode(&v))
    }
}

fn decrypt_envelope(cipher: &Aes256Gcm, body: &str) -> Result<String, Error> {
    let raw = BASE64
        .decode(body)
        .map_err(|e| Error::Crypto(format!("Invalid base64 envelope: {}", e)))?;

    if raw.len() <= NONCE_LEN {
        return Err(Error::Crypto("Envelope shorter than nonce".to_string()));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plain).map_err(|e| Error::Crypto(format!("Invalid UTF-8: {}", e)))
}
