//! Session encryption and flow randomness.
//!
//! Cookie payloads are AES-256-GCM encrypted and authenticated; a tampered or
//! foreign-key value simply fails to decrypt, which the filter treats as a
//! protocol violation.

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

use crate::error::AuthError;

const CIPHERTEXT_PREFIX: &str = "v1.";

/// Symmetric encryption of short opaque strings.
///
/// `encrypt` never fails from the caller's perspective; `decrypt` returns
/// `None` on any integrity or format failure.
pub trait Cryptor: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> String;
    fn decrypt(&self, ciphertext: &str) -> Option<String>;
}

pub struct AesGcmCryptor {
    cipher: Aes256Gcm,
}

impl AesGcmCryptor {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        let key = decode_cryptor_secret(secret)?;
        Ok(Self {
            cipher: Aes256Gcm::new((&key).into()),
        })
    }
}

impl Cryptor for AesGcmCryptor {
    fn encrypt(&self, plaintext: &str) -> String {
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        match self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        {
            Ok(ciphertext) => {
                let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ciphertext);
                format!("{CIPHERTEXT_PREFIX}{}", URL_SAFE_NO_PAD.encode(out))
            }
            Err(_) => {
                // Still opaque and bounded; it will never decrypt.
                tracing::error!("session encryption failed");
                format!("{CIPHERTEXT_PREFIX}{}", URL_SAFE_NO_PAD.encode(nonce))
            }
        }
    }

    fn decrypt(&self, ciphertext: &str) -> Option<String> {
        let encoded = ciphertext.strip_prefix(CIPHERTEXT_PREFIX)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).ok()?;

        if raw.len() < 12 + 16 {
            return None;
        }

        let (nonce, payload) = raw.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .ok()?;

        String::from_utf8(plaintext).ok()
    }
}

/// Cryptographically random `state`/`nonce` values for one flow.
pub trait RandomSource: Send + Sync {
    /// 32 random bytes, base64url-encoded without padding (43 characters).
    fn token(&self) -> String;
}

pub struct SecureRandom;

impl RandomSource for SecureRandom {
    fn token(&self) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

type SecretDecoder = fn(&str) -> Option<Vec<u8>>;

// Encodings a secret may arrive in; a `<name>:` prefix selects one directly.
const SECRET_FORMATS: [(&str, SecretDecoder); 3] = [
    ("hex", decode_hex),
    ("base64", decode_base64),
    ("base64url", decode_base64url),
];

/// Decodes `cryptor_secret` into the 256-bit session key.
///
/// The secret may name its encoding (`hex:…`, `base64:…`, `base64url:…`).
/// Without a prefix every format is tried, and all successful decodings must
/// agree on the key material.
pub fn decode_cryptor_secret(secret: &str) -> Result<[u8; 32], AuthError> {
    let value = secret.trim();

    if let Some((label, encoded)) = value.split_once(':')
        && let Some((_, decoder)) = SECRET_FORMATS.iter().find(|(name, _)| *name == label)
    {
        let bytes = decoder(encoded).ok_or_else(|| {
            AuthError::InvalidConfig(format!("cryptor_secret is not valid {label}"))
        })?;
        return secret_key(bytes, label);
    }

    let decodings: Vec<(&str, Vec<u8>)> = SECRET_FORMATS
        .iter()
        .filter_map(|(name, decoder)| Some((*name, decoder(value)?)))
        .filter(|(_, bytes)| bytes.len() == 32)
        .collect();

    let Some((label, bytes)) = decodings.first() else {
        return Err(AuthError::InvalidConfig(
            "cryptor_secret must hold 32 bytes of key material, encoded as hex, base64 or \
             base64url (a `hex:`, `base64:` or `base64url:` prefix selects the format)"
                .to_string(),
        ));
    };
    if decodings.iter().any(|(_, other)| other != bytes) {
        let names: Vec<&str> = decodings.iter().map(|(name, _)| *name).collect();
        return Err(AuthError::InvalidConfig(format!(
            "cryptor_secret decodes to different keys as {}; add a format prefix",
            names.join(" and ")
        )));
    }
    secret_key(bytes.clone(), label)
}

fn secret_key(bytes: Vec<u8>, label: &str) -> Result<[u8; 32], AuthError> {
    <[u8; 32]>::try_from(bytes).map_err(|bytes| {
        AuthError::InvalidConfig(format!(
            "cryptor_secret must decode to exactly 32 bytes, got {} from {label}",
            bytes.len()
        ))
    })
}

fn decode_hex(encoded: &str) -> Option<Vec<u8>> {
    hex::decode(encoded).ok()
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .ok()
}

fn decode_base64url(encoded: &str) -> Option<Vec<u8>> {
    URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .ok()
}
