use aes_gcm::aead::{rand_core::RngCore, Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_PBKDF2_ITERATIONS;
use crate::error::AppError;

const TAG_LEN: usize = 16;

/// On-disk shape of an encrypted payload. `iterations` is absent in
/// envelopes written before it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoEnvelope {
    pub v: u8,
    pub salt: String,
    pub iv: String,
    pub tag: String,
    pub data: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations.max(1), &mut key);
    key
}

pub fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    encode_b64(hasher.finalize().as_ref())
}

pub fn encrypt_text_with_key(
    text: &str,
    salt: &[u8],
    key: &[u8; 32],
    iterations: u32,
) -> Result<CryptoEnvelope, AppError> {
    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);
    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|err| AppError::Crypto(err.to_string()))?;
    let nonce = Nonce::from_slice(&iv);
    let encrypted = cipher
        .encrypt(nonce, text.as_bytes())
        .map_err(|err| AppError::Crypto(err.to_string()))?;

    if encrypted.len() < TAG_LEN {
        return Err(AppError::Crypto("Encryption output too short.".to_string()));
    }
    let split_at = encrypted.len() - TAG_LEN;
    let (data, tag) = encrypted.split_at(split_at);

    Ok(CryptoEnvelope {
        v: 1,
        salt: encode_b64(salt),
        iv: encode_b64(&iv),
        tag: encode_b64(tag),
        data: encode_b64(data),
        iterations,
    })
}

/// `Ok(None)` means the envelope is malformed or the key is wrong.
pub fn decrypt_envelope_with_key(
    payload: &CryptoEnvelope,
    key: &[u8; 32],
) -> Result<Option<String>, AppError> {
    let (Ok(iv), Ok(tag), Ok(data)) = (
        decode_b64(payload.iv.as_str()),
        decode_b64(payload.tag.as_str()),
        decode_b64(payload.data.as_str()),
    ) else {
        return Ok(None);
    };
    if iv.len() != 12 || tag.is_empty() {
        return Ok(None);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|err| AppError::Crypto(err.to_string()))?;
    let nonce = Nonce::from_slice(iv.as_slice());
    let mut combined = Vec::with_capacity(data.len() + tag.len());
    combined.extend_from_slice(data.as_slice());
    combined.extend_from_slice(tag.as_slice());

    let decrypted = match cipher.decrypt(nonce, combined.as_slice()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };

    match String::from_utf8(decrypted) {
        Ok(text) => Ok(Some(text)),
        Err(_) => Ok(None),
    }
}

pub fn decode_b64(value: &str) -> Result<Vec<u8>, AppError> {
    B64.decode(value)
        .map_err(|err| AppError::Crypto(err.to_string()))
}

pub fn encode_b64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_text(text: &str, password: &str, iterations: u32) -> Result<CryptoEnvelope, AppError> {
        let salt = random_salt();
        let key = derive_key(password, &salt, iterations);
        encrypt_text_with_key(text, &salt, &key, iterations)
    }

    fn decrypt_envelope(
        payload: &CryptoEnvelope,
        password: &str,
    ) -> Result<Option<String>, AppError> {
        let salt = match decode_b64(payload.salt.as_str()) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        let key = derive_key(password, salt.as_slice(), payload.iterations);
        decrypt_envelope_with_key(payload, &key)
    }

    #[test]
    fn envelope_opens_with_the_right_password_only() {
        let envelope = encrypt_text("{\"shoppers\":[]}", "hunter2", 10).unwrap();
        assert_eq!(envelope.iterations, 10);
        assert_eq!(
            decrypt_envelope(&envelope, "hunter2").unwrap().as_deref(),
            Some("{\"shoppers\":[]}")
        );
        assert_eq!(decrypt_envelope(&envelope, "hunter3").unwrap(), None);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let mut envelope = encrypt_text("payload", "pw", 10).unwrap();
        let mut tag = decode_b64(envelope.tag.as_str()).unwrap();
        tag[0] ^= 0xff;
        envelope.tag = encode_b64(&tag);
        assert_eq!(decrypt_envelope(&envelope, "pw").unwrap(), None);
    }

    #[test]
    fn legacy_envelope_defaults_iterations() {
        let raw = r#"{"v":1,"salt":"","iv":"","tag":"","data":""}"#;
        let envelope: CryptoEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.iterations, DEFAULT_PBKDF2_ITERATIONS);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(password_digest("a"), password_digest("a"));
        assert_ne!(password_digest("a"), password_digest("b"));
    }
}
