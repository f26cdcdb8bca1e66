//! Crypto (C4): AES-256-GCM per-chunk seal/open with a deterministic IV
//! derived from the chunk index (spec §4.4).
//!
//! Grounded on `aes_gcm::{Aes256Gcm, KeyInit, Nonce, aead::Aead}` as used
//! in the pack's `haven-fast-transfer/sender.rs` (`other_examples/
//! ad630712_...`), and on the teacher's `transfer::calculate_file_hash`
//! for the SHA-256 pattern reused by the key-exchange base64 helpers.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::error::TransferError;

/// Size of the AES-GCM authentication tag appended to ciphertext.
pub const TAG_LEN: usize = 16;

/// A 256-bit key, generated by the sender per transfer and exchanged
/// out-of-band via the URL fragment (spec §4.4, §6) — never sent over
/// signaling, never persisted.
#[derive(Clone)]
pub struct TransferKey([u8; 32]);

impl TransferKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_url_safe_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_url_safe_b64(s: &str) -> Result<Self, TransferError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| TransferError::CorruptPacket(format!("invalid transfer key encoding: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransferError::CorruptPacket("transfer key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

/// Deterministic 96-bit (12-byte) nonce: zero prefix, big-endian chunk
/// index in the last 4 bytes (spec §4.4). Safe because a `TransferKey`
/// is single-use for exactly one transfer and `chunk_index` never
/// repeats within it.
fn iv_for_chunk(chunk_index: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[8..12].copy_from_slice(&chunk_index.to_be_bytes());
    iv
}

/// Seal `plaintext` for `chunk_index`, returning ciphertext with the
/// 16-byte auth tag appended.
pub fn seal(key: &TransferKey, chunk_index: u32, plaintext: &[u8]) -> Result<Vec<u8>, TransferError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| TransferError::DecryptFailure { chunk_index })?;
    let iv = iv_for_chunk(chunk_index);
    let nonce = Nonce::from_slice(&iv);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .map_err(|_| TransferError::DecryptFailure { chunk_index })
}

/// Open `ciphertext` (plaintext + 16-byte tag) for `chunk_index`.
pub fn open(key: &TransferKey, chunk_index: u32, ciphertext: &[u8]) -> Result<Vec<u8>, TransferError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| TransferError::DecryptFailure { chunk_index })?;
    let iv = iv_for_chunk(chunk_index);
    let nonce = Nonce::from_slice(&iv);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| TransferError::DecryptFailure { chunk_index })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = TransferKey::generate();
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        for chunk_index in [0u32, 1, 42, u32::MAX] {
            let ciphertext = seal(&key, chunk_index, plaintext).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
            let opened = open(&key, chunk_index, &ciphertext).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn wrong_chunk_index_fails_authentication() {
        let key = TransferKey::generate();
        let ciphertext = seal(&key, 5, b"hello").unwrap();
        let err = open(&key, 6, &ciphertext).unwrap_err();
        assert!(matches!(err, TransferError::DecryptFailure { chunk_index: 6 }));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = TransferKey::generate();
        let mut ciphertext = seal(&key, 1, b"hello world").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(open(&key, 1, &ciphertext).is_err());
    }

    #[test]
    fn key_base64_round_trips() {
        let key = TransferKey::generate();
        let encoded = key.to_url_safe_b64();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        let decoded = TransferKey::from_url_safe_b64(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());
    }
}
