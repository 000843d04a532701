//! Low-level cryptographic building blocks. No item/envelope awareness
//! lives in this file -- that belongs to `crate::item_transformer`.
use aes::cipher::block_padding::{Pkcs7, UnpadError};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Sha256, Sha512};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AES-CBC padding invalid (wrong key or tampered ciphertext)")]
    Unpad,
    #[error("ciphertext not a multiple of the AES block size")]
    InvalidLength,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("hex decode failed: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

impl From<UnpadError> for CryptoError {
    fn from(_: UnpadError) -> Self {
        CryptoError::Unpad
    }
}

/// Generate a fresh random UUIDv4, as the original `UUIDGenerator` does.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// PBKDF2-SHA512, used to derive the account master key / auth key from the
/// user's password and a server-issued salt.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], iterations: u32, output_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; output_len];
    pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
    out
}

/// HMAC-SHA256 over `data` using `secret`, hex-encoded -- the item envelope
/// format (spec.md §4.1) always carries `auth_hash` as a hex string.
pub fn hmac_sha256(secret: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify an HMAC-SHA256 hex digest in constant time (via `Mac::verify_slice`,
/// which is implemented with a constant-time comparison).
pub fn hmac_sha256_verify(secret: &[u8], data: &[u8], expected_hex: &str) -> bool {
    let expected = match hex::decode(expected_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

/// AES-256-CBC encrypt with an explicit IV, PKCS7 padded. `key` and `iv` must
/// be 32 and 16 bytes respectively.
pub fn aes256_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: &[u8; 32] = key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        })?;
    let iv: &[u8; 16] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 16,
        actual: iv.len(),
    })?;
    Ok(Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// AES-256-CBC decrypt with an explicit IV, PKCS7 padded.
pub fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: &[u8; 32] = key
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key.len(),
        })?;
    let iv: &[u8; 16] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 16,
        actual: iv.len(),
    })?;
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CryptoError::InvalidLength);
    }
    Ok(Aes256CbcDec::new(key.into(), iv.into()).decrypt_padded_vec_mut::<Pkcs7>(ciphertext)?)
}

/// A fresh random 16-byte IV, hex-encoded as the wire format expects.
pub fn random_iv_hex() -> String {
    use rand::RngCore;
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    hex::encode(iv)
}

/// A fresh random key of `len` bytes, used to mint per-item keys.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sign_verify_roundtrip() {
        let secret = [0x42u8; 32];
        let digest = hmac_sha256(&secret, b"hello world");
        assert!(hmac_sha256_verify(&secret, b"hello world", &digest));
    }

    #[test]
    fn hmac_wrong_data_fails() {
        let secret = [0x42u8; 32];
        let digest = hmac_sha256(&secret, b"hello");
        assert!(!hmac_sha256_verify(&secret, b"world", &digest));
    }

    #[test]
    fn aes_cbc_roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let ciphertext = aes256_cbc_encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let recovered = aes256_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn aes_cbc_wrong_key_fails_to_unpad() {
        let key = [0x11u8; 32];
        let wrong_key = [0x99u8; 32];
        let iv = [0x22u8; 16];
        let ciphertext = aes256_cbc_encrypt(&key, &iv, b"some plaintext data").unwrap();
        assert!(aes256_cbc_decrypt(&wrong_key, &iv, &ciphertext).is_err());
    }

    #[test]
    fn pbkdf2_is_deterministic_for_same_inputs() {
        let a = pbkdf2_sha512(b"password", b"salt", 1000, 64);
        let b = pbkdf2_sha512(b"password", b"salt", 1000, 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn pbkdf2_differs_for_different_salts() {
        let a = pbkdf2_sha512(b"password", b"salt1", 1000, 64);
        let b = pbkdf2_sha512(b"password", b"salt2", 1000, 64);
        assert_ne!(a, b);
    }

    #[test]
    fn uuid_generation_produces_unique_values() {
        let a = new_uuid();
        let b = new_uuid();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
