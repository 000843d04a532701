use zeroize::{Zeroize, ZeroizeOnDrop};

use super::primitives::{pbkdf2_sha512, random_bytes};

/// The two account-level keys derived from the user's password: `mk` (master
/// key, used to wrap/unwrap per-item keys) and `ak` (auth key, sent to the
/// server as proof of the password without ever revealing it). Host code
/// supplies these to the core via callback rather than the core owning a
/// keyring -- see the item transformer for how they're consumed.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AccountKeys {
    pub mk: [u8; 32],
    pub ak: [u8; 32],
}

impl AccountKeys {
    /// Derive `mk`/`ak` from a password and server-issued salt via
    /// PBKDF2-SHA512, splitting the 64-byte output in half.
    pub fn derive(password: &str, salt: &str, cost: u32) -> Self {
        let derived = pbkdf2_sha512(password.as_bytes(), salt.as_bytes(), cost, 64);
        let mut mk = [0u8; 32];
        let mut ak = [0u8; 32];
        mk.copy_from_slice(&derived[0..32]);
        ak.copy_from_slice(&derived[32..64]);
        Self { mk, ak }
    }
}

impl std::fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKeys").finish_non_exhaustive()
    }
}

/// Per-item encryption key: a fresh 512-bit random string split in half to
/// produce `ek` (item encryption key, used for AES) and `ak` (item auth key,
/// used for HMAC). One of these is minted per item and itself encrypted
/// under the account master key before being stored in the item's envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ItemKey {
    pub ek: [u8; 32],
    pub ak: [u8; 32],
}

impl ItemKey {
    /// Mint a fresh random per-item key.
    pub fn generate() -> Self {
        let raw = random_bytes(64);
        let mut ek = [0u8; 32];
        let mut ak = [0u8; 32];
        ek.copy_from_slice(&raw[0..32]);
        ak.copy_from_slice(&raw[32..64]);
        Self { ek, ak }
    }

    /// Reconstruct an item key from its hex-concatenated wire form
    /// (`ek || ak`, 128 hex chars), as found decrypted from an item's
    /// `enc_item_key` field.
    pub fn from_hex(hex_str: &str) -> Result<Self, super::primitives::CryptoError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 64 {
            return Err(super::primitives::CryptoError::InvalidKeyLength {
                expected: 64,
                actual: bytes.len(),
            });
        }
        let mut ek = [0u8; 32];
        let mut ak = [0u8; 32];
        ek.copy_from_slice(&bytes[0..32]);
        ak.copy_from_slice(&bytes[32..64]);
        Ok(Self { ek, ak })
    }

    pub fn to_hex(&self) -> String {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(&self.ek);
        combined.extend_from_slice(&self.ak);
        hex::encode(combined)
    }
}

impl std::fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_keys_derive_deterministically() {
        let a = AccountKeys::derive("password", "salt123", 3000);
        let b = AccountKeys::derive("password", "salt123", 3000);
        assert_eq!(a.mk, b.mk);
        assert_eq!(a.ak, b.ak);
        assert_ne!(a.mk, a.ak);
    }

    #[test]
    fn account_keys_differ_by_password() {
        let a = AccountKeys::derive("password1", "salt", 3000);
        let b = AccountKeys::derive("password2", "salt", 3000);
        assert_ne!(a.mk, b.mk);
    }

    #[test]
    fn item_key_hex_roundtrip() {
        let key = ItemKey::generate();
        let hex_str = key.to_hex();
        let recovered = ItemKey::from_hex(&hex_str).unwrap();
        assert_eq!(key.ek, recovered.ek);
        assert_eq!(key.ak, recovered.ak);
    }

    #[test]
    fn item_key_from_hex_rejects_wrong_length() {
        assert!(ItemKey::from_hex("abcd").is_err());
    }

    #[test]
    fn item_keys_are_unique() {
        let a = ItemKey::generate();
        let b = ItemKey::generate();
        assert_ne!(a.ek, b.ek);
        assert_ne!(a.ak, b.ak);
    }
}
