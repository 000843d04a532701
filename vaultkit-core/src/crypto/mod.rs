//! Crypto primitives layer: UUID generation, PBKDF2-SHA512 key derivation,
//! AES-256-CBC with explicit IV, HMAC-SHA256, base64. Everything above this
//! module (the item transformer) is built purely out of these primitives.
pub mod keys;
pub mod primitives;

pub use keys::{AccountKeys, ItemKey};
pub use primitives::{hmac_sha256, new_uuid, pbkdf2_sha512, CryptoError};
