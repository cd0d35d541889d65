//! Crypto primitives for sealing key records - Argon2id, HKDF, XChaCha20

mod aead;
mod argon2_kdf;
mod hkdf_derive;
mod key_bytes;

pub use aead::{open, seal, AeadCipher, Sealed};
pub use argon2_kdf::{derive_kek, generate_salt, Argon2Config, SALT_LEN};
pub use hkdf_derive::{derive_record_key, derive_subkey, purposes};
pub use key_bytes::{KeyBytes, KEY_LEN};
