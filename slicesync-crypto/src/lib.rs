//! Value encryption for SliceSync.
//!
//! Slices configured with `encrypt` store their value sealed under a
//! realm-wide secret. This crate provides:
//! - [`SecretKey`]: the 256-bit realm secret, zeroized on drop
//! - ChaCha20-Poly1305 sealing with a random nonce per value
//! - [`SecretCipher`]: the capability the engine routes values through
//!
//! The engine never touches the AEAD directly; it only sees a
//! `dyn SecretCipher`, so alternative ciphers can be plugged in.

mod encryptor;
mod error;
mod frame;
mod key;

pub use encryptor::{ChaChaCipher, SecretCipher};
pub use error::{CryptoError, CryptoResult};
pub use frame::{NONCE_SIZE, SealedValue, TAG_SIZE};
pub use key::{KEY_SIZE, SecretKey, generate_secret};
