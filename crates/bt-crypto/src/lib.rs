#![warn(missing_docs)]

//! bt encryption subsystem.
//!
//! The engine encrypts per-directory content with a public key alone; the
//! passphrase-protected private key is only unlocked, caller-side, for
//! restore. The production implementation wraps the age envelope format
//! (X25519 recipients, scrypt-encrypted identity file); the ciphertext is a
//! self-framing stream a decryptor can consume as a pure pipe.

pub mod age_encryptor;
pub mod error;
pub mod test_encryptor;
pub mod traits;

pub use age_encryptor::{AgeDecryptionContext, AgeEncryptor};
pub use error::{CryptoError, CryptoResult};
pub use test_encryptor::{TestDecryptionContext, TestEncryptor};
pub use traits::{DecryptionContext, Encryptor};
