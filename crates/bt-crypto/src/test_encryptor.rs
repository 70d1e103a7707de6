//! Deterministic reversible encryptor for tests.

use std::io::{Read, Write};

use crate::error::{CryptoError, CryptoResult};
use crate::traits::{DecryptionContext, Encryptor};

/// Header prepended by [`TestEncryptor`] so ciphertext differs from
/// plaintext (and therefore hashes differently) while staying trivially
/// reversible.
const TEST_HEADER: &[u8; 8] = b"BTENC\x00\x00\x00";

/// An [`Encryptor`] that only prepends a fixed header. No key material, no
/// randomness; useful wherever a test needs the encrypted code path without
/// real cryptography.
#[derive(Debug, Default)]
pub struct TestEncryptor;

impl TestEncryptor {
    /// Creates a test encryptor.
    pub fn new() -> Self {
        Self
    }
}

impl Encryptor for TestEncryptor {
    fn setup(&self, _passphrase: &str) -> CryptoResult<()> {
        Ok(())
    }

    fn encrypt(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> CryptoResult<()> {
        writer.write_all(TEST_HEADER)?;
        std::io::copy(reader, writer)?;
        Ok(())
    }

    fn unlock(&self, _passphrase: &str) -> CryptoResult<Box<dyn DecryptionContext>> {
        Ok(Box::new(TestDecryptionContext))
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Strips the header added by [`TestEncryptor`].
#[derive(Debug, Default)]
pub struct TestDecryptionContext;

impl DecryptionContext for TestDecryptionContext {
    fn decrypt(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> CryptoResult<()> {
        let mut header = [0u8; TEST_HEADER.len()];
        reader.read_exact(&mut header)?;
        if &header != TEST_HEADER {
            return Err(CryptoError::DecryptionFailed(
                "invalid test encryption header".to_string(),
            ));
        }
        std::io::copy(reader, writer)?;
        Ok(())
    }
}
