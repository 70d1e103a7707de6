//! age-backed encryptor.
//!
//! Key layout: the X25519 recipient string is stored in plaintext at the
//! public-key path; the identity is stored at the private-key path inside an
//! age passphrase envelope (scrypt-derived key). Content encryption needs
//! only the recipient file, so backups never prompt; restore unlocks the
//! identity for exactly as long as the caller holds the returned context.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use age::secrecy::{ExposeSecret, SecretString};
use age::x25519;
use tracing::{debug, info};

use crate::error::{CryptoError, CryptoResult};
use crate::traits::{DecryptionContext, Encryptor};

/// [`Encryptor`] implementation over the age envelope format.
pub struct AgeEncryptor {
    public_key_path: PathBuf,
    private_key_path: PathBuf,
}

impl AgeEncryptor {
    /// Creates an encryptor reading and writing the given key paths.
    pub fn new(public_key_path: PathBuf, private_key_path: PathBuf) -> Self {
        Self {
            public_key_path,
            private_key_path,
        }
    }

    fn load_recipient(&self) -> CryptoResult<x25519::Recipient> {
        let data = match std::fs::read_to_string(&self.public_key_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CryptoError::NotConfigured)
            }
            Err(err) => return Err(err.into()),
        };
        parse_first_line(&data, &self.public_key_path, |line| {
            line.parse::<x25519::Recipient>()
        })
    }
}

impl Encryptor for AgeEncryptor {
    fn setup(&self, passphrase: &str) -> CryptoResult<()> {
        let identity = x25519::Identity::generate();
        let recipient = identity.to_public();

        ensure_parent(&self.public_key_path)?;
        ensure_parent(&self.private_key_path)?;

        let mut public_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.public_key_path)?;
        writeln!(public_file, "{recipient}")?;

        let private_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.private_key_path)?;

        let scrypt = age::scrypt::Recipient::new(SecretString::from(passphrase.to_owned()));
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&scrypt as &dyn age::Recipient))
                .map_err(|err| CryptoError::EncryptionFailed(err.to_string()))?;
        let mut writer = encryptor
            .wrap_output(private_file)
            .map_err(|err| CryptoError::EncryptionFailed(err.to_string()))?;
        writeln!(writer, "{}", identity.to_string().expose_secret())?;
        writer.finish()?;

        info!(
            public_key = %self.public_key_path.display(),
            private_key = %self.private_key_path.display(),
            "generated encryption key pair"
        );
        Ok(())
    }

    fn encrypt(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> CryptoResult<()> {
        let recipient = self.load_recipient()?;
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&recipient as &dyn age::Recipient))
                .map_err(|err| CryptoError::EncryptionFailed(err.to_string()))?;
        let mut stream = encryptor
            .wrap_output(writer)
            .map_err(|err| CryptoError::EncryptionFailed(err.to_string()))?;
        std::io::copy(reader, &mut stream)?;
        stream.finish()?;
        Ok(())
    }

    fn unlock(&self, passphrase: &str) -> CryptoResult<Box<dyn DecryptionContext>> {
        let data = match std::fs::read(&self.private_key_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CryptoError::NotConfigured)
            }
            Err(err) => return Err(err.into()),
        };

        let scrypt = age::scrypt::Identity::new(SecretString::from(passphrase.to_owned()));
        let decryptor = age::Decryptor::new(&data[..])
            .map_err(|err| CryptoError::DecryptionFailed(err.to_string()))?;
        let mut key_reader = decryptor
            .decrypt(std::iter::once(&scrypt as &dyn age::Identity))
            .map_err(|_| CryptoError::InvalidPassphrase)?;

        let mut key_text = String::new();
        key_reader.read_to_string(&mut key_text)?;

        let identity = parse_first_line(&key_text, &self.private_key_path, |line| {
            line.parse::<x25519::Identity>()
        })?;

        debug!("private key unlocked");
        Ok(Box::new(AgeDecryptionContext { identity }))
    }

    fn is_configured(&self) -> bool {
        self.public_key_path.exists() && self.private_key_path.exists()
    }
}

/// An unlocked age identity.
pub struct AgeDecryptionContext {
    identity: x25519::Identity,
}

impl DecryptionContext for AgeDecryptionContext {
    fn decrypt(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> CryptoResult<()> {
        let decryptor = age::Decryptor::new(reader)
            .map_err(|err| CryptoError::DecryptionFailed(err.to_string()))?;
        let mut stream = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|err| CryptoError::DecryptionFailed(err.to_string()))?;
        std::io::copy(&mut stream, writer)?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> CryptoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Parses the first non-blank, non-comment line of a key file.
fn parse_first_line<T, E: std::fmt::Display>(
    data: &str,
    path: &Path,
    parse: impl Fn(&str) -> Result<T, E>,
) -> CryptoResult<T> {
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        return parse(line).map_err(|err| CryptoError::MalformedKey {
            path: path.to_path_buf(),
            reason: err.to_string(),
        });
    }
    Err(CryptoError::MalformedKey {
        path: path.to_path_buf(),
        reason: "no key material found".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encryptor(dir: &Path) -> AgeEncryptor {
        AgeEncryptor::new(dir.join("bt.pub"), dir.join("bt.key"))
    }

    #[test]
    fn test_setup_writes_both_keys() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        assert!(!enc.is_configured());

        enc.setup("passphrase").unwrap();
        assert!(enc.is_configured());

        let public = std::fs::read_to_string(dir.path().join("bt.pub")).unwrap();
        assert!(public.starts_with("age1"));
        // The private key file must not contain the identity in plaintext.
        let private = std::fs::read(dir.path().join("bt.key")).unwrap();
        assert!(!String::from_utf8_lossy(&private).contains("AGE-SECRET-KEY-"));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        enc.setup("pw").unwrap();

        let plaintext = b"the quick brown fox";
        let mut ciphertext = Vec::new();
        enc.encrypt(&mut &plaintext[..], &mut ciphertext).unwrap();
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());
        assert!(ciphertext.len() > plaintext.len());

        let ctx = enc.unlock("pw").unwrap();
        let mut recovered = Vec::new();
        ctx.decrypt(&mut &ciphertext[..], &mut recovered).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_unlock_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        enc.setup("correct").unwrap();

        match enc.unlock("wrong") {
            Err(CryptoError::InvalidPassphrase) => {}
            other => panic!("expected InvalidPassphrase, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_encrypt_without_setup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        let mut out = Vec::new();
        match enc.encrypt(&mut &b"x"[..], &mut out) {
            Err(CryptoError::NotConfigured) => {}
            other => panic!("expected NotConfigured, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_encrypt_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        enc.setup("pw").unwrap();

        let mut ciphertext = Vec::new();
        enc.encrypt(&mut &b""[..], &mut ciphertext).unwrap();
        assert!(!ciphertext.is_empty());

        let ctx = enc.unlock("pw").unwrap();
        let mut recovered = Vec::new();
        ctx.decrypt(&mut &ciphertext[..], &mut recovered).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encryptor(dir.path());
        enc.setup("pw").unwrap();

        let ctx = enc.unlock("pw").unwrap();
        let mut out = Vec::new();
        assert!(ctx.decrypt(&mut &b"not an age stream"[..], &mut out).is_err());
    }
}
