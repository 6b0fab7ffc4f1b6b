//! Credential cipher
//!
//! Tokens and passwords are stored at rest as base64-encoded age messages
//! addressed to a single X25519 identity. Every encryption draws a fresh
//! file key, so equal plaintexts never produce equal ciphertexts.

use std::io::{Read, Write};

use age::secrecy::ExposeSecret as _;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::SecretString;
use tracing::info;

use crate::errors::BackendError;
use crate::filesys::file::File;

/// Symmetric-at-rest encryption of credentials under one injected identity
#[derive(Clone)]
pub struct CredentialCipher {
    identity: age::x25519::Identity,
    recipient: age::x25519::Recipient,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("recipient", &self.recipient.to_string())
            .finish()
    }
}

impl CredentialCipher {
    /// Build a cipher from an `AGE-SECRET-KEY-1...` identity string
    pub fn from_identity(identity: &str) -> Result<Self, BackendError> {
        let identity = identity
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| BackendError::ConfigError(format!("invalid identity: {}", e)))?;
        let recipient = identity.to_public();
        Ok(Self {
            identity,
            recipient,
        })
    }

    /// Build a cipher with a freshly generated identity
    pub fn generate() -> Self {
        let identity = age::x25519::Identity::generate();
        let recipient = identity.to_public();
        Self {
            identity,
            recipient,
        }
    }

    /// Load the identity from `file`, creating it with owner-only permissions if absent
    pub async fn load_or_create(file: &File) -> Result<Self, BackendError> {
        if file.exists().await {
            let contents = file.read_string().await?;
            let line = contents
                .lines()
                .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
                .ok_or_else(|| BackendError::ConfigError("identity file is empty".to_string()))?;
            return Self::from_identity(line);
        }

        let cipher = Self::generate();
        let contents = format!(
            "# public key: {}\n{}\n",
            cipher.recipient,
            cipher.identity_string().expose_secret()
        );
        file.write_string(&contents).await?;
        file.set_permissions_600().await?;
        info!("Generated new credential identity at {}", file.path().display());
        Ok(cipher)
    }

    /// The secret identity string
    pub fn identity_string(&self) -> age::secrecy::SecretString {
        self.identity.to_string()
    }

    /// Encrypt a credential to base64 text
    pub fn encrypt(&self, plaintext: &str) -> Result<String, BackendError> {
        let encryptor =
            age::Encryptor::with_recipients(vec![Box::new(self.recipient.clone())])
                .ok_or_else(|| BackendError::CryptoError("no encryption recipient".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| BackendError::CryptoError(e.to_string()))?;
        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| BackendError::CryptoError(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| BackendError::CryptoError(e.to_string()))?;

        Ok(STANDARD.encode(encrypted))
    }

    /// Decrypt base64 text produced by [`CredentialCipher::encrypt`]
    ///
    /// An empty ciphertext stands for "no credential" and yields an empty secret.
    pub fn decrypt(&self, ciphertext: &str) -> Result<SecretString, BackendError> {
        let ciphertext = ciphertext.trim();
        if ciphertext.is_empty() {
            return Ok(SecretString::from(String::new()));
        }

        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| BackendError::CryptoError(format!("invalid ciphertext encoding: {}", e)))?;

        let age::Decryptor::Recipients(decryptor) =
            age::Decryptor::new(&raw[..]).map_err(|e| BackendError::CryptoError(e.to_string()))?
        else {
            return Err(BackendError::CryptoError(
                "unexpected passphrase-encrypted credential".to_string(),
            ));
        };

        let identity: &dyn age::Identity = &self.identity;
        let mut reader = decryptor
            .decrypt(std::iter::once(identity))
            .map_err(|e| BackendError::CryptoError(e.to_string()))?;

        let mut decrypted = vec![];
        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| BackendError::CryptoError(e.to_string()))?;

        String::from_utf8(decrypted)
            .map(SecretString::from)
            .map_err(|_| BackendError::CryptoError("credential is not valid UTF-8".to_string()))
    }
}
