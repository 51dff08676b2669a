//! Tenant credential encryption.
//!
//! Tenant database passwords come in two formats, both keyed with the same
//! 32-byte key:
//!
//! - `iv:tag:ciphertext` hex envelopes sealed with AES-256-GCM (written by
//!   [`CredentialCipher::encrypt`])
//! - bare hex AES-256-CBC ciphertext under a deployment-wide IV, as written
//!   by the management app
//!
//! They are opened only right before a connection to the tenant database is
//! made.

use aes::Aes256;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-CBC IV length in bytes.
const LEGACY_IV_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
const IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Errors that can occur while sealing or opening credentials.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key is not 64 hex characters.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// The IV for CBC credentials is not 32 hex characters.
    #[error("invalid encryption IV: {0}")]
    InvalidIv(String),

    /// A CBC credential was found but no IV is configured.
    #[error("CBC credential requires ENCRYPTION_IV")]
    MissingIv,

    /// The credential is not valid hex or not a valid envelope.
    #[error("malformed credential envelope: {0}")]
    Malformed(String),

    /// Authentication failed: wrong key or tampered envelope.
    #[error("credential decryption failed")]
    Decrypt,

    /// Encryption failed.
    #[error("credential encryption failed")]
    Encrypt,
}

/// Seals and opens credentials with a fixed key.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
    key: [u8; 32],
    legacy_iv: Option<[u8; LEGACY_IV_LEN]>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Create a cipher from a raw 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
            key: *key,
            legacy_iv: None,
        }
    }

    /// Accept bare hex AES-256-CBC credentials encrypted under `iv`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidIv` if the IV is not 16 hex-encoded bytes.
    pub fn with_legacy_iv_hex(mut self, iv: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(iv.trim()).map_err(|e| CryptoError::InvalidIv(e.to_string()))?;
        let iv: [u8; LEGACY_IV_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidIv(format!("expected {LEGACY_IV_LEN} bytes, got {}", bytes.len()))
        })?;
        self.legacy_iv = Some(iv);
        Ok(self)
    }

    /// Create a cipher from a 64-character hex key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` if the key is not 32 hex-encoded bytes.
    pub fn from_hex(key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::new(&key))
    }

    /// Seal a plaintext into an `iv:tag:ciphertext` envelope.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encrypt` if the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        // The tag is appended to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Open a credential in either format.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Malformed` if the credential cannot be parsed.
    /// - `CryptoError::MissingIv` for a CBC credential without a configured IV.
    /// - `CryptoError::Decrypt` if authentication or unpadding fails.
    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        if envelope.contains(':') {
            self.decrypt_sealed(envelope)
        } else {
            self.decrypt_legacy(envelope)
        }
    }

    fn decrypt_legacy(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let iv = self.legacy_iv.ok_or(CryptoError::MissingIv)?;
        let ciphertext = decode_part("ciphertext", ciphertext.trim())?;
        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    fn decrypt_sealed(&self, envelope: &str) -> Result<String, CryptoError> {
        let mut parts = envelope.splitn(3, ':');
        let (Some(iv), Some(tag), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Malformed(
                "expected iv:tag:ciphertext".to_string(),
            ));
        };

        let iv = decode_part("iv", iv)?;
        let tag = decode_part("tag", tag)?;
        let mut sealed = decode_part("ciphertext", ciphertext)?;

        if iv.len() != IV_LEN {
            return Err(CryptoError::Malformed(format!(
                "expected {IV_LEN}-byte iv, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed(format!(
                "expected {TAG_LEN}-byte tag, got {}",
                tag.len()
            )));
        }

        sealed.extend_from_slice(&tag);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

fn decode_part(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::Malformed(format!("{name}: {e}")))
}
