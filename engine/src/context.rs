//! Encryption context: the pluggable strategy that supplies key material,
//! the format magic, and the cipher transform for a run.
//!
//! A context is handed to the encryption engine when it is constructed; there
//! is no process-wide "current" context.

use std::fmt;

use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{EngineError, EngineResult};

/// Magic written at the start of every encrypted file unless overridden.
pub const DEFAULT_MAGIC: &str = "ICEENC";

/// Cipher transform used unless overridden.
pub const DEFAULT_CIPHER: &str = "AES/CBC/PKCS5Padding";

/// PBKDF2 iteration count for password-derived keys.
pub const KDF_ITERATIONS: u32 = 65_536;

/// Length of password-derived keys (AES-128).
pub const DERIVED_KEY_LEN: usize = 16;

/// Raw symmetric key material, wiped from memory on drop.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        SecretKey(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a key from a password and salt with PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &str) -> SecretKey {
    let mut key = vec![0u8; DERIVED_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), KDF_ITERATIONS, &mut key);
    SecretKey::from_bytes(key)
}

/// Strategy supplying everything the encryption engine needs to know.
///
/// Implement this to plug in custom key derivation; `magic` and `cipher`
/// default to the stock format.
pub trait EncryptionContext: Send + Sync {
    /// Produce the key for this run. Called once per engine.
    fn create_key(&self) -> EngineResult<SecretKey>;

    /// Bytes identifying the format variant at the start of each file.
    fn magic(&self) -> &[u8] {
        DEFAULT_MAGIC.as_bytes()
    }

    /// Cipher transform name, e.g. `AES/CBC/PKCS5Padding`.
    fn cipher(&self) -> &str {
        DEFAULT_CIPHER
    }
}

/// Context built from a plain password and salt.
pub struct SimpleContext {
    password: Zeroizing<String>,
    salt: Zeroizing<String>,
    magic: Vec<u8>,
    cipher: String,
}

impl SimpleContext {
    pub fn new(password: impl Into<String>, salt: impl Into<String>) -> Self {
        SimpleContext {
            password: Zeroizing::new(password.into()),
            salt: Zeroizing::new(salt.into()),
            magic: DEFAULT_MAGIC.as_bytes().to_vec(),
            cipher: DEFAULT_CIPHER.to_string(),
        }
    }

    pub fn with_magic(mut self, magic: impl Into<Vec<u8>>) -> Self {
        self.magic = magic.into();
        self
    }

    pub fn with_cipher(mut self, cipher: impl Into<String>) -> Self {
        self.cipher = cipher.into();
        self
    }
}

impl fmt::Debug for SimpleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleContext")
            .field("magic", &String::from_utf8_lossy(&self.magic))
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl EncryptionContext for SimpleContext {
    fn create_key(&self) -> EngineResult<SecretKey> {
        if self.password.is_empty() {
            return Err(EngineError::Cipher("password must not be empty".to_string()));
        }
        Ok(derive_key(&self.password, &self.salt))
    }

    fn magic(&self) -> &[u8] {
        &self.magic
    }

    fn cipher(&self) -> &str {
        &self.cipher
    }
}

/// Where the context for a run comes from.
///
/// Exactly one source may be configured; `resolve` rejects contradictory
/// combinations before any file is touched.
#[derive(Default)]
pub struct ContextSource {
    pub simple_password: Option<String>,
    pub simple_salt: Option<String>,
    pub magic: Option<String>,
    pub cipher: Option<String>,
    pub custom: Option<Box<dyn EncryptionContext>>,
}

impl ContextSource {
    /// Turn the configured pieces into the single active context.
    pub fn resolve(self) -> EngineResult<Box<dyn EncryptionContext>> {
        match (self.simple_password, self.simple_salt, self.custom) {
            (Some(_), Some(_), Some(_)) | (Some(_), None, Some(_)) | (None, Some(_), Some(_)) => {
                Err(EngineError::config(
                    "cannot use a custom encryption context together with a simple password or salt",
                ))
            }
            (None, Some(_), None) => Err(EngineError::config(
                "a simple salt was provided without a simple password",
            )),
            (Some(_), None, None) => Err(EngineError::config(
                "a simple password was provided without a simple salt",
            )),
            (Some(password), Some(salt), None) => {
                let mut context = SimpleContext::new(password, salt);
                if let Some(magic) = self.magic {
                    context = context.with_magic(magic.into_bytes());
                }
                if let Some(cipher) = self.cipher {
                    context = context.with_cipher(cipher);
                }
                Ok(Box::new(context))
            }
            (None, None, Some(custom)) => {
                if self.magic.is_some() || self.cipher.is_some() {
                    tracing::warn!("magic/cipher overrides are ignored for a custom encryption context");
                }
                Ok(custom)
            }
            (None, None, None) => Err(EngineError::config(
                "encryption requires either a simple password and salt or a custom context",
            )),
        }
    }
}
