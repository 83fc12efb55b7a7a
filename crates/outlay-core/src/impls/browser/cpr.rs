//! Decryption of the personal identifier carried in `cpr_encrypted`.

use crate::domain::{ConfigError, SubmitError};

pub struct CprCipher {
    fernet: fernet::Fernet,
}

impl CprCipher {
    /// `key` is a url-safe base64 Fernet key.
    pub fn new(key: &str) -> Result<Self, ConfigError> {
        fernet::Fernet::new(key.trim())
            .map(|fernet| Self { fernet })
            .ok_or_else(|| ConfigError::Invalid("encryption key is not a valid Fernet key".into()))
    }

    pub fn decrypt(&self, token: &str) -> Result<String, SubmitError> {
        let bytes = self
            .fernet
            .decrypt(token.trim())
            .map_err(|_| SubmitError::Decrypt("token rejected".into()))?;
        String::from_utf8(bytes).map_err(|e| SubmitError::Decrypt(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn encrypt(&self, plain: &str) -> String {
        self.fernet.encrypt(plain.as_bytes())
    }
}
