//! Executor credential resolution
//!
//! The signing key is fetched from a secret source at the start of every
//! execution cycle and never logged.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::{SecretSource, SecretsConfig};

/// Secret resolution errors
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {0} is not set")]
    Missing(String),
    #[error("secret {0} is malformed: {1}")]
    Malformed(String, String),
    #[error("failed to read secret store: {0}")]
    Io(#[from] std::io::Error),
}

/// Hex-encoded secp256k1 private key of the executor
#[derive(Clone)]
pub struct ExecutorCredential {
    private_key: String,
}

impl ExecutorCredential {
    /// Validate and wrap a raw secret value. Accepts 32 bytes of hex with or
    /// without a `0x` prefix.
    pub fn from_secret(name: &str, raw: &str) -> Result<Self, SecretError> {
        let trimmed = raw.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);

        let bytes = hex::decode(hex_part)
            .map_err(|e| SecretError::Malformed(name.to_string(), e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SecretError::Malformed(
                name.to_string(),
                format!("expected 32 bytes, got {}", bytes.len()),
            ));
        }

        Ok(Self {
            private_key: format!("0x{}", hex_part.to_lowercase()),
        })
    }

    pub fn expose(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for ExecutorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutorCredential(<redacted>)")
    }
}

/// Source of the executor's signing credential
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn executor_credential(&self) -> Result<ExecutorCredential, SecretError>;
}

/// Reads the key from an environment variable
pub struct EnvSecretProvider {
    var: String,
}

impl EnvSecretProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn executor_credential(&self) -> Result<ExecutorCredential, SecretError> {
        let raw = std::env::var(&self.var).map_err(|_| SecretError::Missing(self.var.clone()))?;
        ExecutorCredential::from_secret(&self.var, &raw)
    }
}

/// Reads a JSON secret document (e.g. a mounted secrets-manager export) and
/// extracts one named key from it
pub struct FileSecretProvider {
    path: PathBuf,
    key: String,
}

impl FileSecretProvider {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn executor_credential(&self) -> Result<ExecutorCredential, SecretError> {
        debug!("Reading executor secret from {}", self.path.display());
        let content = tokio::fs::read_to_string(&self.path).await?;

        let document: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| SecretError::Malformed(self.path.display().to_string(), e.to_string()))?;

        let raw = document
            .get(&self.key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SecretError::Missing(self.key.clone()))?;

        ExecutorCredential::from_secret(&self.key, raw)
    }
}

/// Build the provider selected in configuration
pub fn provider_from_config(config: &SecretsConfig) -> Arc<dyn SecretProvider> {
    match (config.source, &config.file_path) {
        (SecretSource::File, Some(path)) => {
            Arc::new(FileSecretProvider::new(path, config.secret_key.clone()))
        }
        _ => Arc::new(EnvSecretProvider::new(config.env_var.clone())),
    }
}
