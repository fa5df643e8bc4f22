//! Named secret lookup.
//!
//! Stores receive a [`SecretProvider`] rather than reading the environment
//! themselves. The usual provider is a [`SecretChain`] of explicitly supplied
//! secrets followed by the process environment.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid secrets file: {0}")]
    Parse(#[from] serde_json::Error),
}

pub trait SecretProvider: Send + Sync {
    /// Look up a secret. Empty values count as missing.
    fn secret(&self, name: &str) -> Option<String>;
}

/// Secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Load a JSON object of `name -> value` pairs.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SecretsError> {
        let raw = std::fs::read_to_string(path)?;
        let values: HashMap<String, String> = serde_json::from_str(&raw)?;
        Ok(Self { values })
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl SecretProvider for StaticSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        self.values.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Secrets read from environment variables of the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Ordered providers; the first non-empty value wins.
#[derive(Default)]
pub struct SecretChain {
    providers: Vec<Box<dyn SecretProvider>>,
}

impl SecretChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl SecretProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// `secrets` first, then the process environment.
    pub fn with_env_fallback(secrets: StaticSecrets) -> Self {
        Self::new().with(secrets).with(EnvSecrets)
    }
}

impl SecretProvider for SecretChain {
    fn secret(&self, name: &str) -> Option<String> {
        self.providers.iter().find_map(|p| p.secret(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> StaticSecrets {
        StaticSecrets::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_chain_first_non_empty_wins() {
        let chain = SecretChain::new()
            .with(secrets(&[("TOKEN", "")]))
            .with(secrets(&[("TOKEN", "second"), ("OTHER", "x")]))
            .with(secrets(&[("TOKEN", "third")]));

        assert_eq!(chain.secret("TOKEN").as_deref(), Some("second"));
        assert_eq!(chain.secret("OTHER").as_deref(), Some("x"));
        assert_eq!(chain.secret("MISSING"), None);
    }

    #[test]
    fn test_env_fallback() {
        let name = "DATASTORE_TEST_SECRET_ENV_FALLBACK";
        std::env::set_var(name, "from-env");

        let chain = SecretChain::with_env_fallback(StaticSecrets::default());
        assert_eq!(chain.secret(name).as_deref(), Some("from-env"));

        let chain = SecretChain::with_env_fallback(secrets(&[(name, "explicit")]));
        assert_eq!(chain.secret(name).as_deref(), Some("explicit"));

        std::env::remove_var(name);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, r#"{"AZURE_STORAGE_CONNECTION_STRING": "UseDevelopmentStorage=true"}"#)
            .unwrap();

        let loaded = StaticSecrets::from_json_file(&path).unwrap();
        assert_eq!(
            loaded.secret("AZURE_STORAGE_CONNECTION_STRING").as_deref(),
            Some("UseDevelopmentStorage=true")
        );

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            StaticSecrets::from_json_file(&path),
            Err(SecretsError::Parse(_))
        ));
    }
}
