use thiserror::Error;

use crate::secrets::{SecretChain, SecretsError, StaticSecrets};
use crate::store::CONNECTION_STRING_SECRET;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
    #[error("Failed to load secrets: {0}")]
    Secrets(#[from] SecretsError),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Logical name given to stores opened by this process
    pub store_name: String,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone)]
pub struct SecretsConfig {
    /// JSON file of named secrets, consulted before the environment
    pub secrets_file: Option<String>,
    /// Secret holding the object store connection string
    pub connection_secret: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            secrets_file: None,
            connection_secret: CONNECTION_STRING_SECRET.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_name: "default".to_string(),
            secrets: SecretsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let store_name =
            std::env::var("DATASTORE_STORE_NAME").unwrap_or_else(|_| "default".to_string());

        let secrets_file = std::env::var("DATASTORE_SECRETS_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let connection_secret = std::env::var("DATASTORE_CONNECTION_SECRET")
            .unwrap_or_else(|_| CONNECTION_STRING_SECRET.to_string());

        let config = Config {
            store_name,
            secrets: SecretsConfig {
                secrets_file,
                connection_secret,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATASTORE_STORE_NAME cannot be empty".to_string(),
            ));
        }

        if self.secrets.connection_secret.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATASTORE_CONNECTION_SECRET cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the secret chain: the secrets file (if any), then the environment.
    pub fn secret_chain(&self) -> Result<SecretChain, ConfigError> {
        let secrets = match &self.secrets.secrets_file {
            Some(path) => StaticSecrets::from_json_file(path)?,
            None => StaticSecrets::default(),
        };
        Ok(SecretChain::with_env_fallback(secrets))
    }
}
