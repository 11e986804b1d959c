use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration from environment: {0}")]
    EnvError(#[from] envy::Error),

    #[error("Log configuration error: {0}")]
    ValidateError(String),

    #[error("Unknown chain '{0}'")]
    UnknownChain(String),
}
