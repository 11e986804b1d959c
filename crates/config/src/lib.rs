mod chain;
mod error;
mod log;

pub use chain::{ChainEndpoint, chain_ids, get_chain};
pub use error::ConfigError;
pub use log::LogConfig;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub log: LogConfig,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = envy::prefixed("MW_").from_env::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }
}
