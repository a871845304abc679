use std::{env, net::SocketAddr};

use anyhow::Result;
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub state_store_path: String,
    pub listen_addr: String,
    pub blob_storage: BlobStorageConfig,
    /// Bearer tokens accepted on management endpoints. When unset,
    /// request authentication is disabled entirely.
    pub api_tokens: Option<Vec<String>>,
    /// Base secret for deriving per-object content encryption keys.
    pub encryption_secret: String,
    pub structured_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let state_store_path = env::current_dir()
            .unwrap_or_default()
            .join("asset_storage/state");
        ServerConfig {
            state_store_path: state_store_path.to_str().unwrap_or_default().to_string(),
            listen_addr: "0.0.0.0:8900".to_string(),
            blob_storage: Default::default(),
            api_tokens: None,
            encryption_secret: "SECRET".to_string(),
            structured_logging: false,
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ServerConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.encryption_secret.is_empty() {
            return Err(anyhow::anyhow!("encryption_secret must not be empty"));
        }
        if let Some(tokens) = &self.api_tokens {
            if tokens.iter().any(|t| t.is_empty()) {
                return Err(anyhow::anyhow!("api_tokens must not contain empty tokens"));
            }
        }
        Ok(())
    }
}
