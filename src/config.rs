use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::CommitIdentity;
use crate::error::CloneError;
use crate::model::ReleaseDate;

pub const DEFAULT_CONFIG_FILE: &str = "ebrains-clone.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kg_base_url: Option<String>,
    #[serde(default)]
    pub kg_stage: Option<String>,
    #[serde(default)]
    pub data_proxy_host: Option<String>,
    #[serde(default)]
    pub object_store_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub bucket_limit: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub kg_base_url: String,
    pub kg_stage: String,
    pub data_proxy_host: String,
    pub object_store_hosts: Vec<String>,
    /// Records per KG file query. Large, because per-request latency dominates.
    pub page_size: usize,
    pub bucket_limit: usize,
    pub timeout_secs: u64,
    pub token_env: String,
    pub author_name: String,
    pub author_email: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // production server; the pre-production one sees unannounced downtime
            kg_base_url: "https://core.kg.ebrains.eu/v3".to_string(),
            kg_stage: "RELEASED".to_string(),
            data_proxy_host: "data-proxy.ebrains.eu".to_string(),
            object_store_hosts: vec!["object.cscs.ch".to_string()],
            page_size: 10_000,
            bucket_limit: 10_000,
            timeout_secs: 120,
            token_env: "KG_AUTH_TOKEN".to_string(),
            author_name: "DataLad-EBRAINS exporter".to_string(),
            author_email: "ebrains@datalad.org".to_string(),
        }
    }
}

impl Settings {
    /// Bearer token from the configured environment variable.
    pub fn token(&self) -> Result<String, CloneError> {
        std::env::var(&self.token_env)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CloneError::MissingToken(self.token_env.clone()))
    }

    /// Author and committer for a commit dated at `date`.
    pub fn identity(&self, date: Option<&ReleaseDate>) -> CommitIdentity {
        CommitIdentity {
            name: self.author_name.clone(),
            email: self.author_email.clone(),
            date: date.map(ReleaseDate::to_git_date),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or the default config file when present, or defaults.
    pub fn resolve(path: Option<&str>) -> Result<Settings, CloneError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CloneError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CloneError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<Settings, CloneError> {
        let defaults = Settings::default();

        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(CloneError::ConfigParse("page_size must be positive".to_string()));
        }
        let bucket_limit = config.bucket_limit.unwrap_or(defaults.bucket_limit);
        if bucket_limit == 0 {
            return Err(CloneError::ConfigParse(
                "bucket_limit must be positive".to_string(),
            ));
        }

        Ok(Settings {
            kg_base_url: config.kg_base_url.unwrap_or(defaults.kg_base_url),
            kg_stage: config.kg_stage.unwrap_or(defaults.kg_stage),
            data_proxy_host: config.data_proxy_host.unwrap_or(defaults.data_proxy_host),
            object_store_hosts: config
                .object_store_hosts
                .unwrap_or(defaults.object_store_hosts),
            page_size,
            bucket_limit,
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            token_env: config.token_env.unwrap_or(defaults.token_env),
            author_name: config.author_name.unwrap_or(defaults.author_name),
            author_email: config.author_email.unwrap_or(defaults.author_email),
        })
    }
}
