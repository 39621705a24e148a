use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ScrnaError;

pub const DEFAULT_PROJECT: &str = "scRNAseq";
pub const DEFAULT_REST_URL: &str = "https://gypsum.artifactdb.com";
pub const DEFAULT_DATABASE_URL: &str =
    "https://github.com/ArtifactDB/bioconductor-metadata-index/releases/download/latest";
pub const DEFAULT_DATABASE_NAME: &str = "bioconductor.sqlite3";

/// On-disk shape of `scrnaseq.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub database_check_interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub project: String,
    pub rest_url: String,
    pub database_url: String,
    pub database_name: String,
    pub cache_dir: Utf8PathBuf,
    pub database_check_interval: Duration,
    /// Longest wait for response headers or for any single read of a body.
    /// Downloads that keep making progress are not cut off by it.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Defaults rooted at an explicit cache directory.
    pub fn with_cache_dir(cache_dir: Utf8PathBuf) -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            cache_dir,
            database_check_interval: Duration::from_secs(300),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an explicitly named config file, or `scrnaseq.json` from the
    /// working directory when it exists, falling back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, ScrnaError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("scrnaseq.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ScrnaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ScrnaError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ClientConfig, ScrnaError> {
        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_dir()?,
        };

        let mut resolved = ClientConfig::with_cache_dir(cache_dir);
        if let Some(project) = config.project {
            if project.trim().is_empty() {
                return Err(ScrnaError::ConfigParse("project must not be empty".to_string()));
            }
            resolved.project = project;
        }
        if let Some(url) = config.rest_url {
            resolved.rest_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = config.database_url {
            resolved.database_url = url.trim_end_matches('/').to_string();
        }
        if let Some(name) = config.database_name {
            resolved.database_name = name;
        }
        if let Some(secs) = config.database_check_interval_secs {
            resolved.database_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = config.timeout_secs {
            resolved.timeout = Duration::from_secs(secs);
        }
        Ok(resolved)
    }
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, ScrnaError> {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.cache_dir().join("scrnaseq")).ok())
        .ok_or_else(|| ScrnaError::Filesystem("unable to resolve cache directory".to_string()))
}
