//! Configuration for the bucket listener.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MINIO_ENDPOINT, MINIO_REGION, BUCKET_INVERT_STAGING_DIR)
//! 2. Config file (`--config`, or .bucket-invert/config.yaml)
//! 3. Defaults (localhost:9000, input-images → inverted-images)
//!
//! Credentials only ever come from the environment (MINIO_ACCESSKEY,
//! MINIO_SECRETKEY). Missing credentials are the one fatal configuration
//! error.
//!
//! Config file discovery:
//! - Searches current directory and parents for .bucket-invert/config.yaml
//! - Relative paths in the config file are relative to the file's directory

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::Credentials;
use crate::core::staging::DEFAULT_PREFIX;
use crate::core::{BucketPair, ReconnectPolicy, StagingArea, TransferLimits};

pub const ACCESS_KEY_VAR: &str = "MINIO_ACCESSKEY";
pub const SECRET_KEY_VAR: &str = "MINIO_SECRETKEY";
pub const ENDPOINT_VAR: &str = "MINIO_ENDPOINT";
pub const REGION_VAR: &str = "MINIO_REGION";
pub const STAGING_DIR_VAR: &str = "BUCKET_INVERT_STAGING_DIR";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:9000";
pub const DEFAULT_REGION: &str = "us-east-1";

const CONFIG_DIR: &str = ".bucket-invert";
const CONFIG_FILE: &str = "config.yaml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("please set MINIO_ACCESSKEY and MINIO_SECRETKEY")]
    MissingCredentials,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub buckets: BucketsConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub limits: TransferLimits,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BucketsConfig {
    pub source: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagingConfig {
    /// Directory for staged files (relative to the config file)
    pub dir: Option<String>,
    /// File name prefix for staged files
    pub prefix: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Object store endpoint URL
    pub endpoint: String,
    /// Signing region
    pub region: String,
    /// Where objects come from and go to
    pub buckets: BucketPair,
    /// Directory for staged files
    pub staging_dir: PathBuf,
    /// File name prefix for staged files
    pub staging_prefix: String,
    /// Transfer limits
    pub limits: TransferLimits,
    /// Subscription reconnect policy
    pub reconnect: ReconnectPolicy,
    /// Object store credentials
    pub credentials: Credentials,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Staging area described by this configuration
    pub fn staging_area(&self) -> StagingArea {
        StagingArea::new(&self.staging_dir, &self.staging_prefix)
    }
}

/// Find config file by searching current directory and parents
pub fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Merge a parsed config file (if any) with environment lookups and defaults
pub fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig, ConfigError> {
    // Empty variables count as unset
    let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let credentials = match (env(ACCESS_KEY_VAR), env(SECRET_KEY_VAR)) {
        (Some(access_key), Some(secret_key)) => Credentials {
            access_key,
            secret_key,
        },
        _ => return Err(ConfigError::MissingCredentials),
    };

    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };
    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let endpoint = env(ENDPOINT_VAR)
        .or(config.endpoint)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let region = env(REGION_VAR)
        .or(config.region)
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let defaults = BucketPair::default();
    let buckets = BucketPair {
        source: config.buckets.source.unwrap_or(defaults.source),
        destination: config.buckets.destination.unwrap_or(defaults.destination),
    };

    let staging_dir = if let Some(dir) = env(STAGING_DIR_VAR) {
        PathBuf::from(dir)
    } else if let Some(ref dir) = config.staging.dir {
        resolve_path(&base_dir, dir)
    } else {
        PathBuf::from(".")
    };

    Ok(ResolvedConfig {
        endpoint,
        region,
        buckets,
        staging_dir,
        staging_prefix: config
            .staging
            .prefix
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        limits: config.limits,
        reconnect: config.reconnect,
        credentials,
        config_file,
    })
}

/// Load configuration from all sources
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    let path = explicit.map(Path::to_path_buf).or_else(find_config_file);

    let file = match path {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(file, |name| std::env::var(name).ok())
}
