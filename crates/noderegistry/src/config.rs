use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3010;
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
const CANDIDATE_DIRS: [&str; 3] = ["custom_nodes", "nodes", ".nodes"];

/// Configuration of one managed node directory
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub nodes_dir: PathBuf,
    pub registry_file: String,
    pub source_extension: String,
    pub event_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            nodes_dir: PathBuf::from("custom_nodes"),
            registry_file: "registry.json".to_string(),
            source_extension: "py".to_string(),
            event_buffer_size: 256,
        }
    }
}

impl RegistryConfig {
    pub fn new(nodes_dir: impl Into<PathBuf>) -> Self {
        Self {
            nodes_dir: nodes_dir.into(),
            ..Self::default()
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.nodes_dir.join(&self.registry_file)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub work_dir: Option<PathBuf>,
    pub nodes_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Keys accepted in the TOML config file
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    custom_nodes_dir: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    registry_file: Option<String>,
    source_extension: Option<String>,
}

/// Resolved settings for the front ends
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub host: String,
    pub port: u16,
    /// Config file that was read, if any
    pub config_file: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve with the process environment
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve settings in order of precedence: command line, environment,
    /// config file, then auto-detection under the work directory.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let work_dir = match overrides.work_dir {
            Some(dir) => dir,
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let config_path = overrides
            .config_file
            .or_else(|| env("CONFIG_FILE").map(PathBuf::from))
            .unwrap_or_else(|| work_dir.join(DEFAULT_CONFIG_FILE));
        let file = load_file(&config_path)?;
        let config_file = file.as_ref().map(|_| config_path.clone());
        let file = file.unwrap_or_default();

        let nodes_dir = if let Some(dir) = overrides.nodes_dir {
            dir
        } else if let Some(dir) = env("CUSTOM_NODES_DIR") {
            PathBuf::from(dir)
        } else if let Some(dir) = file.custom_nodes_dir {
            if dir.is_absolute() {
                dir
            } else {
                config_dir(&config_path).join(dir)
            }
        } else {
            detect_nodes_dir(&work_dir)
        };

        let host = overrides
            .host
            .or_else(|| env("SERVER_HOST"))
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match overrides.port {
            Some(port) => port,
            None => match env("SERVER_PORT") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
                None => file.port.unwrap_or(DEFAULT_PORT),
            },
        };

        let defaults = RegistryConfig::default();
        let registry = RegistryConfig {
            nodes_dir,
            registry_file: file.registry_file.unwrap_or(defaults.registry_file),
            source_extension: file.source_extension.unwrap_or(defaults.source_extension),
            event_buffer_size: defaults.event_buffer_size,
        };

        Ok(Self {
            registry,
            host,
            port,
            config_file,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_file(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(parsed))
}

fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// First existing candidate directory, else `<work_dir>/custom_nodes`
fn detect_nodes_dir(work_dir: &Path) -> PathBuf {
    CANDIDATE_DIRS
        .iter()
        .map(|name| work_dir.join(name))
        .find(|dir| dir.is_dir())
        .unwrap_or_else(|| work_dir.join(CANDIDATE_DIRS[0]))
}
