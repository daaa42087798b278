use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_show_cores")]
    pub show_cores: bool,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    pub name: String,
    pub url: String,
}

/// Ticks between refreshes, per source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefreshConfig {
    #[serde(default)]
    pub sensors: u32,
    #[serde(default = "default_refresh_ticks")]
    pub hosts: u32,
    #[serde(default = "default_refresh_ticks")]
    pub disks: u32,
    #[serde(default = "default_refresh_ticks")]
    pub vms: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InventoryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_inventory_program")]
    pub program: String,
    #[serde(default = "default_inventory_args")]
    pub args: Vec<String>,
    #[serde(default = "default_inventory_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            show_cores: default_show_cores(),
            refresh: RefreshConfig::default(),
            inventory: InventoryConfig::default(),
            storage: StorageConfig::default(),
            hosts: Vec::new(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            sensors: 0,
            hosts: default_refresh_ticks(),
            disks: default_refresh_ticks(),
            vms: default_refresh_ticks(),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            program: default_inventory_program(),
            args: default_inventory_args(),
            timeout_ms: default_inventory_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON in {path}: {source}")]
    ParseJson {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    /// Loads YAML, or JSON when the file has a `.json` extension.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let is_json = path_ref
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let cfg: Config = if is_json {
            serde_json::from_str(&text).map_err(|source| ConfigError::ParseJson {
                path: path_display,
                source,
            })?
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_display,
                source,
            })?
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_secs < 1 {
            return Err(ConfigError::Validation(
                "tick_secs must be >= 1".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "probe_timeout_ms must be > 0".to_string(),
            ));
        }

        validate_hosts(&self.hosts)?;
        validate_inventory(&self.inventory)?;

        Ok(())
    }

    /// Turns off every slow source and the per-core breakdown.
    pub fn apply_simple_mode(&mut self) {
        self.hosts.clear();
        self.inventory.enabled = false;
        self.storage.enabled = false;
        self.show_cores = false;
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl InventoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn validate_hosts(hosts: &[HostConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for host in hosts {
        if host.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "hosts[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(host.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "host name '{}' must be unique",
                host.name
            )));
        }
        if host.url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "host '{}' url must not be empty",
                host.name
            )));
        }
    }
    Ok(())
}

fn validate_inventory(cfg: &InventoryConfig) -> Result<(), ConfigError> {
    if !cfg.enabled {
        return Ok(());
    }
    if cfg.program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "inventory.program must not be empty".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "inventory.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

const fn default_tick_secs() -> u64 {
    1
}

const fn default_probe_timeout_ms() -> u64 {
    3000
}

const fn default_show_cores() -> bool {
    true
}

const fn default_refresh_ticks() -> u32 {
    30
}

const fn default_enabled() -> bool {
    true
}

fn default_inventory_program() -> String {
    "powershell.exe".to_string()
}

fn default_inventory_args() -> Vec<String> {
    vec![
        "-NoProfile".to_string(),
        "-Command".to_string(),
        "Get-VM".to_string(),
    ]
}

const fn default_inventory_timeout_ms() -> u64 {
    15_000
}
