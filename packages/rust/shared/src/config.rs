//! Application configuration for DeliveryKit.
//!
//! User config lives at `~/.deliverykit/deliverykit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "deliverykit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".deliverykit";

// ---------------------------------------------------------------------------
// Config structs (matching deliverykit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Pipeline build settings.
    #[serde(default)]
    pub build: BuildSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Base profile used when none is given on the command line.
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Sub-profiles added to the base profile.
    #[serde(default)]
    pub sub_profiles: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            sub_profiles: Vec::new(),
        }
    }
}

fn default_profile() -> String {
    "default".into()
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Upper bound on descriptors yielded by self-expanding handlers in one build.
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Descriptor files loaded when no `--resources` flag is given.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            max_expansions: default_max_expansions(),
            resources: Vec::new(),
        }
    }
}

fn default_max_expansions() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Build config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime build configuration handed to the pipeline builder.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Upper bound on expansion descriptors processed per build.
    pub max_expansions: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_expansions: default_max_expansions(),
        }
    }
}

impl From<&AppConfig> for BuildConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_expansions: config.build.max_expansions,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.deliverykit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DeliveryError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.deliverykit/deliverykit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DeliveryError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DeliveryError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DeliveryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DeliveryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DeliveryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
