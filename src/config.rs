//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/itemtree/itemtree.toml`
//! 3. Local config: a file passed by the host application
//! 4. Environment variables: `ITEMTREE__<SECTION>__<KEY>`

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;

/// How local changes are reconciled with the remote API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Reload the whole forest after every confirmed remote change
    pub refresh_after_commit: bool,
    /// Reload the whole forest when a local rollback cannot be applied
    pub refetch_on_rollback_failure: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_after_commit: false,
            refetch_on_rollback_failure: true,
        }
    }
}

/// Expand/collapse behavior of the flattened view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ViewConfig {
    /// Expand the parent so a newly inserted child is visible
    pub expand_parent_on_insert: bool,
    /// Expand every item after a load or refresh
    pub expand_all_on_load: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            expand_parent_on_insert: true,
            expand_all_on_load: false,
        }
    }
}

/// Raw settings for intermediate parsing (Option to detect "not specified").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub sync: RawSyncConfig,
    pub view: RawViewConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSyncConfig {
    pub refresh_after_commit: Option<bool>,
    pub refetch_on_rollback_failure: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawViewConfig {
    pub expand_parent_on_insert: Option<bool>,
    pub expand_all_on_load: Option<bool>,
}

/// Unified configuration for itemtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncConfig,
    pub view: ViewConfig,
}

/// Get the XDG config directory for itemtree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "itemtree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("itemtree.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Overlay wins for every value it specifies.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            sync: SyncConfig {
                refresh_after_commit: overlay
                    .sync
                    .refresh_after_commit
                    .unwrap_or(self.sync.refresh_after_commit),
                refetch_on_rollback_failure: overlay
                    .sync
                    .refetch_on_rollback_failure
                    .unwrap_or(self.sync.refetch_on_rollback_failure),
            },
            view: ViewConfig {
                expand_parent_on_insert: overlay
                    .view
                    .expand_parent_on_insert
                    .unwrap_or(self.view.expand_parent_on_insert),
                expand_all_on_load: overlay
                    .view
                    .expand_all_on_load
                    .unwrap_or(self.view.expand_all_on_load),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local_config` - Optional config file supplied by the host
    ///
    /// # Precedence (lowest to highest)
    /// 1. Compiled defaults
    /// 2. Global config: `$XDG_CONFIG_HOME/itemtree/itemtree.toml`
    /// 3. Local config file
    /// 4. Environment variables: `ITEMTREE__SYNC__REFRESH_AFTER_COMMIT=true` etc.
    pub fn load(local_config: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.merge_with(&raw);
            }
        }

        if let Some(local_path) = local_config {
            if !local_path.exists() {
                return Err(ApplicationError::Config {
                    message: format!("config file not found: {}", local_path.display()),
                });
            }
            let raw = load_raw_settings(local_path)?;
            current = current.merge_with(&raw);
        }

        Self::apply_env_overrides(current)
    }

    /// Load a single file on top of the compiled defaults, ignoring the
    /// global config and the environment.
    pub fn from_file(path: &Path) -> Result<Self, ApplicationError> {
        let raw = load_raw_settings(path)?;
        Ok(Self::default().merge_with(&raw))
    }

    /// Apply `ITEMTREE__<SECTION>__<KEY>` environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("ITEMTREE").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_bool("sync.refresh_after_commit") {
            settings.sync.refresh_after_commit = val;
        }
        if let Ok(val) = config.get_bool("sync.refetch_on_rollback_failure") {
            settings.sync.refetch_on_rollback_failure = val;
        }
        if let Ok(val) = config.get_bool("view.expand_parent_on_insert") {
            settings.view.expand_parent_on_insert = val;
        }
        if let Ok(val) = config.get_bool("view.expand_all_on_load") {
            settings.view.expand_all_on_load = val;
        }

        Ok(settings)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# itemtree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/itemtree/itemtree.toml
#   Local:  file passed by the host application
#   Env:    ITEMTREE__<SECTION>__<KEY> environment variables

[sync]
# Reload the whole tree after every confirmed remote change
# refresh_after_commit = false

# Reload the whole tree when a failed change cannot be undone locally
# refetch_on_rollback_failure = true

[view]
# Expand the parent so a newly inserted child is visible
# expand_parent_on_insert = true

# Expand every item after loading the tree
# expand_all_on_load = false
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
