// ⚙️ Settings - which instances receive usage data
// Read-only from the core's point of view; observed when trackers get created

use anyhow::{Context as AnyhowContext, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{Result, TrackingError};

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Send anonymized usage data to the public demo instance
    #[serde(default = "default_track_to_default_instance")]
    pub track_to_default_instance: bool,

    /// Site id on this installation that should receive its own usage data
    #[serde(default)]
    pub own_instance_site_id: Option<u32>,

    /// Base url of an additional instance (e.g. "http://example.com/piwik")
    #[serde(default)]
    pub custom_instance_url: Option<String>,

    /// Site id on the additional instance
    #[serde(default)]
    pub custom_instance_site_id: Option<u32>,
}

fn default_track_to_default_instance() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            track_to_default_instance: true,
            own_instance_site_id: None,
            custom_instance_url: None,
            custom_instance_site_id: None,
        }
    }
}

impl Settings {
    /// Settings with every instance switched off
    pub fn disabled() -> Self {
        Settings {
            track_to_default_instance: false,
            ..Settings::default()
        }
    }

    /// Load settings from a JSON file; missing keys take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse settings JSON")
    }

    /// Own-instance site id, if it counts as configured
    pub fn own_site_id(&self) -> Option<u32> {
        self.own_instance_site_id.filter(|id| *id > 0)
    }

    /// Custom-instance (url, site id), only when both halves are configured
    pub fn custom_instance(&self) -> Option<(&str, u32)> {
        let url = self
            .custom_instance_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())?;
        let site_id = self.custom_instance_site_id.filter(|id| *id > 0)?;
        Some((url, site_id))
    }

    /// Apply a single `key=value` edit using the serialized key names
    pub fn set_value(&mut self, key: &str, value: &str) -> AnyResult<()> {
        let value = value.trim();
        let clear = value.is_empty() || value == "null";

        match key {
            "trackToDefaultInstance" => {
                self.track_to_default_instance = value
                    .parse()
                    .with_context(|| format!("Expected true/false for {}", key))?;
            }
            "ownInstanceSiteId" => {
                self.own_instance_site_id = if clear {
                    None
                } else {
                    Some(value.parse().with_context(|| format!("Expected a site id for {}", key))?)
                };
            }
            "customInstanceUrl" => {
                self.custom_instance_url = if clear { None } else { Some(value.to_string()) };
            }
            "customInstanceSiteId" => {
                self.custom_instance_site_id = if clear {
                    None
                } else {
                    Some(value.parse().with_context(|| format!("Expected a site id for {}", key))?)
                };
            }
            other => anyhow::bail!("Unknown setting: {}", other),
        }

        Ok(())
    }
}

// ============================================================================
// SETTINGS PROVIDER
// ============================================================================

/// Live view of the settings; consulted each time trackers are (re)created
pub trait SettingsProvider: Send + Sync {
    fn load(&self) -> Result<Settings>;
}

impl SettingsProvider for Settings {
    fn load(&self) -> Result<Settings> {
        Ok(self.clone())
    }
}

impl<T: SettingsProvider + ?Sized> SettingsProvider for Arc<T> {
    fn load(&self) -> Result<Settings> {
        (**self).load()
    }
}

/// Settings that can be toggled at runtime and shared with the registry
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        SharedSettings {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn update<F>(&self, update_fn: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.inner.write().map_err(|_| TrackingError::Settings {
            message: "settings lock poisoned".to_string(),
        })?;
        update_fn(&mut settings);
        Ok(())
    }
}

impl SettingsProvider for SharedSettings {
    fn load(&self) -> Result<Settings> {
        self.inner
            .read()
            .map(|s| s.clone())
            .map_err(|_| TrackingError::Settings {
                message: "settings lock poisoned".to_string(),
            })
    }
}

// ============================================================================
// APP CONFIG (binaries)
// ============================================================================

/// Environment of the hosting installation, read by the binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Base url of this installation, used for the own-instance target
    pub local_base_url: String,

    /// SQLite file holding the persisted settings
    pub settings_db: String,

    /// Address the REST server binds to
    pub listen_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            local_base_url: "http://localhost/".to_string(),
            settings_db: "usage_settings.db".to_string(),
            listen_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by USAGE_LOCAL_URL, USAGE_SETTINGS_DB, USAGE_LISTEN
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        AppConfig {
            local_base_url: lookup("USAGE_LOCAL_URL").unwrap_or(defaults.local_base_url),
            settings_db: lookup("USAGE_SETTINGS_DB").unwrap_or(defaults.settings_db),
            listen_addr: lookup("USAGE_LISTEN").unwrap_or(defaults.listen_addr),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
