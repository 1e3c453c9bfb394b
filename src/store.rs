// 🗄️ Settings Store - SQLite persistence for plugin settings
// One row per setting (JSON-encoded value) plus an append-only change log

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Result as TrackingResult, TrackingError};
use crate::settings::{Settings, SettingsProvider};

const SETTING_KEYS: [&str; 4] = [
    "trackToDefaultInstance",
    "ownInstanceSiteId",
    "customInstanceUrl",
    "customInstanceSiteId",
];

/// Entry of the settings change log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsChange {
    pub change_id: String,
    pub changed_at: DateTime<Utc>,
    pub settings: Settings,
}

pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    /// Open (or create) the settings database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open settings database: {:?}", path.as_ref()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_settings_tables(&conn)?;
        Ok(SqliteSettingsStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("settings connection lock poisoned"))
    }

    /// Read the stored settings; keys never saved keep their defaults
    pub fn read(&self) -> Result<Settings> {
        let conn = self.lock()?;
        let mut object = serde_json::Map::new();

        for key in SETTING_KEYS {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM plugin_settings WHERE name = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(raw) = value {
                let parsed: serde_json::Value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value stored for setting {}", key))?;
                object.insert(key.to_string(), parsed);
            }
        }

        serde_json::from_value(serde_json::Value::Object(object))
            .context("Stored settings do not match the settings schema")
    }

    /// Persist all settings and append a change log entry
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let mut conn = self.lock()?;
        let encoded = serde_json::to_value(settings)?;
        let tx = conn.transaction()?;

        for key in SETTING_KEYS {
            let value = encoded.get(key).cloned().unwrap_or(serde_json::Value::Null);
            tx.execute(
                "INSERT INTO plugin_settings (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![key, serde_json::to_string(&value)?],
            )?;
        }

        tx.execute(
            "INSERT INTO settings_changes (change_id, changed_at, settings) VALUES (?1, ?2, ?3)",
            params![
                uuid::Uuid::new_v4().to_string(),
                Utc::now().to_rfc3339(),
                serde_json::to_string(settings)?,
            ],
        )?;

        tx.commit()?;
        tracing::debug!(?settings, "usage measurement settings saved");
        Ok(())
    }

    /// Change log, most recent first
    pub fn history(&self) -> Result<Vec<SettingsChange>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT change_id, changed_at, settings FROM settings_changes
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(change_id, changed_at, settings)| -> Result<SettingsChange> {
                Ok(SettingsChange {
                    change_id,
                    changed_at: DateTime::parse_from_rfc3339(&changed_at)?.with_timezone(&Utc),
                    settings: serde_json::from_str(&settings)?,
                })
            })
            .collect()
    }
}

impl SettingsProvider for SqliteSettingsStore {
    fn load(&self) -> TrackingResult<Settings> {
        self.read().map_err(|e| {
            tracing::warn!(error = %format!("{:#}", e), "could not read usage measurement settings");
            TrackingError::Settings {
                message: format!("{:#}", e),
            }
        })
    }
}

pub fn setup_settings_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS plugin_settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            change_id TEXT UNIQUE NOT NULL,
            changed_at TEXT NOT NULL,
            settings TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_returns_defaults() {
        let store = SqliteSettingsStore::open_in_memory().unwrap();
        assert_eq!(store.read().unwrap(), Settings::default());
    }

    #[test]
    fn test_save_then_read() {
        let store = SqliteSettingsStore::open_in_memory().unwrap();
        let settings = Settings {
            track_to_default_instance: false,
            own_instance_site_id: Some(1),
            custom_instance_url: Some("http://example.com/piwik".to_string()),
            custom_instance_site_id: Some(72),
        };

        store.save(&settings).unwrap();
        assert_eq!(store.read().unwrap(), settings);
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_clearing_a_value_persists_none() {
        let store = SqliteSettingsStore::open_in_memory().unwrap();
        let mut settings = Settings::default();
        settings.own_instance_site_id = Some(5);
        store.save(&settings).unwrap();

        settings.own_instance_site_id = None;
        store.save(&settings).unwrap();

        assert_eq!(store.read().unwrap().own_instance_site_id, None);
    }

    #[test]
    fn test_history_is_most_recent_first() {
        let store = SqliteSettingsStore::open_in_memory().unwrap();

        let mut settings = Settings::default();
        store.save(&settings).unwrap();
        settings.track_to_default_instance = false;
        store.save(&settings).unwrap();

        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].settings.track_to_default_instance);
        assert!(history[1].settings.track_to_default_instance);
        assert_ne!(history[0].change_id, history[1].change_id);
    }
}
