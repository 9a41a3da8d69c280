use core_model::SettingValue;
use rusqlite::{OptionalExtension, params};
use tracing::warn;

use crate::schema::SETTINGS_TABLE;
use crate::{Database, Result, StoreError};

/// Key/value settings. Each call is its own transaction.
///
/// When the database cannot be opened, reads come back empty and writes are
/// dropped after a warning; other failures are returned.
#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn set(&self, key: &str, value: &SettingValue) -> Result<()> {
        let encoded = serde_json::to_string(value).map_err(|e| StoreError::Codec {
            collection: SETTINGS_TABLE,
            message: e.to_string(),
        })?;
        let written = self.db.write(SETTINGS_TABLE, |conn| {
            conn.execute(
                r#"INSERT INTO settings (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value=excluded.value"#,
                params![key, encoded],
            )
        });
        settle("set", key, written.map(|_| ()))
    }

    /// `Ok(None)` for a key that was never set or has been removed.
    pub fn get(&self, key: &str) -> Result<Option<SettingValue>> {
        let raw = self.db.read(SETTINGS_TABLE, |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |r| r.get::<_, String>(0),
            )
            .optional()
        });
        settle("get", key, raw)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| StoreError::Codec {
                    collection: SETTINGS_TABLE,
                    message: format!("key {key}: {e}"),
                })
            })
            .transpose()
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let removed = self.db.write(SETTINGS_TABLE, |conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
        });
        settle("remove", key, removed.map(|_| ()))
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let keys = self.db.read(SETTINGS_TABLE, |conn| {
            let mut stmt = conn.prepare("SELECT key FROM settings ORDER BY key")?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        });
        settle("keys", "*", keys)
    }
}

fn settle<R: Default>(op: &'static str, key: &str, result: Result<R>) -> Result<R> {
    match result {
        Err(err) if err.is_unavailable() => {
            warn!(op, key, error = %err, "settings unavailable; nothing persisted");
            Ok(R::default())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::DbConfig;
    use core_model::setting_keys;

    #[test]
    fn missing_key_is_none() {
        let settings = SettingsStore::new(Database::in_memory());
        assert!(settings.get(setting_keys::THEME).unwrap().is_none());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let settings = SettingsStore::new(Database::in_memory());
        settings
            .set(setting_keys::THEME, &SettingValue::Text("light".to_string()))
            .unwrap();
        settings
            .set(setting_keys::THEME, &SettingValue::Text("dark".to_string()))
            .unwrap();
        let got = settings.get(setting_keys::THEME).unwrap().unwrap();
        assert_eq!(got.as_text(), Some("dark"));
        assert_eq!(settings.keys().unwrap(), vec![setting_keys::THEME.to_string()]);
    }

    #[test]
    fn every_value_shape_is_stored() {
        let settings = SettingsStore::new(Database::in_memory());
        let mut record = BTreeMap::new();
        record.insert("access".to_string(), "abc".to_string());
        record.insert("expires".to_string(), "1700000000".to_string());
        let flag_key = setting_keys::feature_flag("storyboards");
        settings.set(&flag_key, &SettingValue::Flag(true)).unwrap();
        settings.set("ui.columns", &SettingValue::Number(3)).unwrap();
        settings
            .set(setting_keys::AUTH_TOKEN, &SettingValue::Record(record.clone()))
            .unwrap();

        assert_eq!(settings.get(&flag_key).unwrap().unwrap().as_flag(), Some(true));
        assert_eq!(settings.get("ui.columns").unwrap().unwrap().as_number(), Some(3));
        assert_eq!(
            settings.get(setting_keys::AUTH_TOKEN).unwrap(),
            Some(SettingValue::Record(record))
        );
    }

    #[test]
    fn remove_is_a_no_op_for_missing_keys() {
        let settings = SettingsStore::new(Database::in_memory());
        settings.remove("never.set").unwrap();
        settings.set("a", &SettingValue::Flag(false)).unwrap();
        settings.remove("a").unwrap();
        settings.remove("a").unwrap();
        assert!(settings.get("a").unwrap().is_none());
    }

    #[test]
    fn values_survive_reopen() {
        let path = crate::tests::scratch_path("settings");
        {
            let settings = SettingsStore::new(Database::new(DbConfig::at(&path)));
            settings
                .set(setting_keys::SESSION, &SettingValue::Text("u1".to_string()))
                .unwrap();
        }
        let settings = SettingsStore::new(Database::new(DbConfig::at(&path)));
        let got = settings.get(setting_keys::SESSION).unwrap().unwrap();
        assert_eq!(got.as_text(), Some("u1"));
        drop(settings);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unavailable_storage_reads_empty_and_drops_writes() {
        let db = Database::new(DbConfig::at(
            std::env::temp_dir()
                .join("studio-missing-dir-for-tests")
                .join("settings.db"),
        ));
        let settings = SettingsStore::new(db.clone());
        assert!(settings.get("ui.theme").unwrap().is_none());
        settings
            .set("ui.theme", &SettingValue::Text("dark".to_string()))
            .unwrap();
        settings.remove("ui.theme").unwrap();
        assert!(settings.keys().unwrap().is_empty());
        assert!(db.ensure_open().unwrap_err().is_unavailable());
    }
}
