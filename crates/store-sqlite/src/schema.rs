//! Versioned schema for the studio database.
//!
//! Version history:
//! - 1: single-user `generations` and `ai_logs` tables
//! - 2: tenant-scoped `history` and `logs`, `settings` unchanged

use rusqlite::Connection;

pub const DATABASE_NAME: &str = "studio";
pub const SCHEMA_VERSION: i64 = 2;
pub const SETTINGS_TABLE: &str = "settings";

/// Tables from earlier layouts that the upgrade removes.
pub const LEGACY_TABLES: &[&str] = &["generations", "ai_logs"];

/// A tenant-scoped, capacity-bounded collection. Both share one table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    History,
    Logs,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::History, Collection::Logs];

    pub fn table(&self) -> &'static str {
        match self {
            Collection::History => "history",
            Collection::Logs => "logs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    UpToDate,
    Upgraded { from: i64, to: i64 },
}

pub fn stored_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |r| r.get(0))
}

/// Brings the schema to [`SCHEMA_VERSION`] in a single transaction.
///
/// Every statement is `IF [NOT] EXISTS`, so applying the upgrade to a
/// database that already has some or all of it is harmless.
pub fn migrate(conn: &mut Connection) -> anyhow::Result<Migration> {
    let from = stored_version(conn)?;
    if from > SCHEMA_VERSION {
        anyhow::bail!(
            "stored schema version {from} is newer than supported version {SCHEMA_VERSION}"
        );
    }
    if from == SCHEMA_VERSION {
        return Ok(Migration::UpToDate);
    }
    let tx = conn.transaction()?;
    apply_current(&tx)?;
    for legacy in LEGACY_TABLES {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {legacy};"))?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(Migration::Upgraded {
        from,
        to: SCHEMA_VERSION,
    })
}

fn apply_current(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;
    for collection in Collection::ALL {
        conn.execute_batch(&collection_ddl(collection.table()))?;
    }
    Ok(())
}

// `seq` aliases the rowid, so it keeps insertion order even across VACUUM.
fn collection_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
          seq INTEGER PRIMARY KEY,
          id TEXT NOT NULL UNIQUE,
          tenant_id TEXT NOT NULL,
          created_at INTEGER NOT NULL,
          body TEXT NOT NULL,
          attachment BLOB
        );
        CREATE INDEX IF NOT EXISTS {table}_by_tenant ON {table} (tenant_id, created_at, seq);
        CREATE INDEX IF NOT EXISTS {table}_by_created ON {table} (created_at);
        "#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_gets_current_layout() {
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = migrate(&mut conn).unwrap();
        assert_eq!(
            outcome,
            Migration::Upgraded {
                from: 0,
                to: SCHEMA_VERSION
            }
        );
        assert_eq!(table_names(&conn), vec!["history", "logs", "settings"]);
        assert_eq!(
            index_names(&conn),
            vec![
                "history_by_created",
                "history_by_tenant",
                "logs_by_created",
                "logs_by_tenant"
            ]
        );
        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), Migration::UpToDate);
        assert_eq!(table_names(&conn).len(), 3);
    }

    #[test]
    fn reapplying_upgrade_over_existing_tables_does_not_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        let outcome = migrate(&mut conn).unwrap();
        assert_eq!(outcome, Migration::Upgraded { from: 1, to: 2 });
    }

    #[test]
    fn legacy_tables_are_dropped_and_settings_survive() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO settings (key, value) VALUES ('ui.theme', '{"type":"text","value":"dark"}');
            CREATE TABLE generations (id TEXT PRIMARY KEY, prompt TEXT);
            CREATE TABLE ai_logs (id TEXT PRIMARY KEY, model TEXT);
            PRAGMA user_version = 1;
            "#,
        )
        .unwrap();
        migrate(&mut conn).unwrap();
        let names = table_names(&conn);
        assert!(!names.contains(&"generations".to_string()));
        assert!(!names.contains(&"ai_logs".to_string()));
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM settings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn newer_version_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        let err = migrate(&mut conn).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }
}
