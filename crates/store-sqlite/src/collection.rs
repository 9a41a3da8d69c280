use std::marker::PhantomData;

use core_model::{TenantId, TenantRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tracing::debug;

use crate::schema::Collection;
use crate::{Database, Result, StoreError};

/// Tenant-scoped collection that never holds more than `cap` rows per tenant.
///
/// Rows are ordered newest first by `created_at`; rows sharing a timestamp
/// are ordered by insertion, so the earliest inserted of them is evicted first.
pub struct CollectionStore<T> {
    db: Database,
    collection: Collection,
    cap: usize,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for CollectionStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            collection: self.collection,
            cap: self.cap,
            _record: PhantomData,
        }
    }
}

impl<T: TenantRecord> CollectionStore<T> {
    pub fn new(db: Database, collection: Collection, cap: usize) -> Self {
        Self {
            db,
            collection,
            cap,
            _record: PhantomData,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Inserts under this store's own cap.
    pub fn insert(&self, item: &T) -> Result<Vec<String>> {
        self.insert_and_evict(item, self.cap)
    }

    /// Inserts `item` and trims its tenant back to `cap` rows in the same
    /// transaction. Returns the ids of the evicted rows, which may include
    /// `item` itself when it is older than every row kept.
    pub fn insert_and_evict(&self, item: &T, cap: usize) -> Result<Vec<String>> {
        item.validate().map_err(StoreError::InvalidRecord)?;
        let table = self.collection.table();
        let body = serde_json::to_string(item).map_err(|e| StoreError::Codec {
            collection: table,
            message: e.to_string(),
        })?;
        let tenant = item.tenant_id().as_str();

        let evicted = self.db.write(table, |conn| {
            conn.prepare_cached(&format!(
                "INSERT INTO {table} (id, tenant_id, created_at, body, attachment) VALUES (?1, ?2, ?3, ?4, ?5)"
            ))?
            .execute(params![
                item.id(),
                tenant,
                item.created_at(),
                body,
                item.attachment()
            ])?;
            evict_beyond(conn, table, tenant, cap)
        })?;

        if !evicted.is_empty() {
            debug!(
                collection = table,
                tenant,
                cap,
                evicted = evicted.len(),
                "evicted oldest rows"
            );
        }
        Ok(evicted)
    }

    pub fn list_for_tenant(&self, tenant: &TenantId) -> Result<Vec<T>> {
        let table = self.collection.table();
        self.db.read(table, |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT body, attachment FROM {table} WHERE tenant_id = ?1 ORDER BY created_at DESC, seq DESC"
            ))?;
            let rows = stmt.query_map(params![tenant.as_str()], decode_row::<T>)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    pub fn count_for_tenant(&self, tenant: &TenantId) -> Result<usize> {
        let table = self.collection.table();
        let count: i64 = self.db.read(table, |conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE tenant_id = ?1"),
                params![tenant.as_str()],
                |r| r.get(0),
            )
        })?;
        Ok(count as usize)
    }

    /// Returns whether a row was removed; a missing id is not an error.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let table = self.collection.table();
        let removed = self.db.write(table, |conn| {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
        })?;
        Ok(removed > 0)
    }

    /// Like [`Self::delete_by_id`], but only removes the row when `tenant`
    /// owns it.
    pub fn delete_for_tenant(&self, tenant: &TenantId, id: &str) -> Result<bool> {
        let table = self.collection.table();
        let removed = self.db.write(table, |conn| {
            conn.execute(
                &format!("DELETE FROM {table} WHERE id = ?1 AND tenant_id = ?2"),
                params![id, tenant.as_str()],
            )
        })?;
        Ok(removed > 0)
    }

    pub fn clear_for_tenant(&self, tenant: &TenantId) -> Result<usize> {
        let table = self.collection.table();
        let removed = self.db.write(table, |conn| {
            conn.execute(
                &format!("DELETE FROM {table} WHERE tenant_id = ?1"),
                params![tenant.as_str()],
            )
        })?;
        debug!(collection = table, tenant = %tenant, removed, "cleared tenant rows");
        Ok(removed)
    }
}

/// Deletes every row of `tenant` past the `cap` newest, newest-first order.
fn evict_beyond(
    conn: &Connection,
    table: &str,
    tenant: &str,
    cap: usize,
) -> rusqlite::Result<Vec<String>> {
    let doomed: Vec<(i64, String)> = {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT seq, id FROM {table} WHERE tenant_id = ?1 ORDER BY created_at DESC, seq DESC LIMIT -1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![tenant, cap as i64], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    let mut delete = conn.prepare_cached(&format!("DELETE FROM {table} WHERE seq = ?1"))?;
    for (seq, _) in &doomed {
        delete.execute(params![seq])?;
    }
    Ok(doomed.into_iter().map(|(_, id)| id).collect())
}

fn decode_row<T: TenantRecord>(row: &Row<'_>) -> rusqlite::Result<T> {
    let body: String = row.get(0)?;
    let attachment: Option<Vec<u8>> = row.get(1)?;
    let mut record: T = serde_json::from_str(&body)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    if let Some(bytes) = attachment {
        record.restore_attachment(bytes);
    }
    Ok(record)
}
