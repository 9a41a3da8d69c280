use std::sync::Arc;

use core_model::{HistoryItem, ItemKind, Payload};
use store_sqlite::{Collection, Database, StoreError};

use crate::{Clock, HISTORY_CAP, Scoped, TenantResolver};

#[derive(Debug, Clone)]
pub struct NewHistoryItem {
    pub kind: ItemKind,
    pub prompt: String,
    pub payload: Payload,
}

/// Generation history of the signed-in user, newest first, at most
/// [`HISTORY_CAP`] entries unless configured otherwise.
#[derive(Clone)]
pub struct HistoryLibrary {
    inner: Scoped<HistoryItem>,
}

impl HistoryLibrary {
    pub fn new(db: Database, tenants: Arc<dyn TenantResolver>) -> Self {
        Self::with_cap(db, tenants, HISTORY_CAP)
    }

    pub fn with_cap(db: Database, tenants: Arc<dyn TenantResolver>, cap: usize) -> Self {
        Self {
            inner: Scoped::new(db, Collection::History, cap, tenants),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inner.clock = clock;
        self
    }

    pub fn cap(&self) -> usize {
        self.inner.store.cap()
    }

    /// The saved item, or `None` when nobody is signed in or storage is off.
    pub fn add(&self, new: NewHistoryItem) -> Result<Option<HistoryItem>, StoreError> {
        self.inner.add(|tenant_id, id, created_at| HistoryItem {
            id,
            tenant_id,
            kind: new.kind,
            prompt: new.prompt,
            payload: new.payload,
            created_at,
        })
    }

    pub fn list(&self) -> Result<Vec<HistoryItem>, StoreError> {
        self.inner.list()
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_by_id(id)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.inner.clear()
    }
}
