//! Typed, tenant-aware entry points over the bounded collections.
//!
//! The facades resolve the active tenant on every call. With no tenant they
//! do nothing and return empty results. When storage could not be opened they
//! behave the same way after logging, since the local store is a best-effort
//! cache. Any other storage failure is logged and returned to the caller.

use std::sync::Arc;

use core_model::{TenantId, TenantRecord};
use store_sqlite::{Collection, CollectionStore, Database, StoreError};
use tracing::{debug, warn};

mod activity;
mod history;
mod tenant;

pub use activity::{ActivityLog, NewLogEntry};
pub use history::{HistoryLibrary, NewHistoryItem};
pub use tenant::{FixedTenant, SessionTenant, SettingsTenant, TenantResolver};

pub const HISTORY_CAP: usize = 15;
pub const LOG_CAP: usize = 50;

pub trait Clock: Send + Sync {
    /// Epoch milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Plumbing shared by both facades: the engine, the tenant source and the
/// clock used to stamp new rows.
struct Scoped<T> {
    store: CollectionStore<T>,
    tenants: Arc<dyn TenantResolver>,
    clock: Arc<dyn Clock>,
}

impl<T> Clone for Scoped<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tenants: Arc::clone(&self.tenants),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: TenantRecord> Scoped<T> {
    fn new(
        db: Database,
        collection: Collection,
        cap: usize,
        tenants: Arc<dyn TenantResolver>,
    ) -> Self {
        Self {
            store: CollectionStore::new(db, collection, cap),
            tenants,
            clock: Arc::new(SystemClock),
        }
    }

    fn table(&self) -> &'static str {
        self.store.collection().table()
    }

    fn tenant(&self, op: &'static str) -> Option<TenantId> {
        let tenant = self.tenants.current_tenant();
        if tenant.is_none() {
            debug!(collection = self.table(), op, "no active session; skipping");
        }
        tenant
    }

    fn add(&self, build: impl FnOnce(TenantId, String, i64) -> T) -> Result<Option<T>, StoreError> {
        let Some(tenant) = self.tenant("add") else {
            return Ok(None);
        };
        let created_at = self.clock.now_ms();
        let id = core_model::new_item_id(&tenant, created_at);
        let item = build(tenant, id, created_at);
        let saved = self.store.insert(&item).map(|_| Some(item));
        self.settle("add", saved)
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        let Some(tenant) = self.tenant("list") else {
            return Ok(Vec::new());
        };
        self.settle("list", self.store.list_for_tenant(&tenant))
    }

    fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let Some(tenant) = self.tenant("delete") else {
            return Ok(false);
        };
        self.settle("delete", self.store.delete_for_tenant(&tenant, id))
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let Some(tenant) = self.tenant("clear") else {
            return Ok(0);
        };
        self.settle("clear", self.store.clear_for_tenant(&tenant))
    }

    fn settle<R: Default>(
        &self,
        op: &'static str,
        result: Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_unavailable() => {
                warn!(collection = self.table(), op, error = %err, "storage unavailable; nothing persisted");
                Ok(R::default())
            }
            Err(err) => {
                warn!(collection = self.table(), op, error = %err, "storage operation failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::Clock;

    /// Advances by one millisecond per reading unless frozen.
    pub struct StepClock {
        now: AtomicI64,
        step: i64,
    }

    impl StepClock {
        pub fn starting_at(start: i64) -> Self {
            Self {
                now: AtomicI64::new(start),
                step: 1,
            }
        }

        pub fn frozen_at(at: i64) -> Self {
            Self {
                now: AtomicI64::new(at),
                step: 0,
            }
        }
    }

    impl Clock for StepClock {
        fn now_ms(&self) -> i64 {
            self.now.fetch_add(self.step, Ordering::SeqCst)
        }
    }
}
