use std::sync::Arc;

use core_model::{LogItem, LogStatus, Payload};
use store_sqlite::{Collection, Database, StoreError};

use crate::{Clock, LOG_CAP, Scoped, TenantResolver};

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub model: String,
    pub prompt: String,
    pub output: String,
    pub token_count: u64,
    pub status: LogStatus,
    pub error_detail: Option<String>,
    pub media_preview: Option<Payload>,
}

impl NewLogEntry {
    pub fn success(model: impl Into<String>, prompt: impl Into<String>, output: impl Into<String>, token_count: u64) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            output: output.into(),
            token_count,
            status: LogStatus::Success,
            error_detail: None,
            media_preview: None,
        }
    }

    pub fn failure(model: impl Into<String>, prompt: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            output: String::new(),
            token_count: 0,
            status: LogStatus::Error,
            error_detail: Some(detail.into()),
            media_preview: None,
        }
    }

    pub fn with_preview(mut self, preview: Payload) -> Self {
        self.media_preview = Some(preview);
        self
    }
}

/// Interaction log of the signed-in user, capped at [`LOG_CAP`] by default.
#[derive(Clone)]
pub struct ActivityLog {
    inner: Scoped<LogItem>,
}

impl ActivityLog {
    pub fn new(db: Database, tenants: Arc<dyn TenantResolver>) -> Self {
        Self::with_cap(db, tenants, LOG_CAP)
    }

    pub fn with_cap(db: Database, tenants: Arc<dyn TenantResolver>, cap: usize) -> Self {
        Self {
            inner: Scoped::new(db, Collection::Logs, cap, tenants),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inner.clock = clock;
        self
    }

    pub fn cap(&self) -> usize {
        self.inner.store.cap()
    }

    pub fn add(&self, entry: NewLogEntry) -> Result<Option<LogItem>, StoreError> {
        self.inner.add(|tenant_id, id, created_at| LogItem {
            id,
            tenant_id,
            model: entry.model,
            prompt: entry.prompt,
            output: entry.output,
            token_count: entry.token_count,
            status: entry.status,
            error_detail: entry.error_detail,
            media_preview: entry.media_preview,
            created_at,
        })
    }

    pub fn list(&self) -> Result<Vec<LogItem>, StoreError> {
        self.inner.list()
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_by_id(id)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.inner.clear()
    }
}
