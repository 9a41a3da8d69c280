use std::sync::RwLock;

use core_model::{SettingValue, TenantId, setting_keys};
use store_sqlite::{SettingsStore, StoreError};
use tracing::{info, warn};

/// Source of truth for "who is signed in right now".
pub trait TenantResolver: Send + Sync {
    fn current_tenant(&self) -> Option<TenantId>;
}

/// Always answers with the same tenant, or with none.
#[derive(Debug, Clone)]
pub struct FixedTenant(Option<TenantId>);

impl FixedTenant {
    pub fn new(tenant: TenantId) -> Self {
        Self(Some(tenant))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl TenantResolver for FixedTenant {
    fn current_tenant(&self) -> Option<TenantId> {
        self.0.clone()
    }
}

/// In-process session state, updated by the authentication flow.
#[derive(Debug, Default)]
pub struct SessionTenant {
    active: RwLock<Option<TenantId>>,
}

impl SessionTenant {
    pub fn sign_in(&self, tenant: TenantId) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(tenant);
    }

    pub fn sign_out(&self) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl TenantResolver for SessionTenant {
    fn current_tenant(&self) -> Option<TenantId> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Session persisted in the settings collection under `auth.session`, so it
/// outlives the process.
#[derive(Clone)]
pub struct SettingsTenant {
    settings: SettingsStore,
}

impl SettingsTenant {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }

    pub fn sign_in(&self, tenant: &TenantId) -> Result<(), StoreError> {
        self.settings.set(
            setting_keys::SESSION,
            &SettingValue::Text(tenant.as_str().to_string()),
        )?;
        info!(tenant = %tenant, "signed in");
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), StoreError> {
        self.settings.remove(setting_keys::SESSION)?;
        info!("signed out");
        Ok(())
    }
}

impl TenantResolver for SettingsTenant {
    fn current_tenant(&self) -> Option<TenantId> {
        match self.settings.get(setting_keys::SESSION) {
            Ok(Some(value)) => value.as_text().and_then(TenantId::new),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "could not read session; treating as signed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store_sqlite::Database;

    #[test]
    fn session_tenant_follows_sign_in_and_out() {
        let session = SessionTenant::default();
        assert!(session.current_tenant().is_none());
        session.sign_in(TenantId::new("u1").unwrap());
        assert_eq!(session.current_tenant().unwrap().as_str(), "u1");
        session.sign_in(TenantId::new("u2").unwrap());
        assert_eq!(session.current_tenant().unwrap().as_str(), "u2");
        session.sign_out();
        assert!(session.current_tenant().is_none());
    }

    #[test]
    fn settings_tenant_persists_session() {
        let settings = SettingsStore::new(Database::in_memory());
        let resolver = SettingsTenant::new(settings.clone());
        assert!(resolver.current_tenant().is_none());
        resolver.sign_in(&TenantId::new("u1").unwrap()).unwrap();
        assert_eq!(
            SettingsTenant::new(settings.clone())
                .current_tenant()
                .unwrap()
                .as_str(),
            "u1"
        );
        resolver.sign_out().unwrap();
        assert!(resolver.current_tenant().is_none());
    }

    #[test]
    fn blank_or_non_text_session_resolves_to_none() {
        let settings = SettingsStore::new(Database::in_memory());
        let resolver = SettingsTenant::new(settings.clone());
        settings
            .set(setting_keys::SESSION, &SettingValue::Text("  ".to_string()))
            .unwrap();
        assert!(resolver.current_tenant().is_none());
        settings
            .set(setting_keys::SESSION, &SettingValue::Flag(true))
            .unwrap();
        assert!(resolver.current_tenant().is_none());
    }

    #[test]
    fn fixed_tenant() {
        assert!(FixedTenant::signed_out().current_tenant().is_none());
        let fixed = FixedTenant::new(TenantId::new("u9").unwrap());
        assert_eq!(fixed.current_tenant().unwrap().as_str(), "u9");
    }
}
