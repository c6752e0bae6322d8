//! Shared router state.

use axum::extract::FromRef;
use std::sync::Arc;

use crate::{config::AppConfig, services::storage_service::StorageService};

/// Credentials the access gate and login handler compare against.
#[derive(Clone)]
pub struct AuthSettings {
    pub api_key: String,
    pub ui_username: String,
    pub ui_password_hash: String,
}

impl From<&AppConfig> for AuthSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            ui_username: cfg.ui_username.clone(),
            ui_password_hash: cfg.ui_password_hash.to_ascii_lowercase(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub auth: Arc<AuthSettings>,
}

impl AppState {
    pub fn new(storage: StorageService, auth: AuthSettings) -> Self {
        Self {
            storage,
            auth: Arc::new(auth),
        }
    }
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for Arc<AuthSettings> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
