use crate::auth::AuthManager;
use crate::config::ServerConfig;
use crate::services::catalog::TerritoryCatalog;
use axum::extract::FromRef;
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub auth: Arc<AuthManager>,
    pub catalog: Arc<TerritoryCatalog>,
    pub http: Client,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Arc<AuthManager> {
        state.auth.clone()
    }
}

impl FromRef<AppState> for ServerConfig {
    fn from_ref(state: &AppState) -> ServerConfig {
        state.config.clone()
    }
}
