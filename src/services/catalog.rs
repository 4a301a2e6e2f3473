//! In-memory territory catalog. The unified layer is downloaded (or
//! read from disk), parsed, normalized, reprojected to WGS84, and kept
//! as an immutable snapshot that request handlers share. A background
//! task can refresh it periodically.

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServerConfig;
use crate::geodata::projection::{detect_crs, to_wgs84};
use crate::geodata::shapefile_zip::{read_zip_bytes, read_zip_path, ShapefileArchive};
use crate::geodata::{GeodataError, Territory, TerritoryFilter};

#[derive(Debug)]
pub struct CatalogSnapshot {
    pub territories: Vec<Territory>,
    pub loaded_at: DateTime<Utc>,
    pub source: String,
}

impl CatalogSnapshot {
    pub fn filter<'a>(&'a self, filter: &TerritoryFilter) -> Vec<&'a Territory> {
        self.territories
            .iter()
            .filter(|territory| filter.matches(territory))
            .collect()
    }

    /// Sorted unique non-empty values for each sidebar facet.
    pub fn facets(&self) -> FilterOptions {
        FilterOptions {
            etapas: facet_values(&self.territories, |t| &t.etapa),
            estados: facet_values(&self.territories, |t| &t.estado_act),
            tipos: facet_values(&self.territories, |t| &t.cn_ci),
            departamentos: facet_values(&self.territories, |t| &t.departamen),
            nombres: facet_values(&self.territories, |t| &t.nom_terr),
        }
    }
}

fn facet_values<F>(territories: &[Territory], field: F) -> Vec<String>
where
    F: Fn(&Territory) -> &str,
{
    let mut values: Vec<String> = territories
        .iter()
        .map(|territory| field(territory).to_string())
        .filter(|value| !value.is_empty())
        .collect();
    values.sort();
    values.dedup();
    values
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct FilterOptions {
    pub etapas: Vec<String>,
    pub estados: Vec<String>,
    pub tipos: Vec<String>,
    pub departamentos: Vec<String>,
    pub nombres: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogStatus {
    pub loaded: bool,
    pub count: usize,
    pub source: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct CatalogState {
    snapshot: Option<Arc<CatalogSnapshot>>,
    last_error: Option<String>,
}

pub struct TerritoryCatalog {
    url: Option<String>,
    path: Option<PathBuf>,
    http: Client,
    state: RwLock<CatalogState>,
    // Serializes reloads so a slow download cannot stack up.
    reload_guard: Mutex<()>,
}

impl TerritoryCatalog {
    pub fn new(config: &ServerConfig, http: Client) -> Self {
        Self {
            url: config.catalog_url.clone(),
            path: config.catalog_path.clone(),
            http,
            state: RwLock::new(CatalogState::default()),
            reload_guard: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn status(&self) -> CatalogStatus {
        let state = self.state.read().await;
        match state.snapshot.as_ref() {
            Some(snapshot) => CatalogStatus {
                loaded: true,
                count: snapshot.territories.len(),
                source: Some(snapshot.source.clone()),
                loaded_at: Some(snapshot.loaded_at),
                last_error: state.last_error.clone(),
            },
            None => CatalogStatus {
                loaded: false,
                count: 0,
                source: None,
                loaded_at: None,
                last_error: state.last_error.clone(),
            },
        }
    }

    /// Fetches and parses the source archive, swapping the snapshot on
    /// success. Failures leave the previous snapshot in place and are
    /// recorded as `last_error`.
    pub async fn reload(&self) -> Result<usize, GeodataError> {
        let _guard = self.reload_guard.lock().await;

        let result = self.load_snapshot().await;
        match result {
            Ok(snapshot) => {
                let count = snapshot.territories.len();
                let source = snapshot.source.clone();
                let mut state = self.state.write().await;
                state.snapshot = Some(Arc::new(snapshot));
                state.last_error = None;
                drop(state);
                tracing::info!(count, source, "territory catalog loaded");
                Ok(count)
            }
            Err(err) => {
                let mut state = self.state.write().await;
                state.last_error = Some(err.to_string());
                drop(state);
                Err(err)
            }
        }
    }

    async fn load_snapshot(&self) -> Result<CatalogSnapshot, GeodataError> {
        let (archive, source) = self.fetch_archive().await?;
        let territories =
            tokio::task::spawn_blocking(move || parse_catalog_archive(archive))
                .await
                .map_err(|err| GeodataError::Task(err.to_string()))??;
        Ok(CatalogSnapshot {
            territories,
            loaded_at: Utc::now(),
            source,
        })
    }

    async fn fetch_archive(&self) -> Result<(ShapefileArchive, String), GeodataError> {
        if let Some(url) = self.url.as_deref() {
            let direct = resolve_share_url(&self.http, url).await?;
            let response = self
                .http
                .get(&direct)
                .send()
                .await
                .map_err(|err| GeodataError::Download(err.to_string()))?
                .error_for_status()
                .map_err(|err| GeodataError::Download(err.to_string()))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|err| GeodataError::Download(err.to_string()))?;
            let archive =
                tokio::task::spawn_blocking(move || read_zip_bytes(&bytes))
                    .await
                    .map_err(|err| GeodataError::Task(err.to_string()))??;
            return Ok((archive, direct));
        }

        let path = self
            .path
            .clone()
            .ok_or_else(|| GeodataError::Download("no catalog source configured".to_string()))?;
        let source = path.display().to_string();
        let archive = tokio::task::spawn_blocking(move || read_zip_path(&path))
            .await
            .map_err(|err| GeodataError::Task(err.to_string()))??;
        Ok((archive, source))
    }

    /// Periodic refresh in the background; the interval comes from the
    /// server config.
    pub fn start(self: Arc<Self>, cancel: CancellationToken, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the startup load
            // already happened, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.reload().await {
                            tracing::warn!(error = %err, "territory catalog refresh failed");
                        }
                    }
                }
            }
        });
    }

    /// Installs an already-built snapshot; used by tests and by tools
    /// that preload the catalog.
    pub async fn install_snapshot(&self, territories: Vec<Territory>, source: &str) {
        let mut state = self.state.write().await;
        state.snapshot = Some(Arc::new(CatalogSnapshot {
            territories,
            loaded_at: Utc::now(),
            source: source.to_string(),
        }));
        state.last_error = None;
    }
}

fn parse_catalog_archive(archive: ShapefileArchive) -> Result<Vec<Territory>, GeodataError> {
    let crs = detect_crs(archive.prj.as_deref())?;
    let mut territories = Vec::with_capacity(archive.features.len());
    for (geometry, record) in archive.features {
        let geometry = to_wgs84(&geometry, &crs)?;
        territories.push(Territory::from_parts(geometry, &record));
    }
    Ok(territories)
}

/// OneDrive share links need their redirect resolved and the `redir`
/// endpoint rewritten to `download` before the zip can be fetched.
async fn resolve_share_url(http: &Client, url: &str) -> Result<String, GeodataError> {
    if !url.contains("1drv.ms") {
        return Ok(url.to_string());
    }
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| GeodataError::Download(err.to_string()))?;
    let rewritten = rewrite_share_redirect(response.url().as_str());
    let parsed = Url::parse(&rewritten)
        .map_err(|err| GeodataError::Download(format!("bad share redirect: {err}")))?;
    Ok(parsed.to_string())
}

fn rewrite_share_redirect(url: &str) -> String {
    url.replace("redir?", "download?").replace("redir=", "download=")
}
