use crate::auth::{AuthManager, Operator};
use crate::config::ServerConfig;
use crate::geodata::shapefile_zip::write_territories_zip;
use crate::geodata::Territory;
use crate::services::catalog::TerritoryCatalog;
use crate::state::AppState;
use geo::{polygon, MultiPolygon};
use std::sync::Arc;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        catalog_url: None,
        catalog_path: None,
        enable_catalog_refresh: false,
        catalog_refresh_interval_seconds: 3600,
        auth_username: "DAE".to_string(),
        auth_password_hash: crate::auth::hash_password("guardianes2025").expect("hash"),
        session_ttl_hours: 24,
        static_root: None,
        max_upload_bytes: 50 * 1024 * 1024,
        default_simplify_tolerance: 0.0001,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let auth = Arc::new(AuthManager::new(config.session_ttl_hours));
    let http = reqwest::Client::new();
    let catalog = Arc::new(TerritoryCatalog::new(&config, http.clone()));

    AppState {
        config,
        auth,
        catalog,
        http,
    }
}

/// `test_state` with the sample territories already installed.
pub async fn loaded_state() -> AppState {
    let state = test_state();
    state
        .catalog
        .install_snapshot(sample_territories(), "test")
        .await;
    state
}

pub fn test_operator() -> Operator {
    Operator {
        username: "DAE".to_string(),
        source: "test".to_string(),
    }
}

pub fn square(min_x: f64, min_y: f64, size: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![
        (x: min_x, y: min_y),
        (x: min_x + size, y: min_y),
        (x: min_x + size, y: min_y + size),
        (x: min_x, y: min_y + size),
    ]])
}

pub fn territory(
    id_rtdaf: &str,
    nom_terr: &str,
    cn_ci: &str,
    departamen: &str,
    area_ha: f64,
) -> Territory {
    let (min_x, min_y) = if cn_ci == "ci" {
        (-70.5, 1.0)
    } else {
        (-77.2, 5.5)
    };
    Territory {
        id_rtdaf: id_rtdaf.to_string(),
        nom_terr: nom_terr.to_string(),
        etnia: if cn_ci == "ci" { "Cubeo" } else { "Afro" }.to_string(),
        departamen: departamen.to_string(),
        municipio: "Centro".to_string(),
        etapa: "administrativa".to_string(),
        estado_act: "Activo".to_string(),
        cn_ci: cn_ci.to_string(),
        area_ha,
        geometry: square(min_x, min_y, 0.1),
    }
}

/// One indigenous and one afro-descendant territory on disjoint
/// squares, the usual catalog fixture.
pub fn sample_territories() -> Vec<Territory> {
    vec![
        territory("40123", "Resguardo Yurupari", "ci", "Vaupés", 1520.75),
        territory("50241", "Consejo Río Sur", "cn", "Chocó", 830.5),
    ]
}

/// Zips a single square polygon the way a user upload looks.
pub fn user_upload_zip(min_x: f64, min_y: f64, size: f64) -> Vec<u8> {
    let upload = Territory {
        id_rtdaf: "user-1".to_string(),
        nom_terr: "Predio".to_string(),
        etnia: String::new(),
        departamen: String::new(),
        municipio: String::new(),
        etapa: String::new(),
        estado_act: String::new(),
        cn_ci: String::new(),
        area_ha: 0.0,
        geometry: square(min_x, min_y, size),
    };
    write_territories_zip(&[upload], "predio").expect("user upload zip")
}
