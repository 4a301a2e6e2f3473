use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, Geometry};
use serde_json::json;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::geodata::{geometry, Territory, TerritoryFilter, TerritoryKind};
use crate::services::catalog::{CatalogSnapshot, FilterOptions};
use crate::state::AppState;

/// Tooltip columns and their display aliases, in dashboard order.
pub(crate) const TOOLTIP_FIELDS: [(&str, &str); 8] = [
    ("id_rtdaf", "ID:"),
    ("nom_terr", "Territorio:"),
    ("etnia", "Etnia:"),
    ("departamen", "Departamento:"),
    ("municipio", "Municipio:"),
    ("etapa", "Etapa:"),
    ("estado_act", "Estado:"),
    ("area_label", "Área:"),
];

#[derive(Debug, Clone, Default, serde::Deserialize, utoipa::IntoParams)]
pub(crate) struct TerritoriesQuery {
    /// Comma-separated stage values.
    pub etapa: Option<String>,
    /// Comma-separated case-state values.
    pub estado: Option<String>,
    /// Comma-separated territory types (`ci`, `cn`).
    pub tipo: Option<String>,
    /// Comma-separated departments.
    pub departamento: Option<String>,
    /// Substring match on `id_rtdaf`.
    pub id: Option<String>,
    /// Exact `nom_terr` match.
    pub nombre: Option<String>,
}

impl TerritoriesQuery {
    pub(crate) fn into_filter(self) -> TerritoryFilter {
        TerritoryFilter {
            etapa: split_csv(self.etapa),
            estado: split_csv(self.estado),
            tipo: split_csv(self.tipo),
            departamento: split_csv(self.departamento),
            id: self.id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            nombre: self
                .nombre
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}

fn split_csv(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, serde::Deserialize, utoipa::IntoParams)]
pub(crate) struct MapQuery {
    pub etapa: Option<String>,
    pub estado: Option<String>,
    pub tipo: Option<String>,
    pub departamento: Option<String>,
    pub id: Option<String>,
    pub nombre: Option<String>,
    /// Geometry simplification toggle; defaults to on.
    pub simplify: Option<bool>,
    /// Simplification tolerance in degrees (0.00001..=0.001).
    pub tolerance: Option<f64>,
}

impl MapQuery {
    fn split(self) -> (TerritoriesQuery, Option<bool>, Option<f64>) {
        let filter = TerritoriesQuery {
            etapa: self.etapa,
            estado: self.estado,
            tipo: self.tipo,
            departamento: self.departamento,
            id: self.id,
            nombre: self.nombre,
        };
        (filter, self.simplify, self.tolerance)
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct TerritoryRow {
    pub id_rtdaf: String,
    pub nom_terr: String,
    pub etnia: String,
    pub departamen: String,
    pub municipio: String,
    pub etapa: String,
    pub estado_act: String,
    pub cn_ci: String,
    pub area_ha: f64,
    pub area_label: String,
}

impl From<&Territory> for TerritoryRow {
    fn from(territory: &Territory) -> Self {
        Self {
            id_rtdaf: territory.id_rtdaf.clone(),
            nom_terr: territory.nom_terr.clone(),
            etnia: territory.etnia.clone(),
            departamen: territory.departamen.clone(),
            municipio: territory.municipio.clone(),
            etapa: territory.etapa.clone(),
            estado_act: territory.estado_act.clone(),
            cn_ci: territory.cn_ci.clone(),
            area_ha: territory.area_ha,
            area_label: territory.area_label(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct TerritoryListResponse {
    pub count: usize,
    pub rows: Vec<TerritoryRow>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct LegendEntry {
    pub color: String,
    pub label: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct TooltipField {
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct MapDocument {
    pub count: usize,
    pub bounds: Option<[f64; 4]>,
    /// `[lat, lon]` midpoint of the bounds.
    pub center: Option<[f64; 2]>,
    pub legend: Vec<LegendEntry>,
    pub tooltip: Vec<TooltipField>,
    #[schema(value_type = Object)]
    pub features: FeatureCollection,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct CatalogStatusResponse {
    pub loaded: bool,
    pub count: usize,
    pub source: Option<String>,
    pub loaded_at: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct CatalogReloadResponse {
    pub count: usize,
}

pub(crate) async fn require_catalog(
    state: &AppState,
) -> Result<Arc<CatalogSnapshot>, (StatusCode, String)> {
    state.catalog.snapshot().await.ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Territory catalog is not loaded".to_string(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/territories/status",
    tag = "territories",
    responses((status = 200, description = "Catalog status", body = CatalogStatusResponse)),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn catalog_status(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Json<CatalogStatusResponse> {
    let status = state.catalog.status().await;
    Json(CatalogStatusResponse {
        loaded: status.loaded,
        count: status.count,
        source: status.source,
        loaded_at: status.loaded_at.map(|ts| ts.to_rfc3339()),
        last_error: status.last_error,
    })
}

#[utoipa::path(
    post,
    path = "/api/territories/reload",
    tag = "territories",
    responses(
        (status = 200, description = "Catalog reloaded", body = CatalogReloadResponse),
        (status = 502, description = "Reload failed")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn reload_catalog(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Result<Json<CatalogReloadResponse>, (StatusCode, String)> {
    let count = state.catalog.reload().await.map_err(|err| {
        (
            StatusCode::BAD_GATEWAY,
            format!("Failed to reload territory catalog: {err}"),
        )
    })?;
    Ok(Json(CatalogReloadResponse { count }))
}

#[utoipa::path(
    get,
    path = "/api/territories/filters",
    tag = "territories",
    responses(
        (status = 200, description = "Facet values", body = FilterOptions),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn filter_options(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Result<Json<FilterOptions>, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    Ok(Json(snapshot.facets()))
}

#[utoipa::path(
    get,
    path = "/api/territories",
    tag = "territories",
    params(TerritoriesQuery),
    responses(
        (status = 200, description = "Filtered territory rows", body = TerritoryListResponse),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn list_territories(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<TerritoriesQuery>,
) -> Result<Json<TerritoryListResponse>, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    let filter = query.into_filter();
    let rows: Vec<TerritoryRow> = snapshot
        .filter(&filter)
        .into_iter()
        .map(TerritoryRow::from)
        .collect();
    Ok(Json(TerritoryListResponse {
        count: rows.len(),
        rows,
    }))
}

#[utoipa::path(
    get,
    path = "/api/territories/geojson",
    tag = "territories",
    params(MapQuery),
    responses(
        (status = 200, description = "Styled GeoJSON map document", body = MapDocument),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn territories_geojson(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<MapQuery>,
) -> Result<Json<MapDocument>, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    let (filter_query, simplify, tolerance) = query.split();
    let filter = filter_query.into_filter();
    let document = build_map_document(
        &snapshot,
        &filter,
        simplify.unwrap_or(true),
        tolerance.unwrap_or(state.config.default_simplify_tolerance),
    );
    Ok(Json(document))
}

pub(crate) fn build_map_document(
    snapshot: &CatalogSnapshot,
    filter: &TerritoryFilter,
    simplify: bool,
    tolerance: f64,
) -> MapDocument {
    let matched = snapshot.filter(filter);

    let mut rendered: Vec<(usize, MultiPolygon<f64>)> = Vec::with_capacity(matched.len());
    for (index, territory) in matched.iter().enumerate() {
        let geometry = if simplify {
            geometry::simplify(&territory.geometry, tolerance)
        } else {
            territory.geometry.clone()
        };
        rendered.push((index, geometry));
    }

    let bounds = geometry::collection_bounds(rendered.iter().map(|(_, g)| g));
    let center = bounds.map(geometry::bounds_center);

    let features = rendered
        .into_iter()
        .map(|(index, geometry)| territory_feature(matched[index], &geometry))
        .collect();

    MapDocument {
        count: matched.len(),
        bounds,
        center,
        legend: legend_entries(),
        tooltip: tooltip_fields(),
        features: FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
    }
}

fn territory_feature(territory: &Territory, geometry: &MultiPolygon<f64>) -> Feature {
    let color = territory.kind().fill_color();
    let mut properties = serde_json::Map::new();
    properties.insert("id_rtdaf".to_string(), json!(territory.id_rtdaf));
    properties.insert("nom_terr".to_string(), json!(territory.nom_terr));
    properties.insert("etnia".to_string(), json!(territory.etnia));
    properties.insert("departamen".to_string(), json!(territory.departamen));
    properties.insert("municipio".to_string(), json!(territory.municipio));
    properties.insert("etapa".to_string(), json!(territory.etapa));
    properties.insert("estado_act".to_string(), json!(territory.estado_act));
    properties.insert("cn_ci".to_string(), json!(territory.cn_ci));
    properties.insert("area_ha".to_string(), json!(territory.area_ha));
    properties.insert("area_label".to_string(), json!(territory.area_label()));
    properties.insert("fill".to_string(), json!(color));
    properties.insert("stroke".to_string(), json!(color));
    properties.insert("weight".to_string(), json!(1));
    properties.insert("fill-opacity".to_string(), json!(0.6));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

pub(crate) fn legend_entries() -> Vec<LegendEntry> {
    [TerritoryKind::Indigenous, TerritoryKind::AfroDescendant]
        .iter()
        .map(|kind| LegendEntry {
            color: kind.fill_color().to_string(),
            label: kind.legend_label().to_string(),
        })
        .collect()
}

pub(crate) fn tooltip_fields() -> Vec<TooltipField> {
    TOOLTIP_FIELDS
        .iter()
        .map(|(field, alias)| TooltipField {
            field: (*field).to_string(),
            alias: (*alias).to_string(),
        })
        .collect()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/territories", get(list_territories))
        .route("/territories/status", get(catalog_status))
        .route("/territories/reload", post(reload_catalog))
        .route("/territories/filters", get(filter_options))
        .route("/territories/geojson", get(territories_geojson))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{loaded_state, test_operator};
    use axum::extract::{Query, State};

    #[tokio::test]
    async fn list_applies_query_filters() {
        let state = loaded_state().await;
        let query = TerritoriesQuery {
            tipo: Some("ci".to_string()),
            ..Default::default()
        };
        let response = list_territories(State(state), AuthUser(test_operator()), Query(query))
            .await
            .unwrap();
        assert_eq!(response.0.count, 1);
        assert_eq!(response.0.rows[0].cn_ci, "ci");
        assert!(response.0.rows[0].area_label.contains("ha +"));
    }

    #[tokio::test]
    async fn empty_filters_return_everything() {
        let state = loaded_state().await;
        let response = list_territories(
            State(state),
            AuthUser(test_operator()),
            Query(TerritoriesQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(response.0.count, 2);
    }

    #[tokio::test]
    async fn unloaded_catalog_returns_service_unavailable() {
        let state = crate::test_support::test_state();
        let err = list_territories(
            State(state),
            AuthUser(test_operator()),
            Query(TerritoriesQuery::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn geojson_document_carries_style_and_legend() {
        let state = loaded_state().await;
        let response = territories_geojson(
            State(state),
            AuthUser(test_operator()),
            Query(MapQuery::default()),
        )
        .await
        .unwrap();
        let document = response.0;
        assert_eq!(document.count, 2);
        assert_eq!(document.features.features.len(), 2);
        assert_eq!(document.legend.len(), 2);
        assert!(document.bounds.is_some());
        assert!(document.center.is_some());

        let colors: Vec<String> = document
            .features
            .features
            .iter()
            .map(|f| {
                f.properties.as_ref().unwrap()["fill"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert!(colors.contains(&"#228B22".to_string()));
        assert!(colors.contains(&"#8B4513".to_string()));
    }

    #[tokio::test]
    async fn no_match_yields_empty_document() {
        let state = loaded_state().await;
        let query = MapQuery {
            departamento: Some("Putumayo".to_string()),
            ..Default::default()
        };
        let response = territories_geojson(State(state), AuthUser(test_operator()), Query(query))
            .await
            .unwrap();
        assert_eq!(response.0.count, 0);
        assert!(response.0.bounds.is_none());
        assert!(response.0.features.features.is_empty());
    }

    #[test]
    fn csv_params_split_and_trim() {
        let query = TerritoriesQuery {
            etapa: Some(" administrativa , judicial ".to_string()),
            id: Some("  ".to_string()),
            ..Default::default()
        };
        let filter = query.into_filter();
        assert_eq!(filter.etapa, vec!["administrativa", "judicial"]);
        assert!(filter.id.is_none());
    }
}
