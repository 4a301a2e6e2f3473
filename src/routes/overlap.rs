use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, Geometry};
use serde_json::json;
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::error::{internal_error, map_geodata_error};
use crate::geodata::projection::{detect_crs, to_wgs84};
use crate::geodata::shapefile_zip::read_zip_bytes;
use crate::geodata::{geometry, GeodataError};
use crate::routes::exports::attachment_response;
use crate::routes::territories::{require_catalog, TooltipField};
use crate::services::catalog::CatalogSnapshot;
use crate::state::AppState;

const OVERLAP_CSV_FILE_NAME: &str = "intersecciones.csv";

#[derive(Debug, Clone, Default, serde::Deserialize, utoipa::IntoParams)]
pub(crate) struct OverlapQuery {
    /// `json` (default) or `csv`.
    pub format: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct OverlapRow {
    /// Index of the uploaded feature this intersection came from.
    pub user_feature: usize,
    pub id_rtdaf: String,
    pub nom_terr: String,
    pub etnia: String,
    pub departamen: String,
    pub municipio: String,
    /// Overlapping area in hectares, geodesic, rounded to 2 decimals.
    pub overlap_ha: f64,
    /// Share of the uploaded feature covered by this territory.
    pub pct_of_user: f64,
    /// Share of the territory covered by the uploaded feature.
    pub pct_of_territory: f64,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct OverlapResponse {
    pub intersection_count: usize,
    pub total_overlap_ha: f64,
    pub rows: Vec<OverlapRow>,
    pub bounds: Option<[f64; 4]>,
    /// `[lat, lon]` midpoint of the intersection bounds.
    pub center: Option<[f64; 2]>,
    pub tooltip: Vec<TooltipField>,
    #[schema(value_type = Object)]
    pub user_layer: FeatureCollection,
    #[schema(value_type = Object)]
    pub intersections: FeatureCollection,
}

struct OverlapOutcome {
    rows: Vec<OverlapRow>,
    user_geometries: Vec<MultiPolygon<f64>>,
    intersection_geometries: Vec<MultiPolygon<f64>>,
}

#[utoipa::path(
    post,
    path = "/api/overlap",
    tag = "overlap",
    params(OverlapQuery),
    request_body(content = Vec<u8>, content_type = "application/zip"),
    responses(
        (status = 200, description = "Overlap analysis result", body = OverlapResponse),
        (status = 400, description = "Bad archive or unsupported CRS"),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn compute_overlap(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<OverlapQuery>,
    body: Bytes,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    if body.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Upload a zipped shapefile (.zip) as the request body".to_string(),
        ));
    }

    let outcome = tokio::task::spawn_blocking(move || overlap_against(&snapshot, &body))
        .await
        .map_err(internal_error)?
        .map_err(map_geodata_error)?;

    match query.format.as_deref() {
        Some("csv") => {
            let bytes = overlap_csv(&outcome.rows)?;
            attachment_response(bytes, OVERLAP_CSV_FILE_NAME, "text/csv")
        }
        None | Some("json") => Ok(Json(overlap_response(outcome)).into_response()),
        Some(other) => Err((
            StatusCode::BAD_REQUEST,
            format!("format must be one of: json, csv (got {other})"),
        )),
    }
}

fn overlap_against(
    snapshot: &Arc<CatalogSnapshot>,
    body: &[u8],
) -> Result<OverlapOutcome, GeodataError> {
    let archive = read_zip_bytes(body)?;
    let crs = detect_crs(archive.prj.as_deref())?;

    let mut user_geometries = Vec::with_capacity(archive.features.len());
    for (raw_geometry, _) in archive.features {
        user_geometries.push(to_wgs84(&raw_geometry, &crs)?);
    }

    let mut rows = Vec::new();
    let mut intersection_geometries = Vec::new();
    for (user_index, user_geometry) in user_geometries.iter().enumerate() {
        let user_area_ha = geometry::geodesic_area_ha(user_geometry);
        for territory in &snapshot.territories {
            if !geometry::boxes_intersect(user_geometry, &territory.geometry) {
                continue;
            }
            let overlap = geometry::intersection(user_geometry, &territory.geometry)?;
            if overlap.0.is_empty() {
                continue;
            }
            let overlap_ha = geometry::geodesic_area_ha(&overlap);
            let territory_area_ha = if territory.area_ha > 0.0 {
                territory.area_ha
            } else {
                geometry::geodesic_area_ha(&territory.geometry)
            };
            rows.push(OverlapRow {
                user_feature: user_index,
                id_rtdaf: territory.id_rtdaf.clone(),
                nom_terr: territory.nom_terr.clone(),
                etnia: territory.etnia.clone(),
                departamen: territory.departamen.clone(),
                municipio: territory.municipio.clone(),
                overlap_ha: round2(overlap_ha),
                pct_of_user: round2(percentage(overlap_ha, user_area_ha)),
                pct_of_territory: round2(percentage(overlap_ha, territory_area_ha)),
            });
            intersection_geometries.push(overlap);
        }
    }

    Ok(OverlapOutcome {
        rows,
        user_geometries,
        intersection_geometries,
    })
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole) * 100.0
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn overlap_response(outcome: OverlapOutcome) -> OverlapResponse {
    let bounds = geometry::collection_bounds(outcome.intersection_geometries.iter());
    let center = bounds.map(geometry::bounds_center);

    let user_features = outcome
        .user_geometries
        .iter()
        .map(|geometry| styled_feature(geometry, "gray", 0.3, serde_json::Map::new()))
        .collect();

    let intersection_features = outcome
        .intersection_geometries
        .iter()
        .zip(outcome.rows.iter())
        .map(|(geometry, row)| {
            let mut properties = serde_json::Map::new();
            properties.insert("nom_terr".to_string(), json!(row.nom_terr));
            properties.insert("etnia".to_string(), json!(row.etnia));
            properties.insert("departamen".to_string(), json!(row.departamen));
            properties.insert("municipio".to_string(), json!(row.municipio));
            properties.insert("area_ha".to_string(), json!(row.overlap_ha));
            styled_feature(geometry, "red", 0.6, properties)
        })
        .collect();

    let total_overlap_ha = round2(outcome.rows.iter().map(|row| row.overlap_ha).sum());

    OverlapResponse {
        intersection_count: outcome.rows.len(),
        total_overlap_ha,
        rows: outcome.rows,
        bounds,
        center,
        tooltip: overlap_tooltip_fields(),
        user_layer: FeatureCollection {
            bbox: None,
            features: user_features,
            foreign_members: None,
        },
        intersections: FeatureCollection {
            bbox: None,
            features: intersection_features,
            foreign_members: None,
        },
    }
}

fn styled_feature(
    geometry: &MultiPolygon<f64>,
    color: &str,
    fill_opacity: f64,
    mut properties: serde_json::Map<String, serde_json::Value>,
) -> Feature {
    properties.insert("fill".to_string(), json!(color));
    properties.insert("stroke".to_string(), json!(color));
    properties.insert("weight".to_string(), json!(1));
    properties.insert("fill-opacity".to_string(), json!(fill_opacity));
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn overlap_tooltip_fields() -> Vec<TooltipField> {
    [
        ("nom_terr", "Territorio:"),
        ("etnia", "Etnia:"),
        ("departamen", "Departamento:"),
        ("municipio", "Municipio:"),
        ("area_ha", "Área traslapada (ha):"),
    ]
    .iter()
    .map(|(field, alias)| TooltipField {
        field: (*field).to_string(),
        alias: (*alias).to_string(),
    })
    .collect()
}

fn overlap_csv(rows: &[OverlapRow]) -> Result<Vec<u8>, (StatusCode, String)> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "user_feature",
            "id_rtdaf",
            "nom_terr",
            "etnia",
            "departamen",
            "municipio",
            "overlap_ha",
            "pct_of_user",
            "pct_of_territory",
        ])
        .map_err(internal_error)?;
    for row in rows {
        writer
            .write_record([
                row.user_feature.to_string(),
                row.id_rtdaf.clone(),
                row.nom_terr.clone(),
                row.etnia.clone(),
                row.departamen.clone(),
                row.municipio.clone(),
                row.overlap_ha.to_string(),
                row.pct_of_user.to_string(),
                row.pct_of_territory.to_string(),
            ])
            .map_err(internal_error)?;
    }
    writer
        .into_inner()
        .map_err(|err| internal_error(err.to_string()))
}

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/overlap", post(compute_overlap))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodata::shapefile_zip::write_territories_zip;
    use crate::test_support::{loaded_state, test_operator, user_upload_zip};
    use axum::extract::{Query, State};

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn reports_intersections_with_areas_and_percentages() {
        let state = loaded_state().await;
        // Upload a square overlapping the south-west quarter of the
        // `ci` territory at (-70.5, 1.0).
        let upload = user_upload_zip(-70.55, 0.95, 0.1);

        let response = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery::default()),
            Bytes::from(upload),
        )
        .await
        .unwrap();
        let bytes = body_bytes(response).await;
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["intersection_count"], 1);
        let row = &parsed["rows"][0];
        assert_eq!(row["nom_terr"], "Resguardo Yurupari");
        let overlap_ha = row["overlap_ha"].as_f64().unwrap();
        assert!(overlap_ha > 0.0);
        let pct_of_user = row["pct_of_user"].as_f64().unwrap();
        // A quarter of the upload lies inside the territory.
        assert!((pct_of_user - 25.0).abs() < 1.5, "pct was {pct_of_user}");
        assert_eq!(parsed["intersections"]["features"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["user_layer"]["features"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disjoint_upload_yields_zero_intersections() {
        let state = loaded_state().await;
        let upload = user_upload_zip(10.0, 10.0, 0.1);

        let response = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery::default()),
            Bytes::from(upload),
        )
        .await
        .unwrap();
        let parsed: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(parsed["intersection_count"], 0);
        assert!(parsed["rows"].as_array().unwrap().is_empty());
        assert!(parsed["bounds"].is_null());
    }

    #[tokio::test]
    async fn csv_format_returns_attachment() {
        let state = loaded_state().await;
        let upload = user_upload_zip(-70.55, 0.95, 0.1);

        let response = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery {
                format: Some("csv".to_string()),
            }),
            Bytes::from(upload),
        )
        .await
        .unwrap();
        let disposition = response
            .headers()
            .get(axum::http::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("intersecciones.csv"));
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.starts_with("user_feature,id_rtdaf"));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let state = loaded_state().await;
        let err = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery::default()),
            Bytes::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn archive_without_shapefile_is_a_bad_request() {
        let state = loaded_state().await;
        // A zip of territories written with a bogus name still has a
        // .shp, so build an empty zip instead.
        let empty_zip = {
            let mut buffer = std::io::Cursor::new(Vec::new());
            {
                let mut zip = zip::ZipWriter::new(&mut buffer);
                zip.finish().unwrap();
            }
            buffer.into_inner()
        };
        let err = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery::default()),
            Bytes::from(empty_zip),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let state = loaded_state().await;
        let upload = write_territories_zip(&crate::test_support::sample_territories(), "capa")
            .unwrap();
        let err = compute_overlap(
            State(state),
            AuthUser(test_operator()),
            Query(OverlapQuery {
                format: Some("xml".to_string()),
            }),
            Bytes::from(upload),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
