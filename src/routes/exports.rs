use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::auth::AuthUser;
use crate::error::{internal_error, map_geodata_error};
use crate::geodata::shapefile_zip::write_territories_zip;
use crate::geodata::{Territory, TerritoryFilter};
use crate::routes::territories::{
    build_map_document, require_catalog, MapQuery, TerritoriesQuery, TerritoryRow,
};
use crate::state::AppState;

const CSV_FILE_NAME: &str = "resultados_filtrados.csv";
const SHAPEFILE_BASE_NAME: &str = "shapefile_filtrado";
const MAP_FILE_NAME: &str = "mapa_etnico_filtrado.html";

pub(crate) fn attachment_response(
    bytes: Vec<u8>,
    filename: &str,
    content_type: &str,
) -> Result<Response, (StatusCode, String)> {
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type).map_err(internal_error)?,
    );
    let content_disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        filename.replace('"', "_")
    ))
    .map_err(internal_error)?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, content_disposition);
    Ok(response)
}

pub(crate) fn territories_csv(territories: &[&Territory]) -> Result<Vec<u8>, (StatusCode, String)> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = crate::geodata::ATTRIBUTE_COLUMNS.to_vec();
    header.push("area_ha");
    writer.write_record(&header).map_err(internal_error)?;
    for territory in territories {
        let row = TerritoryRow::from(*territory);
        writer
            .write_record([
                row.id_rtdaf,
                row.nom_terr,
                row.etnia,
                row.departamen,
                row.municipio,
                row.etapa,
                row.estado_act,
                row.cn_ci,
                row.area_ha.to_string(),
            ])
            .map_err(internal_error)?;
    }
    writer
        .into_inner()
        .map_err(|err| internal_error(err.to_string()))
}

#[utoipa::path(
    get,
    path = "/api/territories/export/csv",
    tag = "exports",
    params(TerritoriesQuery),
    responses(
        (status = 200, description = "Filtered rows as CSV", content_type = "text/csv", body = String),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn export_csv(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<TerritoriesQuery>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    let filter = query.into_filter();
    let matched = snapshot.filter(&filter);
    let bytes = territories_csv(&matched)?;
    attachment_response(bytes, CSV_FILE_NAME, "text/csv")
}

#[utoipa::path(
    get,
    path = "/api/territories/export/shapefile",
    tag = "exports",
    params(TerritoriesQuery),
    responses(
        (status = 200, description = "Filtered territories as a zipped shapefile", content_type = "application/zip", body = String),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn export_shapefile(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<TerritoriesQuery>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    let filter = query.into_filter();
    let matched: Vec<Territory> = snapshot
        .filter(&filter)
        .into_iter()
        .cloned()
        .collect();

    let bytes = tokio::task::spawn_blocking(move || {
        write_territories_zip(&matched, SHAPEFILE_BASE_NAME)
    })
    .await
    .map_err(internal_error)?
    .map_err(map_geodata_error)?;

    attachment_response(
        bytes,
        &format!("{SHAPEFILE_BASE_NAME}.zip"),
        "application/zip",
    )
}

#[utoipa::path(
    get,
    path = "/api/territories/export/map",
    tag = "exports",
    params(MapQuery),
    responses(
        (status = 200, description = "Standalone HTML map of the filtered selection", content_type = "text/html", body = String),
        (status = 503, description = "Catalog not loaded")
    ),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn export_map(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Query(query): Query<MapQuery>,
) -> Result<Response, (StatusCode, String)> {
    let snapshot = require_catalog(&state).await?;
    let tolerance = query
        .tolerance
        .unwrap_or(state.config.default_simplify_tolerance);
    let simplify = query.simplify.unwrap_or(true);
    let filter: TerritoryFilter = TerritoriesQuery {
        etapa: query.etapa,
        estado: query.estado,
        tipo: query.tipo,
        departamento: query.departamento,
        id: query.id,
        nombre: query.nombre,
    }
    .into_filter();

    let document = build_map_document(&snapshot, &filter, simplify, tolerance);
    let html = render_map_html(&document).map_err(internal_error)?;
    attachment_response(html.into_bytes(), MAP_FILE_NAME, "text/html")
}

/// Self-contained Leaflet page with the GeoJSON, legend, and tooltips
/// embedded, on the same light basemap the dashboard uses.
const MAP_TEMPLATE: &str = r#"<!doctype html>
<html lang="es">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Mapanima - Geovisor Étnico</title>
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
    <style>
      html, body, #map { height: 100%; margin: 0; }
      .legend {
        background-color: white; padding: 10px; border: 1px solid #ccc;
        font-size: 14px; box-shadow: 2px 2px 4px rgba(0, 0, 0, 0.1);
      }
      .leaflet-tooltip {
        background-color: rgba(255, 255, 255, 0.9);
        color: black;
        font-weight: bold;
      }
    </style>
  </head>
  <body>
    <div id="map"></div>
    <script>
      const data = __GEOJSON__;
      const tooltipFields = __TOOLTIP__;
      const legendEntries = __LEGEND__;
      const center = __CENTER__;

      const map = L.map('map', { center: center, zoom: 10 });
      L.tileLayer('https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png', {
        attribution: '&copy; OpenStreetMap contributors &copy; CARTO'
      }).addTo(map);

      const layer = L.geoJSON(data, {
        style: (feature) => ({
          color: feature.properties.stroke,
          fillColor: feature.properties.fill,
          weight: 1,
          fillOpacity: 0.6
        }),
        onEachFeature: (feature, leafletLayer) => {
          const rows = tooltipFields
            .map((t) => '<strong>' + t.alias + '</strong> ' + (feature.properties[t.field] ?? ''))
            .join('<br>');
          leafletLayer.bindTooltip(rows, { sticky: true });
        }
      }).addTo(map);

      const bounds = layer.getBounds();
      if (bounds.isValid()) {
        map.fitBounds(bounds);
      }

      const legend = L.control({ position: 'topleft' });
      legend.onAdd = () => {
        const div = L.DomUtil.create('div', 'legend');
        div.innerHTML =
          '<strong>Leyenda</strong><br>' +
          legendEntries
            .map((e) => '<span style="color:' + e.color + '">&#9632;</span> ' + e.label)
            .join('<br>');
        return div;
      };
      legend.addTo(map);
    </script>
  </body>
</html>
"#;

pub(crate) fn render_map_html(
    document: &crate::routes::territories::MapDocument,
) -> Result<String, serde_json::Error> {
    let geojson = serde_json::to_string(&document.features)?;
    let tooltip = serde_json::to_string(&document.tooltip)?;
    let legend = serde_json::to_string(&document.legend)?;
    // Bogotá as the fallback center when nothing matched.
    let center = serde_json::to_string(&document.center.unwrap_or([4.6, -74.1]))?;
    Ok(MAP_TEMPLATE
        .replace("__GEOJSON__", &geojson)
        .replace("__TOOLTIP__", &tooltip)
        .replace("__LEGEND__", &legend)
        .replace("__CENTER__", &center))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/territories/export/csv", get(export_csv))
        .route("/territories/export/shapefile", get(export_shapefile))
        .route("/territories/export/map", get(export_map))
}
