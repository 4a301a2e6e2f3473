use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "HTTPBearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Mapanima territory server",
        description = "Ethnic-territory geovisor backend: filters, exports, and traslape analysis"
    ),
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::auth::login,
        crate::routes::auth::me,
        crate::routes::territories::catalog_status,
        crate::routes::territories::reload_catalog,
        crate::routes::territories::filter_options,
        crate::routes::territories::list_territories,
        crate::routes::territories::territories_geojson,
        crate::routes::exports::export_csv,
        crate::routes::exports::export_shapefile,
        crate::routes::exports::export_map,
        crate::routes::overlap::compute_overlap,
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::routes::auth::LoginRequest,
        crate::routes::auth::LoginResponse,
        crate::routes::auth::AuthMeResponse,
        crate::routes::territories::CatalogStatusResponse,
        crate::routes::territories::CatalogReloadResponse,
        crate::routes::territories::TerritoryRow,
        crate::routes::territories::TerritoryListResponse,
        crate::routes::territories::LegendEntry,
        crate::routes::territories::TooltipField,
        crate::routes::territories::MapDocument,
        crate::routes::overlap::OverlapRow,
        crate::routes::overlap::OverlapResponse,
        crate::services::catalog::FilterOptions,
    )),
    tags(
        (name = "auth", description = "Login and session introspection"),
        (name = "territories", description = "Catalog status, filters, and map data"),
        (name = "exports", description = "CSV, shapefile, and HTML map downloads"),
        (name = "overlap", description = "Traslape analysis against an uploaded layer")
    )
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_default()
}

async fn serve_openapi() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(serve_openapi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_core_paths() {
        let doc = openapi_json();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/auth/login"));
        assert!(paths.contains_key("/api/territories"));
        assert!(paths.contains_key("/api/territories/geojson"));
        assert!(paths.contains_key("/api/overlap"));
        assert!(paths.contains_key("/healthz"));
    }
}
