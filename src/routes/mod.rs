pub mod auth;
pub mod exports;
pub mod health;
pub mod overlap;
pub mod territories;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(territories::router())
                .merge(exports::router())
                .merge(overlap::router(state.config.max_upload_bytes))
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}

#[cfg(test)]
mod auth_gaps_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use tower::ServiceExt;

    fn state() -> AppState {
        crate::test_support::test_state()
    }

    #[tokio::test]
    async fn territories_list_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/territories", get(territories::list_territories))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/territories")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn territories_geojson_requires_bearer_auth() {
        let app = Router::new()
            .route(
                "/api/territories/geojson",
                get(territories::territories_geojson),
            )
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/territories/geojson")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn csv_export_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/territories/export/csv", get(exports::export_csv))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/territories/export/csv")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn overlap_requires_bearer_auth() {
        let app = Router::new()
            .route("/api/overlap", post(overlap::compute_overlap))
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/overlap")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reload_requires_bearer_auth() {
        let app = Router::new()
            .route(
                "/api/territories/reload",
                post(territories::reload_catalog),
            )
            .with_state(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/territories/reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn healthz_is_open() {
        let app = router(state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
