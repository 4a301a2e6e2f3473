use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct LoginResponse {
    token: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct AuthMeResponse {
    username: String,
    source: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Auth token", body = LoginResponse),
        (status = 400, description = "Missing username/password"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub(crate) async fn login(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username and password are required".to_string(),
        ));
    }

    // Username comparison is case-insensitive; the password is not.
    let username_ok =
        username.to_lowercase() == state.config.auth_username.trim().to_lowercase();
    let password_ok =
        crate::auth::verify_password(&payload.password, &state.config.auth_password_hash);
    if !username_ok || !password_ok {
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    }

    let token = state.auth.issue(state.config.auth_username.clone()).await;
    Ok(Json(LoginResponse { token }))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses((status = 200, description = "Current operator", body = AuthMeResponse)),
    security(("HTTPBearer" = []))
)]
pub(crate) async fn me(AuthUser(operator): AuthUser) -> Json<AuthMeResponse> {
    Json(AuthMeResponse {
        username: operator.username,
        source: operator.source,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;

    #[tokio::test]
    async fn login_accepts_case_insensitive_username() {
        let state = crate::test_support::test_state();
        let response = login(
            State(state),
            Json(LoginRequest {
                username: "dae".to_string(),
                password: "guardianes2025".to_string(),
            }),
        )
        .await
        .unwrap();
        assert!(!response.0.token.is_empty());
    }

    #[tokio::test]
    async fn login_rejects_bad_password() {
        let state = crate::test_support::test_state();
        let err = login(
            State(state),
            Json(LoginRequest {
                username: "DAE".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let state = crate::test_support::test_state();
        let err = login(
            State(state),
            Json(LoginRequest {
                username: "DAE".to_string(),
                password: "   ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn issued_token_resolves_to_operator() {
        let state = crate::test_support::test_state();
        let response = login(
            State(state.clone()),
            Json(LoginRequest {
                username: "DAE".to_string(),
                password: "guardianes2025".to_string(),
            }),
        )
        .await
        .unwrap();
        let username = state.auth.resolve(&response.0.token).await.unwrap();
        assert_eq!(username, "DAE");
    }
}
