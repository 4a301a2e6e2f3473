use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt::Display;

use crate::geodata::GeodataError;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn internal_error(err: impl Display) -> (StatusCode, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

pub fn map_geodata_error(err: GeodataError) -> (StatusCode, String) {
    let status = match &err {
        GeodataError::MissingShapefile
        | GeodataError::Archive(_)
        | GeodataError::UnsupportedCrs(_) => StatusCode::BAD_REQUEST,
        GeodataError::Shapefile(_)
        | GeodataError::Dbase(_)
        | GeodataError::Projection(_)
        | GeodataError::Geometry(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GeodataError::Download(_) => StatusCode::BAD_GATEWAY,
        GeodataError::Field(_) | GeodataError::Io(_) | GeodataError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    tracing::error!(error = %err, status = %status, "geodata error");

    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Internal server error".to_string()
    } else {
        format!("Failed to process shapefile: {err}")
    };

    (status, message)
}
