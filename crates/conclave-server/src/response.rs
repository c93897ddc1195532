//! `ApiResponse<T>` envelope (spec §6), grounded on `restflow-server/src/
//! api/response.rs`'s `{success, data, message}` shape, extended with a
//! real HTTP status code instead of always answering 200 — this surface's
//! callers need 404/400/403 to tell "not found" from "rejected" from
//! "wrong role" (spec §6 "404 if workflow unknown", "403 if role
//! mismatch").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            status: StatusCode::OK,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            status: StatusCode::CREATED,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            status: StatusCode::OK,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            status: StatusCode::FORBIDDEN,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(()),
            message: Some(message.into()),
            status: StatusCode::OK,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

/// Maps a `conclave_core::CoreError` onto the right status code: a
/// `NotFound` becomes 404, a `Validation` becomes 400 (spec §6 "400 for
/// validation errors ... 404 for unknown ids"), everything else 500.
impl<T: Serialize> From<conclave_core::CoreError> for ApiResponse<T> {
    fn from(error: conclave_core::CoreError) -> Self {
        match error {
            conclave_core::CoreError::NotFound(msg) => ApiResponse::not_found(msg),
            conclave_core::CoreError::Validation(e) => ApiResponse::bad_request(e.to_string()),
            other => ApiResponse::server_error(other.to_string()),
        }
    }
}
