//! HTTP endpoint implementations.

pub mod dashboard;
pub mod lab_request;
pub mod lab_results;

use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use lab_types::ErrorResponse;
use thiserror::Error;

/// Error returned by any endpoint, rendered as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
	/// 400 Bad Request
	#[error("{0}")]
	BadRequest(String),
	/// 404 Not Found
	#[error("{0}")]
	NotFound(String),
	/// 500 Internal Server Error
	#[error("{0}")]
	Internal(String),
}

impl ApiError {
	/// HTTP status the error is rendered with.
	pub fn status_code(&self) -> StatusCode {
		match self {
			ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		let body = ErrorResponse {
			error: self.to_string(),
		};
		(status, Json(body)).into_response()
	}
}
