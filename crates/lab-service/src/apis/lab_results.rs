//! Laboratory side of the API.
//!
//! `GET /api/lab-requests` lists open orders on the FHIR server and
//! `POST /api/lab-results` answers one with a report.

use super::ApiError;
use lab_core::{ResultsError, ResultsHandler};
use lab_types::{LabRequestList, LabRequestListing, LabResultResponse, LabResultSubmission};

impl From<ResultsError> for ApiError {
	fn from(err: ResultsError) -> Self {
		match err {
			ResultsError::Validation(message) => ApiError::BadRequest(message),
			ResultsError::UnknownRequest(id) => {
				ApiError::NotFound(format!("Lab request {} not found", id))
			},
			ResultsError::Remote(_) => ApiError::Internal("Failed to submit lab results".to_string()),
		}
	}
}

/// Lists the lab requests awaiting results.
///
/// # Errors
///
/// `Internal` when the FHIR server cannot be searched.
pub async fn list_lab_requests(results: &ResultsHandler) -> Result<LabRequestList, ApiError> {
	let orders = results.list_active_requests().await.map_err(|e| {
		tracing::error!(error = %e, "Lab request listing failed");
		ApiError::Internal("Failed to fetch lab requests".to_string())
	})?;

	Ok(LabRequestList {
		lab_requests: orders.into_iter().map(LabRequestListing::from).collect(),
	})
}

/// Publishes lab results.
///
/// # Errors
///
/// `BadRequest` for incomplete submissions, `NotFound` for unknown requests
/// and `Internal` when the report cannot be created.
pub async fn submit_lab_results(
	results: &ResultsHandler,
	submission: LabResultSubmission,
) -> Result<LabResultResponse, ApiError> {
	let outcome = results.submit(submission).await.map_err(|e| {
		tracing::warn!(error = %e, "Lab results rejected");
		ApiError::from(e)
	})?;

	let message = match outcome.warning {
		None => "Lab results submitted successfully",
		Some(_) => "Lab results submitted; lab request not marked completed",
	};

	Ok(LabResultResponse {
		message: message.to_string(),
		request_id: outcome.request_id,
		fhir_id: outcome.report_id,
		order_completed: outcome.order_completed,
	})
}
