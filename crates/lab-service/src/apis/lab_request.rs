//! `POST /api/lab-requests`: records a lab request and forwards it to the
//! FHIR server.

use super::ApiError;
use lab_core::{SubmissionError, SubmissionHandler};
use lab_types::{LabRequest, LabRequestResponse};

impl From<SubmissionError> for ApiError {
	fn from(err: SubmissionError) -> Self {
		match err {
			SubmissionError::Validation(message) => ApiError::BadRequest(message),
			SubmissionError::Storage(_) => {
				ApiError::Internal("Failed to create lab request".to_string())
			},
		}
	}
}

/// Submits a lab request.
///
/// A FHIR failure still answers with the local request id; the message tells
/// the two cases apart.
///
/// # Errors
///
/// `BadRequest` for incomplete requests, `Internal` when nothing could be
/// recorded.
pub async fn create_lab_request(
	submissions: &SubmissionHandler,
	request: LabRequest,
) -> Result<LabRequestResponse, ApiError> {
	let outcome = submissions.submit(request).await.map_err(|e| {
		tracing::warn!(error = %e, "Lab request rejected");
		ApiError::from(e)
	})?;

	let message = match (&outcome.remote_order_ref, &outcome.remote_warning) {
		(Some(_), None) => "Lab request created successfully",
		(Some(_), Some(_)) => "Lab request created; FHIR reference not saved locally",
		(None, _) => "Lab request recorded; FHIR server unavailable",
	}
	.to_string();

	Ok(LabRequestResponse {
		message,
		request_id: outcome.order.local_id,
		patient_id: outcome.order.patient_ref,
		fhir_id: outcome.remote_order_ref,
	})
}
