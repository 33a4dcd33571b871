//! Lab result publication, the performing laboratory's side.
//!
//! The laboratory lists the open orders on the remote server, then answers
//! one with a report. Publishing the report and closing the order are two
//! remote writes; once the report exists the submission counts as done even
//! if closing the order fails.

use chrono::{DateTime, Utc};
use lab_remote::{RemoteError, RemoteService};
use lab_types::{
	truncate_id, ActiveRemoteOrder, LabResultSubmission, NewRemoteReport, ReportStatus,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors that reject a result submission or listing.
#[derive(Debug, Error)]
pub enum ResultsError {
	/// Request id or test results are missing.
	#[error("Validation error: {0}")]
	Validation(String),
	/// The remote server has no order with the given id.
	#[error("Unknown lab request: {0}")]
	UnknownRequest(String),
	#[error("Remote error: {0}")]
	Remote(String),
}

/// Result of a published report.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsOutcome {
	/// Remote order the report answers.
	pub request_id: String,
	/// Id of the created report.
	pub report_id: String,
	/// Whether the order was marked completed.
	pub order_completed: bool,
	pub warning: Option<String>,
}

/// Publishes lab results against open remote orders.
pub struct ResultsHandler {
	remote: Arc<RemoteService>,
}

impl ResultsHandler {
	/// Creates a handler publishing through `remote`.
	pub fn new(remote: Arc<RemoteService>) -> Self {
		Self { remote }
	}

	/// Open orders awaiting results.
	///
	/// # Errors
	///
	/// `Remote` when the remote server cannot be listed.
	pub async fn list_active_requests(&self) -> Result<Vec<ActiveRemoteOrder>, ResultsError> {
		let orders = self
			.remote
			.list_active_orders()
			.await
			.map_err(|e| ResultsError::Remote(e.to_string()))?;
		tracing::debug!(count = orders.len(), "Listed active lab requests");
		Ok(orders)
	}

	/// Same as [`submit_at`](Self::submit_at) at the current time.
	pub async fn submit(
		&self,
		submission: LabResultSubmission,
	) -> Result<ResultsOutcome, ResultsError> {
		self.submit_at(submission, Utc::now()).await
	}

	/// Publishes a report for `submission.request_id` and completes the order.
	///
	/// # Arguments
	///
	/// * `submission` - Results as entered by the laboratory
	/// * `now` - Effective and issued time of the report
	///
	/// # Errors
	///
	/// Returns `Validation` without touching the remote server when the
	/// request id or the results are missing, `UnknownRequest` when the order
	/// does not exist, and `Remote` when the report cannot be created.
	pub async fn submit_at(
		&self,
		submission: LabResultSubmission,
		now: DateTime<Utc>,
	) -> Result<ResultsOutcome, ResultsError> {
		let request_id = match submission.request_id.as_deref().map(str::trim) {
			Some(id) if !id.is_empty() && !submission.test_results.is_empty() => id.to_string(),
			_ => return Err(ResultsError::Validation("Missing required fields".into())),
		};

		match self.remote.get_order(&request_id).await {
			Ok(record) if record.status.is_terminal() => {
				tracing::warn!(
					request_id = %request_id,
					remote_status = %record.status,
					"Publishing results for a closed order"
				);
			},
			Ok(_) => {},
			Err(RemoteError::NotFound(_)) => {
				return Err(ResultsError::UnknownRequest(request_id));
			},
			Err(e) => return Err(ResultsError::Remote(e.to_string())),
		}

		let report = NewRemoteReport {
			order_ref: request_id.clone(),
			status: submission
				.status
				.map(ReportStatus::from)
				.unwrap_or(ReportStatus::Final),
			patient_name: submission.patient_name,
			conclusion: submission.conclusion,
			result_lines: submission
				.test_results
				.iter()
				.map(|result| result.display_line())
				.collect(),
			issued_at: now,
		};

		let report_id = self
			.remote
			.create_report(&report)
			.await
			.map_err(|e| ResultsError::Remote(e.to_string()))?;
		tracing::info!(
			request_id = %request_id,
			report_id = %truncate_id(&report_id),
			status = %report.status,
			results = report.result_lines.len(),
			"Lab results published"
		);

		let warning = match self.remote.complete_order(&request_id).await {
			Ok(()) => None,
			Err(e) => {
				tracing::error!(
					request_id = %request_id,
					report_id = %report_id,
					error = %e,
					"Report published but order not completed"
				);
				Some(format!("Order not marked completed: {}", e))
			},
		};

		Ok(ResultsOutcome {
			request_id,
			report_id,
			order_completed: warning.is_none(),
			warning,
		})
	}
}
