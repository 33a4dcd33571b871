//! Resource types observed on the remote FHIR server.
//!
//! These records only live for the duration of a reconciliation pass. Status
//! values are parsed into enums so that downstream code matches on structure
//! rather than text, while unknown codes survive verbatim in `Other`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an order (`ServiceRequest.status`) on the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteOrderStatus {
	Draft,
	Active,
	OnHold,
	Completed,
	Cancelled,
	EnteredInError,
	Revoked,
	Unknown,
	/// A status code this crate does not know about.
	Other(String),
}

impl RemoteOrderStatus {
	/// Returns the FHIR code for this status.
	pub fn as_str(&self) -> &str {
		match self {
			Self::Draft => "draft",
			Self::Active => "active",
			Self::OnHold => "on-hold",
			Self::Completed => "completed",
			Self::Cancelled => "cancelled",
			Self::EnteredInError => "entered-in-error",
			Self::Revoked => "revoked",
			Self::Unknown => "unknown",
			Self::Other(code) => code,
		}
	}

	/// Whether no further report is expected for an order in this status.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::Completed | Self::Cancelled | Self::EnteredInError | Self::Revoked
		)
	}
}

impl FromStr for RemoteOrderStatus {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"draft" => Self::Draft,
			"active" => Self::Active,
			"on-hold" => Self::OnHold,
			"completed" => Self::Completed,
			"cancelled" => Self::Cancelled,
			"entered-in-error" => Self::EnteredInError,
			"revoked" => Self::Revoked,
			"unknown" => Self::Unknown,
			other => Self::Other(other.to_string()),
		})
	}
}

impl From<String> for RemoteOrderStatus {
	fn from(value: String) -> Self {
		match value.parse() {
			Ok(status) => status,
			Err(never) => match never {},
		}
	}
}

impl From<RemoteOrderStatus> for String {
	fn from(value: RemoteOrderStatus) -> Self {
		value.as_str().to_string()
	}
}

impl fmt::Display for RemoteOrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Status of a report (`DiagnosticReport.status`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReportStatus {
	Registered,
	Partial,
	Preliminary,
	Final,
	Amended,
	Corrected,
	Appended,
	Cancelled,
	EnteredInError,
	Unknown,
	Other(String),
}

impl ReportStatus {
	/// Returns the FHIR code for this status.
	pub fn as_str(&self) -> &str {
		match self {
			Self::Registered => "registered",
			Self::Partial => "partial",
			Self::Preliminary => "preliminary",
			Self::Final => "final",
			Self::Amended => "amended",
			Self::Corrected => "corrected",
			Self::Appended => "appended",
			Self::Cancelled => "cancelled",
			Self::EnteredInError => "entered-in-error",
			Self::Unknown => "unknown",
			Self::Other(code) => code,
		}
	}
}

impl FromStr for ReportStatus {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"registered" => Self::Registered,
			"partial" => Self::Partial,
			"preliminary" => Self::Preliminary,
			"final" => Self::Final,
			"amended" => Self::Amended,
			"corrected" => Self::Corrected,
			"appended" => Self::Appended,
			"cancelled" => Self::Cancelled,
			"entered-in-error" => Self::EnteredInError,
			"unknown" => Self::Unknown,
			other => Self::Other(other.to_string()),
		})
	}
}

impl From<String> for ReportStatus {
	fn from(value: String) -> Self {
		match value.parse() {
			Ok(status) => status,
			Err(never) => match never {},
		}
	}
}

impl From<ReportStatus> for String {
	fn from(value: ReportStatus) -> Self {
		value.as_str().to_string()
	}
}

impl fmt::Display for ReportStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Order record fetched by reference from the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrderRecord {
	/// Id of the `ServiceRequest`.
	pub remote_id: String,
	pub status: RemoteOrderStatus,
}

/// A report the remote server links to an order.
///
/// Several may exist for one order (partial releases, revisions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
	/// Id of the `DiagnosticReport`.
	pub remote_id: String,
	pub status: ReportStatus,
	/// When the report was released.
	pub issued_at: Option<DateTime<Utc>>,
	/// Clinically relevant time, e.g. when the sample was taken.
	pub effective_at: Option<DateTime<Utc>>,
	pub conclusion: Option<String>,
	/// `subject.display` as recorded by the reporting party.
	pub subject_display: Option<String>,
	/// `result[].display` lines, in server order.
	pub result_lines: Vec<String>,
}

impl CandidateReport {
	/// Creates a bare report with the given id and status.
	pub fn new(remote_id: impl Into<String>, status: ReportStatus) -> Self {
		Self {
			remote_id: remote_id.into(),
			status,
			issued_at: None,
			effective_at: None,
			conclusion: None,
			subject_display: None,
			result_lines: Vec::new(),
		}
	}

	/// The clinically relevant time of the report: effective, else issued.
	pub fn effective_or_issued(&self) -> Option<DateTime<Utc>> {
		self.effective_at.or(self.issued_at)
	}
}

/// Payload for creating an order on the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteOrder {
	/// Local id, carried as the `HIS-LR-{id}` business identifier.
	pub local_id: u64,
	pub patient_ref: String,
	pub patient_name: String,
	pub doctor_name: String,
	pub tests: Vec<crate::TestItem>,
	pub demographics: crate::Demographics,
}

/// An open order as the performing laboratory sees it on the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRemoteOrder {
	/// Id of the `ServiceRequest`.
	pub remote_id: String,
	pub status: RemoteOrderStatus,
	/// `subject.display`, or `"Unknown"`.
	pub patient_name: String,
	/// `subject.identifier.value`, or `"Unknown"`.
	pub patient_ref: String,
	/// `requester.display`, or `"Unknown"`.
	pub doctor_name: String,
	pub tests: Vec<crate::TestItem>,
	/// Extensions as sent by the ordering system (age, gender, weight).
	pub extensions: Vec<serde_json::Value>,
}

/// Payload for publishing a report against a remote order.
///
/// The created report references the order through `basedOn`, which is what
/// report lookups by order search on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemoteReport {
	/// Id of the `ServiceRequest` the report answers.
	pub order_ref: String,
	pub status: ReportStatus,
	pub patient_name: Option<String>,
	pub conclusion: Option<String>,
	/// One display line per measured value.
	pub result_lines: Vec<String>,
	/// Used as both the effective and the issued time.
	pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_terminal_statuses() {
		for code in ["completed", "cancelled", "entered-in-error", "revoked"] {
			let status: RemoteOrderStatus = code.parse().unwrap();
			assert!(status.is_terminal(), "{} should be terminal", code);
		}
		for code in ["active", "on-hold", "draft", "unknown", "something-new"] {
			let status: RemoteOrderStatus = code.parse().unwrap();
			assert!(!status.is_terminal(), "{} should not be terminal", code);
		}
	}

	#[test]
	fn test_unknown_codes_are_preserved() {
		let status: ReportStatus = "pending-review".parse().unwrap();
		assert_eq!(status, ReportStatus::Other("pending-review".to_string()));
		assert_eq!(status.to_string(), "pending-review");

		let json = serde_json::to_string(&RemoteOrderStatus::OnHold).unwrap();
		assert_eq!(json, "\"on-hold\"");
		let back: RemoteOrderStatus = serde_json::from_str(&json).unwrap();
		assert_eq!(back, RemoteOrderStatus::OnHold);
	}

	#[test]
	fn test_effective_falls_back_to_issued() {
		let issued = "2024-03-05T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
		let mut report = CandidateReport::new("r1", ReportStatus::Final);
		assert_eq!(report.effective_or_issued(), None);

		report.issued_at = Some(issued);
		assert_eq!(report.effective_or_issued(), Some(issued));

		let effective = "2024-03-04T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
		report.effective_at = Some(effective);
		assert_eq!(report.effective_or_issued(), Some(effective));
	}
}
