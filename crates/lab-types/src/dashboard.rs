//! Dashboard output types.
//!
//! A [`DashboardItem`] is built fresh for every order on every reconciliation
//! pass and is never persisted. It serializes with a stable `type` tag that
//! presentation code matches on.

use crate::{Order, RemoteOrderStatus, ReportStatus, TestItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display fields shared by every dashboard item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
	/// Local order id.
	pub local_id: u64,
	pub patient_ref: String,
	pub patient_name: String,
	pub doctor_name: String,
	pub tests: Vec<TestItem>,
	/// Sort key of the dashboard; items are listed most recent first.
	pub requested_at: DateTime<Utc>,
	pub remote_order_ref: Option<String>,
}

impl From<&Order> for OrderSummary {
	fn from(order: &Order) -> Self {
		Self {
			local_id: order.local_id,
			patient_ref: order.patient_ref.clone(),
			patient_name: order.patient_name.clone(),
			doctor_name: order.doctor_name.clone(),
			tests: order.ordered_tests.clone(),
			requested_at: order.requested_at,
			remote_order_ref: order.remote_order_ref.clone(),
		}
	}
}

/// The report chosen for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
	pub report_id: String,
	/// Subject name from the report, else the locally recorded name.
	pub patient_name: String,
	pub status: ReportStatus,
	/// Free-text rendering of `status`, kept for display only.
	pub status_message: String,
	pub conclusion: Option<String>,
	pub effective_date: Option<DateTime<Utc>>,
	pub result_lines: Vec<String>,
	pub results_display: String,
}

/// Reconciled state of one local order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardItem {
	/// The order never reached the remote server, or its reference was lost.
	PendingNoRemoteRef {
		#[serde(flatten)]
		order: OrderSummary,
	},
	/// A report was found for the order.
	Result {
		#[serde(flatten)]
		order: OrderSummary,
		report: ReportSummary,
	},
	/// No report yet and the remote order is still open.
	PendingRemoteActive {
		#[serde(flatten)]
		order: OrderSummary,
		remote_status: RemoteOrderStatus,
	},
	/// The remote order reached a terminal status without any report.
	CompletedNoReport {
		#[serde(flatten)]
		order: OrderSummary,
		remote_status: RemoteOrderStatus,
	},
	/// The remote server could not be asked about this order.
	RemoteCommError {
		#[serde(flatten)]
		order: OrderSummary,
		error: String,
	},
}

impl DashboardItem {
	/// The order this item describes.
	pub fn order(&self) -> &OrderSummary {
		match self {
			Self::PendingNoRemoteRef { order }
			| Self::Result { order, .. }
			| Self::PendingRemoteActive { order, .. }
			| Self::CompletedNoReport { order, .. }
			| Self::RemoteCommError { order, .. } => order,
		}
	}

	/// The `type` discriminator as serialized.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::PendingNoRemoteRef { .. } => "pending_no_remote_ref",
			Self::Result { .. } => "result",
			Self::PendingRemoteActive { .. } => "pending_remote_active",
			Self::CompletedNoReport { .. } => "completed_no_report",
			Self::RemoteCommError { .. } => "remote_comm_error",
		}
	}

	/// Name to show for the patient, preferring the report's subject.
	pub fn display_patient_name(&self) -> &str {
		match self {
			Self::Result { report, .. } => &report.patient_name,
			other => &other.order().patient_name,
		}
	}

	/// Coarse UI bucket for this item.
	pub fn bucket(&self) -> StatusBucket {
		match self {
			Self::Result { report, .. } => StatusBucket::for_report(&report.status),
			Self::PendingNoRemoteRef { .. } | Self::PendingRemoteActive { .. } => {
				StatusBucket::Pending
			},
			Self::CompletedNoReport { .. } | Self::RemoteCommError { .. } => StatusBucket::Error,
		}
	}
}

/// Coarse state used to colour dashboard entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
	/// Results are released.
	Complete,
	/// Waiting on the laboratory.
	Pending,
	/// Needs attention: cancelled, closed without a report, or unreachable.
	Error,
}

impl StatusBucket {
	/// Maps a report status onto its bucket.
	///
	/// Statuses outside the table fall into `Complete`.
	pub fn for_report(status: &ReportStatus) -> Self {
		match status {
			ReportStatus::Final | ReportStatus::Amended | ReportStatus::Corrected => {
				Self::Complete
			},
			ReportStatus::Preliminary | ReportStatus::Partial | ReportStatus::Registered => {
				Self::Pending
			},
			ReportStatus::Cancelled | ReportStatus::EnteredInError => Self::Error,
			ReportStatus::Appended | ReportStatus::Unknown | ReportStatus::Other(_) => {
				Self::Complete
			},
		}
	}
}
