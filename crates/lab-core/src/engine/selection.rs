//! Choosing which report represents an order, and shaping it for display.

use chrono::{DateTime, Utc};
use lab_types::{CandidateReport, Order, ReportStatus, ReportSummary};
use std::cmp::Ordering;

/// Rank of a report status; lower is better. `None` means the report is
/// never shown (cancelled, entered-in-error, appended, unknown, ...).
pub fn report_priority(status: &ReportStatus) -> Option<u8> {
	match status {
		ReportStatus::Final | ReportStatus::Amended | ReportStatus::Corrected => Some(1),
		ReportStatus::Preliminary => Some(2),
		ReportStatus::Partial | ReportStatus::Registered => Some(3),
		_ => None,
	}
}

/// Picks the best candidate.
///
/// Best priority wins. Within a priority the most recent report (effective,
/// else issued time) wins, reports without any time come last, and the
/// lowest `remote_id` breaks what remains. The result does not depend on the
/// order the server listed the candidates in.
pub fn select_report(candidates: &[CandidateReport]) -> Option<&CandidateReport> {
	candidates
		.iter()
		.filter_map(|c| report_priority(&c.status).map(|p| (p, c)))
		.min_by(|(pa, a), (pb, b)| {
			pa.cmp(pb)
				.then_with(|| newest_first(a.effective_or_issued(), b.effective_or_issued()))
				.then_with(|| a.remote_id.cmp(&b.remote_id))
		})
		.map(|(_, c)| c)
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
	match (a, b) {
		(Some(a), Some(b)) => b.cmp(&a),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

/// Builds the display form of `report` for `order`.
///
/// The report's subject name wins over the locally recorded one unless it is
/// blank.
pub fn summarize_report(report: &CandidateReport, order: &Order) -> ReportSummary {
	let patient_name = report
		.subject_display
		.as_deref()
		.map(str::trim)
		.filter(|name| !name.is_empty())
		.unwrap_or(order.patient_name.as_str())
		.to_string();

	ReportSummary {
		report_id: report.remote_id.clone(),
		patient_name,
		status: report.status.clone(),
		status_message: report.status.to_string(),
		conclusion: report.conclusion.clone().filter(|c| !c.trim().is_empty()),
		effective_date: report.effective_or_issued(),
		result_lines: report.result_lines.clone(),
		results_display: report.result_lines.join("; "),
	}
}
