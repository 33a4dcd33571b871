//! `GET /api/dashboard`: reconciled lab results, most recent first.

use super::ApiError;
use lab_core::{DashboardError, DashboardFilter, DashboardService};
use lab_types::{DashboardItem, StatusBucket};
use serde::{Deserialize, Serialize};

/// Query string of `GET /api/dashboard`.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
	/// Patient name search text.
	pub search: Option<String>,
}

/// A dashboard item annotated with its display bucket.
#[derive(Debug, Serialize)]
pub struct DashboardEntry {
	#[serde(flatten)]
	pub item: DashboardItem,
	pub bucket: StatusBucket,
}

impl From<DashboardItem> for DashboardEntry {
	fn from(item: DashboardItem) -> Self {
		let bucket = item.bucket();
		Self { item, bucket }
	}
}

/// Body of `GET /api/dashboard`.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
	pub items: Vec<DashboardEntry>,
}

impl From<DashboardError> for ApiError {
	fn from(err: DashboardError) -> Self {
		match err {
			DashboardError::Storage(_) => {
				ApiError::Internal("Failed to load lab results".to_string())
			},
		}
	}
}

/// Runs a dashboard pass.
///
/// # Errors
///
/// `Internal` when the local order store cannot be read.
pub async fn get_dashboard(
	dashboard: &DashboardService,
	query: DashboardQuery,
) -> Result<DashboardResponse, ApiError> {
	let filter = DashboardFilter {
		search: query.search,
	};

	let items = dashboard.load(&filter).await.map_err(|e| {
		tracing::error!(error = %e, "Dashboard pass failed");
		ApiError::from(e)
	})?;

	Ok(DashboardResponse {
		items: items.into_iter().map(DashboardEntry::from).collect(),
	})
}
