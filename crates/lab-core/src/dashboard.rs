//! Loading the results dashboard.

use crate::engine::ReconciliationEngine;
use lab_storage::OrderStore;
use lab_types::DashboardItem;
use std::sync::Arc;
use thiserror::Error;

/// Errors that prevent the dashboard from loading.
#[derive(Debug, Error)]
pub enum DashboardError {
	/// The local order store could not be read; nothing can be shown.
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Narrows the dashboard down to matching patients.
#[derive(Debug, Clone, Default)]
pub struct DashboardFilter {
	/// Case-insensitive substring of the patient name.
	pub search: Option<String>,
}

impl DashboardFilter {
	/// Filter on a patient name fragment.
	pub fn search(text: impl Into<String>) -> Self {
		Self {
			search: Some(text.into()),
		}
	}

	fn needle(&self) -> Option<String> {
		self.search
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_lowercase)
	}

	/// True when the item's local or reported patient name matches.
	pub fn matches(&self, item: &DashboardItem) -> bool {
		match self.needle() {
			None => true,
			Some(needle) => [item.order().patient_name.as_str(), item.display_patient_name()]
				.iter()
				.any(|name| name.to_lowercase().contains(&needle)),
		}
	}
}

/// Keeps the items `filter` matches, preserving their order.
pub fn filter_items(items: Vec<DashboardItem>, filter: &DashboardFilter) -> Vec<DashboardItem> {
	items.into_iter().filter(|item| filter.matches(item)).collect()
}

/// Read side of the dashboard: stored orders reconciled against the remote
/// server.
pub struct DashboardService {
	orders: Arc<OrderStore>,
	engine: ReconciliationEngine,
}

impl DashboardService {
	/// Creates a new dashboard service.
	///
	/// # Arguments
	///
	/// * `orders` - Local order table to read from
	/// * `engine` - Engine reconciling each order with the remote server
	pub fn new(orders: Arc<OrderStore>, engine: ReconciliationEngine) -> Self {
		Self { orders, engine }
	}

	/// Reconciles every stored order, most recent first, and applies `filter`.
	///
	/// Filtering happens after reconciliation so that the reported patient
	/// name can match as well.
	///
	/// # Errors
	///
	/// `Storage` when the order table cannot be read. Remote failures never
	/// fail the pass; they show up as items.
	pub async fn load(&self, filter: &DashboardFilter) -> Result<Vec<DashboardItem>, DashboardError> {
		let orders = self
			.orders
			.list_recent_first()
			.await
			.map_err(|e| DashboardError::Storage(e.to_string()))?;

		let items = self.engine.reconcile(&orders).await;
		let items = filter_items(items, filter);
		tracing::info!(orders = orders.len(), shown = items.len(), "Dashboard loaded");
		Ok(items)
	}
}
