//! Reconciliation of local orders against the remote server.
//!
//! Every order is evaluated independently: orders without a remote
//! reference are reported as such, otherwise the reports linked to the remote
//! order are fetched and the best one chosen; only when none qualifies is the
//! remote order itself consulted. A pass never fails as a whole; remote
//! problems degrade the affected order's item only.

pub mod selection;

use self::selection::{select_report, summarize_report};
use futures::future::join_all;
use lab_remote::RemoteService;
use lab_types::{DashboardItem, Order, OrderSummary};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{instrument, Instrument};

/// Turns local orders into dashboard items by querying the remote server.
///
/// Cheap to clone; clones share the remote service.
#[derive(Clone)]
pub struct ReconciliationEngine {
	remote: Arc<RemoteService>,
	/// Orders evaluated at the same time, at least 1.
	max_concurrency: usize,
}

impl ReconciliationEngine {
	/// Creates a new engine.
	///
	/// # Arguments
	///
	/// * `remote` - Remote server queried for reports and order status
	/// * `max_concurrency` - Upper bound on orders evaluated in parallel; 0 is
	///   treated as 1
	pub fn new(remote: Arc<RemoteService>, max_concurrency: usize) -> Self {
		Self {
			remote,
			max_concurrency: max_concurrency.max(1),
		}
	}

	/// Produces one item per order, in the order given.
	///
	/// At most `max_concurrency` orders are evaluated at the same time. Never
	/// fails: an order whose evaluation panics or whose remote calls fail
	/// becomes a `RemoteCommError` item.
	pub async fn reconcile(&self, orders: &[Order]) -> Vec<DashboardItem> {
		let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
		let span = tracing::Span::current();

		let handles = orders.iter().cloned().enumerate().map(|(index, order)| {
			let engine = self.clone();
			let semaphore = Arc::clone(&semaphore);
			let summary = OrderSummary::from(&order);
			let task = tokio::spawn(
				async move {
					// The semaphore is never closed.
					let _permit = semaphore.acquire_owned().await.ok();
					engine.evaluate(&order).await
				}
				.instrument(span.clone()),
			);
			async move {
				match task.await {
					Ok(item) => (index, item),
					Err(e) => {
						tracing::error!(order_id = summary.local_id, error = %e, "Order evaluation aborted");
						(
							index,
							DashboardItem::RemoteCommError {
								order: summary,
								error: format!("evaluation failed: {}", e),
							},
						)
					},
				}
			}
		});

		let mut results = join_all(handles).await;
		results.sort_by_key(|(index, _)| *index);

		let items: Vec<DashboardItem> = results.into_iter().map(|(_, item)| item).collect();
		tracing::debug!(orders = items.len(), "Reconciliation pass complete");
		items
	}

	/// Classifies a single order.
	///
	/// Reports are consulted first; the order status is only fetched when no
	/// report qualifies.
	#[instrument(skip_all, fields(order_id = order.local_id))]
	pub async fn evaluate(&self, order: &Order) -> DashboardItem {
		let summary = OrderSummary::from(order);

		let Some(order_ref) = order
			.remote_order_ref
			.as_deref()
			.filter(|r| !r.trim().is_empty())
		else {
			return DashboardItem::PendingNoRemoteRef { order: summary };
		};

		let candidates = match self.remote.find_reports_by_order(order_ref).await {
			Ok(candidates) => candidates,
			Err(e) => {
				tracing::warn!(remote_ref = %order_ref, error = %e, "Report lookup failed");
				Vec::new()
			},
		};

		if let Some(report) = select_report(&candidates) {
			tracing::debug!(report_id = %report.remote_id, status = %report.status, "Report selected");
			return DashboardItem::Result {
				order: summary,
				report: summarize_report(report, order),
			};
		}

		match self.remote.get_order(order_ref).await {
			Ok(record) if record.status.is_terminal() => {
				tracing::warn!(
					remote_ref = %order_ref,
					remote_status = %record.status,
					"Remote order is closed but has no report"
				);
				DashboardItem::CompletedNoReport {
					order: summary,
					remote_status: record.status,
				}
			},
			Ok(record) => DashboardItem::PendingRemoteActive {
				order: summary,
				remote_status: record.status,
			},
			Err(e) => {
				tracing::warn!(remote_ref = %order_ref, error = %e, "Remote order lookup failed");
				DashboardItem::RemoteCommError {
					order: summary,
					error: e.to_string(),
				}
			},
		}
	}
}
