//! Client side of the remote FHIR resource server.
//!
//! The server owns two kinds of resources the dashboard cares about: the
//! order (`ServiceRequest`) created for each local order, and the reports
//! (`DiagnosticReport`) a laboratory publishes against it. Implementations of
//! [`RemoteResourceInterface`] fetch those; [`RemoteService`] bounds every
//! call with a timeout.

use async_trait::async_trait;
use lab_types::{
	ActiveRemoteOrder, CandidateReport, ConfigSchema, ImplementationRegistry, NewRemoteOrder,
	NewRemoteReport, RemoteOrderRecord,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod fhir;
	pub mod memory;
}

/// Errors that can occur while talking to the remote server.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
	/// Transport failure, timeout or server error.
	#[error("Remote unavailable: {0}")]
	Unavailable(String),
	/// The requested resource does not exist on the server.
	#[error("Not found: {0}")]
	NotFound(String),
	/// The server answered with something that is not the expected resource.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// The implementation's configuration table was rejected.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Operations a remote resource server must provide.
///
/// The ordering side creates orders and reads back their status and reports;
/// the performing laboratory lists open orders, publishes reports and closes
/// orders.
#[async_trait]
pub trait RemoteResourceInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// All reports that reference the given remote order.
	///
	/// An unknown order yields an empty list rather than `NotFound`.
	async fn find_reports_by_order(
		&self,
		order_ref: &str,
	) -> Result<Vec<CandidateReport>, RemoteError>;

	/// Reads one remote order.
	///
	/// # Errors
	///
	/// `NotFound` when the server has no order with this id.
	async fn get_order(&self, order_ref: &str) -> Result<RemoteOrderRecord, RemoteError>;

	/// Creates the remote order and returns its id.
	async fn create_order(&self, order: &NewRemoteOrder) -> Result<String, RemoteError>;

	/// Every order whose status is `active`.
	async fn list_active_orders(&self) -> Result<Vec<ActiveRemoteOrder>, RemoteError>;

	/// Publishes a report for `report.order_ref` and returns the report id.
	async fn create_report(&self, report: &NewRemoteReport) -> Result<String, RemoteError>;

	/// Marks an order `completed`.
	///
	/// # Errors
	///
	/// `NotFound` when the server has no order with this id.
	async fn complete_order(&self, order_ref: &str) -> Result<(), RemoteError>;
}

/// Type alias for remote factory functions.
pub type RemoteFactory =
	fn(&toml::Value) -> Result<Box<dyn RemoteResourceInterface>, RemoteError>;

/// Registry trait for remote implementations.
pub trait RemoteRegistry: ImplementationRegistry<Factory = RemoteFactory> {}

/// Every remote implementation as `(config name, factory)`.
pub fn get_all_implementations() -> Vec<(&'static str, RemoteFactory)> {
	use implementations::{fhir, memory};

	vec![
		(fhir::Registry::NAME, fhir::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// The configured remote implementation with a per-call time limit.
///
/// Every call, whatever the implementation, either completes within
/// `call_timeout` or fails with [`RemoteError::Unavailable`].
pub struct RemoteService {
	/// The primary implementation selected in `[remote]`.
	implementation: Box<dyn RemoteResourceInterface>,
	/// Upper bound on each individual call.
	call_timeout: Duration,
}

impl RemoteService {
	/// Wraps an implementation.
	///
	/// # Arguments
	///
	/// * `implementation` - The remote implementation to delegate to
	/// * `call_timeout` - Time limit applied to every call
	pub fn new(implementation: Box<dyn RemoteResourceInterface>, call_timeout: Duration) -> Self {
		Self {
			implementation,
			call_timeout,
		}
	}

	/// Reports linked to an order; an unknown order has none.
	pub async fn find_reports_by_order(
		&self,
		order_ref: &str,
	) -> Result<Vec<CandidateReport>, RemoteError> {
		match self
			.bounded(
				"find_reports_by_order",
				self.implementation.find_reports_by_order(order_ref),
			)
			.await
		{
			Err(RemoteError::NotFound(_)) => Ok(Vec::new()),
			other => other,
		}
	}

	/// Reads one remote order.
	pub async fn get_order(&self, order_ref: &str) -> Result<RemoteOrderRecord, RemoteError> {
		self.bounded("get_order", self.implementation.get_order(order_ref))
			.await
	}

	/// Creates a remote order and returns its id.
	pub async fn create_order(&self, order: &NewRemoteOrder) -> Result<String, RemoteError> {
		self.bounded("create_order", self.implementation.create_order(order))
			.await
	}

	/// Lists the orders still waiting for results.
	pub async fn list_active_orders(&self) -> Result<Vec<ActiveRemoteOrder>, RemoteError> {
		self.bounded(
			"list_active_orders",
			self.implementation.list_active_orders(),
		)
		.await
	}

	/// Publishes a report and returns its id.
	pub async fn create_report(&self, report: &NewRemoteReport) -> Result<String, RemoteError> {
		self.bounded("create_report", self.implementation.create_report(report))
			.await
	}

	/// Marks an order `completed`.
	pub async fn complete_order(&self, order_ref: &str) -> Result<(), RemoteError> {
		self.bounded("complete_order", self.implementation.complete_order(order_ref))
			.await
	}

	async fn bounded<T>(
		&self,
		operation: &str,
		call: impl Future<Output = Result<T, RemoteError>>,
	) -> Result<T, RemoteError> {
		match tokio::time::timeout(self.call_timeout, call).await {
			Ok(result) => result,
			Err(_) => {
				tracing::debug!(operation, timeout = ?self.call_timeout, "Remote call timed out");
				Err(RemoteError::Unavailable(format!(
					"{} timed out after {}s",
					operation,
					self.call_timeout.as_secs_f64()
				)))
			},
		}
	}
}
