//! Core of the lab order dashboard.
//!
//! Reconciles locally recorded lab orders with what the remote FHIR server
//! knows about them, records new lab requests, publishes lab results on behalf
//! of the performing laboratory, and wires it all together from configuration.

pub mod builder;
pub mod dashboard;
pub mod engine;
pub mod handlers;

pub use builder::{BuilderError, LabBuilder, LabFactories};
pub use dashboard::{filter_items, DashboardError, DashboardFilter, DashboardService};
pub use engine::ReconciliationEngine;
pub use handlers::{
	ResultsError, ResultsHandler, ResultsOutcome, SubmissionError, SubmissionHandler,
	SubmissionOutcome,
};

use lab_config::Config;
use lab_remote::RemoteService;
use lab_storage::OrderStore;
use std::sync::Arc;

/// Everything the service layer needs, built by [`LabBuilder`].
#[derive(Clone)]
pub struct LabServices {
	/// Configuration the services were built from.
	pub config: Config,
	/// Local order table.
	pub orders: Arc<OrderStore>,
	/// Primary remote implementation with its call timeout.
	pub remote: Arc<RemoteService>,
	pub engine: ReconciliationEngine,
	/// Dashboard reads (load, reconcile, filter).
	pub dashboard: Arc<DashboardService>,
	/// Lab request submission, the ordering side.
	pub submissions: Arc<SubmissionHandler>,
	/// Lab result publication, the laboratory side.
	pub results: Arc<ResultsHandler>,
}
