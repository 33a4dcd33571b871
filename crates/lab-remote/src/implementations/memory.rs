//! In-process stand-in for the FHIR server.
//!
//! Holds orders and reports in memory, counts calls per operation and can be
//! told to fail an operation (globally or for one order) or to answer slowly.
//! Clones share state, so a test can keep a handle after boxing one into a
//! [`RemoteService`](crate::RemoteService).

use crate::{RemoteError, RemoteFactory, RemoteRegistry, RemoteResourceInterface};
use async_trait::async_trait;
use lab_types::{
	ActiveRemoteOrder, CandidateReport, ConfigSchema, Field, FieldType, ImplementationRegistry,
	NewRemoteOrder, NewRemoteReport, RemoteOrderRecord, RemoteOrderStatus, Schema, ValidationError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Operations that failures can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
	FindReports,
	GetOrder,
	CreateOrder,
	ListOrders,
	CreateReport,
	CompleteOrder,
}

#[derive(Default)]
struct State {
	/// Order status by remote id.
	orders: HashMap<String, RemoteOrderStatus>,
	/// Payload of orders created through `create_order`, by remote id.
	order_details: HashMap<String, NewRemoteOrder>,
	reports: HashMap<String, Vec<CandidateReport>>,
	created: Vec<NewRemoteOrder>,
	next_id: u64,
	next_report_id: u64,
	failures: HashMap<RemoteOperation, RemoteError>,
	/// Orders whose every lookup fails as unavailable.
	unreachable_refs: HashSet<String>,
	latency: Duration,
}

#[derive(Default)]
struct Inner {
	state: RwLock<State>,
	report_calls: AtomicUsize,
	order_calls: AtomicUsize,
	create_calls: AtomicUsize,
	in_flight: AtomicUsize,
	peak_in_flight: AtomicUsize,
}

/// In-memory remote server. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
	inner: Arc<Inner>,
}

impl MemoryRemote {
	/// Creates an empty server with no latency and no injected failures.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces an order with the given status.
	pub async fn seed_order(&self, order_ref: &str, status: RemoteOrderStatus) {
		let mut state = self.inner.state.write().await;
		state.orders.insert(order_ref.to_string(), status);
	}

	/// Attaches a report to an order, whether or not the order exists.
	pub async fn seed_report(&self, order_ref: &str, report: CandidateReport) {
		let mut state = self.inner.state.write().await;
		state
			.reports
			.entry(order_ref.to_string())
			.or_default()
			.push(report);
	}

	/// Makes every call of `operation` fail with `error`; `None` clears it.
	pub async fn fail(&self, operation: RemoteOperation, error: Option<RemoteError>) {
		let mut state = self.inner.state.write().await;
		match error {
			Some(error) => state.failures.insert(operation, error),
			None => state.failures.remove(&operation),
		};
	}

	/// Makes lookups for one order fail as unavailable.
	pub async fn make_unreachable(&self, order_ref: &str) {
		let mut state = self.inner.state.write().await;
		state.unreachable_refs.insert(order_ref.to_string());
	}

	/// Delays every subsequent call by `latency`.
	pub async fn set_latency(&self, latency: Duration) {
		self.inner.state.write().await.latency = latency;
	}

	/// Payloads received by `create_order`, oldest first.
	pub async fn created_orders(&self) -> Vec<NewRemoteOrder> {
		self.inner.state.read().await.created.clone()
	}

	/// Number of `find_reports_by_order` calls so far.
	pub fn report_calls(&self) -> usize {
		self.inner.report_calls.load(Ordering::SeqCst)
	}

	/// Number of `get_order` calls so far.
	pub fn order_calls(&self) -> usize {
		self.inner.order_calls.load(Ordering::SeqCst)
	}

	/// Number of `create_order` calls so far.
	pub fn create_calls(&self) -> usize {
		self.inner.create_calls.load(Ordering::SeqCst)
	}

	/// Highest number of calls that were in progress at the same time.
	pub fn peak_in_flight(&self) -> usize {
		self.inner.peak_in_flight.load(Ordering::SeqCst)
	}

	/// Applies latency and injected failures for one call.
	async fn prepare(
		&self,
		operation: RemoteOperation,
		order_ref: Option<&str>,
	) -> Result<(), RemoteError> {
		let (latency, failure) = {
			let state = self.inner.state.read().await;
			let failure = match order_ref {
				Some(r) if state.unreachable_refs.contains(r) => Some(RemoteError::Unavailable(
					format!("connection refused for {}", r),
				)),
				_ => state.failures.get(&operation).cloned(),
			};
			(state.latency, failure)
		};

		let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.inner.peak_in_flight.fetch_max(running, Ordering::SeqCst);
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
		self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

		match failure {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl RemoteResourceInterface for MemoryRemote {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryRemoteSchema)
	}

	async fn find_reports_by_order(
		&self,
		order_ref: &str,
	) -> Result<Vec<CandidateReport>, RemoteError> {
		self.inner.report_calls.fetch_add(1, Ordering::SeqCst);
		self.prepare(RemoteOperation::FindReports, Some(order_ref))
			.await?;

		let state = self.inner.state.read().await;
		Ok(state.reports.get(order_ref).cloned().unwrap_or_default())
	}

	async fn get_order(&self, order_ref: &str) -> Result<RemoteOrderRecord, RemoteError> {
		self.inner.order_calls.fetch_add(1, Ordering::SeqCst);
		self.prepare(RemoteOperation::GetOrder, Some(order_ref))
			.await?;

		let state = self.inner.state.read().await;
		state
			.orders
			.get(order_ref)
			.map(|status| RemoteOrderRecord {
				remote_id: order_ref.to_string(),
				status: status.clone(),
			})
			.ok_or_else(|| RemoteError::NotFound(format!("ServiceRequest/{}", order_ref)))
	}

	async fn create_order(&self, order: &NewRemoteOrder) -> Result<String, RemoteError> {
		self.inner.create_calls.fetch_add(1, Ordering::SeqCst);
		self.prepare(RemoteOperation::CreateOrder, None).await?;

		let mut state = self.inner.state.write().await;
		state.next_id += 1;
		let remote_id = format!("sr-{}", state.next_id);
		state
			.orders
			.insert(remote_id.clone(), RemoteOrderStatus::Active);
		state.order_details.insert(remote_id.clone(), order.clone());
		state.created.push(order.clone());
		Ok(remote_id)
	}

	async fn list_active_orders(&self) -> Result<Vec<ActiveRemoteOrder>, RemoteError> {
		self.prepare(RemoteOperation::ListOrders, None).await?;

		let state = self.inner.state.read().await;
		let mut active: Vec<ActiveRemoteOrder> = state
			.orders
			.iter()
			.filter(|(_, status)| **status == RemoteOrderStatus::Active)
			.map(|(remote_id, status)| {
				let details = state.order_details.get(remote_id);
				let text = |value: Option<&String>| {
					value.cloned().unwrap_or_else(|| "Unknown".to_string())
				};
				ActiveRemoteOrder {
					remote_id: remote_id.clone(),
					status: status.clone(),
					patient_name: text(details.map(|d| &d.patient_name)),
					patient_ref: text(details.map(|d| &d.patient_ref)),
					doctor_name: text(details.map(|d| &d.doctor_name)),
					tests: details.map(|d| d.tests.clone()).unwrap_or_default(),
					extensions: Vec::new(),
				}
			})
			.collect();
		// "sr-2" before "sr-10"
		active.sort_by(|a, b| {
			(a.remote_id.len(), &a.remote_id).cmp(&(b.remote_id.len(), &b.remote_id))
		});
		Ok(active)
	}

	async fn create_report(&self, report: &NewRemoteReport) -> Result<String, RemoteError> {
		self.prepare(RemoteOperation::CreateReport, Some(&report.order_ref))
			.await?;

		let mut state = self.inner.state.write().await;
		if !state.orders.contains_key(&report.order_ref) {
			return Err(RemoteError::NotFound(format!(
				"ServiceRequest/{}",
				report.order_ref
			)));
		}
		state.next_report_id += 1;
		let report_id = format!("dr-{}", state.next_report_id);
		let candidate = CandidateReport {
			remote_id: report_id.clone(),
			status: report.status.clone(),
			issued_at: Some(report.issued_at),
			effective_at: Some(report.issued_at),
			conclusion: report.conclusion.clone(),
			subject_display: report.patient_name.clone(),
			result_lines: report.result_lines.clone(),
		};
		state
			.reports
			.entry(report.order_ref.clone())
			.or_default()
			.push(candidate);
		Ok(report_id)
	}

	async fn complete_order(&self, order_ref: &str) -> Result<(), RemoteError> {
		self.prepare(RemoteOperation::CompleteOrder, Some(order_ref))
			.await?;

		let mut state = self.inner.state.write().await;
		match state.orders.get_mut(order_ref) {
			Some(status) => {
				*status = RemoteOrderStatus::Completed;
				Ok(())
			},
			None => Err(RemoteError::NotFound(format!("ServiceRequest/{}", order_ref))),
		}
	}
}

/// Configuration schema for the in-memory remote.
pub struct MemoryRemoteSchema;

impl ConfigSchema for MemoryRemoteSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"latency_ms",
				FieldType::Integer {
					min: Some(0),
					max: Some(60_000),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Creates an empty in-memory remote.
///
/// Configuration parameters:
/// - `latency_ms`: artificial delay added to every call (default: 0)
pub fn create_remote(config: &toml::Value) -> Result<Box<dyn RemoteResourceInterface>, RemoteError> {
	MemoryRemoteSchema
		.validate(config)
		.map_err(|e| RemoteError::Configuration(format!("Invalid memory remote config: {}", e)))?;

	let latency_ms = config
		.get("latency_ms")
		.and_then(|v| v.as_integer())
		.unwrap_or(0) as u64;

	let remote = MemoryRemote::new();
	if latency_ms > 0 {
		// Nobody else holds the state yet.
		if let Ok(mut state) = remote.inner.state.try_write() {
			state.latency = Duration::from_millis(latency_ms);
		}
	}
	Ok(Box::new(remote))
}

/// Registry for the in-memory remote implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = RemoteFactory;

	fn factory() -> Self::Factory {
		create_remote
	}
}

impl RemoteRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use lab_types::{Demographics, ReportStatus, TestItem};

	fn new_order(local_id: u64) -> NewRemoteOrder {
		NewRemoteOrder {
			local_id,
			patient_ref: "ALI1SMI01032024".into(),
			patient_name: "Alice".into(),
			doctor_name: "Smith".into(),
			tests: vec![TestItem::new("CBC", "Complete Blood Count (CBC)")],
			demographics: Demographics::default(),
		}
	}

	#[tokio::test]
	async fn test_created_orders_are_active() {
		let remote = MemoryRemote::new();
		let id = remote.create_order(&new_order(1)).await.unwrap();
		assert_eq!(id, "sr-1");

		let record = remote.get_order(&id).await.unwrap();
		assert_eq!(record.status, RemoteOrderStatus::Active);
		assert_eq!(remote.created_orders().await.len(), 1);
		assert_eq!(remote.create_calls(), 1);
	}

	#[tokio::test]
	async fn test_unknown_order_not_found() {
		let remote = MemoryRemote::new();
		assert!(matches!(
			remote.get_order("nope").await,
			Err(RemoteError::NotFound(_))
		));
		assert!(remote.find_reports_by_order("nope").await.unwrap().is_empty());
		assert_eq!(remote.order_calls(), 1);
		assert_eq!(remote.report_calls(), 1);
	}

	#[tokio::test]
	async fn test_failure_injection_counts_calls() {
		let remote = MemoryRemote::new();
		remote
			.seed_report("sr-1", CandidateReport::new("dr-1", ReportStatus::Final))
			.await;
		remote
			.fail(
				RemoteOperation::FindReports,
				Some(RemoteError::Unavailable("down".into())),
			)
			.await;

		assert!(remote.find_reports_by_order("sr-1").await.is_err());
		remote.fail(RemoteOperation::FindReports, None).await;
		assert_eq!(remote.find_reports_by_order("sr-1").await.unwrap().len(), 1);
		assert_eq!(remote.report_calls(), 2);
	}

	#[tokio::test]
	async fn test_unreachable_ref_only_affects_that_order() {
		let remote = MemoryRemote::new();
		remote.seed_order("sr-1", RemoteOrderStatus::Active).await;
		remote.seed_order("sr-2", RemoteOrderStatus::Active).await;
		remote.make_unreachable("sr-2").await;

		assert!(remote.get_order("sr-1").await.is_ok());
		assert!(matches!(
			remote.get_order("sr-2").await,
			Err(RemoteError::Unavailable(_))
		));
	}

	#[tokio::test]
	async fn test_report_lifecycle() {
		let remote = MemoryRemote::new();
		let order_ref = remote.create_order(&new_order(3)).await.unwrap();
		remote.seed_order("sr-seeded", RemoteOrderStatus::OnHold).await;

		let active = remote.list_active_orders().await.unwrap();
		assert_eq!(active.len(), 1);
		assert_eq!(active[0].remote_id, order_ref);
		assert_eq!(active[0].patient_name, "Alice");
		assert_eq!(active[0].tests[0].code, "CBC");

		let issued: chrono::DateTime<chrono::Utc> = "2024-03-05T09:00:00Z".parse().unwrap();
		let report_id = remote
			.create_report(&NewRemoteReport {
				order_ref: order_ref.clone(),
				status: ReportStatus::Final,
				patient_name: Some("Alice Smith".into()),
				conclusion: None,
				result_lines: vec!["Hemoglobin: 14.2 g/dL (Normal)".into()],
				issued_at: issued,
			})
			.await
			.unwrap();
		assert_eq!(report_id, "dr-1");
		remote.complete_order(&order_ref).await.unwrap();

		let reports = remote.find_reports_by_order(&order_ref).await.unwrap();
		assert_eq!(reports[0].effective_at, Some(issued));
		assert_eq!(
			remote.get_order(&order_ref).await.unwrap().status,
			RemoteOrderStatus::Completed
		);
		assert!(remote.list_active_orders().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_report_for_unknown_order_not_found() {
		let remote = MemoryRemote::new();
		let report = NewRemoteReport {
			order_ref: "sr-404".into(),
			status: ReportStatus::Final,
			patient_name: None,
			conclusion: None,
			result_lines: Vec::new(),
			issued_at: chrono::Utc::now(),
		};
		assert!(matches!(
			remote.create_report(&report).await,
			Err(RemoteError::NotFound(_))
		));
		assert!(matches!(
			remote.complete_order("sr-404").await,
			Err(RemoteError::NotFound(_))
		));
	}

	#[test]
	fn test_latency_bound_checked() {
		let config: toml::Value = toml::from_str("latency_ms = -5").unwrap();
		assert!(matches!(
			create_remote(&config),
			Err(RemoteError::Configuration(_))
		));
	}
}
