//! Lab request submission.
//!
//! A request is recorded locally first and then sent to the remote server.
//! Failing to reach the remote server does not undo the local record: the
//! order simply has no remote reference until someone re-submits it.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use lab_remote::RemoteService;
use lab_storage::{OrderDraft, OrderStore};
use lab_types::{
	resolve_test, truncate_id, Demographics, LabRequest, NewRemoteOrder, Order, TestItem,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors that reject a submission.
#[derive(Debug, Error)]
pub enum SubmissionError {
	/// The request is incomplete or carries unparseable demographics.
	#[error("Validation error: {0}")]
	Validation(String),
	/// The order could not be recorded locally.
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
	/// The order as recorded locally.
	pub order: Order,
	/// Id of the created remote order, if the remote call succeeded.
	pub remote_order_ref: Option<String>,
	/// Set when the remote side of the submission did not fully succeed.
	pub remote_warning: Option<String>,
}

/// Records lab requests locally and forwards them to the remote server.
pub struct SubmissionHandler {
	orders: Arc<OrderStore>,
	remote: Arc<RemoteService>,
}

impl SubmissionHandler {
	/// Creates a handler writing to `orders` and forwarding through `remote`.
	pub fn new(orders: Arc<OrderStore>, remote: Arc<RemoteService>) -> Self {
		Self { orders, remote }
	}

	/// Submits a lab request.
	///
	/// The order is stored before the remote call, so a remote failure still
	/// returns `Ok` with `remote_warning` set.
	///
	/// # Errors
	///
	/// `Validation` for incomplete requests, `Storage` when the order cannot
	/// be recorded.
	pub async fn submit(&self, request: LabRequest) -> Result<SubmissionOutcome, SubmissionError> {
		self.submit_at(request, Utc::now()).await
	}

	/// Same as [`submit`](Self::submit) with an explicit submission time.
	pub async fn submit_at(
		&self,
		request: LabRequest,
		now: DateTime<Utc>,
	) -> Result<SubmissionOutcome, SubmissionError> {
		let draft = prepare_draft(request, now)?;

		let order = self
			.orders
			.append(draft)
			.await
			.map_err(|e| SubmissionError::Storage(e.to_string()))?;
		tracing::info!(
			order_id = order.local_id,
			patient_ref = %order.patient_ref,
			tests = order.ordered_tests.len(),
			"Lab request recorded"
		);

		let new_remote = NewRemoteOrder {
			local_id: order.local_id,
			patient_ref: order.patient_ref.clone(),
			patient_name: order.patient_name.clone(),
			doctor_name: order.doctor_name.clone(),
			tests: order.ordered_tests.clone(),
			demographics: order.demographics.clone(),
		};

		let remote_ref = match self.remote.create_order(&new_remote).await {
			Ok(remote_ref) => remote_ref,
			Err(e) => {
				tracing::warn!(order_id = order.local_id, error = %e, "Remote order not created");
				return Ok(SubmissionOutcome {
					order,
					remote_order_ref: None,
					remote_warning: Some(e.to_string()),
				});
			},
		};

		let order = match self
			.orders
			.attach_remote_ref(order.local_id, &remote_ref)
			.await
		{
			Ok(order) => order,
			Err(e) => {
				// The remote order exists; the log is the only place its id survives.
				tracing::error!(
					order_id = order.local_id,
					remote_ref = %remote_ref,
					error = %e,
					"Remote order created but not linked locally"
				);
				return Ok(SubmissionOutcome {
					order,
					remote_order_ref: Some(remote_ref),
					remote_warning: Some(format!("Remote reference not saved locally: {}", e)),
				});
			},
		};
		tracing::info!(order_id = order.local_id, remote_ref = %truncate_id(&remote_ref), "Remote order created");

		Ok(SubmissionOutcome {
			order,
			remote_order_ref: Some(remote_ref),
			remote_warning: None,
		})
	}
}

fn prepare_draft(request: LabRequest, now: DateTime<Utc>) -> Result<OrderDraft, SubmissionError> {
	let patient_name = request.patient_name.trim().to_string();
	let doctor_name = request.doctor_name.trim().to_string();
	if patient_name.is_empty() || doctor_name.is_empty() || request.test_list.is_empty() {
		return Err(SubmissionError::Validation("Missing required fields".into()));
	}

	let ordered_tests: Vec<TestItem> = request
		.test_list
		.iter()
		.map(|test| resolve_test(test.code.trim(), test.name.as_deref()))
		.collect();

	let patient_ref = match request.patient_id.as_deref().map(str::trim) {
		Some(id) if !id.is_empty() => id.to_string(),
		_ => generate_patient_id(
			&patient_name,
			ordered_tests.len(),
			&doctor_name,
			now.date_naive(),
		),
	};

	let demographics = Demographics {
		age: request
			.patient_age
			.as_deref()
			.map(|age| {
				age.trim().parse::<u32>().map_err(|_| {
					SubmissionError::Validation(format!("Invalid patient age: {}", age))
				})
			})
			.transpose()?,
		gender: request.patient_gender.clone(),
		weight_kg: request
			.patient_weight
			.as_deref()
			.map(|weight| match weight.trim().parse::<f64>() {
				Ok(kg) if kg.is_finite() && kg > 0.0 => Ok(kg),
				_ => Err(SubmissionError::Validation(format!(
					"Invalid patient weight: {}",
					weight
				))),
			})
			.transpose()?,
	};

	Ok(OrderDraft {
		patient_ref,
		patient_name,
		doctor_name,
		demographics,
		ordered_tests,
		requested_at: now,
	})
}

/// Builds a patient id from the first three characters of the patient name,
/// the number of tests, the first three characters of the doctor name and the
/// date as `DDMMYYYY`, e.g. `JOH2SMI05032024`.
///
/// Returns `"Unknown"` when a name is empty or there are no tests.
pub fn generate_patient_id(
	patient_name: &str,
	test_count: usize,
	doctor_name: &str,
	date: NaiveDate,
) -> String {
	if patient_name.is_empty() || doctor_name.is_empty() || test_count == 0 {
		return "Unknown".to_string();
	}

	let prefix = |name: &str| name.chars().take(3).collect::<String>().to_uppercase();
	format!(
		"{}{}{}{:02}{:02}{}",
		prefix(patient_name),
		test_count,
		prefix(doctor_name),
		date.day(),
		date.month(),
		date.year()
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use lab_remote::implementations::memory::{MemoryRemote, RemoteOperation};
	use lab_remote::RemoteError;
	use lab_storage::implementations::memory::MemoryStorage;
	use lab_storage::{StorageError, StorageInterface, StorageService};
	use lab_types::{ConfigSchema, RequestedTest};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	/// Memory storage that refuses writes once its budget is spent.
	struct WriteBudgetStorage {
		inner: MemoryStorage,
		writes_left: AtomicUsize,
	}

	#[async_trait::async_trait]
	impl StorageInterface for WriteBudgetStorage {
		async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
			self.inner.get_bytes(key).await
		}

		async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
			let granted = self
				.writes_left
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();
			if !granted {
				return Err(StorageError::Backend("disk full".into()));
			}
			self.inner.set_bytes(key, value).await
		}

		async fn exists(&self, key: &str) -> Result<bool, StorageError> {
			self.inner.exists(key).await
		}

		async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
			self.inner.list_ids(namespace).await
		}

		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			self.inner.config_schema()
		}
	}

	fn handler(remote: &MemoryRemote) -> (SubmissionHandler, Arc<OrderStore>) {
		let orders = Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))));
		let service = RemoteService::new(Box::new(remote.clone()), Duration::from_secs(2));
		(
			SubmissionHandler::new(Arc::clone(&orders), Arc::new(service)),
			orders,
		)
	}

	fn request() -> LabRequest {
		LabRequest {
			patient_name: "John Carter".into(),
			doctor_name: "Smith".into(),
			test_list: vec![
				RequestedTest {
					code: "CBC".into(),
					name: None,
				},
				RequestedTest {
					code: "CUSTOM".into(),
					name: Some("Vitamin D".into()),
				},
			],
			..Default::default()
		}
	}

	fn now() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
	}

	#[test]
	fn test_generate_patient_id() {
		let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
		assert_eq!(generate_patient_id("John", 2, "Smith", date), "JOH2SMI05032024");
		assert_eq!(generate_patient_id("Al", 1, "Dr Who", date), "AL1DR 05032024");
		assert_eq!(generate_patient_id("", 2, "Smith", date), "Unknown");
		assert_eq!(generate_patient_id("John", 0, "Smith", date), "Unknown");
	}

	#[tokio::test]
	async fn test_submit_creates_and_links_remote_order() {
		let remote = MemoryRemote::new();
		let (handler, orders) = handler(&remote);

		let outcome = handler.submit_at(request(), now()).await.unwrap();
		assert_eq!(outcome.remote_order_ref.as_deref(), Some("sr-1"));
		assert_eq!(outcome.order.patient_ref, "JOH2SMI05032024");
		assert_eq!(
			outcome.order.ordered_tests[0].name,
			"Complete Blood Count (CBC)"
		);
		assert_eq!(outcome.order.ordered_tests[1].name, "Vitamin D");

		let stored = orders.get(outcome.order.local_id).await.unwrap();
		assert_eq!(stored.remote_order_ref.as_deref(), Some("sr-1"));

		let created = remote.created_orders().await;
		assert_eq!(created.len(), 1);
		assert_eq!(created[0].local_id, outcome.order.local_id);
	}

	#[tokio::test]
	async fn test_supplied_patient_id_is_kept() {
		let remote = MemoryRemote::new();
		let (handler, _) = handler(&remote);

		let mut req = request();
		req.patient_id = Some("MRN-0042".into());
		req.patient_age = Some("34".into());
		req.patient_weight = Some("70.5".into());
		let outcome = handler.submit_at(req, now()).await.unwrap();

		assert_eq!(outcome.order.patient_ref, "MRN-0042");
		assert_eq!(outcome.order.demographics.age, Some(34));
		assert_eq!(outcome.order.demographics.weight_kg, Some(70.5));
	}

	#[tokio::test]
	async fn test_remote_failure_keeps_local_order() {
		let remote = MemoryRemote::new();
		remote
			.fail(
				RemoteOperation::CreateOrder,
				Some(RemoteError::Unavailable("connection refused".into())),
			)
			.await;
		let (handler, orders) = handler(&remote);

		let outcome = handler.submit_at(request(), now()).await.unwrap();
		assert!(outcome.remote_order_ref.is_none());
		assert!(outcome.remote_warning.unwrap().contains("connection refused"));

		let stored = orders.list_recent_first().await.unwrap();
		assert_eq!(stored.len(), 1);
		assert!(stored[0].remote_order_ref.is_none());
	}

	#[tokio::test]
	async fn test_unlinked_remote_order_is_reported_not_lost() {
		let remote = MemoryRemote::new();
		// Enough for the sequence and the order, not for linking.
		let storage = WriteBudgetStorage {
			inner: MemoryStorage::new(),
			writes_left: AtomicUsize::new(2),
		};
		let orders = Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			storage,
		)))));
		let service = RemoteService::new(Box::new(remote.clone()), Duration::from_secs(2));
		let handler = SubmissionHandler::new(Arc::clone(&orders), Arc::new(service));

		let outcome = handler.submit_at(request(), now()).await.unwrap();
		assert_eq!(outcome.remote_order_ref.as_deref(), Some("sr-1"));
		assert!(outcome.remote_warning.unwrap().contains("disk full"));
		assert!(outcome.order.remote_order_ref.is_none());

		let stored = orders.get(outcome.order.local_id).await.unwrap();
		assert!(stored.remote_order_ref.is_none());
		assert_eq!(remote.created_orders().await.len(), 1);
	}

	#[tokio::test]
	async fn test_missing_fields_rejected() {
		let remote = MemoryRemote::new();
		let (handler, orders) = handler(&remote);

		let mut no_tests = request();
		no_tests.test_list.clear();
		let mut no_doctor = request();
		no_doctor.doctor_name = "   ".into();

		for req in [no_tests, no_doctor, LabRequest::default()] {
			assert!(matches!(
				handler.submit_at(req, now()).await,
				Err(SubmissionError::Validation(_))
			));
		}
		assert!(orders.list_recent_first().await.unwrap().is_empty());
		assert_eq!(remote.create_calls(), 0);
	}

	#[tokio::test]
	async fn test_invalid_demographics_rejected() {
		let remote = MemoryRemote::new();
		let (handler, _) = handler(&remote);

		let mut bad_age = request();
		bad_age.patient_age = Some("thirty".into());
		let mut bad_weight = request();
		bad_weight.patient_weight = Some("-3".into());

		for req in [bad_age, bad_weight] {
			assert!(matches!(
				handler.submit_at(req, now()).await,
				Err(SubmissionError::Validation(_))
			));
		}
	}
}
