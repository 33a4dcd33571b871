//! The local order table.
//!
//! Orders are append-only. Local ids come from a counter kept in the
//! `sequences` namespace; all writes go through one lock so two submissions
//! never receive the same id.

use crate::{StorageError, StorageService};
use chrono::{DateTime, Utc};
use lab_types::{Demographics, Order, StorageKey, TestItem};
use std::sync::Arc;
use tokio::sync::Mutex;

const ORDER_SEQUENCE: &str = "orders";

/// Everything needed to record an order except its local id.
#[derive(Debug, Clone)]
pub struct OrderDraft {
	/// Supplied or generated patient identifier.
	pub patient_ref: String,
	pub patient_name: String,
	pub doctor_name: String,
	pub demographics: Demographics,
	/// Tests with their names already resolved.
	pub ordered_tests: Vec<TestItem>,
	pub requested_at: DateTime<Utc>,
}

/// Append-only table of submitted orders.
///
/// Orders are stored as JSON under `orders:{local_id}`; the last allocated id
/// lives under `sequences:orders`.
pub struct OrderStore {
	storage: Arc<StorageService>,
	/// Serializes id allocation and updates.
	write_lock: Mutex<()>,
}

impl OrderStore {
	/// Creates a store on top of `storage`.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
		}
	}

	/// Records a new order and returns it with its allocated local id.
	pub async fn append(&self, draft: OrderDraft) -> Result<Order, StorageError> {
		let _guard = self.write_lock.lock().await;

		let last_id = match self
			.storage
			.retrieve::<u64>(StorageKey::Sequences.as_str(), ORDER_SEQUENCE)
			.await
		{
			Ok(id) => id,
			Err(StorageError::NotFound) => 0,
			Err(e) => return Err(e),
		};
		let local_id = last_id + 1;

		let order = Order {
			local_id,
			patient_ref: draft.patient_ref,
			patient_name: draft.patient_name,
			doctor_name: draft.doctor_name,
			demographics: draft.demographics,
			remote_order_ref: None,
			ordered_tests: draft.ordered_tests,
			requested_at: draft.requested_at,
		};

		// Counter first: a crash between the two writes skips an id rather
		// than reusing one.
		self.storage
			.store(StorageKey::Sequences.as_str(), ORDER_SEQUENCE, &local_id)
			.await?;
		self.storage
			.store(StorageKey::Orders.as_str(), &local_id.to_string(), &order)
			.await?;

		tracing::debug!(local_id, patient_ref = %order.patient_ref, "Order recorded");
		Ok(order)
	}

	/// Loads one order by local id.
	///
	/// # Errors
	///
	/// `NotFound` for ids never allocated, `Serialization` for corrupt rows.
	pub async fn get(&self, local_id: u64) -> Result<Order, StorageError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), &local_id.to_string())
			.await
	}

	/// Sets the remote order reference of an order.
	///
	/// Setting the same reference again is a no-op; replacing a different one
	/// is a `Conflict`.
	pub async fn attach_remote_ref(
		&self,
		local_id: u64,
		remote_ref: &str,
	) -> Result<Order, StorageError> {
		let _guard = self.write_lock.lock().await;

		let mut order = self.get(local_id).await?;
		match order.remote_order_ref.as_deref() {
			Some(existing) if existing == remote_ref => return Ok(order),
			Some(existing) => {
				return Err(StorageError::Conflict(format!(
					"order {} already references {}",
					local_id, existing
				)))
			},
			None => {},
		}

		order.remote_order_ref = Some(remote_ref.to_string());
		self.storage
			.update(StorageKey::Orders.as_str(), &local_id.to_string(), &order)
			.await?;
		Ok(order)
	}

	/// Every recorded order, most recent first.
	pub async fn list_recent_first(&self) -> Result<Vec<Order>, StorageError> {
		let mut orders: Vec<Order> = self
			.storage
			.list(StorageKey::Orders.as_str())
			.await?
			.into_iter()
			.map(|(_, order)| order)
			.collect();
		orders.sort_by(Order::recent_first);
		Ok(orders)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::{file::FileStorage, memory::MemoryStorage};
	use chrono::TimeZone;

	fn store() -> OrderStore {
		OrderStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn draft(name: &str, minute: u32) -> OrderDraft {
		OrderDraft {
			patient_ref: format!("{}1DRS01032024", &name[..3].to_uppercase()),
			patient_name: name.to_string(),
			doctor_name: "Dr Smith".to_string(),
			demographics: Demographics::default(),
			ordered_tests: vec![TestItem::new("CBC", "Complete Blood Count (CBC)")],
			requested_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap(),
		}
	}

	#[tokio::test]
	async fn test_append_allocates_increasing_ids() {
		let store = store();
		let first = store.append(draft("Alice", 0)).await.unwrap();
		let second = store.append(draft("Bob", 1)).await.unwrap();

		assert_eq!(first.local_id, 1);
		assert_eq!(second.local_id, 2);
		assert!(second.remote_order_ref.is_none());
		assert_eq!(store.get(2).await.unwrap(), second);
	}

	#[tokio::test]
	async fn test_concurrent_appends_get_distinct_ids() {
		let store = Arc::new(store());
		let handles: Vec<_> = (0..10)
			.map(|i| {
				let store = Arc::clone(&store);
				tokio::spawn(async move { store.append(draft("Carol", i)).await.unwrap() })
			})
			.collect();

		let mut ids = Vec::new();
		for handle in handles {
			ids.push(handle.await.unwrap().local_id);
		}
		ids.sort();
		assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
	}

	#[tokio::test]
	async fn test_list_recent_first() {
		let store = store();
		store.append(draft("Alice", 0)).await.unwrap();
		store.append(draft("Bob", 30)).await.unwrap();
		store.append(draft("Carol", 30)).await.unwrap();

		let names: Vec<String> = store
			.list_recent_first()
			.await
			.unwrap()
			.into_iter()
			.map(|o| o.patient_name)
			.collect();
		assert_eq!(names, vec!["Carol", "Bob", "Alice"]);
	}

	#[tokio::test]
	async fn test_attach_remote_ref_once() {
		let store = store();
		let order = store.append(draft("Alice", 0)).await.unwrap();

		let updated = store.attach_remote_ref(order.local_id, "sr-1").await.unwrap();
		assert_eq!(updated.remote_order_ref.as_deref(), Some("sr-1"));

		// Same value again is accepted.
		store.attach_remote_ref(order.local_id, "sr-1").await.unwrap();

		let result = store.attach_remote_ref(order.local_id, "sr-2").await;
		assert!(matches!(result, Err(StorageError::Conflict(_))));
		assert_eq!(
			store.get(order.local_id).await.unwrap().remote_order_ref.as_deref(),
			Some("sr-1")
		);
	}

	#[tokio::test]
	async fn test_attach_to_unknown_order() {
		let store = store();
		assert!(matches!(
			store.attach_remote_ref(42, "sr-1").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_file_backed_ids_continue_after_reopen() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let open = || {
			OrderStore::new(Arc::new(StorageService::new(Box::new(FileStorage::new(
				temp_dir.path().to_path_buf(),
			)))))
		};

		open().append(draft("Alice", 0)).await.unwrap();
		let reopened = open();
		let order = reopened.append(draft("Bob", 1)).await.unwrap();

		assert_eq!(order.local_id, 2);
		assert_eq!(reopened.list_recent_first().await.unwrap().len(), 2);
	}
}
