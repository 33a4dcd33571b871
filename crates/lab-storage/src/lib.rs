//! Local storage for the lab order dashboard.
//!
//! Backends implement a small key-value [`StorageInterface`]; the
//! [`StorageService`] adds typed JSON access on top, and [`OrderStore`] is the
//! append/read table of submitted orders built on that.

use async_trait::async_trait;
use lab_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

mod orders;

pub use orders::{OrderDraft, OrderStore};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// No value is stored under the key.
	#[error("Not found")]
	NotFound,
	/// A value could not be encoded or decoded as JSON.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The backend itself failed (I/O, permissions).
	#[error("Backend error: {0}")]
	Backend(String),
	/// The backend configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// A write would break an invariant of the stored record.
	#[error("Conflict: {0}")]
	Conflict(String),
}

/// Low-level key-value operations a storage backend provides.
///
/// Keys have the form `namespace:id`.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Reads the raw bytes stored under `key`.
	///
	/// # Errors
	///
	/// `NotFound` when the key has no value.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Writes `value` under `key`, replacing any previous value.
	///
	/// A reader never observes a partially written value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the ids stored under a namespace, in no particular order.
	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the schema the backend's configuration table must satisfy.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Builds a storage backend from its configuration table.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Every storage implementation as `(config name, factory)`.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Typed JSON access over a storage backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Wraps a backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key(namespace, id), bytes).await
	}

	/// Reads and decodes a value.
	///
	/// # Arguments
	///
	/// * `namespace` - Key namespace, e.g. `orders`
	/// * `id` - Id within the namespace
	///
	/// # Errors
	///
	/// `NotFound` if nothing is stored, `Serialization` if the stored bytes
	/// are not a valid `T`.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Overwrites an existing value; `NotFound` if there is none.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}

		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key, bytes).await
	}

	/// Whether a value is stored under `namespace:id`.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key(namespace, id)).await
	}

	/// Loads every value of a namespace as `(id, value)` pairs.
	///
	/// Entries removed between listing and reading are skipped.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let ids = self.backend.list_ids(namespace).await?;
		let mut values = Vec::with_capacity(ids.len());
		for id in ids {
			match self.retrieve(namespace, &id).await {
				Ok(value) => values.push((id, value)),
				Err(StorageError::NotFound) => {
					tracing::debug!(namespace, id = %id, "Entry disappeared while listing");
				},
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}
}

fn key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}
