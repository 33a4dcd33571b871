//! Registry of every storage and remote implementation, keyed by the name
//! used in configuration.

use lab_config::Config;
use lab_core::{LabBuilder, LabFactories, LabServices};
use lab_remote::RemoteFactory;
use lab_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Factories of every known implementation, by configuration name.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub remote: HashMap<String, RemoteFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			remote: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_remote(&mut self, name: impl Into<String>, factory: RemoteFactory) {
		self.remote.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// The process-wide registry, populated on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in lab_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in lab_remote::get_all_implementations() {
			tracing::debug!("Registering remote implementation: {}", name);
			registry.register_remote(name, factory);
		}

		registry
	})
}

/// Picks the factory of every configured implementation, failing on names
/// nothing is registered under.
macro_rules! build_factories {
	($registry:expr, $config_impls:expr, $registry_field:ident, $type_name:literal) => {{
		let mut factories = HashMap::new();
		for name in $config_impls.keys() {
			if let Some(factory) = $registry.$registry_field.get(name) {
				factories.insert(name.clone(), *factory);
			} else {
				let mut available: Vec<_> = $registry.$registry_field.keys().cloned().collect();
				available.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					$type_name,
					name,
					available.join(", ")
				)
				.into());
			}
		}
		factories
	}};
}

/// Builds every lab service from configuration.
///
/// # Errors
///
/// Fails when the configuration names an implementation nothing is
/// registered under, or when the builder rejects it.
pub fn build_lab_from_config(config: Config) -> Result<LabServices, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let storage_factories =
		build_factories!(registry, config.storage.implementations, storage, "storage");
	let remote_factories =
		build_factories!(registry, config.remote.implementations, remote, "remote");

	let factories = LabFactories {
		storage_factories,
		remote_factories,
	};

	Ok(LabBuilder::new(config).build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_registry_knows_every_implementation() {
		let registry = get_registry();
		let mut storage: Vec<_> = registry.storage.keys().cloned().collect();
		storage.sort();
		let mut remote: Vec<_> = registry.remote.keys().cloned().collect();
		remote.sort();

		assert_eq!(storage, vec!["file", "memory"]);
		assert_eq!(remote, vec!["fhir", "memory"]);
	}

	#[test]
	fn test_unknown_implementation_is_rejected() {
		let mut config = Config::for_tests();
		config
			.remote
			.implementations
			.insert("hl7v2".into(), toml::Value::Table(Default::default()));

		let err = build_lab_from_config(config).err().unwrap();
		assert!(err.to_string().contains("Unknown remote implementation 'hl7v2'"));
		assert!(err.to_string().contains("fhir, memory"));
	}

	#[tokio::test]
	async fn test_builds_from_file_config() {
		let temp_dir = tempfile::tempdir().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		std::fs::write(
			&config_path,
			format!(
				r#"
[service]
id = "ward-7"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"

[remote]
primary = "fhir"
[remote.implementations.fhir]
base_url = "http://localhost:8083/fhir"
timeout_seconds = 3
"#,
				temp_dir.path().join("orders").display()
			),
		)
		.unwrap();

		let config = Config::from_file(config_path.to_str().unwrap()).await.unwrap();
		let services = build_lab_from_config(config).unwrap();
		assert_eq!(services.config.service.id, "ward-7");
		assert!(services.orders.list_recent_first().await.unwrap().is_empty());
	}
}
