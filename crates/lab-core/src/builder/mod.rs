//! Assembles [`LabServices`] from configuration and implementation factories.

use crate::dashboard::DashboardService;
use crate::engine::ReconciliationEngine;
use crate::handlers::{ResultsHandler, SubmissionHandler};
use crate::LabServices;
use lab_config::Config;
use lab_remote::{RemoteError, RemoteResourceInterface, RemoteService};
use lab_storage::{OrderStore, StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while assembling services.
#[derive(Debug, Error)]
pub enum BuilderError {
	/// An implementation rejected its configuration.
	#[error("Configuration error: {0}")]
	Config(String),
	/// The primary implementation of a component is not available.
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions by implementation name.
pub struct LabFactories<SF, RF> {
	pub storage_factories: HashMap<String, SF>,
	pub remote_factories: HashMap<String, RF>,
}

/// Builder for [`LabServices`].
pub struct LabBuilder {
	config: Config,
}

impl LabBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Instantiates the configured implementations and wires the services.
	///
	/// Every configured implementation with a factory is created, so a bad
	/// configuration fails here even for non-primary ones.
	///
	/// # Arguments
	///
	/// * `factories` - Storage and remote factories by implementation name
	///
	/// # Errors
	///
	/// `Config` if an implementation fails to build or none is available,
	/// `MissingComponent` if the primary one is not among those built.
	pub fn build<SF, RF>(self, factories: LabFactories<SF, RF>) -> Result<LabServices, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		RF: Fn(&toml::Value) -> Result<Box<dyn RemoteResourceInterface>, RemoteError>,
	{
		let storage_backend = create_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let remote_backend = create_primary(
			"remote",
			&self.config.remote.primary,
			&self.config.remote.implementations,
			&factories.remote_factories,
		)?;

		let orders = Arc::new(OrderStore::new(Arc::new(StorageService::new(
			storage_backend,
		))));
		let remote = Arc::new(RemoteService::new(
			remote_backend,
			self.config.reconcile.request_timeout(),
		));
		let engine = ReconciliationEngine::new(
			Arc::clone(&remote),
			self.config.reconcile.max_concurrency,
		);

		Ok(LabServices {
			dashboard: Arc::new(DashboardService::new(Arc::clone(&orders), engine.clone())),
			submissions: Arc::new(SubmissionHandler::new(
				Arc::clone(&orders),
				Arc::clone(&remote),
			)),
			results: Arc::new(ResultsHandler::new(Arc::clone(&remote))),
			engine,
			orders,
			remote,
			config: self.config,
		})
	}
}

/// Instantiates every configured implementation that has a factory and
/// returns the primary one.
fn create_primary<T: ?Sized, E: Display, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				tracing::info!(component, implementation = %name, enabled = %(name == primary), "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(component, implementation = %name, error = %e, "Failed to create implementation");
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	if loaded.is_empty() {
		return Err(BuilderError::Config(format!(
			"No valid {} implementations available",
			component
		)));
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"Primary {} '{}' failed to load or has no factory",
			component, primary
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dashboard::DashboardFilter;
	use lab_types::{LabRequest, RequestedTest};

	fn factories() -> LabFactories<lab_storage::StorageFactory, lab_remote::RemoteFactory> {
		LabFactories {
			storage_factories: lab_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
			remote_factories: lab_remote::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	#[tokio::test]
	async fn test_build_with_memory_implementations() {
		let services = LabBuilder::new(Config::for_tests())
			.build(factories())
			.unwrap();

		let request = LabRequest {
			patient_name: "Dana Scully".into(),
			doctor_name: "Mulder".into(),
			test_list: vec![RequestedTest {
				code: "THYROID".into(),
				name: None,
			}],
			..Default::default()
		};
		let outcome = services.submissions.submit(request).await.unwrap();
		assert!(outcome.remote_order_ref.is_some());

		let items = services
			.dashboard
			.load(&DashboardFilter::default())
			.await
			.unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].kind(), "pending_remote_active");
	}

	#[test]
	fn test_missing_factory_for_primary() {
		let mut config = Config::for_tests();
		config.remote.primary = "hapi".into();
		config
			.remote
			.implementations
			.insert("hapi".into(), toml::Value::Table(Default::default()));

		let err = LabBuilder::new(config).build(factories()).err().unwrap();
		assert!(matches!(err, BuilderError::MissingComponent(_)));
	}

	#[test]
	fn test_factory_error_is_reported() {
		let mut config = Config::for_tests();
		config.storage.primary = "file".into();
		config.storage.implementations.insert(
			"file".into(),
			toml::from_str("storage_path = 12").unwrap(),
		);

		let err = LabBuilder::new(config).build(factories()).err().unwrap();
		assert!(err.to_string().contains("Failed to create storage implementation 'file'"));
	}
}
