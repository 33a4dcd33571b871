//! Configuration for the lab order dashboard.
//!
//! Configuration is read from TOML. `${VAR}` and `${VAR:-default}` references
//! are substituted from the environment before parsing, and a file may pull
//! in other files with `include = ["remote.toml"]` as long as no top-level
//! section is defined twice.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration processing.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML or merging included files.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the default rendering dumps the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Deployment identity.
	pub service: ServiceConfig,
	/// Local order store backend.
	pub storage: StorageConfig,
	/// Remote FHIR resource server client.
	pub remote: RemoteConfig,
	/// Reconciliation limits; defaults apply when the section is absent.
	#[serde(default)]
	pub reconcile: ReconcileConfig,
	/// HTTP API; without it the binary runs a single dashboard pass.
	pub api: Option<ApiConfig>,
}

/// Configuration of the service itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Name of this deployment, used in logs.
	pub id: String,
}

/// Configuration for the local order store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Implementation name to its raw TOML table.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the remote resource server client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
	/// Which implementation to use, e.g. `fhir`.
	pub primary: String,
	/// Implementation name to its raw TOML table.
	pub implementations: HashMap<String, toml::Value>,
}

/// Limits applied to one reconciliation pass.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
	/// Orders evaluated at the same time.
	#[serde(default = "default_max_concurrency")]
	pub max_concurrency: usize,
	/// Upper bound for a single remote call.
	#[serde(default = "default_request_timeout_seconds")]
	pub request_timeout_seconds: u64,
}

impl ReconcileConfig {
	/// `request_timeout_seconds` as a `Duration`.
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_seconds)
	}
}

impl Default for ReconcileConfig {
	fn default() -> Self {
		Self {
			max_concurrency: default_max_concurrency(),
			request_timeout_seconds: default_request_timeout_seconds(),
		}
	}
}

fn default_max_concurrency() -> usize {
	8
}

fn default_request_timeout_seconds() -> u64 {
	10
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server should be started.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind to (default: 127.0.0.1).
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to listen on (default: 8081).
	#[serde(default = "default_api_port")]
	pub port: u16,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	8081
}

/// Substitutes `${VAR}` and `${VAR:-default}` with environment values.
///
/// Input is capped at 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Minimal in-memory configuration for tests in dependent crates.
	#[cfg(any(test, feature = "testing"))]
	pub fn for_tests() -> Self {
		let mut storage_impls = HashMap::new();
		storage_impls.insert("memory".to_string(), toml::Value::Table(Default::default()));
		let mut remote_impls = HashMap::new();
		remote_impls.insert("memory".to_string(), toml::Value::Table(Default::default()));

		Self {
			service: ServiceConfig {
				id: "test-dashboard".to_string(),
			},
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: storage_impls,
			},
			remote: RemoteConfig {
				primary: "memory".to_string(),
				implementations: remote_impls,
			},
			reconcile: ReconcileConfig::default(),
			api: None,
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		validate_primary("remote", &self.remote.primary, &self.remote.implementations)?;

		let reconcile = &self.reconcile;
		if reconcile.max_concurrency == 0 || reconcile.max_concurrency > 256 {
			return Err(ConfigError::Validation(format!(
				"reconcile.max_concurrency must be between 1 and 256, got {}",
				reconcile.max_concurrency
			)));
		}
		if reconcile.request_timeout_seconds == 0 || reconcile.request_timeout_seconds > 300 {
			return Err(ConfigError::Validation(format!(
				"reconcile.request_timeout_seconds must be between 1 and 300, got {}",
				reconcile.request_timeout_seconds
			)));
		}

		if let Some(api) = &self.api {
			if api.enabled && api.host.trim().is_empty() {
				return Err(ConfigError::Validation(
					"api.host cannot be empty when the API is enabled".into(),
				));
			}
		}

		Ok(())
	}
}

fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses a TOML string, resolving environment variables and validating.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		tracing::debug!(service = %config.service.id, "Configuration validated");
		Ok(config)
	}
}
