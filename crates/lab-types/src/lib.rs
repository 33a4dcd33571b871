//! Shared types for the lab order dashboard.
//!
//! Orders recorded locally, resources observed on the remote FHIR server,
//! dashboard output, HTTP bodies and the configuration-validation helpers
//! used by every pluggable implementation.

/// HTTP request and response bodies.
pub mod api;
/// Catalogue of orderable tests.
pub mod catalog;
/// Reconciled dashboard output.
pub mod dashboard;
/// Locally recorded orders.
pub mod order;
/// Implementation registry trait.
pub mod registry;
/// Remote server resources and status codes.
pub mod remote;
/// Storage namespaces.
pub mod storage;
/// Misc helpers.
pub mod utils;
/// Configuration schema validation.
pub mod validation;

pub use api::*;
pub use catalog::{resolve_test, test_name, TEST_CATALOGUE};
pub use dashboard::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use remote::*;
pub use storage::StorageKey;
pub use utils::truncate_id;
pub use validation::*;
