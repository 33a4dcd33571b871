//! Locally recorded lab orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single requested test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
	/// Catalogue code, e.g. "CBC".
	pub code: String,
	/// Human readable name, e.g. "Complete Blood Count (CBC)".
	pub name: String,
}

impl TestItem {
	/// Creates a test item from a code and a display name.
	pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			name: name.into(),
		}
	}
}

/// Optional patient details sent along with an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
	/// Age in years.
	pub age: Option<u32>,
	/// Free text as entered, e.g. "female".
	pub gender: Option<String>,
	/// Weight in kilograms; always positive.
	pub weight_kg: Option<f64>,
}

impl Demographics {
	/// True when no detail was supplied.
	pub fn is_empty(&self) -> bool {
		self.age.is_none() && self.gender.is_none() && self.weight_kg.is_none()
	}
}

/// An order as recorded in the local order store.
///
/// Orders are append-only: after creation only `remote_order_ref` changes,
/// and only from absent to present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Identifier assigned by the local store.
	pub local_id: u64,
	/// Patient identifier shown to clinicians.
	pub patient_ref: String,
	pub patient_name: String,
	/// Ordering physician.
	pub doctor_name: String,
	#[serde(default)]
	pub demographics: Demographics,
	/// Id of the `ServiceRequest` on the remote server, once known.
	pub remote_order_ref: Option<String>,
	pub ordered_tests: Vec<TestItem>,
	pub requested_at: DateTime<Utc>,
}

impl Order {
	/// Dashboard ordering: most recent first, newer local ids first on ties.
	pub fn recent_first(a: &Order, b: &Order) -> Ordering {
		b.requested_at
			.cmp(&a.requested_at)
			.then_with(|| b.local_id.cmp(&a.local_id))
	}
}
