//! Storage namespaces.

/// Namespaces used by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Submitted lab orders, keyed by local id.
	Orders,
	/// Monotonic counters used to allocate local ids.
	Sequences,
}

impl StorageKey {
	/// Namespace prefix used in storage keys.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Sequences => "sequences",
		}
	}
}
