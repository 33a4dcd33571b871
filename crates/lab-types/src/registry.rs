//! Self-registration of pluggable implementations.

/// Implemented by the `Registry` marker struct of every storage and remote
/// implementation, tying the name used in configuration to a factory.
pub trait ImplementationRegistry {
	/// Key under `[<section>.implementations]` that selects this implementation,
	/// e.g. "file" for `storage.implementations.file` or "fhir" for
	/// `remote.implementations.fhir`.
	const NAME: &'static str;

	/// Factory signature of the owning module (`StorageFactory`, `RemoteFactory`).
	type Factory;

	fn factory() -> Self::Factory;
}
