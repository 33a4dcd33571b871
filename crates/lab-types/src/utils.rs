//! Small helpers shared across crates.

/// Shortens an identifier for log output.
pub fn truncate_id(id: &str) -> String {
	if id.chars().count() <= 8 {
		id.to_string()
	} else {
		let head: String = id.chars().take(8).collect();
		format!("{}..", head)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("sr-1"), "sr-1");
		assert_eq!(
			truncate_id("0d6f1c2e-9b7a-4c55-8a51-3f1f0e4b2a77"),
			"0d6f1c2e.."
		);
	}
}
