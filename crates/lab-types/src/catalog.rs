//! Built-in catalogue of orderable lab tests.

use crate::TestItem;

/// Codes and display names offered on the order form.
pub const TEST_CATALOGUE: &[(&str, &str)] = &[
	("CBC", "Complete Blood Count (CBC)"),
	("GLUCOSE", "Blood Glucose"),
	("LIPID", "Lipid Panel"),
	("LIVER", "Liver Function Test"),
	("KIDNEY", "Kidney Function Test"),
	("THYROID", "Thyroid Function Test"),
	("HBA1C", "HbA1c"),
	("URINALYSIS", "Urinalysis"),
];

/// Looks up the display name of a catalogue code (case-insensitive).
pub fn test_name(code: &str) -> Option<&'static str> {
	TEST_CATALOGUE
		.iter()
		.find(|(c, _)| c.eq_ignore_ascii_case(code))
		.map(|(_, name)| *name)
}

/// Builds a [`TestItem`], taking the name from the catalogue when none is given.
///
/// Unknown codes without a name use the code itself as the name.
pub fn resolve_test(code: &str, name: Option<&str>) -> TestItem {
	let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
		Some(name) => name.to_string(),
		None => test_name(code).unwrap_or(code).to_string(),
	};
	TestItem::new(code, name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_is_case_insensitive() {
		assert_eq!(test_name("hba1c"), Some("HbA1c"));
		assert_eq!(test_name("XRAY"), None);
	}

	#[test]
	fn test_resolve_prefers_explicit_name() {
		assert_eq!(resolve_test("CBC", None).name, "Complete Blood Count (CBC)");
		assert_eq!(resolve_test("CBC", Some("  ")).name, "Complete Blood Count (CBC)");
		assert_eq!(resolve_test("CBC", Some("Full blood count")).name, "Full blood count");
		assert_eq!(resolve_test("FERRITIN", None).name, "FERRITIN");
	}
}
