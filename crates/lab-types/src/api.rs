//! Request and response bodies of the HTTP API.

use crate::{ActiveRemoteOrder, RemoteOrderStatus, TestItem};
use serde::{Deserialize, Deserializer, Serialize};

/// One entry of `testList` in a lab request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedTest {
	/// Catalogue code; unknown codes are kept as entered.
	pub code: String,
	/// Display name, used when the code is not in the catalogue.
	#[serde(default)]
	pub name: Option<String>,
}

/// Body of `POST /api/lab-requests`.
///
/// Optional demographic fields arrive from HTML forms, so they may be strings,
/// numbers, or empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequest {
	#[serde(default)]
	pub patient_name: String,
	/// Generated from names, test count and date when absent.
	#[serde(default, deserialize_with = "optional_text")]
	pub patient_id: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub patient_age: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub patient_gender: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub patient_weight: Option<String>,
	#[serde(default)]
	pub doctor_name: String,
	#[serde(default)]
	pub test_list: Vec<RequestedTest>,
}

/// Body returned after a lab request was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequestResponse {
	pub message: String,
	/// Local order id.
	pub request_id: u64,
	pub patient_id: String,
	/// Id of the remote order; absent when the remote server was unreachable.
	pub fhir_id: Option<String>,
}

/// One open order in the body of `GET /api/lab-requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequestListing {
	/// Remote order id; results are posted against it as `requestId`.
	pub id: String,
	pub patient_name: String,
	pub patient_id: String,
	pub doctor_name: String,
	pub status: RemoteOrderStatus,
	pub tests: Vec<TestItem>,
	pub extensions: Vec<serde_json::Value>,
}

impl From<ActiveRemoteOrder> for LabRequestListing {
	fn from(order: ActiveRemoteOrder) -> Self {
		Self {
			id: order.remote_id,
			patient_name: order.patient_name,
			patient_id: order.patient_ref,
			doctor_name: order.doctor_name,
			status: order.status,
			tests: order.tests,
			extensions: order.extensions,
		}
	}
}

/// Body returned by `GET /api/lab-requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequestList {
	pub lab_requests: Vec<LabRequestListing>,
}

/// One measured value of a lab result submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResult {
	#[serde(default)]
	pub name: String,
	#[serde(default, deserialize_with = "optional_text")]
	pub value: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub unit: Option<String>,
	/// E.g. "Normal", "High".
	#[serde(default, deserialize_with = "optional_text")]
	pub interpretation: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub note: Option<String>,
}

impl TestResult {
	/// Renders the result as `name: value unit (interpretation) - note`,
	/// leaving out the parts that are absent.
	pub fn display_line(&self) -> String {
		let mut line = format!("{}:", self.name.trim());
		if let Some(value) = &self.value {
			line.push(' ');
			line.push_str(value);
		}
		if let Some(unit) = &self.unit {
			line.push(' ');
			line.push_str(unit);
		}
		if let Some(interpretation) = &self.interpretation {
			line.push_str(&format!(" ({})", interpretation));
		}
		if let Some(note) = &self.note {
			line.push_str(" - ");
			line.push_str(note);
		}
		line
	}
}

/// Body of `POST /api/lab-results`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResultSubmission {
	/// Remote order id the results answer.
	#[serde(default, deserialize_with = "optional_text")]
	pub request_id: Option<String>,
	#[serde(default, deserialize_with = "optional_text")]
	pub patient_name: Option<String>,
	#[serde(default)]
	pub test_results: Vec<TestResult>,
	#[serde(default, deserialize_with = "optional_text")]
	pub conclusion: Option<String>,
	/// Report status code; `final` when absent.
	#[serde(default, deserialize_with = "optional_text")]
	pub status: Option<String>,
}

/// Body returned after lab results were published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResultResponse {
	pub message: String,
	pub request_id: String,
	/// Id of the created report.
	pub fhir_id: String,
	/// Whether the order was marked completed on the remote server.
	pub order_completed: bool,
}

/// Error body used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
}

/// Accepts a string or a number and normalises blanks to `None`.
fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	Ok(match value {
		Some(serde_json::Value::String(s)) => {
			let trimmed = s.trim();
			(!trimmed.is_empty()).then(|| trimmed.to_string())
		},
		Some(serde_json::Value::Number(n)) => Some(n.to_string()),
		_ => None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_form_style_request() {
		let body = r#"{
			"patientName": "John Smith",
			"patientId": "",
			"patientAge": "42",
			"patientGender": "male",
			"patientWeight": 81.5,
			"doctorName": "Dr Mary Jones",
			"testList": [{"code": "CBC", "name": "Complete Blood Count (CBC)"}, {"code": "LIPID"}]
		}"#;
		let request: LabRequest = serde_json::from_str(body).unwrap();
		assert_eq!(request.patient_id, None);
		assert_eq!(request.patient_age.as_deref(), Some("42"));
		assert_eq!(request.patient_weight.as_deref(), Some("81.5"));
		assert_eq!(request.test_list.len(), 2);
		assert_eq!(request.test_list[1].name, None);
	}

	#[test]
	fn test_missing_fields_default() {
		let request: LabRequest = serde_json::from_str("{}").unwrap();
		assert!(request.patient_name.is_empty());
		assert!(request.test_list.is_empty());
	}

	#[test]
	fn test_response_uses_camel_case() {
		let response = LabRequestResponse {
			message: "Lab request created successfully".into(),
			request_id: 12,
			patient_id: "JOH1MAR05032024".into(),
			fhir_id: Some("sr-12".into()),
		};
		let value = serde_json::to_value(response).unwrap();
		assert_eq!(value["requestId"], 12);
		assert_eq!(value["fhirId"], "sr-12");
	}

	#[test]
	fn test_result_display_line() {
		let full = TestResult {
			name: "Hemoglobin".into(),
			value: Some("14.2".into()),
			unit: Some("g/dL".into()),
			interpretation: Some("Normal".into()),
			note: Some("fasting".into()),
		};
		assert_eq!(full.display_line(), "Hemoglobin: 14.2 g/dL (Normal) - fasting");

		let bare = TestResult {
			name: "Glucose".into(),
			value: Some("5.4".into()),
			..Default::default()
		};
		assert_eq!(bare.display_line(), "Glucose: 5.4");
	}

	#[test]
	fn test_result_submission_accepts_numbers() {
		let body = r#"{
			"requestId": "sr-7",
			"testResults": [{"name": "WBC", "value": 6.1, "unit": "10^9/L", "interpretation": "Normal", "note": ""}],
			"status": ""
		}"#;
		let submission: LabResultSubmission = serde_json::from_str(body).unwrap();
		assert_eq!(submission.request_id.as_deref(), Some("sr-7"));
		assert_eq!(submission.status, None);
		assert_eq!(
			submission.test_results[0].display_line(),
			"WBC: 6.1 10^9/L (Normal)"
		);
	}
}
