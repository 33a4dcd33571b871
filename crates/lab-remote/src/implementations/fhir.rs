//! FHIR REST client.
//!
//! Talks JSON (`application/fhir+json`) to a FHIR server:
//! - `GET {base}/DiagnosticReport?based-on=ServiceRequest/{ref}` returns a
//!   search `Bundle` of reports,
//! - `GET {base}/ServiceRequest/{ref}` returns the order,
//! - `POST {base}/ServiceRequest` creates one,
//! - `GET {base}/ServiceRequest?status=active` lists open orders,
//! - `POST {base}/DiagnosticReport` publishes a report,
//! - `PUT {base}/ServiceRequest/{ref}` writes back a completed order.
//!
//! Searches follow the bundle's `next` links, so paged results are read in
//! full.

use crate::{RemoteError, RemoteFactory, RemoteRegistry, RemoteResourceInterface};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use lab_types::{
	ActiveRemoteOrder, CandidateReport, ConfigSchema, Field, FieldType, ImplementationRegistry,
	NewRemoteOrder, NewRemoteReport, RemoteOrderRecord, RemoteOrderStatus, ReportStatus, Schema,
	TestItem, ValidationError,
};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
/// Upper bound on pages read for one search.
const MAX_SEARCH_PAGES: usize = 50;

/// Identifier system of lab requests created by this service.
pub const LAB_REQUEST_SYSTEM: &str = "http://his.org/lab-requests";
/// Coding system of ordered tests.
pub const LOINC_SYSTEM: &str = "http://loinc.org";
const EXTENSION_BASE: &str = "http://his.org/fhir/extension";

#[derive(Debug, Deserialize)]
struct Bundle {
	#[serde(default)]
	entry: Vec<BundleEntry>,
	#[serde(default)]
	link: Vec<BundleLink>,
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
	resource: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BundleLink {
	relation: String,
	url: String,
}

#[derive(Debug, Deserialize)]
struct Reference {
	display: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagnosticReportResource {
	id: Option<String>,
	status: Option<String>,
	issued: Option<String>,
	effective_date_time: Option<String>,
	conclusion: Option<String>,
	subject: Option<Reference>,
	#[serde(default)]
	result: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct ServiceRequestResource {
	id: Option<String>,
	status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
	value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subject {
	display: Option<String>,
	identifier: Option<Identifier>,
}

#[derive(Debug, Deserialize)]
struct Coding {
	code: Option<String>,
	display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeableConcept {
	#[serde(default)]
	coding: Vec<Coding>,
}

/// The fields of a `ServiceRequest` shown to the performing laboratory.
#[derive(Debug, Deserialize)]
struct ServiceRequestListing {
	id: Option<String>,
	status: Option<String>,
	subject: Option<Subject>,
	requester: Option<Reference>,
	code: Option<CodeableConcept>,
	#[serde(default)]
	extension: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
	id: Option<String>,
}

/// One page of a search result.
struct SearchPage {
	resources: Vec<Value>,
	/// Absolute URL of the following page, if any.
	next: Option<String>,
}

/// FHIR server client.
pub struct FhirRemote {
	client: reqwest::Client,
	/// Base URL without a trailing slash.
	base_url: String,
}

impl FhirRemote {
	/// Builds a client for `base_url`.
	///
	/// # Arguments
	///
	/// * `base_url` - FHIR base, e.g. `http://localhost:8083/fhir`
	/// * `timeout` - Timeout applied to every HTTP request
	///
	/// # Errors
	///
	/// `Configuration` when the HTTP client cannot be constructed.
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.pool_max_idle_per_host(10)
			.build()
			.map_err(|e| RemoteError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

		Ok(Self {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
		})
	}

	/// Sends a request and returns the response if its status is a success.
	///
	/// 404 maps to `NotFound`, any other failure status to `Unavailable`.
	async fn send(
		&self,
		request: reqwest::RequestBuilder,
		what: &str,
	) -> Result<reqwest::Response, RemoteError> {
		let response = request
			.header(header::ACCEPT, FHIR_JSON)
			.send()
			.await
			.map_err(|e| RemoteError::Unavailable(e.to_string()))?;

		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Err(RemoteError::NotFound(what.to_string()));
		}
		if !status.is_success() {
			return Err(RemoteError::Unavailable(format!(
				"{} returned HTTP {}",
				what, status
			)));
		}
		Ok(response)
	}

	async fn get_json(
		&self,
		request: reqwest::RequestBuilder,
		what: &str,
	) -> Result<Value, RemoteError> {
		self.send(request, what)
			.await?
			.json::<Value>()
			.await
			.map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", what, e)))
	}

	/// Sends a resource as the request body.
	async fn send_resource(
		&self,
		request: reqwest::RequestBuilder,
		resource: &Value,
		what: &str,
	) -> Result<reqwest::Response, RemoteError> {
		let request = request
			.header(header::CONTENT_TYPE, FHIR_JSON)
			.body(resource.to_string());
		self.send(request, what).await
	}

	/// Creates a resource and returns the id the server assigned.
	async fn create_resource(&self, resource_type: &str, body: &Value) -> Result<String, RemoteError> {
		let what = format!("{} create", resource_type);
		let request = self
			.client
			.post(format!("{}/{}", self.base_url, resource_type));
		let created: CreatedResource = self
			.send_resource(request, body, &what)
			.await?
			.json()
			.await
			.map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", what, e)))?;

		created.id.filter(|id| !id.is_empty()).ok_or_else(|| {
			RemoteError::InvalidResponse(format!("created {} has no id", resource_type))
		})
	}

	/// Runs a search and collects the resources of every page.
	async fn search(
		&self,
		first_page: reqwest::RequestBuilder,
		what: &str,
	) -> Result<Vec<Value>, RemoteError> {
		let mut resources = Vec::new();
		let mut request = Some(first_page);
		let mut pages = 0;

		while let Some(page_request) = request.take() {
			let body = self.get_json(page_request, what).await?;
			let page = parse_search_page(body)?;
			resources.extend(page.resources);
			pages += 1;

			match page.next {
				Some(_) if pages >= MAX_SEARCH_PAGES => {
					tracing::warn!(what, pages, "Search truncated, too many pages");
				},
				Some(next) => request = Some(self.client.get(next)),
				None => {},
			}
		}

		Ok(resources)
	}
}

#[async_trait]
impl RemoteResourceInterface for FhirRemote {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FhirRemoteSchema)
	}

	async fn find_reports_by_order(
		&self,
		order_ref: &str,
	) -> Result<Vec<CandidateReport>, RemoteError> {
		let request = self
			.client
			.get(format!("{}/DiagnosticReport", self.base_url))
			.query(&[("based-on", format!("ServiceRequest/{}", order_ref))]);

		match self.search(request, "DiagnosticReport search").await {
			Ok(resources) => Ok(reports_from_resources(resources)),
			Err(RemoteError::NotFound(_)) => Ok(Vec::new()),
			Err(e) => Err(e),
		}
	}

	async fn get_order(&self, order_ref: &str) -> Result<RemoteOrderRecord, RemoteError> {
		let what = format!("ServiceRequest/{}", order_ref);
		let request = self.client.get(format!("{}/{}", self.base_url, what));
		let body = self.get_json(request, &what).await?;
		parse_service_request(body, order_ref)
	}

	async fn create_order(&self, order: &NewRemoteOrder) -> Result<String, RemoteError> {
		let id = self
			.create_resource("ServiceRequest", &build_service_request(order))
			.await?;
		tracing::debug!(local_id = order.local_id, remote_id = %id, "ServiceRequest created");
		Ok(id)
	}

	async fn list_active_orders(&self) -> Result<Vec<ActiveRemoteOrder>, RemoteError> {
		let request = self
			.client
			.get(format!("{}/ServiceRequest", self.base_url))
			.query(&[("status", "active")]);
		let resources = self.search(request, "ServiceRequest search").await?;
		Ok(orders_from_resources(resources))
	}

	async fn create_report(&self, report: &NewRemoteReport) -> Result<String, RemoteError> {
		let id = self
			.create_resource("DiagnosticReport", &build_diagnostic_report(report))
			.await?;
		tracing::debug!(order_ref = %report.order_ref, remote_id = %id, "DiagnosticReport created");
		Ok(id)
	}

	async fn complete_order(&self, order_ref: &str) -> Result<(), RemoteError> {
		let what = format!("ServiceRequest/{}", order_ref);
		let url = format!("{}/{}", self.base_url, what);

		// Write back the whole resource; a bare status would erase the rest.
		let mut resource = self.get_json(self.client.get(&url), &what).await?;
		if resource.get("resourceType").and_then(Value::as_str) != Some("ServiceRequest") {
			return Err(RemoteError::InvalidResponse(format!(
				"{} is not a ServiceRequest",
				what
			)));
		}
		resource["id"] = json!(order_ref);
		resource["status"] = json!("completed");

		self.send_resource(self.client.put(&url), &resource, &what)
			.await?;
		Ok(())
	}
}

/// Splits a search `Bundle` into its resources and the `next` page link.
fn parse_search_page(body: Value) -> Result<SearchPage, RemoteError> {
	if body.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
		return Err(RemoteError::InvalidResponse(
			"expected a Bundle resource".to_string(),
		));
	}
	let bundle: Bundle = serde_json::from_value(body)
		.map_err(|e| RemoteError::InvalidResponse(format!("malformed Bundle: {}", e)))?;

	Ok(SearchPage {
		resources: bundle
			.entry
			.into_iter()
			.filter_map(|entry| entry.resource)
			.collect(),
		next: bundle
			.link
			.into_iter()
			.find(|link| link.relation == "next")
			.map(|link| link.url),
	})
}

/// Extracts the `DiagnosticReport` entries of a single search bundle.
///
/// Other resource types (e.g. an `OperationOutcome`), malformed reports and
/// reports without an id are skipped.
pub fn parse_report_bundle(body: Value) -> Result<Vec<CandidateReport>, RemoteError> {
	parse_search_page(body).map(|page| reports_from_resources(page.resources))
}

fn reports_from_resources(resources: Vec<Value>) -> Vec<CandidateReport> {
	let mut reports = Vec::with_capacity(resources.len());
	for resource in resources {
		if resource.get("resourceType").and_then(Value::as_str) != Some("DiagnosticReport") {
			continue;
		}
		let report: DiagnosticReportResource = match serde_json::from_value(resource) {
			Ok(report) => report,
			Err(e) => {
				tracing::debug!(error = %e, "Skipping malformed DiagnosticReport");
				continue;
			},
		};
		let Some(remote_id) = report.id else {
			tracing::debug!("Skipping DiagnosticReport without id");
			continue;
		};

		reports.push(CandidateReport {
			remote_id,
			status: report
				.status
				.map(ReportStatus::from)
				.unwrap_or(ReportStatus::Unknown),
			issued_at: report.issued.as_deref().and_then(parse_fhir_datetime),
			effective_at: report
				.effective_date_time
				.as_deref()
				.and_then(parse_fhir_datetime),
			conclusion: report.conclusion,
			subject_display: report.subject.and_then(|s| s.display),
			result_lines: report
				.result
				.into_iter()
				.filter_map(|r| r.display)
				.collect(),
		});
	}
	reports
}

fn orders_from_resources(resources: Vec<Value>) -> Vec<ActiveRemoteOrder> {
	let unknown = || "Unknown".to_string();
	let mut orders = Vec::with_capacity(resources.len());

	for resource in resources {
		if resource.get("resourceType").and_then(Value::as_str) != Some("ServiceRequest") {
			continue;
		}
		let request: ServiceRequestListing = match serde_json::from_value(resource) {
			Ok(request) => request,
			Err(e) => {
				tracing::debug!(error = %e, "Skipping malformed ServiceRequest");
				continue;
			},
		};
		let Some(remote_id) = request.id else {
			tracing::debug!("Skipping ServiceRequest without id");
			continue;
		};

		let (patient_name, patient_ref) = match request.subject {
			Some(subject) => (
				subject.display,
				subject.identifier.and_then(|identifier| identifier.value),
			),
			None => (None, None),
		};

		orders.push(ActiveRemoteOrder {
			remote_id,
			status: request
				.status
				.map(RemoteOrderStatus::from)
				.unwrap_or(RemoteOrderStatus::Unknown),
			patient_name: patient_name.unwrap_or_else(unknown),
			patient_ref: patient_ref.unwrap_or_else(unknown),
			doctor_name: request
				.requester
				.and_then(|r| r.display)
				.unwrap_or_else(unknown),
			tests: request
				.code
				.map(|code| {
					code.coding
						.into_iter()
						.map(|c| TestItem::new(c.code.unwrap_or_default(), c.display.unwrap_or_default()))
						.collect()
				})
				.unwrap_or_default(),
			extensions: request.extension,
		});
	}
	orders
}

fn parse_service_request(body: Value, order_ref: &str) -> Result<RemoteOrderRecord, RemoteError> {
	if body.get("resourceType").and_then(Value::as_str) != Some("ServiceRequest") {
		return Err(RemoteError::InvalidResponse(format!(
			"ServiceRequest/{} is not a ServiceRequest",
			order_ref
		)));
	}
	let resource: ServiceRequestResource = serde_json::from_value(body)
		.map_err(|e| RemoteError::InvalidResponse(format!("malformed ServiceRequest: {}", e)))?;

	Ok(RemoteOrderRecord {
		remote_id: resource.id.unwrap_or_else(|| order_ref.to_string()),
		status: resource
			.status
			.map(RemoteOrderStatus::from)
			.unwrap_or(RemoteOrderStatus::Unknown),
	})
}

/// FHIR `dateTime`/`instant`: full RFC 3339, or a bare date taken as
/// midnight UTC.
fn parse_fhir_datetime(value: &str) -> Option<DateTime<Utc>> {
	if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
		return Some(dt.with_timezone(&Utc));
	}
	match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
		Ok(date) => date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
		Err(_) => {
			tracing::debug!(value, "Ignoring unparseable FHIR date");
			None
		},
	}
}

/// Body of the `ServiceRequest` created for a local order.
pub fn build_service_request(order: &NewRemoteOrder) -> Value {
	let coding: Vec<Value> = order
		.tests
		.iter()
		.map(|test| {
			let code = if test.code.is_empty() {
				"unknown"
			} else {
				test.code.as_str()
			};
			json!({ "system": LOINC_SYSTEM, "code": code, "display": test.name })
		})
		.collect();

	let mut body = json!({
		"resourceType": "ServiceRequest",
		"status": "active",
		"intent": "order",
		"subject": {
			"display": order.patient_name,
			"identifier": { "value": order.patient_ref },
		},
		"requester": { "display": order.doctor_name },
		"code": { "text": "Laboratory tests", "coding": coding },
		"identifier": [{
			"system": LAB_REQUEST_SYSTEM,
			"value": format!("HIS-LR-{}", order.local_id),
		}],
	});

	let demographics = &order.demographics;
	if !demographics.is_empty() {
		let mut extensions = Vec::new();
		if let Some(age) = demographics.age {
			extensions.push(json!({
				"url": format!("{}/patient-age", EXTENSION_BASE),
				"valueInteger": age,
			}));
		}
		if let Some(gender) = &demographics.gender {
			extensions.push(json!({
				"url": format!("{}/patient-gender", EXTENSION_BASE),
				"valueString": gender,
			}));
		}
		if let Some(weight) = demographics.weight_kg {
			extensions.push(json!({
				"url": format!("{}/patient-weight", EXTENSION_BASE),
				"valueDecimal": weight,
			}));
		}
		body["extension"] = Value::Array(extensions);
	}

	body
}

/// Body of the `DiagnosticReport` published for a remote order.
///
/// `basedOn` points at the order so that the report shows up in the
/// order's `based-on` search.
pub fn build_diagnostic_report(report: &NewRemoteReport) -> Value {
	let issued = report.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true);
	let results: Vec<Value> = report
		.result_lines
		.iter()
		.map(|line| json!({ "display": line }))
		.collect();

	let mut body = json!({
		"resourceType": "DiagnosticReport",
		"status": report.status.as_str(),
		"basedOn": [{ "reference": format!("ServiceRequest/{}", report.order_ref) }],
		"code": { "text": "Laboratory Test Results" },
		"effectiveDateTime": issued,
		"issued": issued,
		"result": results,
	});
	if let Some(name) = &report.patient_name {
		body["subject"] = json!({ "display": name });
	}
	if let Some(conclusion) = &report.conclusion {
		body["conclusion"] = json!(conclusion);
	}
	body
}

/// Configuration schema for the FHIR client.
pub struct FhirRemoteSchema;

impl ConfigSchema for FhirRemoteSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new("base_url", FieldType::Url)],
			vec![Field::new(
				"timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(300),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Creates a FHIR client.
///
/// Configuration parameters:
/// - `base_url`: FHIR base, e.g. "http://localhost:8083/fhir" (required)
/// - `timeout_seconds`: HTTP client timeout (default: 10)
pub fn create_remote(config: &toml::Value) -> Result<Box<dyn RemoteResourceInterface>, RemoteError> {
	FhirRemoteSchema
		.validate(config)
		.map_err(|e| RemoteError::Configuration(format!("Invalid fhir config: {}", e)))?;

	let base_url = config
		.get("base_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| RemoteError::Configuration("base_url is required".to_string()))?;
	let timeout_seconds = config
		.get("timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_TIMEOUT_SECONDS);

	Ok(Box::new(FhirRemote::new(
		base_url,
		Duration::from_secs(timeout_seconds),
	)?))
}

/// Registry for the FHIR remote implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "fhir";
	type Factory = RemoteFactory;

	fn factory() -> Self::Factory {
		create_remote
	}
}

impl RemoteRegistry for Registry {}
