//! HTTP server for the lab dashboard API.
//!
//! Routes:
//! - `GET /health`
//! - `GET /api/dashboard?search=`
//! - `POST /api/lab-requests` (ordering side)
//! - `GET /api/lab-requests` and `POST /api/lab-results` (laboratory side)

use crate::apis::{self, dashboard::DashboardQuery, ApiError};
use axum::{
	extract::{Query, State},
	http::StatusCode,
	response::{IntoResponse, Json},
	routing::{get, post},
	Router,
};
use lab_config::ApiConfig;
use lab_core::LabServices;
use lab_types::{LabRequest, LabRequestList, LabResultSubmission};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
	pub services: LabServices,
}

/// Builds the router with tracing and permissive CORS.
pub fn build_router(services: LabServices) -> Router {
	Router::new()
		.route("/health", get(handle_health))
		.nest(
			"/api",
			Router::new()
				.route("/dashboard", get(handle_dashboard))
				.route(
					"/lab-requests",
					get(handle_list_lab_requests).post(handle_lab_request),
				)
				.route("/lab-results", post(handle_lab_results)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(AppState { services })
}

/// Serves the API until ctrl-c.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn start_server(
	api_config: ApiConfig,
	services: LabServices,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = build_router(services);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Lab dashboard API listening on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!("Failed to listen for shutdown signal: {}", e);
			}
		})
		.await?;

	Ok(())
}

async fn handle_health() -> impl IntoResponse {
	Json(json!({ "status": "healthy" }))
}

async fn handle_dashboard(
	State(state): State<AppState>,
	Query(query): Query<DashboardQuery>,
) -> Result<Json<apis::dashboard::DashboardResponse>, ApiError> {
	apis::dashboard::get_dashboard(&state.services.dashboard, query)
		.await
		.map(Json)
}

async fn handle_lab_request(
	State(state): State<AppState>,
	Json(request): Json<LabRequest>,
) -> Result<impl IntoResponse, ApiError> {
	let response =
		apis::lab_request::create_lab_request(&state.services.submissions, request).await?;
	Ok((StatusCode::CREATED, Json(response)))
}

async fn handle_list_lab_requests(
	State(state): State<AppState>,
) -> Result<Json<LabRequestList>, ApiError> {
	apis::lab_results::list_lab_requests(&state.services.results)
		.await
		.map(Json)
}

async fn handle_lab_results(
	State(state): State<AppState>,
	Json(submission): Json<LabResultSubmission>,
) -> Result<impl IntoResponse, ApiError> {
	let response =
		apis::lab_results::submit_lab_results(&state.services.results, submission).await?;
	Ok((StatusCode::CREATED, Json(response)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factory_registry::build_lab_from_config;
	use axum::body::{to_bytes, Body};
	use axum::http::{header, Request};
	use lab_config::Config;
	use serde_json::Value;
	use tower::ServiceExt;

	fn app() -> Router {
		build_router(build_lab_from_config(Config::for_tests()).unwrap())
	}

	async fn body_json(response: axum::response::Response) -> Value {
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	fn post_json(uri: &str, body: Value) -> Request<Body> {
		Request::builder()
			.method("POST")
			.uri(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	fn post_lab_request(body: Value) -> Request<Body> {
		post_json("/api/lab-requests", body)
	}

	fn get_request(uri: &str) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	#[tokio::test]
	async fn test_health() {
		let response = app()
			.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(body_json(response).await["status"], "healthy");
	}

	#[tokio::test]
	async fn test_submit_then_list() {
		let app = app();

		let response = app
			.clone()
			.oneshot(post_lab_request(json!({
				"patientName": "Fox Mulder",
				"patientAge": 41,
				"patientGender": "male",
				"patientWeight": "",
				"doctorName": "Scully",
				"testList": [{ "code": "CBC" }, { "code": "LIPID", "name": "Lipid Panel" }]
			})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);
		let created = body_json(response).await;
		assert_eq!(created["requestId"], 1);
		assert_eq!(created["fhirId"], "sr-1");
		assert!(created["patientId"].as_str().unwrap().starts_with("FOX2SCU"));

		let response = app
			.clone()
			.oneshot(
				Request::builder()
					.uri("/api/dashboard")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		let items = body["items"].as_array().unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0]["type"], "pending_remote_active");
		assert_eq!(items[0]["remote_status"], "active");
		assert_eq!(items[0]["bucket"], "pending");
		assert_eq!(items[0]["patient_name"], "Fox Mulder");

		let response = app
			.oneshot(
				Request::builder()
					.uri("/api/dashboard?search=scully")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert!(body_json(response).await["items"]
			.as_array()
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_missing_fields_is_bad_request() {
		let response = app()
			.oneshot(post_lab_request(json!({
				"patientName": "Fox Mulder",
				"testList": []
			})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		assert_eq!(body_json(response).await["error"], "Missing required fields");
	}

	#[tokio::test]
	async fn test_results_flow_to_dashboard() {
		let app = app();

		let response = app
			.clone()
			.oneshot(post_lab_request(json!({
				"patientName": "Walter Skinner",
				"doctorName": "Kersh",
				"testList": [{ "code": "CBC" }]
			})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);

		let response = app.clone().oneshot(get_request("/api/lab-requests")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let listed = body_json(response).await;
		let requests = listed["labRequests"].as_array().unwrap();
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0]["id"], "sr-1");
		assert_eq!(requests[0]["patientName"], "Walter Skinner");
		assert_eq!(requests[0]["status"], "active");
		assert_eq!(requests[0]["tests"][0]["code"], "CBC");

		let response = app
			.clone()
			.oneshot(post_json(
				"/api/lab-results",
				json!({
					"requestId": "sr-1",
					"patientName": "Walter Skinner",
					"status": "final",
					"conclusion": "Normal blood count",
					"testResults": [
						{ "name": "Hemoglobin", "value": 14.2, "unit": "g/dL", "interpretation": "Normal" }
					]
				}),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);
		let submitted = body_json(response).await;
		assert_eq!(submitted["message"], "Lab results submitted successfully");
		assert_eq!(submitted["requestId"], "sr-1");
		assert_eq!(submitted["fhirId"], "dr-1");
		assert_eq!(submitted["orderCompleted"], true);

		let response = app.clone().oneshot(get_request("/api/dashboard")).await.unwrap();
		let body = body_json(response).await;
		let items = body["items"].as_array().unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0]["type"], "result");
		assert_eq!(items[0]["report"]["status"], "final");
		assert_eq!(items[0]["bucket"], "complete");

		// Completed orders no longer await results.
		let response = app.oneshot(get_request("/api/lab-requests")).await.unwrap();
		assert!(body_json(response).await["labRequests"]
			.as_array()
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_lab_results_validation() {
		let app = app();

		let response = app
			.clone()
			.oneshot(post_json("/api/lab-results", json!({ "requestId": "sr-1" })))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
		assert_eq!(body_json(response).await["error"], "Missing required fields");

		let response = app
			.oneshot(post_json(
				"/api/lab-results",
				json!({ "requestId": "sr-9", "testResults": [{ "name": "WBC", "value": "6.1" }] }),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_cors_headers_present() {
		let response = app()
			.oneshot(
				Request::builder()
					.uri("/health")
					.header(header::ORIGIN, "http://localhost:5173")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(
			response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
			"*"
		);
	}
}
