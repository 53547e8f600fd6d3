//! HTTP surface of the booking service.
//!
//! A thin translation layer: read the acting party from gateway-verified
//! identity headers, validate body shapes, call into the engine's services,
//! and map domain errors onto HTTP statuses. No business rules live here.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use booking_core::BookingEngine;
use booking_order::OrderError;
use booking_schedule::ScheduleError;
use booking_types::api::{
	ActionRequest, AssignProviderRequest, CreateOrderRequest, CreateScheduleEntryRequest,
	DeliverRequest, DisputeRequest, ErrorResponse, OrderListQuery, PaymentProofRequest,
	ResolveDisputeRequest, ScheduleRangeQuery, TravelFeeQuoteRequest, TravelFeeQuoteResponse,
	VerifyPaymentRequest,
};
use booking_types::{Actor, Order, Role, ScheduleEntry};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use validator::Validate;

#[derive(Clone)]
struct AppState {
	engine: Arc<BookingEngine>,
}

/// Serves the HTTP API until the task is aborted.
pub async fn serve(engine: Arc<BookingEngine>) -> anyhow::Result<()> {
	let host = engine.config().api.host.clone();
	let port = engine.config().api.port;
	let app = router(AppState { engine });

	let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
	info!("API server listening on {}", listener.local_addr()?);
	axum::serve(listener, app).await?;
	Ok(())
}

fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/api/orders", post(create_order).get(list_orders))
		.route("/api/orders/{id}", get(get_order))
		.route("/api/orders/{id}/provider", post(assign_provider))
		.route("/api/orders/{id}/deposit-proof", post(submit_deposit_proof))
		.route("/api/orders/{id}/deposit-verification", post(verify_deposit))
		.route("/api/orders/{id}/fulfillment/start", post(begin_fulfillment))
		.route(
			"/api/orders/{id}/fulfillment/complete",
			post(complete_fulfillment),
		)
		.route(
			"/api/orders/{id}/final-payment-proof",
			post(submit_final_payment_proof),
		)
		.route(
			"/api/orders/{id}/final-payment-verification",
			post(verify_final_payment),
		)
		.route("/api/orders/{id}/delivery", post(deliver))
		.route("/api/orders/{id}/acceptance", post(accept_delivery))
		.route("/api/orders/{id}/dispute", post(raise_dispute))
		.route("/api/orders/{id}/dispute-resolution", post(resolve_dispute))
		.route("/api/orders/{id}/cancellation", post(cancel))
		.route("/api/orders/{id}/refund-confirmation", post(confirm_refund))
		.route("/api/quotes/travel-fee", post(quote_travel_fee))
		.route(
			"/api/providers/{id}/schedule",
			get(list_schedule).post(create_schedule_entry),
		)
		.route(
			"/api/providers/{id}/schedule/{entry_id}",
			delete(delete_schedule_entry),
		)
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

/// The acting party. Identity is established upstream; the gateway forwards
/// it in `x-actor-id` and `x-actor-role`.
struct Party(Actor);

impl<S> FromRequestParts<S> for Party
where
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let header = |name: &str| {
			parts
				.headers
				.get(name)
				.and_then(|value| value.to_str().ok())
				.filter(|value| !value.is_empty())
				.map(str::to_string)
		};
		let id = header("x-actor-id")
			.ok_or_else(|| ApiError::unauthenticated("missing x-actor-id header"))?;
		let role = header("x-actor-role")
			.ok_or_else(|| ApiError::unauthenticated("missing x-actor-role header"))?
			.parse::<Role>()
			.map_err(ApiError::unauthenticated)?;
		Ok(Party(Actor::new(id, role)))
	}
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"status": "ok",
		"service": state.engine.config().service.name,
	}))
}

async fn create_order(
	State(state): State<AppState>,
	party: Party,
	Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state.engine.orders().create_order(&party.0, request).await?;
	Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
	State(state): State<AppState>,
	Query(query): Query<OrderListQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
	Ok(Json(state.engine.orders().list_orders(query).await?))
}

async fn get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
	Ok(Json(state.engine.orders().get_order(&id).await?))
}

async fn assign_provider(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<AssignProviderRequest>,
) -> Result<Json<Order>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state
		.engine
		.orders()
		.assign_provider(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn submit_deposit_proof(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<PaymentProofRequest>,
) -> Result<Json<Order>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state
		.engine
		.orders()
		.submit_deposit_proof(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn verify_deposit(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.verify_deposit(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn begin_fulfillment(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.begin_fulfillment(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn complete_fulfillment(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.complete_fulfillment(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn submit_final_payment_proof(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<PaymentProofRequest>,
) -> Result<Json<Order>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state
		.engine
		.orders()
		.submit_final_payment_proof(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn verify_final_payment(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.verify_final_payment(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn deliver(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<DeliverRequest>,
) -> Result<Json<Order>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state.engine.orders().deliver(&party.0, &id, request).await?;
	Ok(Json(order))
}

async fn accept_delivery(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.accept_delivery(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn raise_dispute(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<DisputeRequest>,
) -> Result<Json<Order>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let order = state
		.engine
		.orders()
		.raise_dispute(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn resolve_dispute(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ResolveDisputeRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.resolve_dispute(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn cancel(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.orders().cancel(&party.0, &id, request).await?;
	Ok(Json(order))
}

async fn confirm_refund(
	State(state): State<AppState>,
	party: Party,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.orders()
		.confirm_refund(&party.0, &id, request)
		.await?;
	Ok(Json(order))
}

async fn quote_travel_fee(
	State(state): State<AppState>,
	Json(request): Json<TravelFeeQuoteRequest>,
) -> Result<Json<TravelFeeQuoteResponse>, ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	Ok(Json(state.engine.orders().travel_fee_preview(request).await?))
}

async fn list_schedule(
	State(state): State<AppState>,
	Path(provider_id): Path<String>,
	Query(range): Query<ScheduleRangeQuery>,
) -> Result<Json<Vec<ScheduleEntry>>, ApiError> {
	let entries = state
		.engine
		.schedule()
		.list_entries(&provider_id, range.from, range.to)
		.await?;
	Ok(Json(entries))
}

async fn create_schedule_entry(
	State(state): State<AppState>,
	party: Party,
	Path(provider_id): Path<String>,
	Json(request): Json<CreateScheduleEntryRequest>,
) -> Result<(StatusCode, Json<ScheduleEntry>), ApiError> {
	request.validate().map_err(ApiError::invalid_body)?;
	let entry = state
		.engine
		.schedule()
		.create_entry(&party.0, &provider_id, request)
		.await?;
	Ok((StatusCode::CREATED, Json(entry)))
}

async fn delete_schedule_entry(
	State(state): State<AppState>,
	party: Party,
	Path((provider_id, entry_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
	state
		.engine
		.schedule()
		.delete_entry(&party.0, &provider_id, &entry_id)
		.await?;
	Ok(StatusCode::NO_CONTENT)
}

/// Error envelope returned by every endpoint.
struct ApiError {
	status: StatusCode,
	body: ErrorResponse,
}

impl ApiError {
	fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
		Self {
			status,
			body: ErrorResponse {
				error: error.to_string(),
				message: message.into(),
				details: None,
			},
		}
	}

	fn unauthenticated(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
	}

	fn invalid_body(errors: validator::ValidationErrors) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			body: ErrorResponse {
				error: "validation".to_string(),
				message: "request body failed validation".to_string(),
				details: serde_json::to_value(&errors).ok(),
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(self.body)).into_response()
	}
}

impl From<OrderError> for ApiError {
	fn from(e: OrderError) -> Self {
		let (status, error) = match &e {
			OrderError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
			OrderError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
			OrderError::InvalidTransition { .. } => {
				(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition")
			}
			OrderError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
			OrderError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
			OrderError::Pricing(_) | OrderError::Storage(_) => {
				error!(error = %e, "request failed");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal")
			}
		};
		let details = match &e {
			OrderError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
			OrderError::InvalidTransition { from, to } => Some(serde_json::json!({
				"from": from.to_string(),
				"to": to.to_string(),
			})),
			_ => None,
		};
		Self {
			status,
			body: ErrorResponse {
				error: error.to_string(),
				message: e.to_string(),
				details,
			},
		}
	}
}

impl From<ScheduleError> for ApiError {
	fn from(e: ScheduleError) -> Self {
		let (status, error) = match &e {
			ScheduleError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
			ScheduleError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
			ScheduleError::OrderLinked => (StatusCode::CONFLICT, "conflict"),
			ScheduleError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
			ScheduleError::Storage(_) => {
				error!(error = %e, "request failed");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal")
			}
		};
		let details = match &e {
			ScheduleError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
			_ => None,
		};
		Self {
			status,
			body: ErrorResponse {
				error: error.to_string(),
				message: e.to_string(),
				details,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use booking_types::OrderStatus;

	#[test]
	fn order_errors_map_to_http_statuses() {
		let cases = [
			(
				OrderError::Validation {
					field: "amount".to_string(),
					message: "must be positive".to_string(),
				},
				StatusCode::BAD_REQUEST,
			),
			(
				OrderError::Conflict("provider busy".to_string()),
				StatusCode::CONFLICT,
			),
			(
				OrderError::InvalidTransition {
					from: OrderStatus::Pending,
					to: OrderStatus::Completed,
				},
				StatusCode::UNPROCESSABLE_ENTITY,
			),
			(
				OrderError::Unauthorized("not yours".to_string()),
				StatusCode::FORBIDDEN,
			),
			(
				OrderError::NotFound("o1".to_string()),
				StatusCode::NOT_FOUND,
			),
			(
				OrderError::Storage("disk".to_string()),
				StatusCode::INTERNAL_SERVER_ERROR,
			),
		];
		for (error, status) in cases {
			assert_eq!(ApiError::from(error).status, status);
		}
	}

	#[test]
	fn transition_errors_carry_both_states() {
		let api_error = ApiError::from(OrderError::InvalidTransition {
			from: OrderStatus::Pending,
			to: OrderStatus::Completed,
		});
		let details = api_error.body.details.unwrap();
		assert_eq!(details["from"], "pending");
		assert_eq!(details["to"], "completed");
	}

	#[test]
	fn validation_errors_name_the_field() {
		let api_error = ApiError::from(OrderError::Validation {
			field: "location".to_string(),
			message: "incomplete".to_string(),
		});
		assert_eq!(api_error.body.details.unwrap()["field"], "location");
	}

	#[test]
	fn schedule_errors_map_to_http_statuses() {
		assert_eq!(
			ApiError::from(ScheduleError::OrderLinked).status,
			StatusCode::CONFLICT
		);
		assert_eq!(
			ApiError::from(ScheduleError::NotFound("e1".to_string())).status,
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			ApiError::from(ScheduleError::Unauthorized("not yours".to_string())).status,
			StatusCode::FORBIDDEN
		);
	}
}
