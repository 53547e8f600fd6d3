//! The order lifecycle service.
//!
//! One struct owns every order mutation. Writes follow a fixed shape: take
//! the order lease, load, gate on the actor, transition, persist, announce.
//! Operations that bind provider time additionally hold the provider lease
//! across the conflict check and the write, so double booking stays
//! impossible across concurrent requests and across instances sharing a
//! storage backend.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use booking_geo::GeoService;
use booking_pricing::{financials, PricingService, ProviderDirectoryInterface};
use booking_storage::{Lease, StorageError, StorageService};
use booking_types::api::{
	ActionRequest, AssignProviderRequest, CreateOrderRequest, DeliverRequest, DisputeOutcome,
	DisputeRequest, OrderListQuery, PaymentProofRequest, ResolveDisputeRequest,
	TravelFeeQuoteRequest, TravelFeeQuoteResponse, VerifyPaymentRequest,
};
use booking_types::{
	Actor, BookingEvent, Coordinates, DeliveryRecord, DeliveryStatus, DisputeRecord,
	DisputeStatus, DistanceSource, EventBus, HistoryEntry, LineItem, Location, Order, OrderEvent,
	OrderStatus, PaymentStage, ProviderProfile, RemainingBalance, RemainingBalanceStatus, Role,
	SettlementRecord, SettlementStatus, TravelSummary,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::conflict::{ConflictGuard, ProviderSlot};
use crate::OrderError;

const ORDER_NS: &str = "order";
const ORDER_CODE_NS: &str = "order_code";
const CUSTOMER_ORDER_NS: &str = "customer_order";
const PROVIDER_ORDER_NS: &str = "provider_order";
const ACTIVE_NS: &str = "active";
const SETTLEMENT_NS: &str = "settlement";

/// Upper bound on how long a crashed request can block a resource.
const LEASE_TTL: StdDuration = StdDuration::from_secs(10);
const LEASE_WAIT: StdDuration = StdDuration::from_secs(2);

/// Lifecycle tunables, read from configuration at startup.
#[derive(Debug, Clone)]
pub struct OrderSettings {
	/// Prefix for the human-facing order code.
	pub code_prefix: String,
	/// Days the provider gets for post-production after final payment.
	pub delivery_grace_days: i64,
	/// Days the customer gets to accept or dispute a delivery.
	pub completion_grace_days: i64,
}

/// Counters from one lifecycle sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
	pub started: usize,
	pub completed: usize,
	pub failed: usize,
}

enum SweepAction {
	None,
	Started,
	Completed,
}

pub struct OrderService {
	storage: Arc<StorageService>,
	guard: ConflictGuard,
	geo: Arc<GeoService>,
	pricing: Arc<PricingService>,
	directory: Arc<dyn ProviderDirectoryInterface>,
	event_bus: EventBus,
	settings: OrderSettings,
}

impl OrderService {
	pub fn new(
		storage: Arc<StorageService>,
		geo: Arc<GeoService>,
		pricing: Arc<PricingService>,
		directory: Arc<dyn ProviderDirectoryInterface>,
		event_bus: EventBus,
		settings: OrderSettings,
	) -> Self {
		let guard = ConflictGuard::new(storage.clone());
		Self {
			storage,
			guard,
			geo,
			pricing,
			directory,
			event_bus,
			settings,
		}
	}

	/// Creates an order in `pending_payment` with its money fields derived.
	///
	/// When a provider is named, the booking window is checked against their
	/// existing slots under the provider lease before anything is written.
	pub async fn create_order(
		&self,
		actor: &Actor,
		request: CreateOrderRequest,
	) -> Result<Order, OrderError> {
		match actor.role {
			Role::Admin | Role::System => {}
			Role::Customer if actor.id == request.customer_id => {}
			_ => {
				return Err(OrderError::Unauthorized(
					"orders are created by their customer or an admin".to_string(),
				))
			}
		}
		if request.duration_minutes == 0 {
			return Err(OrderError::Validation {
				field: "duration_minutes".to_string(),
				message: "must be at least 1".to_string(),
			});
		}
		let duration_days = request.duration_days.unwrap_or(1);
		if duration_days == 0 {
			return Err(OrderError::Validation {
				field: "duration_days".to_string(),
				message: "must be at least 1".to_string(),
			});
		}
		let coordinates = match (request.location.latitude, request.location.longitude) {
			(Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
			(None, None) => None,
			_ => {
				return Err(OrderError::Validation {
					field: "location".to_string(),
					message: "latitude and longitude must be provided together".to_string(),
				})
			}
		};
		let booking_start = request.booking_date.and_time(request.start_time).and_utc();
		let booking_end = booking_start
			+ Duration::days(i64::from(duration_days) - 1)
			+ Duration::minutes(i64::from(request.duration_minutes));

		// Distance resolution may hit the network, keep it outside any lease.
		let (travel_fee, travel) = match &request.provider_id {
			Some(provider_id) => {
				let profile = self.lookup_provider(provider_id).await?;
				self.quote_travel(&profile, coordinates).await
			}
			None => (Decimal::ZERO, None),
		};

		let line_items: Vec<LineItem> = request
			.line_items
			.iter()
			.map(|item| LineItem {
				description: item.description.clone(),
				amount: item.amount,
			})
			.collect();
		let discount = request.discount.unwrap_or(Decimal::ZERO);
		let financials = self.pricing.build_financials(&line_items, travel_fee, discount)?;

		let sequence = self.storage.next_sequence("order").await?;
		let code = format!("{}-{:06}", self.settings.code_prefix, sequence);
		let now = Utc::now();
		let order = Order {
			id: uuid::Uuid::new_v4().to_string(),
			code,
			customer_id: request.customer_id,
			provider_id: request.provider_id,
			package_ref: request.package_ref,
			line_items,
			booking_date: request.booking_date,
			start_time: request.start_time,
			duration_minutes: request.duration_minutes,
			duration_days,
			booking_start,
			booking_end,
			completed_date: None,
			location: Location {
				address: request.location.address,
				city: request.location.city,
				district: request.location.district,
				map_link: request.location.map_link,
				coordinates,
			},
			financials,
			travel,
			deposit: PaymentStage::default(),
			remaining: RemainingBalance {
				amount: None,
				status: RemainingBalanceStatus::NotCalculated,
				stage: PaymentStage::default(),
			},
			delivery: DeliveryRecord {
				deadline: None,
				delivered_at: None,
				product_url: None,
				status: DeliveryStatus::Pending,
			},
			dispute: None,
			settlement: SettlementRecord {
				status: SettlementStatus::Unpaid,
				amount: None,
				settled_at: None,
			},
			status: OrderStatus::PendingPayment,
			history: vec![HistoryEntry {
				status: OrderStatus::PendingPayment,
				at: now,
				actor_id: actor.id.clone(),
				actor_role: actor.role,
				note: Some("order created".to_string()),
			}],
			created_at: now,
			updated_at: now,
		};

		match order.provider_id.clone() {
			Some(provider_id) => {
				let lease = self.lock_provider(&provider_id).await?;
				let result = self.insert_order(&order).await;
				self.unlock(lease).await;
				result?;
			}
			None => self.insert_order(&order).await?,
		}
		info!(
			order_id = %order.id,
			code = %order.code,
			customer_id = %order.customer_id,
			"order created"
		);
		self.publish(BookingEvent::Order(OrderEvent::Created {
			order: order.clone(),
		}));
		Ok(order)
	}

	/// Assigns or replaces the provider on a not-yet-confirmed order.
	///
	/// Travel-dependent figures are re-derived for the new provider; the
	/// deposit quoted at creation stands.
	pub async fn assign_provider(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: AssignProviderRequest,
	) -> Result<Order, OrderError> {
		Self::require_admin(actor)?;
		let profile = self.lookup_provider(&request.provider_id).await?;
		let order_id = self.resolve_id(id_or_code).await?;

		// Quote against the order's destination before taking any lease.
		let snapshot = self.load(&order_id).await?;
		let (travel_fee, travel) = self
			.quote_travel(&profile, snapshot.location.coordinates)
			.await;

		let lease = self.lock_order(&order_id).await?;
		let result = self
			.assign_provider_locked(actor, &order_id, request, travel_fee, travel)
			.await;
		self.unlock(lease).await;
		result
	}

	/// Records the customer's deposit transfer evidence.
	pub async fn submit_deposit_proof(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: PaymentProofRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			Self::require_owning_customer(order, actor)?;
			let from = Self::transition(order, OrderStatus::Pending, actor, request.note)?;
			order.deposit.proof_url = Some(request.proof_url);
			order.deposit.transferred_at = Some(request.transferred_at.unwrap_or_else(Utc::now));
			Ok(from)
		})
		.await
	}

	/// Confirms the booking once an admin has verified the deposit.
	///
	/// Confirmation is the moment the slot becomes binding, so the overlap
	/// check runs again under the provider lease before the write.
	pub async fn verify_deposit(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: VerifyPaymentRequest,
	) -> Result<Order, OrderError> {
		Self::require_admin(actor)?;
		let order_id = self.resolve_id(id_or_code).await?;
		let lease = self.lock_order(&order_id).await?;
		let result = self.verify_deposit_locked(actor, &order_id, request).await;
		self.unlock(lease).await;
		result
	}

	/// Marks the engagement as underway. Rejected before the booking start.
	pub async fn begin_fulfillment(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ActionRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			Self::require_fulfilling_party(order, actor)?;
			if Utc::now() < order.booking_start {
				return Err(OrderError::Validation {
					field: "booking_start".to_string(),
					message: format!("the engagement does not start until {}", order.booking_start),
				});
			}
			Self::transition(order, OrderStatus::InProgress, actor, request.note)
		})
		.await
	}

	/// Ends the on-site work and opens the remaining balance.
	pub async fn complete_fulfillment(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ActionRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			Self::require_fulfilling_party(order, actor)?;
			let from =
				Self::transition(order, OrderStatus::WaitingFinalPayment, actor, request.note)?;
			order.remaining.status = RemainingBalanceStatus::Outstanding;
			Ok(from)
		})
		.await
	}

	/// Records the customer's remaining-balance transfer evidence.
	pub async fn submit_final_payment_proof(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: PaymentProofRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			Self::require_owning_customer(order, actor)?;
			let from =
				Self::transition(order, OrderStatus::FinalPaymentPending, actor, request.note)?;
			order.remaining.stage.proof_url = Some(request.proof_url);
			order.remaining.stage.transferred_at =
				Some(request.transferred_at.unwrap_or_else(Utc::now));
			order.remaining.status = RemainingBalanceStatus::ProofSubmitted;
			Ok(from)
		})
		.await
	}

	/// Verifies the remaining balance and starts the production clock.
	pub async fn verify_final_payment(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: VerifyPaymentRequest,
	) -> Result<Order, OrderError> {
		Self::require_admin(actor)?;
		let production_window = Duration::days(self.settings.delivery_grace_days);
		self.update_order(actor, id_or_code, move |order| {
			let amount = request
				.amount
				.or(order.remaining.amount)
				.unwrap_or(Decimal::ZERO);
			if amount < Decimal::ZERO {
				return Err(OrderError::Validation {
					field: "amount".to_string(),
					message: "verified amount cannot be negative".to_string(),
				});
			}
			let from = Self::transition(order, OrderStatus::Processing, actor, request.note)?;
			let now = Utc::now();
			order.remaining.stage.verified = true;
			order.remaining.stage.verified_by = Some(actor.id.clone());
			order.remaining.stage.verified_at = Some(now);
			order.remaining.stage.amount = Some(amount);
			order.remaining.status = RemainingBalanceStatus::Paid;
			order.delivery.deadline = Some(now + production_window);
			Ok(from)
		})
		.await
	}

	/// Hands the deliverables over and starts the acceptance window.
	pub async fn deliver(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: DeliverRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			Self::require_fulfilling_party(order, actor)?;
			let from = Self::transition(order, OrderStatus::Delivered, actor, request.note)?;
			let now = Utc::now();
			order.delivery.delivered_at = Some(now);
			order.delivery.product_url = Some(request.product_url);
			order.delivery.status = match order.delivery.deadline {
				Some(deadline) if now > deadline => {
					warn!(order_id = %order.id, deadline = %deadline, "delivered after the deadline");
					DeliveryStatus::Late
				}
				_ => DeliveryStatus::OnTime,
			};
			Ok(from)
		})
		.await
	}

	/// Customer acceptance. Completes and settles the order.
	pub async fn accept_delivery(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ActionRequest,
	) -> Result<Order, OrderError> {
		let order_id = self.resolve_id(id_or_code).await?;
		let lease = self.lock_order(&order_id).await?;
		let result = async {
			let mut order = self.load(&order_id).await?;
			Self::require_owning_customer(&order, actor)?;
			// Acceptance only answers a delivery; a disputed order completes
			// through dispute resolution.
			if order.status != OrderStatus::Delivered {
				return Err(OrderError::InvalidTransition {
					from: order.status,
					to: OrderStatus::Completed,
				});
			}
			let from = self.complete(&mut order, actor, request.note).await?;
			self.commit(&order, from, actor).await?;
			Ok(order)
		}
		.await;
		self.unlock(lease).await;
		result
	}

	/// Opens a dispute against a delivery inside the acceptance window.
	pub async fn raise_dispute(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: DisputeRequest,
	) -> Result<Order, OrderError> {
		let window = Duration::days(self.settings.completion_grace_days);
		self.update_order(actor, id_or_code, move |order| {
			Self::require_owning_customer(order, actor)?;
			let now = Utc::now();
			if let Some(clock_start) = order.completion_clock_start() {
				let closes_at = clock_start + window;
				if now > closes_at {
					return Err(OrderError::Validation {
						field: "dispute".to_string(),
						message: format!("the dispute window closed at {closes_at}"),
					});
				}
			}
			let from =
				Self::transition(order, OrderStatus::Complaint, actor, Some(request.reason.clone()))?;
			order.dispute = Some(DisputeRecord {
				reason: request.reason,
				status: DisputeStatus::Open,
				opened_at: now,
				response: None,
				resolved_at: None,
			});
			Ok(from)
		})
		.await
	}

	/// Closes a dispute and routes the order to the outcome's target status.
	pub async fn resolve_dispute(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ResolveDisputeRequest,
	) -> Result<Order, OrderError> {
		Self::require_admin(actor)?;
		let valid_target = match request.outcome {
			DisputeOutcome::Resolved => request.next_status == OrderStatus::Completed,
			DisputeOutcome::Rejected => matches!(
				request.next_status,
				OrderStatus::Delivered | OrderStatus::Processing
			),
		};
		if !valid_target {
			let expectation = match request.outcome {
				DisputeOutcome::Resolved => "a resolved dispute completes the order",
				DisputeOutcome::Rejected => {
					"a rejected dispute returns the order to delivered or processing"
				}
			};
			return Err(OrderError::Validation {
				field: "next_status".to_string(),
				message: format!("{expectation}, not {}", request.next_status),
			});
		}
		let order_id = self.resolve_id(id_or_code).await?;
		let lease = self.lock_order(&order_id).await?;
		let result = self.resolve_dispute_locked(actor, &order_id, request).await;
		self.unlock(lease).await;
		result
	}

	/// Cancels an order, routing through `refund_pending` once money moved.
	pub async fn cancel(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ActionRequest,
	) -> Result<Order, OrderError> {
		self.update_order(actor, id_or_code, |order| {
			match actor.role {
				Role::Admin | Role::System => {}
				Role::Customer => {
					if actor.id != order.customer_id {
						return Err(OrderError::Unauthorized(
							"only the ordering customer may cancel".to_string(),
						));
					}
					if !matches!(
						order.status,
						OrderStatus::PendingPayment | OrderStatus::Pending
					) {
						return Err(OrderError::Unauthorized(
							"customers can only cancel before the booking is confirmed"
								.to_string(),
						));
					}
				}
				Role::Provider => {
					return Err(OrderError::Unauthorized(
						"providers cannot cancel orders".to_string(),
					))
				}
			}
			let target = if order.status == OrderStatus::PendingPayment
				&& !order.has_payment_evidence()
			{
				OrderStatus::Cancelled
			} else {
				OrderStatus::RefundPending
			};
			Self::transition(order, target, actor, request.note)
		})
		.await
	}

	/// Confirms the refund was paid out and closes the order.
	pub async fn confirm_refund(
		&self,
		actor: &Actor,
		id_or_code: &str,
		request: ActionRequest,
	) -> Result<Order, OrderError> {
		Self::require_admin(actor)?;
		self.update_order(actor, id_or_code, |order| {
			Self::transition(order, OrderStatus::Cancelled, actor, request.note)
		})
		.await
	}

	/// Fetches an order by id or by its human-facing code.
	pub async fn get_order(&self, id_or_code: &str) -> Result<Order, OrderError> {
		let order_id = self.resolve_id(id_or_code).await?;
		self.load(&order_id).await
	}

	/// Lists a party's orders, newest first.
	pub async fn list_orders(&self, query: OrderListQuery) -> Result<Vec<Order>, OrderError> {
		let order_ids: Vec<String> = if let Some(customer_id) = &query.customer_id {
			self.storage
				.list_values(CUSTOMER_ORDER_NS, &format!("{customer_id}:"))
				.await?
		} else if let Some(provider_id) = &query.provider_id {
			self.storage
				.list_values(PROVIDER_ORDER_NS, &format!("{provider_id}:"))
				.await?
		} else {
			return Err(OrderError::Validation {
				field: "query".to_string(),
				message: "customer_id or provider_id is required".to_string(),
			});
		};
		let mut orders = Vec::with_capacity(order_ids.len());
		for order_id in order_ids {
			match self.load(&order_id).await {
				Ok(order) => orders.push(order),
				Err(OrderError::NotFound(_)) => continue,
				Err(e) => return Err(e),
			}
		}
		orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(orders)
	}

	/// Prices a travel fee for a destination without creating anything.
	pub async fn travel_fee_preview(
		&self,
		request: TravelFeeQuoteRequest,
	) -> Result<TravelFeeQuoteResponse, OrderError> {
		let profile = self.lookup_provider(&request.provider_id).await?;
		let destination = Coordinates::new(request.latitude, request.longitude);
		let Some(origin) = profile.base_coordinates else {
			return Ok(TravelFeeQuoteResponse {
				distance_km: 0.0,
				source: DistanceSource::Haversine,
				billable_km: 0.0,
				fee: Decimal::ZERO,
				capped: false,
				breakdown: "travel fee waived: provider has no base coordinates".to_string(),
			});
		};
		let resolution = self.geo.resolve_distance(origin, destination).await;
		let quote = self
			.pricing
			.quote_travel_fee(&profile.travel_fee, resolution.km);
		Ok(TravelFeeQuoteResponse {
			distance_km: resolution.km,
			source: resolution.source,
			billable_km: quote.billable_km,
			fee: quote.fee,
			capped: quote.capped,
			breakdown: quote.breakdown,
		})
	}

	/// One pass over the non-terminal orders, applying time-driven moves:
	/// confirmed bookings whose start passed begin, delivered orders whose
	/// acceptance window elapsed complete.
	pub async fn sweep(&self) -> Result<SweepOutcome, OrderError> {
		let order_ids: Vec<String> = self.storage.list_values(ACTIVE_NS, "").await?;
		let mut outcome = SweepOutcome::default();
		for order_id in order_ids {
			match self.sweep_order(&order_id).await {
				Ok(SweepAction::Started) => outcome.started += 1,
				Ok(SweepAction::Completed) => outcome.completed += 1,
				Ok(SweepAction::None) => {}
				Err(e) => {
					outcome.failed += 1;
					warn!(order_id = %order_id, error = %e, "sweep pass failed for order");
				}
			}
		}
		if outcome != SweepOutcome::default() {
			info!(
				started = outcome.started,
				completed = outcome.completed,
				failed = outcome.failed,
				"lifecycle sweep applied changes"
			);
		}
		Ok(outcome)
	}

	async fn sweep_order(&self, order_id: &str) -> Result<SweepAction, OrderError> {
		let order = match self.load(order_id).await {
			Ok(order) => order,
			Err(OrderError::NotFound(_)) => {
				// Stale marker.
				self.storage.remove(ACTIVE_NS, order_id).await?;
				return Ok(SweepAction::None);
			}
			Err(e) => return Err(e),
		};
		let now = Utc::now();
		match order.status {
			OrderStatus::Confirmed if now >= order.booking_start => {
				let request = ActionRequest {
					note: Some("booking start reached".to_string()),
				};
				match self
					.begin_fulfillment(&Actor::system(), order_id, request)
					.await
				{
					Ok(_) => Ok(SweepAction::Started),
					// A user action got there first.
					Err(OrderError::InvalidTransition { .. } | OrderError::Conflict(_)) => {
						Ok(SweepAction::None)
					}
					Err(e) => Err(e),
				}
			}
			OrderStatus::Delivered => {
				let Some(clock_start) = order.completion_clock_start() else {
					return Ok(SweepAction::None);
				};
				if now < clock_start + Duration::days(self.settings.completion_grace_days) {
					return Ok(SweepAction::None);
				}
				match self.auto_complete(order_id).await {
					Ok(true) => Ok(SweepAction::Completed),
					Ok(false) => Ok(SweepAction::None),
					Err(OrderError::Conflict(_)) => Ok(SweepAction::None),
					Err(e) => Err(e),
				}
			}
			_ => Ok(SweepAction::None),
		}
	}

	/// Completes a delivered order whose acceptance window elapsed. The
	/// screening done by the sweep is repeated under the lease.
	async fn auto_complete(&self, order_id: &str) -> Result<bool, OrderError> {
		let lease = self.lock_order(order_id).await?;
		let result = async {
			let mut order = self.load(order_id).await?;
			if order.status != OrderStatus::Delivered {
				return Ok(false);
			}
			let Some(clock_start) = order.completion_clock_start() else {
				return Ok(false);
			};
			if Utc::now() < clock_start + Duration::days(self.settings.completion_grace_days) {
				return Ok(false);
			}
			let actor = Actor::system();
			let from = self
				.complete(
					&mut order,
					&actor,
					Some("grace window elapsed without dispute".to_string()),
				)
				.await?;
			self.commit(&order, from, &actor).await?;
			Ok(true)
		}
		.await;
		self.unlock(lease).await;
		result
	}

	async fn assign_provider_locked(
		&self,
		actor: &Actor,
		order_id: &str,
		request: AssignProviderRequest,
		travel_fee: Decimal,
		travel: Option<TravelSummary>,
	) -> Result<Order, OrderError> {
		let mut order = self.load(order_id).await?;
		if !matches!(
			order.status,
			OrderStatus::PendingPayment | OrderStatus::Pending
		) {
			return Err(OrderError::Validation {
				field: "status".to_string(),
				message: format!(
					"provider can only be assigned before confirmation, order is {}",
					order.status
				),
			});
		}
		let financials =
			self.pricing
				.build_financials(&order.line_items, travel_fee, order.financials.discount)?;

		let provider_lease = self.lock_provider(&request.provider_id).await?;
		let result = async {
			if let Some(conflict) = self
				.guard
				.find_conflict(
					&request.provider_id,
					order.booking_start,
					order.booking_end,
					Some(&order.id),
				)
				.await?
			{
				return Err(Self::conflict_error(&request.provider_id, &conflict));
			}
			let previous = order.provider_id.replace(request.provider_id.clone());
			if let Some(previous_id) = previous.as_deref().filter(|p| *p != request.provider_id) {
				self.guard.remove_slot(previous_id, &order.id).await?;
				self.storage
					.remove(PROVIDER_ORDER_NS, &format!("{previous_id}:{}", order.id))
					.await?;
			}
			// The deposit quoted at creation stands; only travel-dependent
			// figures move.
			let deposit_required = order.financials.deposit_required;
			order.financials = financials;
			order.financials.deposit_required = deposit_required;
			order.travel = travel;
			let now = Utc::now();
			order.updated_at = now;
			order.history.push(HistoryEntry {
				status: order.status,
				at: now,
				actor_id: actor.id.clone(),
				actor_role: actor.role,
				note: request
					.note
					.clone()
					.or_else(|| Some(format!("provider {} assigned", request.provider_id))),
			});
			self.storage.store(ORDER_NS, &order.id, &order).await?;
			self.storage
				.store(
					PROVIDER_ORDER_NS,
					&format!("{}:{}", request.provider_id, order.id),
					&order.id,
				)
				.await?;
			self.guard.sync_slot(&order).await?;
			info!(order_id = %order.id, provider_id = %request.provider_id, "provider assigned");
			self.publish(BookingEvent::Order(OrderEvent::ProviderAssigned {
				order_id: order.id.clone(),
				provider_id: request.provider_id.clone(),
				previous_provider_id: previous,
			}));
			Ok(())
		}
		.await;
		self.unlock(provider_lease).await;
		result?;
		Ok(order)
	}

	async fn verify_deposit_locked(
		&self,
		actor: &Actor,
		order_id: &str,
		request: VerifyPaymentRequest,
	) -> Result<Order, OrderError> {
		let mut order = self.load(order_id).await?;
		let Some(provider_id) = order.provider_id.clone() else {
			return Err(OrderError::Validation {
				field: "provider_id".to_string(),
				message: "a provider must be assigned before the deposit can be verified"
					.to_string(),
			});
		};
		let amount = request.amount.unwrap_or(order.financials.deposit_required);
		if amount <= Decimal::ZERO || amount > order.financials.final_amount {
			return Err(OrderError::Validation {
				field: "amount".to_string(),
				message: "verified amount must be positive and within the final amount"
					.to_string(),
			});
		}
		let provider_lease = self.lock_provider(&provider_id).await?;
		let result = async {
			if let Some(conflict) = self
				.guard
				.find_conflict(
					&provider_id,
					order.booking_start,
					order.booking_end,
					Some(&order.id),
				)
				.await?
			{
				return Err(Self::conflict_error(&provider_id, &conflict));
			}
			let from = Self::transition(&mut order, OrderStatus::Confirmed, actor, request.note)?;
			let now = Utc::now();
			order.deposit.verified = true;
			order.deposit.verified_by = Some(actor.id.clone());
			order.deposit.verified_at = Some(now);
			order.deposit.amount = Some(amount);
			order.remaining.amount = Some(financials::remaining_amount(
				order.financials.final_amount,
				amount,
			));
			self.commit(&order, from, actor).await
		}
		.await;
		self.unlock(provider_lease).await;
		result?;
		Ok(order)
	}

	async fn resolve_dispute_locked(
		&self,
		actor: &Actor,
		order_id: &str,
		request: ResolveDisputeRequest,
	) -> Result<Order, OrderError> {
		let mut order = self.load(order_id).await?;
		if order.status != OrderStatus::Complaint {
			return Err(OrderError::InvalidTransition {
				from: order.status,
				to: request.next_status,
			});
		}
		let dispute = order.dispute.as_mut().ok_or_else(|| OrderError::Validation {
			field: "dispute".to_string(),
			message: "order has no dispute on record".to_string(),
		})?;
		let now = Utc::now();
		dispute.status = match request.outcome {
			DisputeOutcome::Resolved => DisputeStatus::Resolved,
			DisputeOutcome::Rejected => DisputeStatus::Rejected,
		};
		dispute.response = request.response.clone();
		dispute.resolved_at = Some(now);

		let from = if request.next_status == OrderStatus::Completed {
			self.complete(&mut order, actor, request.response).await?
		} else {
			let from = Self::transition(&mut order, request.next_status, actor, request.response)?;
			if request.next_status == OrderStatus::Processing {
				// Redo: the previous delivery is void, the production clock
				// restarts.
				order.delivery.deadline =
					Some(now + Duration::days(self.settings.delivery_grace_days));
				order.delivery.delivered_at = None;
				order.delivery.product_url = None;
				order.delivery.status = DeliveryStatus::Pending;
			}
			from
		};
		self.commit(&order, from, actor).await?;
		Ok(order)
	}

	/// Lease-load-mutate-commit shape shared by the simple transitions.
	async fn update_order<F>(
		&self,
		actor: &Actor,
		id_or_code: &str,
		mutate: F,
	) -> Result<Order, OrderError>
	where
		F: FnOnce(&mut Order) -> Result<OrderStatus, OrderError>,
	{
		let order_id = self.resolve_id(id_or_code).await?;
		let lease = self.lock_order(&order_id).await?;
		let result = async {
			let mut order = self.load(&order_id).await?;
			let from = mutate(&mut order)?;
			self.commit(&order, from, actor).await?;
			Ok(order)
		}
		.await;
		self.unlock(lease).await;
		result
	}

	/// Marks the order completed and settles the provider payout.
	async fn complete(
		&self,
		order: &mut Order,
		actor: &Actor,
		note: Option<String>,
	) -> Result<OrderStatus, OrderError> {
		let from = Self::transition(order, OrderStatus::Completed, actor, note)?;
		order.completed_date = Some(Utc::now());
		self.settle(order).await?;
		Ok(from)
	}

	/// Records the settlement exactly once. A replayed completion adopts the
	/// record written the first time.
	async fn settle(&self, order: &mut Order) -> Result<(), OrderError> {
		let Some(provider_id) = order.provider_id.clone() else {
			return Ok(());
		};
		let payout = self
			.pricing
			.settlement_amount(order.financials.final_amount)
			.await?;
		let record = SettlementRecord {
			status: SettlementStatus::Paid,
			amount: Some(payout),
			settled_at: Some(Utc::now()),
		};
		let created = self
			.storage
			.store_if_absent(SETTLEMENT_NS, &order.id, &record, None)
			.await?;
		if created {
			order.settlement = record;
			info!(order_id = %order.id, provider_id = %provider_id, amount = %payout, "settlement recorded");
			self.publish(BookingEvent::Order(OrderEvent::SettlementRecorded {
				order_id: order.id.clone(),
				provider_id,
				amount: payout,
			}));
		} else {
			order.settlement = self.storage.retrieve(SETTLEMENT_NS, &order.id).await?;
			debug!(order_id = %order.id, "settlement already recorded");
		}
		Ok(())
	}

	fn transition(
		order: &mut Order,
		to: OrderStatus,
		actor: &Actor,
		note: Option<String>,
	) -> Result<OrderStatus, OrderError> {
		let from = order.status;
		if !from.can_transition_to(to) {
			return Err(OrderError::InvalidTransition { from, to });
		}
		let now = Utc::now();
		order.status = to;
		order.updated_at = now;
		order.history.push(HistoryEntry {
			status: to,
			at: now,
			actor_id: actor.id.clone(),
			actor_role: actor.role,
			note,
		});
		Ok(from)
	}

	/// Persists a transitioned order and announces the change. The slot
	/// record and the sweep marker follow the new status.
	async fn commit(&self, order: &Order, from: OrderStatus, actor: &Actor) -> Result<(), OrderError> {
		self.storage.store(ORDER_NS, &order.id, order).await?;
		self.guard.sync_slot(order).await?;
		if order.status.is_terminal() {
			self.storage.remove(ACTIVE_NS, &order.id).await?;
		}
		info!(
			order_id = %order.id,
			code = %order.code,
			from = %from,
			to = %order.status,
			"order status changed"
		);
		let note = order.history.last().and_then(|entry| entry.note.clone());
		self.publish(BookingEvent::Order(OrderEvent::StatusChanged {
			order: order.clone(),
			from,
			to: order.status,
			actor: actor.clone(),
			note,
		}));
		Ok(())
	}

	/// Writes a brand-new order and all of its lookup records. Caller holds
	/// the provider lease when a provider is named.
	async fn insert_order(&self, order: &Order) -> Result<(), OrderError> {
		if let Some(provider_id) = &order.provider_id {
			if let Some(conflict) = self
				.guard
				.find_conflict(provider_id, order.booking_start, order.booking_end, None)
				.await?
			{
				return Err(Self::conflict_error(provider_id, &conflict));
			}
		}
		if !self
			.storage
			.store_if_absent(ORDER_CODE_NS, &order.code, &order.id, None)
			.await?
		{
			return Err(OrderError::Conflict(format!(
				"order code {} is already taken",
				order.code
			)));
		}
		self.storage.store(ORDER_NS, &order.id, order).await?;
		self.storage
			.store(
				CUSTOMER_ORDER_NS,
				&format!("{}:{}", order.customer_id, order.id),
				&order.id,
			)
			.await?;
		if let Some(provider_id) = &order.provider_id {
			self.storage
				.store(
					PROVIDER_ORDER_NS,
					&format!("{provider_id}:{}", order.id),
					&order.id,
				)
				.await?;
		}
		self.storage.store(ACTIVE_NS, &order.id, &order.id).await?;
		self.guard.sync_slot(order).await?;
		Ok(())
	}

	async fn quote_travel(
		&self,
		profile: &ProviderProfile,
		destination: Option<Coordinates>,
	) -> (Decimal, Option<TravelSummary>) {
		let (Some(origin), Some(destination)) = (profile.base_coordinates, destination) else {
			return (Decimal::ZERO, None);
		};
		let resolution = self.geo.resolve_distance(origin, destination).await;
		let quote = self
			.pricing
			.quote_travel_fee(&profile.travel_fee, resolution.km);
		let summary = TravelSummary {
			distance_km: resolution.km,
			source: resolution.source,
			breakdown: quote.breakdown,
		};
		(quote.fee, Some(summary))
	}

	async fn lookup_provider(&self, provider_id: &str) -> Result<ProviderProfile, OrderError> {
		self.directory
			.profile(provider_id)
			.await?
			.ok_or_else(|| OrderError::Validation {
				field: "provider_id".to_string(),
				message: format!("unknown provider: {provider_id}"),
			})
	}

	/// Maps an id or a human-facing code to the storage id.
	async fn resolve_id(&self, id_or_code: &str) -> Result<String, OrderError> {
		if self.storage.exists(ORDER_NS, id_or_code).await? {
			return Ok(id_or_code.to_string());
		}
		match self
			.storage
			.retrieve::<String>(ORDER_CODE_NS, id_or_code)
			.await
		{
			Ok(order_id) => Ok(order_id),
			Err(StorageError::NotFound) => Err(OrderError::NotFound(id_or_code.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	async fn load(&self, order_id: &str) -> Result<Order, OrderError> {
		match self.storage.retrieve::<Order>(ORDER_NS, order_id).await {
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderError::NotFound(order_id.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	async fn lock_order(&self, order_id: &str) -> Result<Lease, OrderError> {
		Ok(self
			.storage
			.acquire_lease(&format!("order:{order_id}"), LEASE_TTL, LEASE_WAIT)
			.await?)
	}

	async fn lock_provider(&self, provider_id: &str) -> Result<Lease, OrderError> {
		Ok(self
			.storage
			.acquire_lease(&format!("provider:{provider_id}"), LEASE_TTL, LEASE_WAIT)
			.await?)
	}

	async fn unlock(&self, lease: Lease) {
		if let Err(e) = self.storage.release_lease(lease).await {
			warn!(error = %e, "failed to release lease");
		}
	}

	fn publish(&self, event: BookingEvent) {
		// A send error only means nobody is subscribed right now.
		if self.event_bus.publish(event).is_err() {
			debug!("event dropped, no subscribers");
		}
	}

	fn conflict_error(provider_id: &str, slot: &ProviderSlot) -> OrderError {
		OrderError::Conflict(format!(
			"provider {provider_id} is already booked from {} to {}",
			slot.booking_start, slot.booking_end
		))
	}

	fn require_admin(actor: &Actor) -> Result<(), OrderError> {
		if matches!(actor.role, Role::Admin | Role::System) {
			Ok(())
		} else {
			Err(OrderError::Unauthorized(format!(
				"{} may not perform this action",
				actor.role
			)))
		}
	}

	fn require_owning_customer(order: &Order, actor: &Actor) -> Result<(), OrderError> {
		match actor.role {
			Role::Admin | Role::System => Ok(()),
			Role::Customer if actor.id == order.customer_id => Ok(()),
			_ => Err(OrderError::Unauthorized(
				"only the ordering customer may perform this action".to_string(),
			)),
		}
	}

	fn require_fulfilling_party(order: &Order, actor: &Actor) -> Result<(), OrderError> {
		match actor.role {
			Role::Admin | Role::System => Ok(()),
			Role::Provider if order.provider_id.as_deref() == Some(actor.id.as_str()) => Ok(()),
			_ => Err(OrderError::Unauthorized(
				"only the assigned provider may perform this action".to_string(),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use booking_pricing::{FeePolicyInterface, PricingError};
	use booking_storage::implementations::memory::MemoryStorage;
	use booking_types::api::{LineItemRequest, LocationRequest};
	use booking_types::TravelFeePolicy;
	use chrono::{NaiveDate, NaiveTime};
	use std::collections::HashMap;

	fn dec(value: i64) -> Decimal {
		Decimal::new(value, 0)
	}

	struct FixedFees(Decimal);

	#[async_trait]
	impl FeePolicyInterface for FixedFees {
		async fn platform_fee_percent(&self) -> Result<Decimal, PricingError> {
			Ok(self.0)
		}
	}

	struct StubDirectory(HashMap<String, ProviderProfile>);

	#[async_trait]
	impl ProviderDirectoryInterface for StubDirectory {
		async fn profile(
			&self,
			provider_id: &str,
		) -> Result<Option<ProviderProfile>, PricingError> {
			Ok(self.0.get(provider_id).cloned())
		}
	}

	fn providers() -> HashMap<String, ProviderProfile> {
		let mut providers = HashMap::new();
		providers.insert(
			"p1".to_string(),
			ProviderProfile {
				id: "p1".to_string(),
				display_name: "Studio One".to_string(),
				base_coordinates: Some(Coordinates::new(0.0, 0.0)),
				travel_fee: TravelFeePolicy {
					enabled: true,
					free_distance_km: 10.0,
					fee_per_km: dec(1000),
					tiers: Vec::new(),
					max_fee: None,
				},
			},
		);
		providers.insert(
			"p2".to_string(),
			ProviderProfile {
				id: "p2".to_string(),
				display_name: "Studio Two".to_string(),
				base_coordinates: None,
				travel_fee: TravelFeePolicy::disabled(),
			},
		);
		providers
	}

	fn service_with_grace(completion_grace_days: i64) -> (OrderService, Arc<StorageService>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let geo = Arc::new(GeoService::new(None, StdDuration::from_secs(1)));
		let pricing = Arc::new(PricingService::new(
			Box::new(FixedFees(dec(10))),
			Decimal::new(30, 2),
		));
		let directory: Arc<dyn ProviderDirectoryInterface> = Arc::new(StubDirectory(providers()));
		let settings = OrderSettings {
			code_prefix: "LB".to_string(),
			delivery_grace_days: 7,
			completion_grace_days,
		};
		let service = OrderService::new(
			storage.clone(),
			geo,
			pricing,
			directory,
			EventBus::new(16),
			settings,
		);
		(service, storage)
	}

	fn service() -> OrderService {
		service_with_grace(3).0
	}

	fn customer() -> Actor {
		Actor::new("c1", Role::Customer)
	}

	fn admin() -> Actor {
		Actor::new("a1", Role::Admin)
	}

	fn provider_actor() -> Actor {
		Actor::new("p1", Role::Provider)
	}

	fn naive_date(year: i32, month: u32, day: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(year, month, day).unwrap()
	}

	fn order_request(customer: &str, provider: Option<&str>, start_hour: u32) -> CreateOrderRequest {
		CreateOrderRequest {
			customer_id: customer.to_string(),
			provider_id: provider.map(str::to_string),
			package_ref: "wedding-standard".to_string(),
			line_items: vec![LineItemRequest {
				description: "full day coverage".to_string(),
				amount: dec(1_000_000),
			}],
			booking_date: naive_date(2099, 9, 10),
			start_time: NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap(),
			duration_minutes: 120,
			duration_days: None,
			discount: None,
			location: LocationRequest {
				address: "12 Riverside Road".to_string(),
				city: "Hanoi".to_string(),
				district: "Tay Ho".to_string(),
				map_link: None,
				latitude: None,
				longitude: None,
			},
		}
	}

	/// Same order, but with a booking date already in the past.
	fn started_request(customer: &str, provider: Option<&str>) -> CreateOrderRequest {
		let mut request = order_request(customer, provider, 9);
		request.booking_date = naive_date(2020, 1, 6);
		request
	}

	fn proof(url: &str) -> PaymentProofRequest {
		PaymentProofRequest {
			proof_url: url.to_string(),
			transferred_at: None,
			note: None,
		}
	}

	fn no_amount() -> VerifyPaymentRequest {
		VerifyPaymentRequest {
			amount: None,
			note: None,
		}
	}

	async fn order_to_delivered(service: &OrderService) -> Order {
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();
		service
			.begin_fulfillment(&provider_actor(), &order.id, ActionRequest::default())
			.await
			.unwrap();
		service
			.complete_fulfillment(&provider_actor(), &order.id, ActionRequest::default())
			.await
			.unwrap();
		service
			.submit_final_payment_proof(&customer(), &order.id, proof("https://pay.example/f1"))
			.await
			.unwrap();
		service
			.verify_final_payment(&admin(), &order.id, no_amount())
			.await
			.unwrap();
		service
			.deliver(
				&provider_actor(),
				&order.id,
				DeliverRequest {
					product_url: "https://gallery.example/g1".to_string(),
					note: None,
				},
			)
			.await
			.unwrap();
		service.get_order(&order.id).await.unwrap()
	}

	#[tokio::test]
	async fn create_computes_financials_and_code() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();
		assert_eq!(order.code, "LB-000001");
		assert_eq!(order.status, OrderStatus::PendingPayment);
		assert_eq!(order.financials.service_subtotal, dec(1_000_000));
		assert_eq!(order.financials.travel_fee, Decimal::ZERO);
		assert_eq!(order.financials.final_amount, dec(1_000_000));
		assert_eq!(order.financials.deposit_required, dec(300_000));
		assert!(order.travel.is_none());
		assert_eq!(order.history.len(), 1);

		let second = service
			.create_order(&customer(), order_request("c1", None, 9))
			.await
			.unwrap();
		assert_eq!(second.code, "LB-000002");
	}

	#[tokio::test]
	async fn travel_fee_is_priced_into_the_order() {
		let service = service();
		let mut request = order_request("c1", Some("p1"), 14);
		request.location.latitude = Some(0.0);
		request.location.longitude = Some(1.0);
		let order = service.create_order(&customer(), request).await.unwrap();

		// One degree of longitude on the equator, great-circle.
		let travel = order.travel.unwrap();
		assert_eq!(travel.distance_km, 111.19);
		assert_eq!(travel.source, DistanceSource::Haversine);
		assert_eq!(order.financials.travel_fee, dec(101_190));
		assert_eq!(order.financials.final_amount, dec(1_101_190));
	}

	#[tokio::test]
	async fn multi_day_bookings_span_days() {
		let service = service();
		let mut request = order_request("c1", None, 9);
		request.duration_days = Some(2);
		let order = service.create_order(&customer(), request).await.unwrap();
		assert_eq!(
			order.booking_end - order.booking_start,
			Duration::days(1) + Duration::minutes(120)
		);
	}

	#[tokio::test]
	async fn half_a_coordinate_pair_is_rejected() {
		let service = service();
		let mut request = order_request("c1", Some("p1"), 14);
		request.location.latitude = Some(10.0);
		let err = service
			.create_order(&customer(), request)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "location"));
	}

	#[tokio::test]
	async fn overlapping_booking_is_rejected() {
		let service = service();
		service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();

		let other = Actor::new("c2", Role::Customer);
		let err = service
			.create_order(&other, order_request("c2", Some("p1"), 15))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Conflict(_)));

		// 14:00-16:00 and 16:00-18:00 touch without overlapping.
		service
			.create_order(&other, order_request("c2", Some("p1"), 16))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn concurrent_creates_for_one_window_admit_exactly_one() {
		let service = service();
		let first_customer = customer();
		let other = Actor::new("c2", Role::Customer);
		let (first, second) = futures::join!(
			service.create_order(&first_customer, order_request("c1", Some("p1"), 14)),
			service.create_order(&other, order_request("c2", Some("p1"), 15)),
		);
		assert!(first.is_ok() ^ second.is_ok());
	}

	#[tokio::test]
	async fn lifecycle_runs_to_settlement() {
		let (service, storage) = service_with_grace(3);
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		assert_eq!(order.financials.deposit_required, dec(300_000));

		service
			.submit_deposit_proof(&customer(), &order.code, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let confirmed = service
			.verify_deposit(&admin(), &order.code, no_amount())
			.await
			.unwrap();
		assert_eq!(confirmed.status, OrderStatus::Confirmed);
		assert!(confirmed.deposit.verified);
		assert_eq!(confirmed.deposit.amount, Some(dec(300_000)));
		assert_eq!(confirmed.remaining.amount, Some(dec(700_000)));

		service
			.begin_fulfillment(&provider_actor(), &order.code, ActionRequest::default())
			.await
			.unwrap();
		let waiting = service
			.complete_fulfillment(&provider_actor(), &order.code, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(waiting.status, OrderStatus::WaitingFinalPayment);
		assert_eq!(waiting.remaining.status, RemainingBalanceStatus::Outstanding);

		service
			.submit_final_payment_proof(&customer(), &order.code, proof("https://pay.example/f1"))
			.await
			.unwrap();
		let processing = service
			.verify_final_payment(&admin(), &order.code, no_amount())
			.await
			.unwrap();
		assert_eq!(processing.status, OrderStatus::Processing);
		assert_eq!(processing.remaining.status, RemainingBalanceStatus::Paid);
		assert_eq!(processing.remaining.stage.amount, Some(dec(700_000)));
		assert!(processing.delivery.deadline.is_some());

		let delivered = service
			.deliver(
				&provider_actor(),
				&order.code,
				DeliverRequest {
					product_url: "https://gallery.example/g1".to_string(),
					note: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(delivered.delivery.status, DeliveryStatus::OnTime);

		let completed = service
			.accept_delivery(&customer(), &order.code, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
		assert_eq!(completed.settlement.status, SettlementStatus::Paid);
		assert_eq!(completed.settlement.amount, Some(dec(900_000)));
		assert!(completed.completed_date.is_some());

		// The terminal order no longer occupies the provider or the sweep set.
		let slots: Vec<ProviderSlot> = storage.list_values("slot", "p1:").await.unwrap();
		assert!(slots.is_empty());
		let active: Vec<String> = storage.list_values("active", "").await.unwrap();
		assert!(active.is_empty());
		let settlements: Vec<SettlementRecord> =
			storage.list_values("settlement", "").await.unwrap();
		assert_eq!(settlements.len(), 1);

		let err = service
			.accept_delivery(&customer(), &order.code, ActionRequest::default())
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::InvalidTransition { .. }));
	}

	#[tokio::test]
	async fn rejected_transition_leaves_the_order_untouched() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();
		let err = service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			OrderError::InvalidTransition {
				from: OrderStatus::PendingPayment,
				to: OrderStatus::Confirmed,
			}
		));

		let reloaded = service.get_order(&order.id).await.unwrap();
		assert_eq!(reloaded.status, OrderStatus::PendingPayment);
		assert_eq!(reloaded.history.len(), 1);
	}

	#[tokio::test]
	async fn verification_is_admin_only() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let err = service
			.verify_deposit(&customer(), &order.id, no_amount())
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Unauthorized(_)));
	}

	#[tokio::test]
	async fn strangers_cannot_touch_the_order() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();
		let stranger = Actor::new("c2", Role::Customer);
		let err = service
			.submit_deposit_proof(&stranger, &order.id, proof("https://pay.example/x"))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Unauthorized(_)));

		let err = service
			.create_order(&stranger, order_request("c1", None, 9))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Unauthorized(_)));
	}

	#[tokio::test]
	async fn only_the_assigned_provider_fulfills() {
		let service = service();
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();
		let err = service
			.begin_fulfillment(
				&Actor::new("p9", Role::Provider),
				&order.id,
				ActionRequest::default(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Unauthorized(_)));
	}

	#[tokio::test]
	async fn fulfillment_cannot_start_early() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 14))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();

		let err = service
			.begin_fulfillment(&provider_actor(), &order.id, ActionRequest::default())
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "booking_start"));

		// The sweep leaves future bookings alone too.
		assert_eq!(service.sweep().await.unwrap(), SweepOutcome::default());
	}

	#[tokio::test]
	async fn reassignment_moves_the_slot_and_keeps_the_deposit() {
		let (service, storage) = service_with_grace(3);
		let mut request = order_request("c1", Some("p1"), 14);
		request.location.latitude = Some(0.0);
		request.location.longitude = Some(1.0);
		let order = service.create_order(&customer(), request).await.unwrap();
		let quoted_deposit = order.financials.deposit_required;
		assert_eq!(order.financials.travel_fee, dec(101_190));

		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let reassigned = service
			.assign_provider(
				&admin(),
				&order.id,
				AssignProviderRequest {
					provider_id: "p2".to_string(),
					note: None,
				},
			)
			.await
			.unwrap();

		assert_eq!(reassigned.provider_id.as_deref(), Some("p2"));
		assert_eq!(reassigned.financials.travel_fee, Decimal::ZERO);
		assert_eq!(reassigned.financials.final_amount, dec(1_000_000));
		assert_eq!(reassigned.financials.deposit_required, quoted_deposit);
		assert!(reassigned.travel.is_none());
		assert!(reassigned.deposit.proof_url.is_some());

		let old_slots: Vec<ProviderSlot> = storage.list_values("slot", "p1:").await.unwrap();
		assert!(old_slots.is_empty());
		let new_slots: Vec<ProviderSlot> = storage.list_values("slot", "p2:").await.unwrap();
		assert_eq!(new_slots.len(), 1);
	}

	#[tokio::test]
	async fn assignment_after_confirmation_is_rejected() {
		let service = service();
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();

		let err = service
			.assign_provider(
				&admin(),
				&order.id,
				AssignProviderRequest {
					provider_id: "p2".to_string(),
					note: None,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "status"));
	}

	#[tokio::test]
	async fn cancellation_routes_on_payment_evidence() {
		let (service, storage) = service_with_grace(3);
		// No money moved: straight to cancelled.
		let clean = service
			.create_order(&customer(), order_request("c1", Some("p1"), 9))
			.await
			.unwrap();
		let cancelled = service
			.cancel(&customer(), &clean.id, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		let slots: Vec<ProviderSlot> = storage.list_values("slot", "p1:").await.unwrap();
		assert!(slots.is_empty());

		// Proof submitted: refund owed first.
		let paid = service
			.create_order(&customer(), order_request("c1", Some("p1"), 12))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &paid.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let pending_refund = service
			.cancel(&customer(), &paid.id, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(pending_refund.status, OrderStatus::RefundPending);
		let closed = service
			.confirm_refund(&admin(), &paid.id, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(closed.status, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn customers_cannot_cancel_after_confirmation() {
		let service = service();
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();

		let err = service
			.cancel(&customer(), &order.id, ActionRequest::default())
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Unauthorized(_)));

		let unwound = service
			.cancel(&admin(), &order.id, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(unwound.status, OrderStatus::RefundPending);
	}

	#[tokio::test]
	async fn rejected_dispute_returns_to_delivered_and_restarts_the_clock() {
		let (service, _) = service_with_grace(3);
		let order = order_to_delivered(&service).await;

		let disputed = service
			.raise_dispute(
				&customer(),
				&order.id,
				DisputeRequest {
					reason: "missing edits".to_string(),
				},
			)
			.await
			.unwrap();
		assert_eq!(disputed.status, OrderStatus::Complaint);
		assert_eq!(disputed.dispute.as_ref().unwrap().status, DisputeStatus::Open);

		let back = service
			.resolve_dispute(
				&admin(),
				&order.id,
				ResolveDisputeRequest {
					outcome: DisputeOutcome::Rejected,
					next_status: OrderStatus::Delivered,
					response: Some("gallery matches the package".to_string()),
				},
			)
			.await
			.unwrap();
		assert_eq!(back.status, OrderStatus::Delivered);
		let dispute = back.dispute.as_ref().unwrap();
		assert_eq!(dispute.status, DisputeStatus::Rejected);
		assert!(dispute.resolved_at.is_some());
		assert!(back.completion_clock_start().unwrap() >= back.delivery.delivered_at.unwrap());

		let completed = service
			.accept_delivery(&customer(), &order.id, ActionRequest::default())
			.await
			.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
	}

	#[tokio::test]
	async fn resolved_dispute_completes_and_settles() {
		let (service, _) = service_with_grace(3);
		let order = order_to_delivered(&service).await;
		service
			.raise_dispute(
				&customer(),
				&order.id,
				DisputeRequest {
					reason: "wrong album cover".to_string(),
				},
			)
			.await
			.unwrap();
		let completed = service
			.resolve_dispute(
				&admin(),
				&order.id,
				ResolveDisputeRequest {
					outcome: DisputeOutcome::Resolved,
					next_status: OrderStatus::Completed,
					response: Some("reprinted".to_string()),
				},
			)
			.await
			.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
		assert_eq!(completed.settlement.status, SettlementStatus::Paid);
		assert_eq!(completed.settlement.amount, Some(dec(900_000)));
	}

	#[tokio::test]
	async fn redo_resets_the_delivery_record() {
		let (service, _) = service_with_grace(3);
		let order = order_to_delivered(&service).await;
		service
			.raise_dispute(
				&customer(),
				&order.id,
				DisputeRequest {
					reason: "files corrupted".to_string(),
				},
			)
			.await
			.unwrap();
		let redo = service
			.resolve_dispute(
				&admin(),
				&order.id,
				ResolveDisputeRequest {
					outcome: DisputeOutcome::Rejected,
					next_status: OrderStatus::Processing,
					response: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(redo.status, OrderStatus::Processing);
		assert!(redo.delivery.delivered_at.is_none());
		assert!(redo.delivery.product_url.is_none());
		assert_eq!(redo.delivery.status, DeliveryStatus::Pending);
		assert!(redo.delivery.deadline.is_some());

		service
			.deliver(
				&provider_actor(),
				&order.id,
				DeliverRequest {
					product_url: "https://gallery.example/g2".to_string(),
					note: None,
				},
			)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn dispute_outcome_and_target_must_agree() {
		let (service, _) = service_with_grace(3);
		let order = order_to_delivered(&service).await;
		service
			.raise_dispute(
				&customer(),
				&order.id,
				DisputeRequest {
					reason: "blurred shots".to_string(),
				},
			)
			.await
			.unwrap();
		let err = service
			.resolve_dispute(
				&admin(),
				&order.id,
				ResolveDisputeRequest {
					outcome: DisputeOutcome::Resolved,
					next_status: OrderStatus::Delivered,
					response: None,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "next_status"));
	}

	#[tokio::test]
	async fn disputes_after_the_window_are_rejected() {
		let (service, _) = service_with_grace(0);
		let order = order_to_delivered(&service).await;
		let err = service
			.raise_dispute(
				&customer(),
				&order.id,
				DisputeRequest {
					reason: "too late".to_string(),
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "dispute"));
	}

	#[tokio::test]
	async fn sweep_starts_due_bookings() {
		let (service, _) = service_with_grace(3);
		let order = service
			.create_order(&customer(), started_request("c1", Some("p1")))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap();

		let outcome = service.sweep().await.unwrap();
		assert_eq!(
			outcome,
			SweepOutcome {
				started: 1,
				completed: 0,
				failed: 0,
			}
		);

		let started = service.get_order(&order.id).await.unwrap();
		assert_eq!(started.status, OrderStatus::InProgress);
		let last = started.history.last().unwrap();
		assert_eq!(last.actor_role, Role::System);

		// Nothing left for the next pass.
		assert_eq!(service.sweep().await.unwrap(), SweepOutcome::default());
	}

	#[tokio::test]
	async fn sweep_completes_delivered_orders_after_the_window() {
		let (service, storage) = service_with_grace(0);
		let order = order_to_delivered(&service).await;

		let outcome = service.sweep().await.unwrap();
		assert_eq!(outcome.completed, 1);

		let completed = service.get_order(&order.id).await.unwrap();
		assert_eq!(completed.status, OrderStatus::Completed);
		assert_eq!(completed.settlement.status, SettlementStatus::Paid);
		let settlements: Vec<SettlementRecord> =
			storage.list_values("settlement", "").await.unwrap();
		assert_eq!(settlements.len(), 1);
	}

	#[tokio::test]
	async fn orders_resolve_by_id_or_code() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 9))
			.await
			.unwrap();
		assert_eq!(service.get_order(&order.id).await.unwrap().id, order.id);
		assert_eq!(service.get_order(&order.code).await.unwrap().id, order.id);
		assert!(matches!(
			service.get_order("LB-999999").await.unwrap_err(),
			OrderError::NotFound(_)
		));
	}

	#[tokio::test]
	async fn listing_filters_by_party() {
		let service = service();
		let other = Actor::new("c2", Role::Customer);
		service
			.create_order(&customer(), order_request("c1", Some("p1"), 9))
			.await
			.unwrap();
		service
			.create_order(&customer(), order_request("c1", None, 13))
			.await
			.unwrap();
		service
			.create_order(&other, order_request("c2", Some("p1"), 13))
			.await
			.unwrap();

		let mine = service
			.list_orders(OrderListQuery {
				customer_id: Some("c1".to_string()),
				provider_id: None,
			})
			.await
			.unwrap();
		assert_eq!(mine.len(), 2);
		assert!(mine[0].created_at >= mine[1].created_at);

		let booked = service
			.list_orders(OrderListQuery {
				customer_id: None,
				provider_id: Some("p1".to_string()),
			})
			.await
			.unwrap();
		assert_eq!(booked.len(), 2);

		let err = service
			.list_orders(OrderListQuery {
				customer_id: None,
				provider_id: None,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { .. }));
	}

	#[tokio::test]
	async fn travel_quotes_without_touching_orders() {
		let service = service();
		let quote = service
			.travel_fee_preview(TravelFeeQuoteRequest {
				provider_id: "p1".to_string(),
				latitude: 0.0,
				longitude: 1.0,
			})
			.await
			.unwrap();
		assert_eq!(quote.distance_km, 111.19);
		assert_eq!(quote.fee, dec(101_190));
		assert_eq!(quote.source, DistanceSource::Haversine);
		assert!(!quote.capped);

		let waived = service
			.travel_fee_preview(TravelFeeQuoteRequest {
				provider_id: "p2".to_string(),
				latitude: 0.0,
				longitude: 1.0,
			})
			.await
			.unwrap();
		assert_eq!(waived.fee, Decimal::ZERO);
		assert!(waived.breakdown.contains("waived"));

		let err = service
			.travel_fee_preview(TravelFeeQuoteRequest {
				provider_id: "ghost".to_string(),
				latitude: 0.0,
				longitude: 0.0,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { .. }));
	}

	#[tokio::test]
	async fn deposit_verification_requires_a_provider() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", None, 9))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let err = service
			.verify_deposit(&admin(), &order.id, no_amount())
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "provider_id"));
	}

	#[tokio::test]
	async fn oversized_deposit_amount_is_rejected() {
		let service = service();
		let order = service
			.create_order(&customer(), order_request("c1", Some("p1"), 9))
			.await
			.unwrap();
		service
			.submit_deposit_proof(&customer(), &order.id, proof("https://pay.example/d1"))
			.await
			.unwrap();
		let err = service
			.verify_deposit(
				&admin(),
				&order.id,
				VerifyPaymentRequest {
					amount: Some(dec(2_000_000)),
					note: None,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Validation { field, .. } if field == "amount"));
	}
}
