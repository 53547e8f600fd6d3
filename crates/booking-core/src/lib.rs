//! The booking engine and its builder.
//!
//! The engine owns the wired service graph and a run loop that reacts to
//! lifecycle events and drives time-gated transitions on a timer. Pluggable
//! backends (storage, geo routing, the provider directory, the fee policy)
//! are supplied as factory functions so the binary decides what exists,
//! while this crate only knows the interfaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use booking_config::{Config, DirectoryConfig, FeeConfig};
use booking_geo::{GeoService, RoutingInterface};
use booking_order::{OrderService, OrderSettings};
use booking_pricing::{FeePolicyInterface, PricingService, ProviderDirectoryInterface};
use booking_schedule::ScheduleService;
use booking_storage::{StorageInterface, StorageService};
use booking_types::{BookingEvent, EventBus, OrderEvent, OrderStatus};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

pub struct BookingEngine {
	config: Config,
	storage: Arc<StorageService>,
	orders: Arc<OrderService>,
	schedule: Arc<ScheduleService>,
	event_bus: EventBus,
}

impl std::fmt::Debug for BookingEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BookingEngine").finish_non_exhaustive()
	}
}

impl BookingEngine {
	/// Runs until ctrl-c. Reacts to lifecycle events and fires the sweep on
	/// the configured interval.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut events = self.event_bus.subscribe();
		let mut sweep = tokio::time::interval(Duration::from_secs(
			self.config.lifecycle.sweep_interval_secs,
		));

		loop {
			tokio::select! {
				Ok(event) = events.recv() => {
					self.handle_event(event).await;
				}

				_ = sweep.tick() => {
					if let Err(e) = self.orders.sweep().await {
						error!(error = %e, "lifecycle sweep failed");
					}
				}

				_ = tokio::signal::ctrl_c() => {
					info!("shutting down booking engine");
					break;
				}
			}
		}

		Ok(())
	}

	/// Keeps the schedule projection in step with order confirmations and
	/// cancellations. Projection failures are logged, not propagated; the
	/// order write already happened.
	async fn handle_event(&self, event: BookingEvent) {
		if let BookingEvent::Order(OrderEvent::StatusChanged { order, to, .. }) = event {
			match to {
				OrderStatus::Confirmed => {
					if let Err(e) = self.schedule.upsert_order_entry(&order).await {
						warn!(order_id = %order.id, error = %e, "failed to project schedule entry");
					}
				}
				OrderStatus::Cancelled => {
					if let Some(provider_id) = &order.provider_id {
						if let Err(e) =
							self.schedule.remove_order_entry(provider_id, &order.id).await
						{
							warn!(order_id = %order.id, error = %e, "failed to remove schedule entry");
						}
					}
				}
				_ => {}
			}
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn orders(&self) -> &Arc<OrderService> {
		&self.orders
	}

	pub fn schedule(&self) -> &Arc<ScheduleService> {
		&self.schedule
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}
}

// Type aliases for factory functions
type StorageFactory = Box<dyn Fn(&toml::Value) -> Box<dyn StorageInterface> + Send>;
type RoutingFactory = Box<dyn Fn(&toml::Value) -> Box<dyn RoutingInterface> + Send>;
type DirectoryFactory = Box<dyn Fn(&DirectoryConfig) -> Box<dyn ProviderDirectoryInterface> + Send>;
type FeePolicyFactory = Box<dyn Fn(&FeeConfig) -> Box<dyn FeePolicyInterface> + Send>;

/// Factory pattern for creating the engine from config.
pub struct EngineBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	routing_factories: HashMap<String, RoutingFactory>,
	directory_factory: Option<DirectoryFactory>,
	fee_policy_factory: Option<FeePolicyFactory>,
}

impl EngineBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			routing_factories: HashMap::new(),
			directory_factory: None,
			fee_policy_factory: None,
		}
	}

	pub fn with_storage_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn StorageInterface> + Send + 'static,
	{
		self.storage_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_routing_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Box<dyn RoutingInterface> + Send + 'static,
	{
		self.routing_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_directory_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&DirectoryConfig) -> Box<dyn ProviderDirectoryInterface> + Send + 'static,
	{
		self.directory_factory = Some(Box::new(factory));
		self
	}

	pub fn with_fee_policy_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&FeeConfig) -> Box<dyn FeePolicyInterface> + Send + 'static,
	{
		self.fee_policy_factory = Some(Box::new(factory));
		self
	}

	pub fn build(self) -> Result<BookingEngine, EngineError> {
		// Create the storage backend
		let storage_backend = self
			.storage_factories
			.get(&self.config.storage.backend)
			.ok_or_else(|| {
				EngineError::Config(format!(
					"Unknown storage backend: {}",
					self.config.storage.backend
				))
			})?(&self.config.storage.config);
		let storage = Arc::new(StorageService::new(storage_backend));

		// Create the optional routed distance source
		let router = match &self.config.geo.provider {
			Some(name) => {
				let factory = self.routing_factories.get(name).ok_or_else(|| {
					EngineError::Config(format!("Unknown geo provider: {name}"))
				})?;
				Some(factory(&self.config.geo.config))
			}
			None => None,
		};
		let geo = Arc::new(GeoService::new(
			router,
			Duration::from_secs(self.config.geo.request_timeout_secs),
		));

		// Create the pricing service around the fee policy
		let fee_policy = self
			.fee_policy_factory
			.ok_or_else(|| EngineError::Config("Fee policy factory not provided".into()))?(
			&self.config.fees,
		);
		let pricing = Arc::new(PricingService::new(
			fee_policy,
			self.config.pricing.deposit_fraction,
		));

		// Create the provider directory
		let directory: Arc<dyn ProviderDirectoryInterface> = Arc::from(
			self.directory_factory
				.ok_or_else(|| EngineError::Config("Directory factory not provided".into()))?(
				&self.config.directory,
			),
		);

		let event_bus = EventBus::new(1000);
		let schedule = Arc::new(ScheduleService::new(storage.clone(), event_bus.clone()));

		let settings = OrderSettings {
			code_prefix: self.config.lifecycle.order_code_prefix.clone(),
			delivery_grace_days: self.config.lifecycle.delivery_grace_days,
			completion_grace_days: self.config.lifecycle.completion_grace_days,
		};
		let orders = Arc::new(OrderService::new(
			storage.clone(),
			geo,
			pricing,
			directory,
			event_bus.clone(),
			settings,
		));

		Ok(BookingEngine {
			config: self.config,
			storage,
			orders,
			schedule,
			event_bus,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use booking_pricing::PricingError;
	use booking_storage::implementations::memory::MemoryStorage;
	use booking_types::api::{CreateOrderRequest, LineItemRequest, LocationRequest, PaymentProofRequest, VerifyPaymentRequest};
	use booking_types::{Actor, ProviderProfile, Role};
	use chrono::{NaiveDate, NaiveTime};
	use rust_decimal::Decimal;

	const TEST_CONFIG: &str = r#"
[service]
name = "lensbook-test"

[api]
port = 8080

[storage]
backend = "memory"

[fees]
platform_fee_percent = 10

[lifecycle]
order_code_prefix = "TT"

[[directory.providers]]
id = "p1"
display_name = "Studio One"

[directory.providers.travel_fee]
enabled = false
free_distance_km = 0.0
fee_per_km = 0
"#;

	struct TestDirectory(HashMap<String, ProviderProfile>);

	#[async_trait]
	impl ProviderDirectoryInterface for TestDirectory {
		async fn profile(
			&self,
			provider_id: &str,
		) -> Result<Option<ProviderProfile>, PricingError> {
			Ok(self.0.get(provider_id).cloned())
		}
	}

	struct FixedFees(Decimal);

	#[async_trait]
	impl FeePolicyInterface for FixedFees {
		async fn platform_fee_percent(&self) -> Result<Decimal, PricingError> {
			Ok(self.0)
		}
	}

	fn builder() -> EngineBuilder {
		let config: Config = toml::from_str(TEST_CONFIG).unwrap();
		EngineBuilder::new(config)
			.with_directory_factory(|directory: &DirectoryConfig| {
				let profiles = directory
					.providers
					.iter()
					.map(|p| (p.id.clone(), p.clone()))
					.collect();
				Box::new(TestDirectory(profiles)) as Box<dyn ProviderDirectoryInterface>
			})
			.with_fee_policy_factory(|fees: &FeeConfig| {
				Box::new(FixedFees(fees.platform_fee_percent)) as Box<dyn FeePolicyInterface>
			})
	}

	fn order_request() -> CreateOrderRequest {
		CreateOrderRequest {
			customer_id: "c1".to_string(),
			provider_id: Some("p1".to_string()),
			package_ref: "portrait-basic".to_string(),
			line_items: vec![LineItemRequest {
				description: "two hour session".to_string(),
				amount: Decimal::new(500_000, 0),
			}],
			booking_date: NaiveDate::from_ymd_opt(2099, 9, 10).unwrap(),
			start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
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

	#[test]
	fn build_requires_registered_backends() {
		let err = builder().build().unwrap_err();
		assert!(matches!(err, EngineError::Config(_)));

		let config: Config = toml::from_str(TEST_CONFIG).unwrap();
		let err = EngineBuilder::new(config)
			.with_storage_factory("memory", |_| Box::new(MemoryStorage::new()))
			.build()
			.unwrap_err();
		assert!(matches!(err, EngineError::Config(_)));
	}

	#[tokio::test]
	async fn build_wires_the_service_graph() {
		let engine = builder()
			.with_storage_factory("memory", |_| Box::new(MemoryStorage::new()))
			.build()
			.unwrap();
		assert_eq!(engine.config().service.name, "lensbook-test");

		let order = engine
			.orders()
			.create_order(&Actor::new("c1", Role::Customer), order_request())
			.await
			.unwrap();
		assert_eq!(order.code, "TT-000001");
	}

	#[tokio::test]
	async fn confirmation_events_drive_the_schedule_projection() {
		let engine = builder()
			.with_storage_factory("memory", |_| Box::new(MemoryStorage::new()))
			.build()
			.unwrap();
		let customer = Actor::new("c1", Role::Customer);
		let admin = Actor::new("a1", Role::Admin);

		let order = engine
			.orders()
			.create_order(&customer, order_request())
			.await
			.unwrap();
		engine
			.orders()
			.submit_deposit_proof(
				&customer,
				&order.id,
				PaymentProofRequest {
					proof_url: "https://pay.example/d1".to_string(),
					transferred_at: None,
					note: None,
				},
			)
			.await
			.unwrap();
		let confirmed = engine
			.orders()
			.verify_deposit(
				&admin,
				&order.id,
				VerifyPaymentRequest {
					amount: None,
					note: None,
				},
			)
			.await
			.unwrap();

		// The run loop is not live in tests, feed the events by hand.
		engine
			.handle_event(BookingEvent::Order(OrderEvent::StatusChanged {
				order: confirmed.clone(),
				from: OrderStatus::Pending,
				to: OrderStatus::Confirmed,
				actor: admin.clone(),
				note: None,
			}))
			.await;
		let entries = engine.schedule().list_entries("p1", None, None).await.unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].order_id.as_deref(), Some(order.id.as_str()));

		engine
			.handle_event(BookingEvent::Order(OrderEvent::StatusChanged {
				order: confirmed,
				from: OrderStatus::RefundPending,
				to: OrderStatus::Cancelled,
				actor: admin,
				note: None,
			}))
			.await;
		let entries = engine.schedule().list_entries("p1", None, None).await.unwrap();
		assert!(entries.is_empty());
	}
}
