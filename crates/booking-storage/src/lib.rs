//! Storage module for the booking system.
//!
//! This module provides abstractions for persistent storage of booking data,
//! supporting different backend implementations such as in-memory or
//! file-based storage. Beyond plain key-value access, backends expose the
//! atomic primitives the booking core builds its concurrency control on:
//! conditional writes, conditional deletes, counters, and prefix listing.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// How often lease acquisition re-attempts the conditional write.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs when a lease cannot be acquired within its wait budget.
	#[error("Lease on {0} unavailable")]
	LeaseUnavailable(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the booking system. It provides key-value operations with
/// optional TTL support plus the conditional operations used for leases,
/// idempotence markers, and sequence counters. Every method must be atomic
/// with respect to concurrent calls on the same key.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Stores raw bytes only when the key is absent (or expired).
	///
	/// Returns true when this call created the key. Exactly one of any set
	/// of concurrent callers observes true.
	async fn set_bytes_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Deletes the key only when its current value equals `expected`.
	///
	/// Returns true when the key was deleted by this call.
	async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists live keys starting with the given prefix.
	///
	/// Returned keys are backend-normalized but always valid arguments to
	/// the other methods of this trait.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Atomically increments the counter at the given key and returns the
	/// new value. A missing counter starts at zero.
	async fn increment(&self, key: &str) -> Result<u64, StorageError>;
}

/// An acquired lease on a named resource.
///
/// The token fences the release, so a holder that outlived its TTL cannot
/// delete a lease re-acquired by someone else.
#[derive(Debug)]
pub struct Lease {
	key: String,
	token: Vec<u8>,
}

impl Lease {
	pub fn resource(&self) -> &str {
		self.key.strip_prefix("lease:").unwrap_or(&self.key)
	}
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic serialization/deserialization, plus lease and sequence
/// helpers over the backend's conditional primitives.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live.
	///
	/// The namespace and id are combined to form a unique key.
	/// The data is serialized to JSON before storage.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&key, bytes, ttl).await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Stores a serializable value only when no live value exists under the
	/// key. Returns true when this call created it.
	pub async fn store_if_absent<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes_if_absent(&key, bytes, ttl).await
	}

	/// Retrieves and deserializes a value from storage.
	///
	/// The namespace and id are combined to form the lookup key.
	/// The retrieved bytes are deserialized from JSON.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let key = format!("{}:{}", namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.delete(&key).await
	}

	/// Checks whether a value exists under the namespace and id.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		let key = format!("{}:{}", namespace, id);
		self.backend.exists(&key).await
	}

	/// Retrieves every value in a namespace whose id starts with the prefix.
	///
	/// Values deleted between listing and retrieval are skipped.
	pub async fn list_values<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<T>, StorageError> {
		let prefix = format!("{}:{}", namespace, id_prefix);
		let keys = self.backend.list_keys(&prefix).await?;
		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => {
					let value = serde_json::from_slice(&bytes)
						.map_err(|e| StorageError::Serialization(e.to_string()))?;
					values.push(value);
				}
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Draws the next value from a named monotonic sequence.
	pub async fn next_sequence(&self, name: &str) -> Result<u64, StorageError> {
		self.backend.increment(&format!("seq:{}", name)).await
	}

	/// Acquires an exclusive lease on a named resource.
	///
	/// Re-attempts the conditional write every few milliseconds until
	/// `wait` elapses. The TTL bounds how long a crashed holder can block
	/// others; live holders release explicitly via [`release_lease`].
	///
	/// [`release_lease`]: StorageService::release_lease
	pub async fn acquire_lease(
		&self,
		resource: &str,
		ttl: Duration,
		wait: Duration,
	) -> Result<Lease, StorageError> {
		let key = format!("lease:{}", resource);
		let token = uuid::Uuid::new_v4().to_string().into_bytes();
		let deadline = Instant::now() + wait;
		loop {
			if self
				.backend
				.set_bytes_if_absent(&key, token.clone(), Some(ttl))
				.await?
			{
				return Ok(Lease { key, token });
			}
			if Instant::now() >= deadline {
				tracing::debug!(resource, "lease acquisition timed out");
				return Err(StorageError::LeaseUnavailable(resource.to_string()));
			}
			tokio::time::sleep(LEASE_POLL_INTERVAL).await;
		}
	}

	/// Releases a lease. A lease whose TTL already expired (and was possibly
	/// re-acquired) is left alone.
	pub async fn release_lease(&self, lease: Lease) -> Result<(), StorageError> {
		self.backend.delete_if_equals(&lease.key, &lease.token).await?;
		Ok(())
	}
}
