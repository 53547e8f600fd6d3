//! In-memory storage backend.
//!
//! Backs a single-process deployment and the test suite. Atomicity of the
//! conditional operations comes from the shard locks of the underlying map:
//! every read-modify-write happens inside one entry guard.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct StoredValue {
	data: Vec<u8>,
	expires_at: Option<Instant>,
}

impl StoredValue {
	fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
		Self {
			data,
			expires_at: ttl.map(|ttl| Instant::now() + ttl),
		}
	}

	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| now >= at)
	}
}

/// Map-backed storage with TTL support.
pub struct MemoryStorage {
	map: DashMap<String, StoredValue>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self { map: DashMap::new() }
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

fn parse_counter(data: &[u8]) -> Result<u64, StorageError> {
	std::str::from_utf8(data)
		.ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| StorageError::Serialization("counter is not an integer".to_string()))
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		match self.map.get(key) {
			Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.data.clone()),
			_ => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.map.insert(key.to_string(), StoredValue::new(value, ttl));
		Ok(())
	}

	async fn set_bytes_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		match self.map.entry(key.to_string()) {
			Entry::Occupied(mut occupied) => {
				if occupied.get().is_expired(Instant::now()) {
					occupied.insert(StoredValue::new(value, ttl));
					Ok(true)
				} else {
					Ok(false)
				}
			}
			Entry::Vacant(vacant) => {
				vacant.insert(StoredValue::new(value, ttl));
				Ok(true)
			}
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.map.remove(key);
		Ok(())
	}

	async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
		match self.map.entry(key.to_string()) {
			Entry::Occupied(occupied) => {
				let matches =
					!occupied.get().is_expired(Instant::now()) && occupied.get().data == expected;
				if matches {
					occupied.remove();
				}
				Ok(matches)
			}
			Entry::Vacant(_) => Ok(false),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.map.get(key) {
			Some(entry) => Ok(!entry.is_expired(Instant::now())),
			None => Ok(false),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let now = Instant::now();
		Ok(self
			.map
			.iter()
			.filter(|entry| entry.key().starts_with(prefix) && !entry.is_expired(now))
			.map(|entry| entry.key().clone())
			.collect())
	}

	async fn increment(&self, key: &str) -> Result<u64, StorageError> {
		match self.map.entry(key.to_string()) {
			Entry::Occupied(mut occupied) => {
				let next = parse_counter(&occupied.get().data)? + 1;
				occupied.insert(StoredValue::new(next.to_string().into_bytes(), None));
				Ok(next)
			}
			Entry::Vacant(vacant) => {
				vacant.insert(StoredValue::new(b"1".to_vec(), None));
				Ok(1)
			}
		}
	}
}

/// Factory function to create an in-memory backend from configuration.
///
/// Takes no configuration parameters.
pub fn create_storage(_config: &toml::Value) -> Box<dyn StorageInterface> {
	Box::new(MemoryStorage::new())
}
