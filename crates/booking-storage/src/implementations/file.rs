//! File-based storage backend.
//!
//! Stores each value as a binary file on the filesystem, providing simple
//! persistence without external dependencies. An eight-byte big-endian
//! header carries the expiry in milliseconds since the epoch (zero for no
//! expiry); the payload follows. Compound operations are serialized by an
//! instance mutex, so this backend supports a single process per data
//! directory.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

const HEADER_LEN: usize = 8;

fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
	let expires_at = ttl.map(|ttl| now_millis() + ttl.as_millis() as u64).unwrap_or(0);
	let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
	bytes.extend_from_slice(&expires_at.to_be_bytes());
	bytes.extend_from_slice(value);
	bytes
}

fn decode(bytes: Vec<u8>) -> Result<(u64, Vec<u8>), StorageError> {
	if bytes.len() < HEADER_LEN {
		return Err(StorageError::Serialization(
			"stored value is missing its expiry header".to_string(),
		));
	}
	let mut header = [0u8; HEADER_LEN];
	header.copy_from_slice(&bytes[..HEADER_LEN]);
	Ok((u64::from_be_bytes(header), bytes[HEADER_LEN..].to_vec()))
}

fn is_expired(expires_at: u64) -> bool {
	expires_at != 0 && now_millis() >= expires_at
}

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes read-modify-write operations within this process.
	write_lock: Mutex<()>,
}

impl FileStorage {
	/// Creates a new FileStorage instance with the specified base path.
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	/// Converts a storage key to a filesystem-safe file path.
	///
	/// Sanitizes the key by replacing problematic characters and
	/// appending a .bin extension.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}

	/// Reads the live payload at `key`, treating expired files as absent.
	async fn read_live(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);
		match fs::read(&path).await {
			Ok(bytes) => {
				let (expires_at, payload) = decode(bytes)?;
				if is_expired(expires_at) {
					Err(StorageError::NotFound)
				} else {
					Ok(payload)
				}
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// Writes atomically by writing to a temp file then renaming.
	async fn write_encoded(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(key).await
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write_encoded(key, encode(&value, ttl)).await
	}

	async fn set_bytes_if_absent(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		match self.read_live(key).await {
			Ok(_) => Ok(false),
			Err(StorageError::NotFound) => {
				self.write_encoded(key, encode(&value, ttl)).await?;
				Ok(true)
			}
			Err(e) => Err(e),
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		match self.read_live(key).await {
			Ok(payload) if payload == expected => {
				let path = self.get_file_path(key);
				match fs::remove_file(&path).await {
					Ok(_) => Ok(true),
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
					Err(e) => Err(StorageError::Backend(e.to_string())),
				}
			}
			Ok(_) => Ok(false),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.read_live(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let safe_prefix = prefix.replace(['/', ':'], "_");
		let mut dir = match fs::read_dir(&self.base_path).await {
			Ok(dir) => dir,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = dir
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(stem) = name.strip_suffix(".bin") else { continue };
			if !stem.starts_with(&safe_prefix) {
				continue;
			}
			// Skip files whose TTL has lapsed.
			if self.read_live(stem).await.is_ok() {
				keys.push(stem.to_string());
			}
		}
		Ok(keys)
	}

	async fn increment(&self, key: &str) -> Result<u64, StorageError> {
		let _guard = self.write_lock.lock().await;
		let current = match self.read_live(key).await {
			Ok(payload) => std::str::from_utf8(&payload)
				.ok()
				.and_then(|s| s.parse().ok())
				.ok_or_else(|| {
					StorageError::Serialization("counter is not an integer".to_string())
				})?,
			Err(StorageError::NotFound) => 0u64,
			Err(e) => return Err(e),
		};
		let next = current + 1;
		self.write_encoded(key, encode(next.to_string().as_bytes(), None))
			.await?;
		Ok(next)
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Box<dyn StorageInterface> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	Box::new(FileStorage::new(PathBuf::from(storage_path)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn round_trips_values() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes("order:abc", b"payload".to_vec(), None)
			.await
			.unwrap();
		assert_eq!(storage.get_bytes("order:abc").await.unwrap(), b"payload");

		storage.delete("order:abc").await.unwrap();
		assert!(matches!(
			storage.get_bytes("order:abc").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn conditional_write_rejects_live_keys() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		assert!(storage
			.set_bytes_if_absent("lease:p1", b"a".to_vec(), None)
			.await
			.unwrap());
		assert!(!storage
			.set_bytes_if_absent("lease:p1", b"b".to_vec(), None)
			.await
			.unwrap());
		assert_eq!(storage.get_bytes("lease:p1").await.unwrap(), b"a");
	}

	#[tokio::test]
	async fn expired_files_behave_as_absent() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes_if_absent("lease:p1", b"a".to_vec(), Some(Duration::from_millis(20)))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(40)).await;

		assert!(!storage.exists("lease:p1").await.unwrap());
		assert!(storage
			.set_bytes_if_absent("lease:p1", b"b".to_vec(), None)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn counter_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let storage = FileStorage::new(dir.path().to_path_buf());
			assert_eq!(storage.increment("seq:order").await.unwrap(), 1);
			assert_eq!(storage.increment("seq:order").await.unwrap(), 2);
		}
		let storage = FileStorage::new(dir.path().to_path_buf());
		assert_eq!(storage.increment("seq:order").await.unwrap(), 3);
	}

	#[tokio::test]
	async fn lists_keys_by_prefix() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.set_bytes("provider_order:p1:o1", b"1".to_vec(), None)
			.await
			.unwrap();
		storage
			.set_bytes("provider_order:p2:o2", b"2".to_vec(), None)
			.await
			.unwrap();

		let keys = storage.list_keys("provider_order:p1:").await.unwrap();
		assert_eq!(keys.len(), 1);
		assert_eq!(
			storage.get_bytes(&keys[0]).await.unwrap(),
			b"1",
			"listed keys must be readable"
		);
	}
}
