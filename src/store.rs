//! The keyspace engine: a shared map of keys to typed values with optional
//! millisecond expiry.
//!
//! One reader/writer lock guards the map itself; each stream value carries
//! its own lock (see [`crate::stream`]), so value replacement takes the map
//! lock briefly while in-place stream appends do not take it at all.
//!
//! Expired entries are observationally absent to readers. A reader that
//! finds one schedules an asynchronous reap which re-checks under the write
//! lock before deleting; a background sweeper clears the rest.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use jiff::Timestamp;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::stream::{IdSpec, Stream, StreamEntry, StreamId, StreamNotification};

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key expired")]
    KeyExpired,
    #[error("value has the wrong type for this operation")]
    TypeMismatch,
    #[error("{0}")]
    InvalidId(String),
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    IdTooSmall,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
}

#[derive(Debug, Clone)]
pub enum DataType {
    String(Bytes),
    Stream(Arc<Stream>),
}

impl DataType {
    pub fn kind(&self) -> &'static str {
        match self {
            DataType::String(_) => "string",
            DataType::Stream(_) => "stream",
        }
    }
}

/// One keyspace slot: the tagged value plus its absolute expiry instant in
/// milliseconds since the epoch, 0 meaning no expiry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub data: DataType,
    pub expires_at_ms: i64,
}

impl Entry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms != 0 && self.expires_at_ms <= now_ms
    }
}

/// Milliseconds since the epoch from the system clock.
pub fn now_ms() -> i64 {
    Timestamp::now().as_millisecond()
}

/// Clonable handle over the shared keyspace.
#[derive(Debug, Clone, Default)]
pub struct Store {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boots the keyspace from a snapshot-loaded entry map.
    pub fn from_entries(entries: HashMap<String, Entry>) -> Self {
        Store {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Merges snapshot-loaded entries into the keyspace, overwriting on
    /// collision. Used when a replica finishes its handshake.
    pub async fn absorb(&self, new_entries: HashMap<String, Entry>) {
        let mut entries = self.entries.write().await;
        entries.extend(new_entries);
    }

    pub async fn string_get(&self, key: &str) -> Result<Bytes, StoreError> {
        let entries = self.entries.read().await;

        let Some(entry) = entries.get(key) else {
            return Err(StoreError::KeyNotFound);
        };

        if entry.is_expired(now_ms()) {
            drop(entries);
            self.reap_later(key.to_string());
            return Err(StoreError::KeyExpired);
        }

        match &entry.data {
            DataType::String(value) => Ok(value.clone()),
            DataType::Stream(_) => Err(StoreError::TypeMismatch),
        }
    }

    /// Stores a string value, overwriting any prior entry regardless of
    /// type. `expire_after_ms == 0` means no expiry.
    pub async fn string_set(&self, key: &str, value: Bytes, expire_after_ms: u64) {
        let expires_at_ms = match expire_after_ms {
            0 => 0,
            delta => now_ms() + delta as i64,
        };

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                data: DataType::String(value),
                expires_at_ms,
            },
        );
    }

    /// Increments the integer stored at `key`, creating it at 1 when absent
    /// or expired. The whole read-modify-write runs under the write lock.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;

        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now_ms()) => match &mut entry.data {
                DataType::String(value) => {
                    let incremented = str::from_utf8(value)
                        .ok()
                        .and_then(|text| text.parse::<i64>().ok())
                        .ok_or(StoreError::NotAnInteger)?
                        .checked_add(1)
                        .ok_or(StoreError::NotAnInteger)?;
                    *value = Bytes::from(incremented.to_string());
                    Ok(incremented)
                }
                DataType::Stream(_) => Err(StoreError::TypeMismatch),
            },
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        data: DataType::String(Bytes::from_static(b"1")),
                        expires_at_ms: 0,
                    },
                );
                Ok(1)
            }
        }
    }

    /// The kind of the live value at `key`: `string`, `stream`, or `none`.
    pub async fn kind_of(&self, key: &str) -> &'static str {
        let entries = self.entries.read().await;

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms()) => entry.data.kind(),
            Some(_) => {
                drop(entries);
                self.reap_later(key.to_string());
                "none"
            }
            None => "none",
        }
    }

    /// All live keys, in no particular order.
    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let now = now_ms();

        entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Appends an entry to the stream at `key`. A key that is absent,
    /// expired, or holding a different kind gets a fresh stream installed in
    /// its place: writers never type-check their own target.
    pub async fn stream_add(
        &self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<StreamId, StoreError> {
        let stream = match self.stream_handle(key).await {
            Ok(Some(stream)) => stream,
            Ok(None) | Err(_) => {
                let mut entries = self.entries.write().await;
                // Re-check: another writer may have installed the stream
                // while we were waiting for the write lock.
                let existing = match entries.get(key) {
                    Some(entry) if !entry.is_expired(now_ms()) => match &entry.data {
                        DataType::Stream(stream) => Some(Arc::clone(stream)),
                        DataType::String(_) => None,
                    },
                    _ => None,
                };

                match existing {
                    Some(stream) => stream,
                    None => {
                        let stream = Arc::new(Stream::new());
                        entries.insert(
                            key.to_string(),
                            Entry {
                                data: DataType::Stream(Arc::clone(&stream)),
                                expires_at_ms: 0,
                            },
                        );
                        stream
                    }
                }
            }
        };

        stream.append(key, spec, fields, now_ms() as u64).await
    }

    /// Inclusive range scan. `-` scans from the beginning, `+` to the end,
    /// and a bare `<ms>` bound defaults the sequence to 0 (start) or the
    /// maximum (end). A missing key yields an empty result.
    pub async fn stream_range(
        &self,
        key: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let start = match start {
            "-" => StreamId::ZERO,
            other => StreamId::parse_range_start(other)?,
        };
        let end = match end {
            "+" => StreamId::MAX,
            other => StreamId::parse_range_end(other)?,
        };

        match self.stream_handle(key).await? {
            Some(stream) => Ok(stream.range(start, end).await),
            None => Ok(Vec::new()),
        }
    }

    /// Resolves an XREAD start position at call time: `$` becomes the
    /// stream's current last id (`0-0` on an empty or missing stream).
    pub async fn resolve_read_start(&self, key: &str, spec: &str) -> Result<StreamId, StoreError> {
        if spec != "$" {
            return StreamId::parse_range_start(spec);
        }

        match self.stream_handle(key).await? {
            Some(stream) => Ok(stream.last_id().await),
            None => Ok(StreamId::ZERO),
        }
    }

    /// Reads entries with ids strictly greater than each key's start.
    /// Keys with no matching entries are omitted from the result.
    pub async fn read_streams_after(
        &self,
        positions: &[(String, StreamId)],
    ) -> Result<Vec<(String, Vec<StreamEntry>)>, StoreError> {
        let mut results = Vec::new();

        for (key, start) in positions {
            let Some(stream) = self.stream_handle(key).await? else {
                continue;
            };

            let entries = stream.read_after(*start).await;
            if !entries.is_empty() {
                results.push((key.clone(), entries));
            }
        }

        Ok(results)
    }

    /// Registers `sender` as the blocking-read notifier on every named
    /// stream that exists.
    pub async fn install_stream_waiters(
        &self,
        keys: &[String],
        sender: &mpsc::Sender<StreamNotification>,
    ) {
        for key in keys {
            if let Ok(Some(stream)) = self.stream_handle(key).await {
                stream.install_waiter(sender.clone()).await;
            }
        }
    }

    /// Removes this reader's notifiers when it stops waiting.
    pub async fn clear_stream_waiters(&self, keys: &[String]) {
        for key in keys {
            if let Ok(Some(stream)) = self.stream_handle(key).await {
                stream.clear_waiter().await;
            }
        }
    }

    /// The stream stored at `key`, `None` when the key is absent or expired,
    /// `TypeMismatch` when it holds a string.
    async fn stream_handle(&self, key: &str) -> Result<Option<Arc<Stream>>, StoreError> {
        let entries = self.entries.read().await;

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms()) => match &entry.data {
                DataType::Stream(stream) => Ok(Some(Arc::clone(stream))),
                DataType::String(_) => Err(StoreError::TypeMismatch),
            },
            _ => Ok(None),
        }
    }

    /// Schedules an asynchronous reap of `key`. The reaper re-checks expiry
    /// under the write lock, so a concurrent overwrite is never deleted.
    fn reap_later(&self, key: String) {
        let store = self.clone();

        tokio::spawn(async move {
            let mut entries = store.entries.write().await;
            if let Some(entry) = entries.get(&key) {
                if entry.is_expired(now_ms()) {
                    entries.remove(&key);
                    debug!(key = %key, "reaped expired key");
                }
            }
        });
    }

    /// Removes every expired entry. Driven periodically by the server's
    /// sweeper task; returns how many entries were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = now_ms();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));

        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn value(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(Bytes, Bytes)> {
        pairs
            .iter()
            .map(|(name, data)| (value(name), value(data)))
            .collect()
    }

    #[tokio::test]
    async fn test_string_set_and_get() {
        let store = Store::new();

        store.string_set("fruit", value("mango"), 0).await;

        assert_eq!(store.string_get("fruit").await, Ok(value("mango")));
        assert_eq!(
            store.string_get("missing").await,
            Err(StoreError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn test_values_are_opaque_bytes() {
        let store = Store::new();
        let binary = Bytes::from_static(b"\xff\x00\xfe\x01");

        store.string_set("bin", binary.clone(), 0).await;

        assert_eq!(store.string_get("bin").await, Ok(binary));
    }

    #[tokio::test]
    async fn test_string_set_overwrites_any_prior_kind() {
        let store = Store::new();

        store
            .stream_add(
                "k",
                IdSpec::parse("1-1").unwrap(),
                fields(&[("a", "1")]),
            )
            .await
            .unwrap();
        store.string_set("k", value("plain"), 0).await;

        assert_eq!(store.string_get("k").await, Ok(value("plain")));
        assert_eq!(store.kind_of("k").await, "string");
    }

    #[tokio::test]
    async fn test_expired_key_is_absent_to_readers() {
        let store = Store::new();

        store.string_set("flash", value("gone"), 30).await;
        assert_eq!(store.string_get("flash").await, Ok(value("gone")));

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.string_get("flash").await, Err(StoreError::KeyExpired));
        assert_eq!(store.kind_of("flash").await, "none");
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_incr_semantics() {
        let store = Store::new();

        assert_eq!(store.incr("counter").await, Ok(1));
        assert_eq!(store.incr("counter").await, Ok(2));

        store.string_set("pre", value("41"), 0).await;
        assert_eq!(store.incr("pre").await, Ok(42));

        store.string_set("word", value("mango"), 0).await;
        assert_eq!(store.incr("word").await, Err(StoreError::NotAnInteger));
    }

    #[tokio::test]
    async fn test_typed_readers_reject_mismatches() {
        let store = Store::new();

        store.string_set("s", value("text"), 0).await;
        store
            .stream_add(
                "log",
                IdSpec::parse("1-1").unwrap(),
                fields(&[("a", "1")]),
            )
            .await
            .unwrap();

        assert_eq!(store.string_get("log").await, Err(StoreError::TypeMismatch));
        assert_eq!(
            store.stream_range("s", "-", "+").await,
            Err(StoreError::TypeMismatch)
        );
    }

    #[tokio::test]
    async fn test_stream_range_missing_key_is_empty() {
        let store = Store::new();
        assert_eq!(store.stream_range("nope", "-", "+").await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn test_resolve_read_start() {
        let store = Store::new();

        assert_eq!(
            store.resolve_read_start("log", "$").await,
            Ok(StreamId::ZERO)
        );

        store
            .stream_add(
                "log",
                IdSpec::parse("4-2").unwrap(),
                fields(&[("a", "1")]),
            )
            .await
            .unwrap();

        assert_eq!(
            store.resolve_read_start("log", "$").await,
            Ok(StreamId { ms: 4, seq: 2 })
        );
        assert_eq!(
            store.resolve_read_start("log", "1-5").await,
            Ok(StreamId { ms: 1, seq: 5 })
        );
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_only_dead_entries() {
        let store = Store::new();

        store.string_set("stays", value("1"), 0).await;
        store.string_set("goes", value("2"), 10).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.string_get("stays").await, Ok(value("1")));
    }
}
