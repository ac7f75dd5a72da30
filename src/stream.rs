//! The stream value type: an append-only log of `(id, fields)` entries
//! ordered by `(ms, seq)` id pairs, with a single-slot notifier for blocking
//! tail-readers.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use crate::store::StoreError;

/// A stream entry id: millisecond timestamp plus sequence number, rendered
/// `<ms>-<seq>`. Ids within one stream are strictly increasing under the
/// derived lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Parses an explicit `<ms>-<seq>` id.
    pub fn parse(text: &str) -> Result<StreamId, StoreError> {
        let (ms, seq) = split_id(text)?;
        let seq = parse_part(seq)?;
        Ok(StreamId { ms, seq })
    }

    /// Parses a range bound where a bare `<ms>` defaults the sequence to 0.
    pub fn parse_range_start(text: &str) -> Result<StreamId, StoreError> {
        Self::parse_bound(text, 0)
    }

    /// Parses a range bound where a bare `<ms>` defaults the sequence to the
    /// maximum, so the bound covers every entry with that timestamp.
    pub fn parse_range_end(text: &str) -> Result<StreamId, StoreError> {
        Self::parse_bound(text, u64::MAX)
    }

    fn parse_bound(text: &str, default_seq: u64) -> Result<StreamId, StoreError> {
        match text.split_once('-') {
            Some(_) => Self::parse(text),
            None => Ok(StreamId {
                ms: parse_part(text)?,
                seq: default_seq,
            }),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

fn split_id(text: &str) -> Result<(u64, &str), StoreError> {
    let Some((ms, seq)) = text.split_once('-') else {
        return Err(StoreError::InvalidId(format!(
            "Invalid stream ID specified as stream command argument: '{}'",
            text
        )));
    };

    Ok((parse_part(ms)?, seq))
}

fn parse_part(text: &str) -> Result<u64, StoreError> {
    text.parse::<u64>().map_err(|_| {
        StoreError::InvalidId(format!(
            "Invalid stream ID specified as stream command argument: '{}'",
            text
        ))
    })
}

/// An id specification accepted by stream append: `*`, `<ms>-*`, or an
/// explicit `<ms>-<seq>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    Auto,
    AutoSeq(u64),
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(text: &str) -> Result<IdSpec, StoreError> {
        if text == "*" {
            return Ok(IdSpec::Auto);
        }

        let (ms, seq) = split_id(text)?;

        if seq == "*" {
            Ok(IdSpec::AutoSeq(ms))
        } else {
            Ok(IdSpec::Explicit(StreamId {
                ms,
                seq: parse_part(seq)?,
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

/// Delivered to a blocking reader when a writer appends to a watched stream.
#[derive(Debug, Clone)]
pub struct StreamNotification {
    pub key: String,
    pub entry: StreamEntry,
}

#[derive(Debug, Default)]
struct StreamInner {
    ids: Vec<StreamId>,
    entries: HashMap<StreamId, Vec<(Bytes, Bytes)>>,
    waiter: Option<mpsc::Sender<StreamNotification>>,
}

/// An append-only stream guarded by its own reader/writer lock, so in-place
/// appends never hold the keyspace-wide lock.
#[derive(Debug, Default)]
pub struct Stream {
    inner: RwLock<StreamInner>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, assigning the id according to `spec`, and returns
    /// the assigned id. Wakes a blocking reader if one is registered.
    ///
    /// `now_ms` is the caller's clock reading, used for `*` specs.
    pub async fn append(
        &self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId, StoreError> {
        let mut inner = self.inner.write().await;
        let last = inner.ids.last().copied();

        let id = match spec {
            IdSpec::Auto => {
                let ms = last.map_or(now_ms, |last| now_ms.max(last.ms));
                let seq = match last {
                    Some(last) if last.ms == ms => last.seq + 1,
                    _ => 0,
                };
                StreamId { ms, seq }
            }
            IdSpec::AutoSeq(ms) => {
                let seq = match last {
                    Some(last) if last.ms == ms => last.seq + 1,
                    Some(_) => 0,
                    // On an empty stream the default sequence is 0, except
                    // for timestamp 0 where it is 1 to keep 0-0 unreachable.
                    None if ms == 0 => 1,
                    None => 0,
                };
                StreamId { ms, seq }
            }
            IdSpec::Explicit(id) => id,
        };

        if id == StreamId::ZERO {
            return Err(StoreError::InvalidId(
                "The ID specified in XADD must be greater than 0-0".to_string(),
            ));
        }

        if let Some(last) = last {
            if id <= last {
                return Err(StoreError::IdTooSmall);
            }
        }

        inner.ids.push(id);
        inner.entries.insert(id, fields.clone());

        if let Some(waiter) = inner.waiter.take() {
            let _ = waiter.try_send(StreamNotification {
                key: key.to_string(),
                entry: StreamEntry { id, fields },
            });
        }

        Ok(id)
    }

    /// Inclusive range scan over `[start, end]`.
    pub async fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        let inner = self.inner.read().await;

        let lower = inner.ids.partition_point(|id| *id < start);
        let upper = inner.ids.partition_point(|id| *id <= end);

        inner.ids[lower..upper]
            .iter()
            .map(|id| StreamEntry {
                id: *id,
                fields: inner.entries[id].clone(),
            })
            .collect()
    }

    /// Entries with ids strictly greater than `start`, in order.
    pub async fn read_after(&self, start: StreamId) -> Vec<StreamEntry> {
        let inner = self.inner.read().await;

        let lower = inner.ids.partition_point(|id| *id <= start);

        inner.ids[lower..]
            .iter()
            .map(|id| StreamEntry {
                id: *id,
                fields: inner.entries[id].clone(),
            })
            .collect()
    }

    /// The id of the newest entry, or `0-0` on an empty stream.
    pub async fn last_id(&self) -> StreamId {
        let inner = self.inner.read().await;
        inner.ids.last().copied().unwrap_or(StreamId::ZERO)
    }

    /// Registers a blocking reader. The stream holds at most one pending
    /// notifier; a newer reader replaces an older one.
    pub async fn install_waiter(&self, sender: mpsc::Sender<StreamNotification>) {
        let mut inner = self.inner.write().await;
        inner.waiter = Some(sender);
    }

    /// Drops the pending notifier, if any. Called when a blocking reader
    /// leaves, whether it was woken or timed out.
    pub async fn clear_waiter(&self) {
        let mut inner = self.inner.write().await;
        inner.waiter = None;
    }
}
