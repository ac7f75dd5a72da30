//! Replication core.
//!
//! A server is a primary or a replica for life. The primary side keeps a
//! registry of connected replicas, fans successfully executed write frames
//! out to them verbatim, and tracks per-replica dispatch and acknowledgement
//! offsets for WAIT. The replica side performs the startup handshake and
//! keeps the applied-bytes counter reported back in ACKs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::rdb::{self, RdbError};
use crate::resp::{Frame, FrameKind, RespError, RespValue};
use crate::store::Entry;

pub type ConnectionId = u64;
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Fixed replication id. Production servers randomize this per process;
/// nothing in the protocol requires it, and a stable id keeps full resyncs
/// deterministic.
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error during handshake: {0}")]
    Resp(#[from] RespError),
    #[error("unexpected reply from primary during {step}: {reply}")]
    UnexpectedReply { step: &'static str, reply: String },
    #[error("invalid snapshot from primary: {0}")]
    Snapshot(#[from] RdbError),
}

/// Replication role state, held once per server in the shared context.
#[derive(Debug)]
pub enum ReplicationState {
    Primary(PrimaryState),
    Replica(ReplicaState),
}

impl ReplicationState {
    /// Role name as reported by INFO, in the protocol's historical terms.
    pub fn role_name(&self) -> &'static str {
        match self {
            ReplicationState::Primary(_) => "master",
            ReplicationState::Replica(_) => "slave",
        }
    }

    pub fn as_primary(&self) -> Option<&PrimaryState> {
        match self {
            ReplicationState::Primary(primary) => Some(primary),
            ReplicationState::Replica(_) => None,
        }
    }

    pub fn as_replica(&self) -> Option<&ReplicaState> {
        match self {
            ReplicationState::Replica(replica) => Some(replica),
            ReplicationState::Primary(_) => None,
        }
    }
}

/// One registered replica on the primary.
///
/// The outbound connection is owned by the replica's dispatch task; `sender`
/// feeds it. Queuing from the originating connection task keeps the
/// replication stream ordered per client even though the actual socket
/// writes happen off the client's critical path.
#[derive(Debug)]
pub struct Replica {
    sender: mpsc::UnboundedSender<Bytes>,
    pub listening_port: u16,
    pub capabilities: Vec<String>,
    /// Bytes dispatched to this replica.
    pub sync_offset: u64,
    /// Last offset this replica has acknowledged.
    pub ack_offset: u64,
}

#[derive(Debug, Default)]
pub struct PrimaryState {
    repl_offset: AtomicU64,
    replicas: Arc<Mutex<HashMap<ConnectionId, Replica>>>,
}

impl PrimaryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of replication stream produced so far.
    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::SeqCst)
    }

    /// Registers the replica speaking on connection `id` and spawns its
    /// dispatch task. Called once the full resync reply and snapshot are on
    /// the wire, so queued frames always trail the snapshot.
    pub async fn register_replica(
        &self,
        id: ConnectionId,
        writer: SharedWriter,
        listening_port: u16,
        capabilities: Vec<String>,
    ) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Bytes>();
        let registry = Arc::clone(&self.replicas);

        tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                let result = async {
                    let mut writer = writer.lock().await;
                    writer.write_all(&raw).await?;
                    writer.flush().await
                }
                .await;

                match result {
                    Ok(()) => {
                        let mut replicas = registry.lock().await;
                        if let Some(replica) = replicas.get_mut(&id) {
                            replica.sync_offset += raw.len() as u64;
                        }
                    }
                    Err(e) => {
                        warn!(replica = id, error = %e, "dispatch to replica failed");
                        break;
                    }
                }
            }
        });

        let mut replicas = self.replicas.lock().await;
        replicas.insert(
            id,
            Replica {
                sender,
                listening_port,
                capabilities,
                sync_offset: 0,
                ack_offset: 0,
            },
        );

        info!(replica = id, port = listening_port, "registered replica");
    }

    /// Drops the replica registered under `id`, if any. Its dispatch task
    /// ends when the queue closes.
    pub async fn deregister_replica(&self, id: ConnectionId) {
        let mut replicas = self.replicas.lock().await;
        if replicas.remove(&id).is_some() {
            info!(replica = id, "deregistered replica");
        }
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.lock().await.len()
    }

    /// Records `REPLCONF ACK <offset>` received from the replica on
    /// connection `id`.
    pub async fn record_ack(&self, id: ConnectionId, offset: u64) {
        let mut replicas = self.replicas.lock().await;
        if let Some(replica) = replicas.get_mut(&id) {
            replica.ack_offset = offset;
            debug!(replica = id, offset, "recorded replica ack");
        }
    }

    /// Advances the replication offset by the raw frame length and queues
    /// the frame, verbatim, to every registered replica.
    pub async fn propagate_write(&self, raw: Bytes) {
        self.repl_offset.fetch_add(raw.len() as u64, Ordering::SeqCst);

        let replicas = self.replicas.lock().await;
        for replica in replicas.values() {
            let _ = replica.sender.send(raw.clone());
        }
    }

    async fn count_acked(&self, target: u64) -> usize {
        let replicas = self.replicas.lock().await;
        replicas
            .values()
            .filter(|replica| replica.ack_offset >= target)
            .count()
    }

    /// Queues `REPLCONF GETACK *` to every replica still behind `target`.
    async fn send_getack_round(&self, target: u64) {
        let getack = Bytes::from(
            RespValue::Array(vec![
                RespValue::BulkString("REPLCONF".to_string()),
                RespValue::BulkString("GETACK".to_string()),
                RespValue::BulkString("*".to_string()),
            ])
            .encode(),
        );

        let replicas = self.replicas.lock().await;
        for replica in replicas.values() {
            if replica.ack_offset < target {
                let _ = replica.sender.send(getack.clone());
            }
        }
    }

    /// The WAIT operator: returns the number of replicas whose acknowledged
    /// offset has reached the replication offset captured at entry.
    ///
    /// Polls at 100 ms intervals; the first poll that finds laggards sends
    /// exactly one GETACK round to them. `timeout: None` waits until
    /// satisfied.
    pub async fn wait_for_acks(&self, needed: usize, timeout: Option<Duration>) -> usize {
        let target = self.repl_offset();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut getack_sent = false;

        loop {
            let acked = self.count_acked(target).await;
            if acked >= needed {
                return acked;
            }

            if !getack_sent {
                self.send_getack_round(target).await;
                getack_sent = true;
            }

            let poll_delay = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return acked;
                    }
                    ACK_POLL_INTERVAL.min(deadline - now)
                }
                None => ACK_POLL_INTERVAL,
            };

            sleep(poll_delay).await;
        }
    }
}

/// Replica-side state: where the primary is and how many replication-stream
/// bytes have been applied.
#[derive(Debug)]
pub struct ReplicaState {
    pub primary_host: String,
    pub primary_port: u16,
    offset: AtomicU64,
}

impl ReplicaState {
    pub fn new(primary_host: String, primary_port: u16) -> Self {
        ReplicaState {
            primary_host,
            primary_port,
            offset: AtomicU64::new(0),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn advance_offset(&self, bytes: u64) {
        self.offset.fetch_add(bytes, Ordering::SeqCst);
    }
}

/// The long-lived connection to the primary after a successful handshake.
pub struct PrimaryConnection {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: SharedWriter,
}

/// Performs the four-step startup handshake against the primary and loads
/// the transferred snapshot. Each reply is validated before the next step.
pub async fn perform_handshake(
    primary_host: &str,
    primary_port: u16,
    listening_port: u16,
) -> Result<(PrimaryConnection, HashMap<String, Entry>), HandshakeError> {
    let stream = TcpStream::connect((primary_host, primary_port)).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));

    let reply = exchange(&mut reader, &writer, &["PING"]).await?;
    if reply != "PONG" {
        return Err(HandshakeError::UnexpectedReply { step: "PING", reply });
    }

    let reply = exchange(
        &mut reader,
        &writer,
        &["REPLCONF", "listening-port", &listening_port.to_string()],
    )
    .await?;
    if reply != "OK" {
        return Err(HandshakeError::UnexpectedReply {
            step: "REPLCONF listening-port",
            reply,
        });
    }

    let reply = exchange(&mut reader, &writer, &["REPLCONF", "capa", "psync2"]).await?;
    if reply != "OK" {
        return Err(HandshakeError::UnexpectedReply {
            step: "REPLCONF capa",
            reply,
        });
    }

    let reply = exchange(&mut reader, &writer, &["PSYNC", "?", "-1"]).await?;
    let (repl_id, offset) = parse_fullresync(&reply)?;
    debug!(repl_id = %repl_id, offset, "full resync granted");

    let snapshot = Frame::read_file(&mut reader).await?;
    let entries = rdb::parse_bytes(&snapshot)?;
    info!(keys = entries.len(), "loaded snapshot from primary");

    Ok((PrimaryConnection { reader, writer }, entries))
}

/// Sends one command and reads back a single simple-string reply.
async fn exchange(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &SharedWriter,
    parts: &[&str],
) -> Result<String, HandshakeError> {
    let command = RespValue::Array(
        parts
            .iter()
            .map(|part| RespValue::BulkString(part.to_string()))
            .collect(),
    );

    {
        let mut writer = writer.lock().await;
        writer.write_all(&command.encode()).await?;
        writer.flush().await?;
    }

    let Some(frame) = Frame::read(reader).await? else {
        return Err(HandshakeError::UnexpectedReply {
            step: "handshake",
            reply: "connection closed".to_string(),
        });
    };

    if frame.kind != FrameKind::SimpleString {
        return Err(HandshakeError::UnexpectedReply {
            step: "handshake",
            reply: String::from_utf8_lossy(&frame.raw).into_owned(),
        });
    }

    let payload = frame.payloads.into_iter().next().unwrap_or_default();

    Ok(String::from_utf8_lossy(&payload).into_owned())
}

/// Validates a `FULLRESYNC <repl_id> <offset>` reply.
fn parse_fullresync(reply: &str) -> Result<(String, u64), HandshakeError> {
    let unexpected = || HandshakeError::UnexpectedReply {
        step: "PSYNC",
        reply: reply.to_string(),
    };

    let parts: Vec<&str> = reply.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "FULLRESYNC" {
        return Err(unexpected());
    }

    let repl_id_pattern = Regex::new(r"^[a-zA-Z0-9]{40}$").unwrap();
    if !repl_id_pattern.is_match(parts[1]) {
        return Err(unexpected());
    }

    let offset = parts[2].parse::<u64>().map_err(|_| unexpected())?;

    Ok((parts[1].to_string(), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        let primary = ReplicationState::Primary(PrimaryState::new());
        let replica =
            ReplicationState::Replica(ReplicaState::new("localhost".to_string(), 6379));

        assert_eq!(primary.role_name(), "master");
        assert_eq!(replica.role_name(), "slave");
        assert!(primary.as_primary().is_some());
        assert!(replica.as_replica().is_some());
    }

    #[test]
    fn test_parse_fullresync() {
        let valid = format!("FULLRESYNC {} 0", REPLICATION_ID);
        assert_eq!(
            parse_fullresync(&valid).unwrap(),
            (REPLICATION_ID.to_string(), 0)
        );

        let test_cases = vec![
            ("FULLRESYNC short 0", "repl id too short"),
            ("FULLRESYNC", "missing fields"),
            ("CONTINUE abc 0", "wrong verb"),
            (
                "FULLRESYNC 8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb x",
                "non-numeric offset",
            ),
        ];

        for (input, description) in test_cases {
            assert!(
                parse_fullresync(input).is_err(),
                "expected rejection: {}",
                description
            );
        }
    }

    #[tokio::test]
    async fn test_replica_offset_accounting() {
        let replica = ReplicaState::new("localhost".to_string(), 6379);

        assert_eq!(replica.offset(), 0);
        replica.advance_offset(31);
        replica.advance_offset(14);
        assert_eq!(replica.offset(), 45);
    }

    #[tokio::test]
    async fn test_wait_with_no_replicas_counts_zero() {
        let primary = PrimaryState::new();

        let acked = primary
            .wait_for_acks(1, Some(Duration::from_millis(50)))
            .await;
        assert_eq!(acked, 0);

        // Zero required replicas is satisfied immediately.
        let acked = primary.wait_for_acks(0, None).await;
        assert_eq!(acked, 0);
    }
}
