//! Per-connection loops: the client dispatcher with transaction batching,
//! and the silent application loop a replica runs against its primary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commands::{self, Command, CommandError, CommandOutcome};
use crate::replication::{ConnectionId, PrimaryConnection, SharedWriter};
use crate::resp::{Frame, RespValue};
use crate::server::ServerContext;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates a process-wide, strictly monotonic connection id.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst) + 1
}

/// Commands queued between MULTI and EXEC on one connection.
#[derive(Debug, Default)]
struct Transaction {
    queued: Vec<Command>,
    aborted: bool,
}

/// Mutable per-connection state threaded through the dispatcher and into
/// handlers that act on the connection itself (REPLCONF, PSYNC).
pub struct ConnectionState {
    pub id: ConnectionId,
    pub writer: SharedWriter,
    pub pending_replica_port: Option<u16>,
    pub pending_capabilities: Vec<String>,
    transaction: Option<Transaction>,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, writer: SharedWriter) -> Self {
        ConnectionState {
            id,
            writer,
            pending_replica_port: None,
            pending_capabilities: Vec::new(),
            transaction: None,
        }
    }
}

pub async fn write_to_stream(writer: &SharedWriter, bytes: &[u8]) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Drives one client connection until EOF, a protocol error, or an I/O
/// error. On teardown a primary drops any replica registered under this
/// connection's id.
pub async fn handle_client_connection(ctx: Arc<ServerContext>, stream: TcpStream) {
    let id = next_connection_id();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));
    let mut conn = ConnectionState::new(id, Arc::clone(&writer));

    debug!(connection = id, "client connected");

    loop {
        let frame = match Frame::read(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(connection = id, error = %e, "protocol error, closing connection");
                break;
            }
        };

        let response = match Command::from_frame(&frame) {
            Ok(command) => dispatch(&ctx, &mut conn, command).await,
            Err(e) => e.as_bytes(),
        };

        if !response.is_empty() {
            if let Err(e) = write_to_stream(&writer, &response).await {
                warn!(connection = id, error = %e, "failed to write response");
                break;
            }
        }
    }

    if let Some(primary) = ctx.replication.as_primary() {
        primary.deregister_replica(id).await;
    }

    debug!(connection = id, "client disconnected");
}

/// Routes one command, handling the transaction verbs and queueing here so
/// handlers never see them. Returns the encoded reply, possibly empty.
async fn dispatch(ctx: &Arc<ServerContext>, conn: &mut ConnectionState, command: Command) -> Vec<u8> {
    match command.name.as_str() {
        "multi" => {
            if conn.transaction.is_some() {
                return CommandError::NestedMulti.as_bytes();
            }
            conn.transaction = Some(Transaction::default());
            RespValue::SimpleString("OK".to_string()).encode()
        }
        "exec" => {
            let Some(transaction) = conn.transaction.take() else {
                return CommandError::ExecWithoutMulti.as_bytes();
            };
            if transaction.aborted {
                return CommandError::ExecAborted.as_bytes();
            }
            run_transaction(ctx, conn, transaction.queued).await
        }
        "discard" => {
            if conn.transaction.take().is_none() {
                return CommandError::DiscardWithoutMulti.as_bytes();
            }
            RespValue::SimpleString("OK".to_string()).encode()
        }
        _ if conn.transaction.is_some() => {
            let transaction = conn.transaction.as_mut().unwrap();

            if !commands::is_known(&command.name) {
                transaction.aborted = true;
                return CommandError::UnknownCommand(command.name).as_bytes();
            }

            transaction.queued.push(command);
            RespValue::SimpleString("QUEUED".to_string()).encode()
        }
        _ => {
            if write_forbidden(ctx, &command) {
                return CommandError::WriteOnReplica.as_bytes();
            }

            match commands::execute(ctx, conn, &command).await {
                Ok(CommandOutcome::Response(bytes)) => bytes,
                Ok(CommandOutcome::NoResponse) => Vec::new(),
                Err(e) => e.as_bytes(),
            }
        }
    }
}

/// Runs a queued batch in order. Failures do not stop execution; each error
/// becomes an error frame inside the reply array.
async fn run_transaction(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionState,
    queued: Vec<Command>,
) -> Vec<u8> {
    let mut responses = Vec::with_capacity(queued.len());

    for command in &queued {
        match commands::execute(ctx, conn, command).await {
            Ok(CommandOutcome::Response(bytes)) => responses.push(bytes),
            Ok(CommandOutcome::NoResponse) => {}
            Err(e) => responses.push(e.as_bytes()),
        }
    }

    let mut reply = format!("*{}\r\n", responses.len()).into_bytes();
    for response in responses {
        reply.extend_from_slice(&response);
    }
    reply
}

/// A replica serves reads to ordinary clients but refuses their writes;
/// mutations only arrive through the primary connection.
fn write_forbidden(ctx: &Arc<ServerContext>, command: &Command) -> bool {
    ctx.replication.as_replica().is_some() && commands::is_mutating(&command.name)
}

/// Drives the long-lived primary connection on a replica.
///
/// Every frame is applied silently and advances the applied-bytes counter by
/// its raw length. The one exception that answers is `REPLCONF GETACK *`,
/// which reports the counter as it stood before the probe itself.
pub async fn handle_primary_connection(ctx: Arc<ServerContext>, primary_conn: PrimaryConnection) {
    let PrimaryConnection { mut reader, writer } = primary_conn;
    let mut conn = ConnectionState::new(next_connection_id(), Arc::clone(&writer));

    let Some(replica) = ctx.replication.as_replica() else {
        return;
    };

    loop {
        let frame = match Frame::read(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("primary closed the replication connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "protocol error on primary connection");
                break;
            }
        };

        let frame_len = frame.raw.len() as u64;

        let Ok(command) = Command::from_frame(&frame) else {
            replica.advance_offset(frame_len);
            continue;
        };

        if is_getack(&command) {
            let ack = RespValue::Array(vec![
                RespValue::BulkString("REPLCONF".to_string()),
                RespValue::BulkString("ACK".to_string()),
                RespValue::BulkString(replica.offset().to_string()),
            ]);

            if let Err(e) = write_to_stream(&writer, &ack.encode()).await {
                warn!(error = %e, "failed to answer GETACK");
                break;
            }

            replica.advance_offset(frame_len);
            continue;
        }

        if let Err(e) = commands::execute(&ctx, &mut conn, &command).await {
            debug!(command = %command.name, error = %e, "replicated command failed");
        }

        replica.advance_offset(frame_len);
    }
}

fn is_getack(command: &Command) -> bool {
    command.name == "replconf"
        && command
            .arguments
            .first()
            .is_some_and(|sub| sub.eq_ignore_ascii_case(b"getack"))
}
