use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::connection::{ConnectionState, write_to_stream};
use crate::rdb::EMPTY_SNAPSHOT;
use crate::replication::REPLICATION_ID;
use crate::resp::RespValue;
use crate::server::ServerContext;

/// `PSYNC replid offset`: grants a full resync.
///
/// The handler writes the `+FULLRESYNC` reply and the snapshot file frame
/// directly, then registers the replica, so every frame later queued onto
/// the replication stream trails the snapshot on the wire.
pub async fn psync(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionState,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [repl_id, offset] = arguments else {
        return Err(CommandError::WrongArity("psync"));
    };

    let repl_id = text(repl_id)?;
    let offset = text(offset)?;

    if repl_id != "?" && repl_id != REPLICATION_ID {
        return Err(CommandError::InvalidPsyncArgument);
    }
    if offset != "-1" && offset.parse::<u64>().is_err() {
        return Err(CommandError::InvalidPsyncArgument);
    }

    let Some(primary) = ctx.replication.as_primary() else {
        return Err(CommandError::PsyncOnReplica);
    };

    let mut reply =
        RespValue::SimpleString(format!("FULLRESYNC {} 0", REPLICATION_ID)).encode();
    reply.extend_from_slice(&RespValue::File(EMPTY_SNAPSHOT.to_vec()).encode());

    write_to_stream(&conn.writer, &reply)
        .await
        .map_err(|e| CommandError::Io(e.to_string()))?;

    primary
        .register_replica(
            conn.id,
            Arc::clone(&conn.writer),
            conn.pending_replica_port.take().unwrap_or(0),
            std::mem::take(&mut conn.pending_capabilities),
        )
        .await;

    Ok(CommandOutcome::NoResponse)
}
