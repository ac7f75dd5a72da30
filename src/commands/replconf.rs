use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::connection::ConnectionState;
use crate::resp::RespValue;
use crate::server::ServerContext;

/// Replication configuration exchange, driven by a syncing replica.
///
/// `listening-port` and `capa` arrive before PSYNC and are stashed on the
/// connection; the replica record goes live when PSYNC completes. `ack`
/// arrives on a primary after a GETACK probe and is recorded silently.
pub async fn replconf(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionState,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [subcommand, rest @ ..] = arguments else {
        return Err(CommandError::WrongArity("replconf"));
    };

    let subcommand = text(subcommand)?.to_lowercase();

    match subcommand.as_str() {
        "listening-port" => {
            let [port] = rest else {
                return Err(CommandError::InvalidReplconfArgument);
            };
            let port = text(port)?
                .parse::<u16>()
                .map_err(|_| CommandError::InvalidReplconfArgument)?;

            conn.pending_replica_port = Some(port);
            CommandOutcome::response(RespValue::SimpleString("OK".to_string()))
        }
        "capa" => {
            if rest.is_empty() {
                return Err(CommandError::InvalidReplconfArgument);
            }

            conn.pending_capabilities.extend(
                rest.iter()
                    .map(|capability| String::from_utf8_lossy(capability).into_owned()),
            );
            CommandOutcome::response(RespValue::SimpleString("OK".to_string()))
        }
        "ack" => {
            let [offset] = rest else {
                return Err(CommandError::InvalidReplconfArgument);
            };
            let offset = text(offset)?
                .parse::<u64>()
                .map_err(|_| CommandError::InvalidReplconfArgument)?;

            if let Some(primary) = ctx.replication.as_primary() {
                primary.record_ack(conn.id, offset).await;
            }

            Ok(CommandOutcome::NoResponse)
        }
        _ => Err(CommandError::UnknownReplconfSubcommand(subcommand)),
    }
}
