//! Parsed commands and the central dispatch table.

use std::sync::Arc;

use bytes::Bytes;

use crate::commands::{
    CommandError, config, echo, get, incr, info, keys, ping, psync, replconf, set, type_command,
    wait, xadd, xrange, xread,
};
use crate::connection::ConnectionState;
use crate::resp::{Frame, FrameKind};
use crate::server::ServerContext;

/// Every command this server understands, including the transaction verbs
/// handled by the connection dispatcher.
const KNOWN_COMMANDS: &[&str] = &[
    "ping", "echo", "get", "set", "incr", "type", "keys", "xadd", "xrange", "xread", "info",
    "config", "replconf", "psync", "wait", "multi", "exec", "discard",
];

/// Commands a replica refuses from ordinary clients. The primary connection
/// still applies them.
const MUTATING_COMMANDS: &[&str] = &["set", "incr", "xadd"];

pub fn is_known(name: &str) -> bool {
    KNOWN_COMMANDS.contains(&name)
}

pub fn is_mutating(name: &str) -> bool {
    MUTATING_COMMANDS.contains(&name)
}

/// A command parsed from an array frame: lower-cased name, raw byte
/// arguments, and the exact bytes the command arrived as (re-emitted
/// verbatim to replicas).
///
/// Arguments stay opaque bytes; handlers borrow them as text with [`text`]
/// only where the syntax demands it.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub arguments: Vec<Bytes>,
    pub raw: Bytes,
}

impl Command {
    pub fn from_frame(frame: &Frame) -> Result<Self, CommandError> {
        if frame.kind != FrameKind::Array || frame.payloads.is_empty() {
            return Err(CommandError::InvalidCommand);
        }

        let name = String::from_utf8(frame.payloads[0].to_ascii_lowercase())
            .map_err(|_| CommandError::InvalidCommand)?;

        Ok(Command {
            name,
            arguments: frame.payloads[1..].to_vec(),
            raw: frame.raw.clone(),
        })
    }
}

/// Borrows an argument as text for the syntactic parts of a command (keys,
/// ids, options, numbers). Values never pass through here.
pub fn text(argument: &Bytes) -> Result<&str, CommandError> {
    str::from_utf8(argument).map_err(|_| CommandError::InvalidCommandArgument)
}

/// What a handler produced: an encoded reply, or nothing (silent paths like
/// `REPLCONF ACK` and `PSYNC`, which writes its reply out of band).
#[derive(Debug, PartialEq)]
pub enum CommandOutcome {
    Response(Vec<u8>),
    NoResponse,
}

impl CommandOutcome {
    pub fn response(value: crate::resp::RespValue) -> Result<Self, CommandError> {
        Ok(CommandOutcome::Response(value.encode()))
    }
}

/// Looks up and runs the handler for one command.
///
/// A successfully executed write command on a primary additionally advances
/// the replication offset by the raw frame length and fans the frame out to
/// every replica.
pub async fn execute(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionState,
    command: &Command,
) -> Result<CommandOutcome, CommandError> {
    let outcome = match command.name.as_str() {
        "ping" => ping::ping(&command.arguments),
        "echo" => echo::echo(&command.arguments),
        "get" => get::get(ctx, &command.arguments).await,
        "set" => set::set(ctx, &command.arguments).await,
        "incr" => incr::incr(ctx, &command.arguments).await,
        "type" => type_command::type_command(ctx, &command.arguments).await,
        "keys" => keys::keys(ctx, &command.arguments).await,
        "xadd" => xadd::xadd(ctx, &command.arguments).await,
        "xrange" => xrange::xrange(ctx, &command.arguments).await,
        "xread" => xread::xread(ctx, &command.arguments).await,
        "info" => info::info(ctx, &command.arguments),
        "config" => config::config(ctx, &command.arguments),
        "replconf" => replconf::replconf(ctx, conn, &command.arguments).await,
        "psync" => psync::psync(ctx, conn, &command.arguments).await,
        "wait" => wait::wait(ctx, &command.arguments).await,
        _ => Err(CommandError::UnknownCommand(command.name.clone())),
    }?;

    // Only SET counts as a write for replication purposes, matching the
    // offset accounting the rest of the protocol was tested against.
    if command.name == "set" {
        if let Some(primary) = ctx.replication.as_primary() {
            primary.propagate_write(command.raw.clone()).await;
        }
    }

    Ok(outcome)
}
