use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::commands::stream_reply::keyed_entries_to_resp;
use crate::server::ServerContext;
use crate::stream::StreamId;

pub struct XreadArguments {
    /// `None` for a non-blocking read; `Some(0)` blocks until an entry
    /// arrives; anything else is a bounded wait in milliseconds.
    block_ms: Option<u64>,
    pairs: Vec<(String, String)>,
}

impl XreadArguments {
    /// Parses `[BLOCK ms] STREAMS key… start…`. Keys and starts come as two
    /// parallel halves of the tail.
    pub fn parse(arguments: &[Bytes]) -> Result<Self, CommandError> {
        if arguments.len() < 3 {
            return Err(CommandError::WrongArity("xread"));
        }

        let (block_ms, tail) = if arguments[0].eq_ignore_ascii_case(b"block") {
            let block_ms = text(&arguments[1])?
                .parse::<u64>()
                .map_err(|_| CommandError::InvalidBlockDuration)?;
            (Some(block_ms), &arguments[2..])
        } else {
            (None, arguments)
        };

        let [keyword, tail @ ..] = tail else {
            return Err(CommandError::WrongArity("xread"));
        };
        if !keyword.eq_ignore_ascii_case(b"streams") {
            return Err(CommandError::InvalidXreadSyntax);
        }

        if tail.is_empty() || tail.len() % 2 != 0 {
            return Err(CommandError::InvalidXreadSyntax);
        }

        let half = tail.len() / 2;
        let pairs = (0..half)
            .map(|i| Ok((text(&tail[i])?.to_string(), text(&tail[half + i])?.to_string())))
            .collect::<Result<Vec<_>, CommandError>>()?;

        Ok(XreadArguments { block_ms, pairs })
    }
}

pub async fn xread(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let xread_arguments = XreadArguments::parse(arguments)?;

    // `$` resolves to the stream's current last id now, before any blocking,
    // so only entries appended after this call are visible.
    let mut positions = Vec::with_capacity(xread_arguments.pairs.len());
    for (key, start) in &xread_arguments.pairs {
        let start = ctx.store.resolve_read_start(key, start).await?;
        positions.push((key.clone(), start));
    }

    match xread_arguments.block_ms {
        None => {
            let results = ctx.store.read_streams_after(&positions).await?;
            CommandOutcome::response(keyed_entries_to_resp(&results))
        }
        Some(block_ms) if block_ms > 0 => {
            // A bounded block sleeps out its budget, then answers with
            // whatever is present.
            tokio::time::sleep(Duration::from_millis(block_ms)).await;

            let results = ctx.store.read_streams_after(&positions).await?;
            if results.is_empty() {
                CommandOutcome::response(crate::resp::RespValue::NullArray)
            } else {
                CommandOutcome::response(keyed_entries_to_resp(&results))
            }
        }
        Some(_) => block_until_entry(ctx, &positions).await,
    }
}

/// `BLOCK 0`: parks this reader on every named stream's notifier slot and
/// answers with the first entry any of them produces.
async fn block_until_entry(
    ctx: &Arc<ServerContext>,
    positions: &[(String, StreamId)],
) -> Result<CommandOutcome, CommandError> {
    let keys: Vec<String> = positions.iter().map(|(key, _)| key.clone()).collect();

    let (sender, mut receiver) = mpsc::channel(1);
    ctx.store.install_stream_waiters(&keys, &sender).await;
    drop(sender);

    // An entry may have landed between the resolve and the waiter
    // installation; a second scan closes that window.
    let existing = ctx.store.read_streams_after(positions).await?;
    if !existing.is_empty() {
        ctx.store.clear_stream_waiters(&keys).await;
        return CommandOutcome::response(keyed_entries_to_resp(&existing));
    }

    let notification = receiver.recv().await;
    ctx.store.clear_stream_waiters(&keys).await;

    match notification {
        Some(notification) => {
            let results = vec![(notification.key, vec![notification.entry])];
            CommandOutcome::response(keyed_entries_to_resp(&results))
        }
        // No stream existed to wait on.
        None => CommandOutcome::response(crate::resp::RespValue::NullArray),
    }
}
