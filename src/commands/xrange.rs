use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::commands::stream_reply::entries_to_resp;
use crate::server::ServerContext;

pub async fn xrange(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [key, start, end] = arguments else {
        return Err(CommandError::WrongArity("xrange"));
    };

    let entries = ctx
        .store
        .stream_range(text(key)?, text(start)?, text(end)?)
        .await?;

    CommandOutcome::response(entries_to_resp(&entries))
}
