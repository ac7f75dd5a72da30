use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub async fn incr(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [key] = arguments else {
        return Err(CommandError::WrongArity("incr"));
    };

    let value = ctx.store.incr(text(key)?).await?;

    CommandOutcome::response(RespValue::Integer(value))
}
