use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub async fn type_command(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [key] = arguments else {
        return Err(CommandError::WrongArity("type"));
    };

    let kind = ctx.store.kind_of(text(key)?).await;

    CommandOutcome::response(RespValue::SimpleString(kind.to_string()))
}
