use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::StoreError;

pub async fn get(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [key] = arguments else {
        return Err(CommandError::WrongArity("get"));
    };

    match ctx.store.string_get(text(key)?).await {
        Ok(value) => CommandOutcome::response(RespValue::BulkBytes(value)),
        // Absent and expired keys both read as null.
        Err(StoreError::KeyNotFound) | Err(StoreError::KeyExpired) => {
            CommandOutcome::response(RespValue::Null)
        }
        Err(e) => Err(e.into()),
    }
}
