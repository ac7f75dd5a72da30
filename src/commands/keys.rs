use std::sync::Arc;

use bytes::Bytes;
use globset::Glob;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub async fn keys(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [pattern] = arguments else {
        return Err(CommandError::WrongArity("keys"));
    };

    let matcher = Glob::new(text(pattern)?)
        .map_err(|e| CommandError::InvalidGlobPattern(e.to_string()))?
        .compile_matcher();

    let matches = ctx
        .store
        .keys()
        .await
        .into_iter()
        .filter(|key| matcher.is_match(key))
        .map(RespValue::BulkString)
        .collect();

    CommandOutcome::response(RespValue::Array(matches))
}
