use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

/// `CONFIG GET param [param …]`: answers a flat `[name, value, …]` array for
/// the snapshot location parameters.
pub fn config(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let [subcommand, parameters @ ..] = arguments else {
        return Err(CommandError::WrongArity("config"));
    };

    if !subcommand.eq_ignore_ascii_case(b"get") {
        return Err(CommandError::UnknownConfigSubcommand(
            String::from_utf8_lossy(subcommand).into_owned(),
        ));
    }

    if parameters.is_empty() {
        return Err(CommandError::WrongArity("config"));
    }

    let mut reply = Vec::with_capacity(parameters.len() * 2);

    for parameter in parameters {
        let parameter = text(parameter)?.to_lowercase();
        let value = match parameter.as_str() {
            "dir" => ctx.config.rdb_dir.clone(),
            "dbfilename" => ctx.config.rdb_filename.clone(),
            _ => return Err(CommandError::UnknownConfigParameter(parameter)),
        };

        reply.push(RespValue::BulkString(parameter));
        reply.push(RespValue::BulkString(value));
    }

    CommandOutcome::response(RespValue::Array(reply))
}
