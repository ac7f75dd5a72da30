use bytes::Bytes;

use crate::commands::command::CommandOutcome;
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;

pub fn echo(arguments: &[Bytes]) -> Result<CommandOutcome, CommandError> {
    let [message] = arguments else {
        return Err(CommandError::WrongArity("echo"));
    };

    CommandOutcome::response(RespValue::BulkBytes(message.clone()))
}
