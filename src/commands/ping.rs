use bytes::Bytes;

use crate::commands::command::CommandOutcome;
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;

pub fn ping(arguments: &[Bytes]) -> Result<CommandOutcome, CommandError> {
    if !arguments.is_empty() {
        return Err(CommandError::WrongArity("ping"));
    }

    CommandOutcome::response(RespValue::SimpleString("PONG".to_string()))
}
