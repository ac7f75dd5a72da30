use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::CommandOutcome;
use crate::commands::command_error::CommandError;
use crate::replication::REPLICATION_ID;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub fn info(ctx: &Arc<ServerContext>, arguments: &[Bytes]) -> Result<CommandOutcome, CommandError> {
    match arguments {
        [] => {}
        [section] if section.eq_ignore_ascii_case(b"replication") => {}
        [section] => {
            return Err(CommandError::UnknownInfoSection(
                String::from_utf8_lossy(section).into_owned(),
            ));
        }
        _ => return Err(CommandError::WrongArity("info")),
    }

    let mut lines = vec![format!("role:{}", ctx.replication.role_name())];

    if let Some(primary) = ctx.replication.as_primary() {
        lines.push(format!("master_replid:{}", REPLICATION_ID));
        lines.push(format!("master_repl_offset:{}", primary.repl_offset()));
    }

    CommandOutcome::response(RespValue::BulkString(lines.join("\r\n")))
}
