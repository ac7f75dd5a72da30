use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub struct WaitArguments {
    replica_count: usize,
    /// `None` waits until satisfied; a wire value of 0 means no deadline.
    timeout: Option<Duration>,
}

impl WaitArguments {
    pub fn parse(arguments: &[Bytes]) -> Result<Self, CommandError> {
        let [replica_count, timeout_ms] = arguments else {
            return Err(CommandError::WrongArity("wait"));
        };

        let replica_count = text(replica_count)?
            .parse::<usize>()
            .map_err(|_| CommandError::InvalidWaitArgument)?;
        let timeout_ms = text(timeout_ms)?
            .parse::<u64>()
            .map_err(|_| CommandError::InvalidWaitArgument)?;

        Ok(WaitArguments {
            replica_count,
            timeout: match timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        })
    }
}

pub async fn wait(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let wait_arguments = WaitArguments::parse(arguments)?;

    let Some(primary) = ctx.replication.as_primary() else {
        return Err(CommandError::WaitOnReplica);
    };

    let acked = primary
        .wait_for_acks(wait_arguments.replica_count, wait_arguments.timeout)
        .await;

    CommandOutcome::response(RespValue::Integer(acked as i64))
}
