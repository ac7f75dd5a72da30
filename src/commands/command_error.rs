use thiserror::Error;

use crate::resp::RespValue;
use crate::store::StoreError;

/// Everything a command handler can answer with instead of a result. These
/// are user-visible: each renders to an error frame and the connection stays
/// open.
#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid command argument")]
    InvalidCommandArgument,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("invalid expire time in 'set' command")]
    InvalidSetExpiration,
    #[error("unknown 'set' option '{0}'")]
    InvalidSetOption(String),
    #[error("syntax error in 'xread' command")]
    InvalidXreadSyntax,
    #[error("timeout is not an integer or out of range")]
    InvalidBlockDuration,
    #[error("invalid glob pattern: {0}")]
    InvalidGlobPattern(String),
    #[error("unknown INFO section '{0}'")]
    UnknownInfoSection(String),
    #[error("unknown CONFIG subcommand '{0}'")]
    UnknownConfigSubcommand(String),
    #[error("unknown CONFIG parameter '{0}'")]
    UnknownConfigParameter(String),
    #[error("unknown REPLCONF subcommand '{0}'")]
    UnknownReplconfSubcommand(String),
    #[error("invalid REPLCONF argument")]
    InvalidReplconfArgument,
    #[error("invalid PSYNC argument")]
    InvalidPsyncArgument,
    #[error("PSYNC can only be served by a primary")]
    PsyncOnReplica,
    #[error("invalid WAIT argument")]
    InvalidWaitArgument,
    #[error("WAIT can only be served by a primary")]
    WaitOnReplica,
    #[error("MULTI calls can not be nested")]
    NestedMulti,
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("transaction aborted")]
    ExecAborted,
    #[error("write commands not allowed on a replica")]
    WriteOnReplica,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl CommandError {
    /// Renders the error as a RESP error frame. `EXECABORT` carries its own
    /// prefix; everything else gets the conventional `ERR`.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            CommandError::ExecAborted => RespValue::Error(
                "EXECABORT Transaction discarded because of previous errors.".to_string(),
            )
            .encode(),
            other => RespValue::Error(format!("ERR {}", other)).encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frames() {
        let test_cases = vec![
            (
                CommandError::Store(StoreError::IdTooSmall),
                "-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
            ),
            (
                CommandError::ExecAborted,
                "-EXECABORT Transaction discarded because of previous errors.\r\n",
            ),
            (
                CommandError::WrongArity("get"),
                "-ERR wrong number of arguments for 'get' command\r\n",
            ),
            (
                CommandError::UnknownCommand("frobnicate".to_string()),
                "-ERR unknown command 'frobnicate'\r\n",
            ),
        ];

        for (error, expected) in test_cases {
            assert_eq!(error.as_bytes(), expected.as_bytes());
        }
    }
}
