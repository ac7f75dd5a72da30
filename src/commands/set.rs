use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;

pub struct SetArguments {
    key: String,
    value: Bytes,
    /// Relative expiry in milliseconds; 0 means the key never expires.
    expire_after_ms: u64,
}

impl SetArguments {
    pub fn parse(arguments: &[Bytes]) -> Result<Self, CommandError> {
        let (key, value, expire_after_ms) = match arguments {
            [key, value] => (key, value, 0),
            [key, value, option, amount] => {
                let amount = text(amount)?
                    .parse::<u64>()
                    .map_err(|_| CommandError::InvalidSetExpiration)?;

                let expire_after_ms = match text(option)?.to_lowercase().as_str() {
                    "px" => amount,
                    "ex" => amount
                        .checked_mul(1000)
                        .ok_or(CommandError::InvalidSetExpiration)?,
                    other => return Err(CommandError::InvalidSetOption(other.to_string())),
                };

                (key, value, expire_after_ms)
            }
            _ => return Err(CommandError::WrongArity("set")),
        };

        Ok(SetArguments {
            key: text(key)?.to_string(),
            value: value.clone(),
            expire_after_ms,
        })
    }
}

pub async fn set(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let set_arguments = SetArguments::parse(arguments)?;

    ctx.store
        .string_set(
            &set_arguments.key,
            set_arguments.value,
            set_arguments.expire_after_ms,
        )
        .await;

    CommandOutcome::response(RespValue::SimpleString("OK".to_string()))
}
