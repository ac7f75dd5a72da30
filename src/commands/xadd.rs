use std::sync::Arc;

use bytes::Bytes;

use crate::commands::command::{CommandOutcome, text};
use crate::commands::command_error::CommandError;
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::stream::IdSpec;

pub struct XaddArguments {
    key: String,
    id_spec: IdSpec,
    fields: Vec<(Bytes, Bytes)>,
}

impl XaddArguments {
    /// Parses `key id field value [field value …]`; the field list must pair
    /// up evenly. Field names and values stay opaque bytes.
    pub fn parse(arguments: &[Bytes]) -> Result<Self, CommandError> {
        let [key, id_spec, fields @ ..] = arguments else {
            return Err(CommandError::WrongArity("xadd"));
        };

        if fields.is_empty() || fields.len() % 2 != 0 {
            return Err(CommandError::WrongArity("xadd"));
        }

        Ok(XaddArguments {
            key: text(key)?.to_string(),
            id_spec: IdSpec::parse(text(id_spec)?)?,
            fields: fields
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
        })
    }
}

pub async fn xadd(
    ctx: &Arc<ServerContext>,
    arguments: &[Bytes],
) -> Result<CommandOutcome, CommandError> {
    let xadd_arguments = XaddArguments::parse(arguments)?;

    let id = ctx
        .store
        .stream_add(
            &xadd_arguments.key,
            xadd_arguments.id_spec,
            xadd_arguments.fields,
        )
        .await?;

    CommandOutcome::response(RespValue::BulkString(id.to_string()))
}
