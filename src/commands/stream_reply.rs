//! Shared RESP shapes for stream replies.

use crate::resp::RespValue;
use crate::stream::StreamEntry;

/// Encodes entries as `[[id, [field, value, …]], …]`.
pub fn entries_to_resp(entries: &[StreamEntry]) -> RespValue {
    RespValue::Array(
        entries
            .iter()
            .map(|entry| {
                let mut fields = Vec::with_capacity(entry.fields.len() * 2);
                for (name, value) in &entry.fields {
                    fields.push(RespValue::BulkBytes(name.clone()));
                    fields.push(RespValue::BulkBytes(value.clone()));
                }

                RespValue::Array(vec![
                    RespValue::BulkString(entry.id.to_string()),
                    RespValue::Array(fields),
                ])
            })
            .collect(),
    )
}

/// Encodes per-key results as `[[key, entries], …]`.
pub fn keyed_entries_to_resp(results: &[(String, Vec<StreamEntry>)]) -> RespValue {
    RespValue::Array(
        results
            .iter()
            .map(|(key, entries)| {
                RespValue::Array(vec![
                    RespValue::BulkString(key.clone()),
                    entries_to_resp(entries),
                ])
            })
            .collect(),
    )
}
