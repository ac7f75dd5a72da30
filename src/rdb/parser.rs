//! Snapshot structure parser: magic header, metadata pairs, database
//! sections, expiry markers, and the end-of-file checksum.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::rdb::RdbError;
use crate::rdb::encoding::{Reader, read_bytes, read_size, read_string};
use crate::store::{DataType, Entry};

const OPCODE_METADATA: u8 = 0xFA;
const OPCODE_HASHTABLE_SIZES: u8 = 0xFB;
const OPCODE_EXPIRY_MILLIS: u8 = 0xFC;
const OPCODE_EXPIRY_SECONDS: u8 = 0xFD;
const OPCODE_DATABASE: u8 = 0xFE;
const OPCODE_END_OF_FILE: u8 = 0xFF;

const KIND_STRING: u8 = 0x00;
// List, set, zset, hash, and stream kinds are reserved by the format but not
// readable by this implementation.
const RESERVED_KINDS: std::ops::RangeInclusive<u8> = 0x01..=0x05;

/// Loads the snapshot at `<dir>/<filename>` into an entry map. A missing
/// file is not an error: the keyspace simply starts empty.
pub async fn load_file(dir: &str, filename: &str) -> Result<HashMap<String, Entry>, RdbError> {
    let path = Path::new(dir).join(filename);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no snapshot file, starting with an empty keyspace");
            return Ok(HashMap::new());
        }
        Err(e) => return Err(RdbError::Io(e)),
    };

    parse_bytes(&bytes)
}

/// Parses an in-memory snapshot, as received over the wire during a replica
/// handshake.
pub fn parse_bytes(bytes: &[u8]) -> Result<HashMap<String, Entry>, RdbError> {
    let mut reader = Reader::new(bytes);

    let header = reader.read_exact(9)?;
    if &header[..5] != b"REDIS" {
        return Err(RdbError::InvalidFormat(
            "missing REDIS magic header".to_string(),
        ));
    }

    let mut entries = HashMap::new();
    let mut pending_expiry_ms: i64 = 0;

    loop {
        match reader.read_u8()? {
            OPCODE_METADATA => {
                let name = read_string(&mut reader)?;
                let value = read_string(&mut reader)?;
                debug!(name = %name, value = %value, "snapshot metadata");
            }
            OPCODE_DATABASE => {
                let _index = read_size(&mut reader)?;
            }
            OPCODE_HASHTABLE_SIZES => {
                let _entry_count = read_size(&mut reader)?;
                let _expiry_count = read_size(&mut reader)?;
            }
            OPCODE_EXPIRY_MILLIS => {
                pending_expiry_ms = reader.read_u64_le()? as i64;
            }
            OPCODE_EXPIRY_SECONDS => {
                pending_expiry_ms = reader.read_u32_le()? as i64 * 1000;
            }
            OPCODE_END_OF_FILE => {
                let _checksum = reader.read_exact(8)?;
                break;
            }
            KIND_STRING => {
                let key = read_string(&mut reader)?;
                let value = read_bytes(&mut reader)?;
                entries.insert(
                    key,
                    Entry {
                        data: DataType::String(Bytes::from(value)),
                        expires_at_ms: pending_expiry_ms,
                    },
                );
                pending_expiry_ms = 0;
            }
            kind if RESERVED_KINDS.contains(&kind) => {
                return Err(RdbError::Unsupported("non-string value kinds"));
            }
            other => {
                return Err(RdbError::InvalidFormat(format!(
                    "unknown opcode 0x{:02X}",
                    other
                )));
            }
        }
    }

    Ok(entries)
}
