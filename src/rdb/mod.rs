//! Snapshot file reader.
//!
//! Parses the binary dump format used to bootstrap the keyspace at startup
//! and to seed a freshly synced replica. Only the reader exists; this server
//! never writes snapshots.

mod encoding;
mod parser;

use thiserror::Error;

pub use parser::{load_file, parse_bytes};

#[derive(Error, Debug)]
pub enum RdbError {
    #[error("I/O error reading snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),
    #[error("unsupported snapshot feature: {0}")]
    Unsupported(&'static str),
}

/// The canonical empty snapshot: magic header, stock metadata, terminator,
/// and checksum, with no database sections. Sent verbatim to a replica that
/// requests a full resync of an empty primary.
pub const EMPTY_SNAPSHOT: &[u8] =
    b"\x52\x45\x44\x49\x53\x30\x30\x31\x31\xfa\x09\x72\x65\x64\x69\x73\
\x2d\x76\x65\x72\x05\x37\x2e\x32\x2e\x30\xfa\x0a\x72\x65\x64\x69\
\x73\x2d\x62\x69\x74\x73\xc0\x40\xfa\x05\x63\x74\x69\x6d\x65\xc2\
\x6d\x08\xbc\x65\xfa\x08\x75\x73\x65\x64\x2d\x6d\x65\x6d\xc2\xb0\
\xc4\x10\x00\xfa\x08\x61\x6f\x66\x2d\x62\x61\x73\x65\xc0\x00\xff\
\xf0\x6e\x3b\xfe\xc0\xff\x5a\xa2";
