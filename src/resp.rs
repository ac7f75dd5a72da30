//! RESP wire codec.
//!
//! The decoder reads one self-delimiting frame at a time from a buffered
//! reader and keeps the exact raw bytes it consumed. The raw bytes matter:
//! the replication stream re-emits commands to replicas verbatim, so the
//! decoder must expose what it saw on the wire, not a re-serialization.
//!
//! Payloads are raw byte sequences. Bulk strings carry arbitrary binary
//! data; whether a payload is later treated as text is the command layer's
//! concern, not the codec's.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

#[derive(Error, Debug)]
pub enum RespError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("unexpected end of stream inside a frame")]
    UnexpectedEof,
}

/// The five standard frame types, identified by their leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    SimpleString,
    Error,
    Integer,
    BulkString,
    Array,
}

/// One decoded frame.
///
/// `payloads` holds the byte payloads in wire order; for arrays this is the
/// flattened payloads of all children. `raw` is every byte the decoder
/// consumed for this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payloads: Vec<Bytes>,
    pub raw: Bytes,
}

impl Frame {
    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the reader is exhausted at a frame boundary.
    /// EOF in the middle of a frame is an error.
    pub async fn read<R>(reader: &mut R) -> Result<Option<Frame>, RespError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut raw = BytesMut::new();

        let Some(header) = read_line(reader, &mut raw).await? else {
            return Ok(None);
        };

        let (kind, first) = split_header(&header)?;
        let mut payloads = Vec::new();

        match kind {
            FrameKind::SimpleString | FrameKind::Error | FrameKind::Integer => {
                payloads.push(Bytes::copy_from_slice(first));
            }
            FrameKind::BulkString => {
                if let Some(payload) = read_bulk_payload(reader, first, &mut raw).await? {
                    payloads.push(payload);
                }
            }
            FrameKind::Array => {
                // A -1 count is the null array and has no children.
                let mut pending = if first == b"-1" {
                    0
                } else {
                    parse_count(first)?
                };

                while pending > 0 {
                    let Some(header) = read_line(reader, &mut raw).await? else {
                        return Err(RespError::UnexpectedEof);
                    };
                    let (child_kind, child_first) = split_header(&header)?;
                    pending -= 1;

                    match child_kind {
                        FrameKind::SimpleString | FrameKind::Error | FrameKind::Integer => {
                            payloads.push(Bytes::copy_from_slice(child_first));
                        }
                        FrameKind::BulkString => {
                            if let Some(payload) =
                                read_bulk_payload(reader, child_first, &mut raw).await?
                            {
                                payloads.push(payload);
                            }
                        }
                        // Nested array: its children take the place of this
                        // element in the flattened payload list.
                        FrameKind::Array => {
                            if child_first != b"-1" {
                                pending += parse_count(child_first)?;
                            }
                        }
                    }
                }
            }
        }

        Ok(Some(Frame {
            kind,
            payloads,
            raw: raw.freeze(),
        }))
    }

    /// Reads a file frame: `$<len>\r\n` followed by exactly `<len>` bytes
    /// with no trailing CRLF. Used once per replica handshake to receive the
    /// bootstrap snapshot.
    pub async fn read_file<R>(reader: &mut R) -> Result<Vec<u8>, RespError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut raw = BytesMut::new();

        let Some(header) = read_line(reader, &mut raw).await? else {
            return Err(RespError::UnexpectedEof);
        };

        let (kind, len) = split_header(&header)?;
        if kind != FrameKind::BulkString {
            return Err(RespError::InvalidFrame(
                "expected a file frame".to_string(),
            ));
        }

        let len = parse_count(len)?;
        let mut contents = vec![0u8; len];
        reader
            .read_exact(&mut contents)
            .await
            .map_err(|_| RespError::UnexpectedEof)?;

        Ok(contents)
    }
}

/// Reads one `\r\n`-terminated line, appending the consumed bytes (including
/// the terminator) to `raw`. Returns the line without the terminator, or
/// `None` on a clean EOF before any byte was read.
async fn read_line<R>(reader: &mut R, raw: &mut BytesMut) -> Result<Option<Vec<u8>>, RespError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;

    if n == 0 {
        return Ok(None);
    }

    if line.len() < 2 || line[line.len() - 2..] != *b"\r\n" {
        return Err(RespError::InvalidFrame(
            "line not terminated by CRLF".to_string(),
        ));
    }

    raw.extend_from_slice(&line);
    line.truncate(line.len() - 2);

    Ok(Some(line))
}

fn split_header(line: &[u8]) -> Result<(FrameKind, &[u8]), RespError> {
    let kind = match line.first() {
        Some(b'+') => FrameKind::SimpleString,
        Some(b'-') => FrameKind::Error,
        Some(b':') => FrameKind::Integer,
        Some(b'$') => FrameKind::BulkString,
        Some(b'*') => FrameKind::Array,
        other => {
            return Err(RespError::InvalidFrame(format!(
                "unknown frame prefix {:?}",
                other
            )));
        }
    };

    Ok((kind, &line[1..]))
}

fn parse_count(text: &[u8]) -> Result<usize, RespError> {
    str::from_utf8(text)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(|| {
            RespError::InvalidFrame(format!(
                "invalid length prefix '{}'",
                String::from_utf8_lossy(text)
            ))
        })
}

/// Reads the `<len bytes>\r\n` tail of a bulk string. A `-1` length is the
/// null bulk string and carries no payload.
async fn read_bulk_payload<R>(
    reader: &mut R,
    len_text: &[u8],
    raw: &mut BytesMut,
) -> Result<Option<Bytes>, RespError>
where
    R: AsyncBufRead + Unpin,
{
    if len_text == b"-1" {
        return Ok(None);
    }

    let len = parse_count(len_text)?;

    let mut contents = vec![0u8; len + 2];
    reader
        .read_exact(&mut contents)
        .await
        .map_err(|_| RespError::UnexpectedEof)?;

    if contents[len..] != *b"\r\n" {
        return Err(RespError::InvalidFrame(
            "bulk string length mismatch".to_string(),
        ));
    }

    raw.extend_from_slice(&contents);
    contents.truncate(len);

    Ok(Some(Bytes::from(contents)))
}

/// An outgoing frame. `encode` produces the exact wire bytes; error text
/// carries its own prefix (`ERR …`, `EXECABORT …`) so conventional and
/// no-prefix errors share one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(String),
    /// A bulk string whose payload is arbitrary bytes (stored values,
    /// stream fields).
    BulkBytes(Bytes),
    Null,
    NullArray,
    Array(Vec<RespValue>),
    /// Bulk-string prefix followed by raw bytes with no trailing CRLF.
    File(Vec<u8>),
}

impl RespValue {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(s) => format!("-{}\r\n", s).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(s) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            RespValue::BulkBytes(payload) => {
                let mut bytes = format!("${}\r\n", payload.len()).into_bytes();
                bytes.extend_from_slice(payload);
                bytes.extend_from_slice(b"\r\n");
                bytes
            }
            RespValue::Null => b"$-1\r\n".to_vec(),
            RespValue::NullArray => b"*-1\r\n".to_vec(),
            RespValue::Array(items) => {
                let mut bytes = format!("*{}\r\n", items.len()).into_bytes();
                for item in items {
                    bytes.extend_from_slice(&item.encode());
                }
                bytes
            }
            RespValue::File(contents) => {
                let mut bytes = format!("${}\r\n", contents.len()).into_bytes();
                bytes.extend_from_slice(contents);
                bytes
            }
        }
    }
}
