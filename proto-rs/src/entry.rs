use crate::{RequestKey, Response};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::io;

// Entry format constants
pub const ENTRY_MAGIC: [u8; 4] = [0x53, 0x43, 0x45, 0x4E]; // "SCEN"
pub const ENTRY_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;

/// A request identity paired with its stored response snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: RequestKey,
    pub response: Response,
    pub stored_at: u64, // Unix timestamp in milliseconds
}

impl CachedEntry {
    /// Create an entry stamped with the current time
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            stored_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    key: RequestKey,
    response: Response,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Encode an entry: 16-byte header (magic, version, stored_at) + bincode body
pub fn encode_entry(entry: &CachedEntry) -> io::Result<Vec<u8>> {
    let body = codec()
        .serialize(&EntryBody {
            key: entry.key.clone(),
            response: entry.response.clone(),
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&ENTRY_MAGIC);
    buf.extend_from_slice(&ENTRY_VERSION.to_be_bytes());
    buf.extend_from_slice(&entry.stored_at.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode an entry produced by [`encode_entry`]
pub fn decode_entry(data: &[u8]) -> io::Result<CachedEntry> {
    if data.len() < HEADER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Entry too short: {} bytes", data.len()),
        ));
    }

    if data[0..4] != ENTRY_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid entry magic bytes",
        ));
    }

    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != ENTRY_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported entry version: {} (expected {})", version, ENTRY_VERSION),
        ));
    }

    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(&data[8..16]);
    let stored_at = u64::from_be_bytes(stamp);

    let body: EntryBody = codec()
        .deserialize(&data[HEADER_SIZE..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(CachedEntry {
        key: body.key,
        response: body.response,
        stored_at,
    })
}
