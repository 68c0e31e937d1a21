//! On-disk record framing.
//!
//! Each record is `[4B size][8B offset][8B timestamp_ms][JSON record]`, all integers
//! big-endian, where `size` is the length of the JSON payload.

use std::io::{self, Read};

use streamrig::{Record, StoredRecord};

use crate::error::BrokerError;

pub const HEADER_LEN: usize = 4 + 8 + 8;

pub fn serialize_record(record: &StoredRecord) -> Result<Vec<u8>, BrokerError> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + record.record.size_in_bytes() * 4);
    serialize_record_into_buffer(&mut buffer, record)?;
    Ok(buffer)
}

/// Appends one framed record to `buf` and returns the number of bytes written.
/// The size field is backfilled once the payload length is known.
pub fn serialize_record_into_buffer(
    buf: &mut Vec<u8>,
    record: &StoredRecord,
) -> Result<usize, BrokerError> {
    let start = buf.len();
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&record.offset.to_be_bytes());
    buf.extend_from_slice(&record.timestamp_ms.to_be_bytes());

    let json_start = buf.len();
    serde_json::to_writer(&mut *buf, &record.record)
        .map_err(|e| BrokerError::from_serialization_error(e, "serialize record"))?;
    let json_len = (buf.len() - json_start) as u32;
    buf[start..start + 4].copy_from_slice(&json_len.to_be_bytes());

    Ok(buf.len() - start)
}

/// Reads the next record, or `None` at a clean end of input. A partially written
/// trailing record is treated as the end of the log.
pub fn deserialize_record<R: Read>(reader: &mut R) -> Result<Option<StoredRecord>, BrokerError> {
    let mut header = [0u8; HEADER_LEN];
    match read_full(reader, &mut header)? {
        0 => return Ok(None),
        n if n < HEADER_LEN => return Ok(None),
        _ => {}
    }

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let offset = u64::from_be_bytes(header_field(&header, 4));
    let timestamp_ms = i64::from_be_bytes(header_field(&header, 12));

    let mut payload = vec![0u8; size];
    if read_full(reader, &mut payload)? < size {
        return Ok(None);
    }
    let record: Record = serde_json::from_slice(&payload)
        .map_err(|e| BrokerError::from_serialization_error(e, "deserialize record"))?;

    Ok(Some(StoredRecord {
        record,
        offset,
        timestamp_ms,
    }))
}

fn header_field(header: &[u8; HEADER_LEN], at: usize) -> [u8; 8] {
    let mut field = [0u8; 8];
    field.copy_from_slice(&header[at..at + 8]);
    field
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, BrokerError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(BrokerError::from_io_error(e, "read segment")),
        }
    }
    Ok(filled)
}
