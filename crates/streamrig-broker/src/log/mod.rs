//! Partition logs: an append-only segment file plus an in-memory copy for reads.

pub mod segment;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, Write};
use std::path::{Path, PathBuf};

use streamrig::{Record, StoredRecord};
use tracing::instrument;

use crate::error::BrokerError;
use crate::{debug, info, warn};

/// Name of the single segment every partition directory holds.
pub const SEGMENT_FILE: &str = "00000000000000000000.log";

/// Directory of partition `partition` of `topic` inside `log_dir`.
pub fn partition_dir(log_dir: &Path, topic: &str, partition: u32) -> PathBuf {
    log_dir.join(format!("{topic}-{partition}"))
}

#[derive(Debug)]
pub struct PartitionLog {
    topic: String,
    partition: u32,
    segment_path: PathBuf,
    segment: File,
    records: Vec<StoredRecord>,
    write_buffer: Vec<u8>,
}

impl PartitionLog {
    /// Opens (or creates) the partition directory and replays an existing segment.
    #[instrument(level = "debug", skip(log_dir), fields(dir = %log_dir.display()))]
    pub fn open(log_dir: &Path, topic: &str, partition: u32) -> Result<Self, BrokerError> {
        let dir = partition_dir(log_dir, topic, partition);
        std::fs::create_dir_all(&dir)
            .map_err(|e| BrokerError::from_io_error(e, "create partition directory"))?;

        let segment_path = dir.join(SEGMENT_FILE);
        let segment = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&segment_path)
            .map_err(|e| BrokerError::from_io_error(e, "open segment"))?;

        let (records, valid_len) = Self::replay(&segment_path)?;
        let file_len = segment
            .metadata()
            .map_err(|e| BrokerError::from_io_error(e, "stat segment"))?
            .len();
        if file_len > valid_len {
            warn!(
                "Dropping {} bytes of incomplete record at the end of {}",
                file_len - valid_len,
                segment_path.display()
            );
            segment
                .set_len(valid_len)
                .map_err(|e| BrokerError::from_io_error(e, "truncate segment"))?;
        }
        if !records.is_empty() {
            info!(
                "Recovered {} records for {topic}-{partition} from {}",
                records.len(),
                segment_path.display()
            );
        }

        Ok(Self {
            topic: topic.to_string(),
            partition,
            segment_path,
            segment,
            records,
            write_buffer: Vec::new(),
        })
    }

    /// Complete records of the segment and the byte length they occupy.
    fn replay(path: &Path) -> Result<(Vec<StoredRecord>, u64), BrokerError> {
        let file = File::open(path).map_err(|e| BrokerError::from_io_error(e, "open segment"))?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0;
        while let Some(record) = segment::deserialize_record(&mut reader)? {
            records.push(record);
            valid_len = reader
                .stream_position()
                .map_err(|e| BrokerError::from_io_error(e, "read segment"))?;
        }
        Ok((records, valid_len))
    }

    /// Appends `records` and returns the offsets of the first and last one.
    pub fn append(&mut self, records: Vec<Record>) -> Result<(u64, u64), BrokerError> {
        if records.is_empty() {
            return Err(BrokerError::invalid_request("records must be non-empty"));
        }

        let base_offset = self.high_water_mark();
        let stored: Vec<StoredRecord> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| StoredRecord::from_record(record, base_offset + i as u64))
            .collect();

        self.write_buffer.clear();
        for record in &stored {
            segment::serialize_record_into_buffer(&mut self.write_buffer, record)?;
        }
        write_frames(&mut self.segment, &self.write_buffer)
            .map_err(|e| BrokerError::from_io_error(e, "append to segment"))?;

        let last_offset = base_offset + stored.len() as u64 - 1;
        self.records.extend(stored);
        debug!(
            "Appended offsets {base_offset}..={last_offset} to {}-{}",
            self.topic, self.partition
        );
        Ok((base_offset, last_offset))
    }

    /// Up to `max_records` records starting at `offset`. Reading at the high water
    /// mark returns nothing; beyond it is out of range.
    pub fn read(&self, offset: u64, max_records: usize) -> Result<Vec<StoredRecord>, BrokerError> {
        let high_water_mark = self.high_water_mark();
        if offset > high_water_mark {
            return Err(BrokerError::OffsetOutOfRange {
                topic: self.topic.clone(),
                partition: self.partition,
                offset,
                high_water_mark,
            });
        }
        Ok(self
            .records
            .iter()
            .skip(offset as usize)
            .take(max_records)
            .cloned()
            .collect())
    }

    /// Offset the next appended record will get.
    pub fn high_water_mark(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn segment_path(&self) -> &Path {
        &self.segment_path
    }
}

/// Appends `frames` to `segment`. A failed write cuts the file back to its
/// previous length so no partial frame precedes later appends.
fn write_frames(segment: &mut File, frames: &[u8]) -> io::Result<()> {
    let len = segment.metadata()?.len();
    let result = segment.write_all(frames).and_then(|_| segment.flush());
    if result.is_err() {
        if let Err(e) = segment.set_len(len) {
            warn!("Could not truncate segment after a failed append: {e}");
        }
    }
    result
}
