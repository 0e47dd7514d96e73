//! Header and log decoders
//!
//! Both decoders read fixed offsets out of the raw buffer produced by the
//! reassembler. Unused slots, short buffers and impossible dates decode to
//! "no record" instead of an error.

use crate::constants::{
    FIRST_LOG_DATA_ADDRESS, FIRST_POINT_MEMORY_DATA_ADDRESS, HEADER_SLOT_SIZE, ONE_LOG_DATA_SIZE,
    POINT_MEMORY_COUNT_OFFSET, POINT_MEMORY_ENTRY_SIZE,
};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Degrees per unit of the fixed-point coordinates stored in a log record
const COORDINATE_SCALE: f64 = 1e-6;

/// Minimum width of a log record: timestamp, coordinates, pressure, temperature
pub const MIN_LOG_RECORD_SIZE: usize = 22;

/// One recorded log as listed in the header block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    /// Slot number, 1..=20
    pub ordinal: usize,
    pub data_count: u16,
    pub data_size: u16,
    pub timestamp: NaiveDateTime,
    /// Start address of the log in watch memory
    pub log_address: u32,
    /// Bytes to request for the whole log
    pub log_total_length: u32,
}

/// Location and size of the point-memory block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointMemory {
    pub count: u32,
    pub address: u32,
    pub total_length: u32,
}

/// One GPS fix of a downloaded log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub pressure: i64,
    pub temperature: i64,
}

fn le16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*data.get(offset)?, *data.get(offset + 1)?]))
}

fn le32(data: &[u8], offset: usize) -> Option<[u8; 4]> {
    data.get(offset..offset + 4)?.try_into().ok()
}

fn timestamp(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Option<NaiveDateTime> {
    if year == 0 || month == 0 || day == 0 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
    let value = date.and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32));
    if value.is_none() {
        warn!(
            "Invalid timestamp {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year, month, day, hour, minute, second
        );
    }
    value
}

/// Reads log headers and the point-memory count from the header block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderDecoder {
    data: Vec<u8>,
}

impl HeaderDecoder {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode slot `i`, or `None` when the slot is unused or unreadable
    pub fn record(&self, i: usize) -> Option<HeaderRecord> {
        let base = i * HEADER_SLOT_SIZE;
        let slot = self.data.get(base..base + HEADER_SLOT_SIZE)?;

        let data_count = le16(slot, 0)?;
        let data_size = le16(slot, 4)?;
        let year = le16(slot, 6)?;
        let timestamp = timestamp(year, slot[8], slot[9], slot[10], slot[11], slot[12])?;

        debug!(
            "Header slot {}: count={} size={} date={}",
            i, data_count, data_size, timestamp
        );

        Some(HeaderRecord {
            ordinal: i,
            data_count,
            data_size,
            timestamp,
            log_address: Self::log_address(i),
            log_total_length: self.log_total_length(i),
        })
    }

    /// Memory address of log `i` (1-based)
    pub fn log_address(i: usize) -> u32 {
        (i as u32).saturating_sub(1) * ONE_LOG_DATA_SIZE + FIRST_LOG_DATA_ADDRESS
    }

    /// Bytes of log `i`, zero when the slot is out of range
    pub fn log_total_length(&self, i: usize) -> u32 {
        let base = i * HEADER_SLOT_SIZE;
        match (le16(&self.data, base), le16(&self.data, base + 4)) {
            (Some(count), Some(size)) => count as u32 * size as u32,
            _ => 0,
        }
    }

    pub fn point_memory_count(&self) -> u32 {
        if self.data.len() > POINT_MEMORY_COUNT_OFFSET {
            self.data[POINT_MEMORY_COUNT_OFFSET] as u32
        } else {
            0
        }
    }

    pub fn point_memory_address(&self) -> u32 {
        FIRST_POINT_MEMORY_DATA_ADDRESS
    }

    pub fn point_memory_total_length(&self) -> u32 {
        self.point_memory_count() * POINT_MEMORY_ENTRY_SIZE
    }

    pub fn point_memory(&self) -> PointMemory {
        PointMemory {
            count: self.point_memory_count(),
            address: self.point_memory_address(),
            total_length: self.point_memory_total_length(),
        }
    }
}

/// Splits a downloaded log into fixed-width records
///
/// Record layout, little endian: year u16 @0, month @2, day @3, hour @4,
/// minute @5, second @6, latitude i32 @8, longitude i32 @12 (micro-degrees),
/// pressure u32 @16, temperature i16 @20.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDecoder {
    data: Vec<u8>,
    record_size: usize,
    record_count: usize,
}

impl LogDecoder {
    pub fn new(data: Vec<u8>, record_size: usize, record_count: usize) -> Self {
        Self {
            data,
            record_size,
            record_count,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn record(&self, i: usize) -> Option<LogRecord> {
        if self.record_size < MIN_LOG_RECORD_SIZE || i >= self.record_count {
            return None;
        }
        let base = i * self.record_size;
        let record = self.data.get(base..base + self.record_size)?;

        let timestamp = timestamp(
            le16(record, 0)?,
            record[2],
            record[3],
            record[4],
            record[5],
            record[6],
        )?;
        let latitude = i32::from_le_bytes(le32(record, 8)?) as f64 * COORDINATE_SCALE;
        let longitude = i32::from_le_bytes(le32(record, 12)?) as f64 * COORDINATE_SCALE;
        let pressure = u32::from_le_bytes(le32(record, 16)?) as i64;
        let temperature = i16::from_le_bytes([record[20], record[21]]) as i64;

        Some(LogRecord {
            timestamp,
            latitude,
            longitude,
            pressure,
            temperature,
        })
    }

    /// Every decodable record, skipping short or invalid ones
    pub fn records(&self) -> Vec<LogRecord> {
        (0..self.record_count)
            .filter_map(|i| self.record(i))
            .collect()
    }
}

/// Which decoder a transmission feeds, chosen before it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Header,
    Log {
        record_size: usize,
        record_count: usize,
    },
}

impl DecoderKind {
    pub fn decode(self, raw: Vec<u8>) -> Decoder {
        match self {
            DecoderKind::Header => Decoder::Header(HeaderDecoder::new(raw)),
            DecoderKind::Log {
                record_size,
                record_count,
            } => Decoder::Log(LogDecoder::new(raw, record_size, record_count)),
        }
    }
}

/// Decoded transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoder {
    Header(HeaderDecoder),
    Log(LogDecoder),
}

impl Decoder {
    pub fn raw(&self) -> &[u8] {
        match self {
            Decoder::Header(decoder) => decoder.data(),
            Decoder::Log(decoder) => decoder.data(),
        }
    }
}
