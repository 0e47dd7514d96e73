//! Common types, enums, and error definitions for the watch sync protocol

use crate::constants::{
    ALL_FEATURES_UUID, CONVOY_UUID, DATA_REQUEST_SP_UUID, READ_REQUEST_FOR_ALL_FEATURES_UUID,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error types for watch synchronization
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Bluetooth error: {0}")]
    BluetoothError(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: String,
        timeout: Duration,
    },

    #[error("Transmission still corrupted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Download session closed")]
    SessionClosed,

    #[error("Invalid connection parameters: {0}")]
    InvalidConnectionParameters(String),

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Logical channels exposed by the features service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Feature announcements, only logged
    AllFeatures,
    /// Write-only trigger for the feature read
    ReadRequestForAllFeatures,
    /// Control channel ("data request / SP")
    DataRequest,
    /// Bulk channel ("convoy")
    Convoy,
}

impl Channel {
    /// Characteristic identifier backing this channel
    pub fn uuid(self) -> Uuid {
        match self {
            Channel::AllFeatures => ALL_FEATURES_UUID,
            Channel::ReadRequestForAllFeatures => READ_REQUEST_FOR_ALL_FEATURES_UUID,
            Channel::DataRequest => DATA_REQUEST_SP_UUID,
            Channel::Convoy => CONVOY_UUID,
        }
    }

    /// Map a characteristic identifier back to its channel
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            u if u == ALL_FEATURES_UUID => Some(Channel::AllFeatures),
            u if u == READ_REQUEST_FOR_ALL_FEATURES_UUID => {
                Some(Channel::ReadRequestForAllFeatures)
            }
            u if u == DATA_REQUEST_SP_UUID => Some(Channel::DataRequest),
            u if u == CONVOY_UUID => Some(Channel::Convoy),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::AllFeatures => write!(f, "AllFeatures"),
            Channel::ReadRequestForAllFeatures => write!(f, "ReadRequestForAllFeatures"),
            Channel::DataRequest => write!(f, "DataRequestSP"),
            Channel::Convoy => write!(f, "Convoy"),
        }
    }
}

/// One notification delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(channel: Channel, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// First byte of the payload, if any
    pub fn kind(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// An upload category: identifier byte plus the bytes streamed for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Category {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

/// Format bytes as space-separated hex, truncated to `max_len` bytes
pub fn hex_dump(data: &[u8], max_len: usize) -> String {
    let len = data.len().min(max_len);
    let hex: String = data[..len]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max_len {
        format!("{} ... ({} bytes total)", hex, data.len())
    } else {
        format!("{} ({} bytes)", hex, data.len())
    }
}
