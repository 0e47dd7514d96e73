//! Casio GPR-B1000 watch synchronization
//!
//! This library implements the protocol engine that downloads recorded logs
//! from a Casio GPR-B1000 GPS watch and uploads routes to it over BLE GATT.
//!
//! # Modules
//!
//! - `crc`: CRC-16/KERMIT and the bit inversion applied to every payload byte
//! - `commands`: command frame catalogue and paced writes
//! - `reassembler`: turns download notifications into one verified buffer
//! - `decoders`: header and log record decoding
//! - `download`: download session task and the retrying orchestrator
//! - `convoy`, `upload`: route upload over the convoy channel
//! - `transport`: the transport port, with `ble` implementing it on BlueZ
//! - `types`: errors, channels and frames shared by every module

pub mod ble;
pub mod commands;
pub mod config;
pub mod constants;
pub mod convoy;
pub mod crc;
pub mod decoders;
pub mod download;
pub mod progress;
pub mod reassembler;
pub mod transport;
pub mod types;
pub mod upload;

#[cfg(test)]
mod testing;

pub use ble::{device_by_address, find_watch, open_adapter, BlueRTransport};
pub use commands::{Command, WatchController};
pub use config::SyncConfig;
pub use convoy::{build_convoy_frames, BufferedConvoySender};
pub use crc::{crc16_kermit, invert};
pub use decoders::{
    Decoder, DecoderKind, HeaderDecoder, HeaderRecord, LogDecoder, LogRecord, PointMemory,
};
pub use download::{DownloadSession, HeaderListing, SyncOrchestrator};
pub use progress::{ProgressEvent, ProgressListener, ProgressReporter};
pub use reassembler::{Completion, Reassembler, ReassemblerState};
pub use transport::{NotificationCallback, WatchTransport};
pub use types::{Category, Channel, Frame, Result, SyncError};
pub use upload::{send_route, ConnectionParameters, UploadDriver, UploadPhase};
