//! Command Encoder
//!
//! [`Command`] is the catalogue of frames the host writes to the watch. Each
//! command knows its channel and its exact bytes; [`WatchController`] writes
//! them through a transport and pauses after every write so the watch has time
//! to process it.

use crate::config::SyncConfig;
use crate::constants::{
    category, opcode, CCC_DESCRIPTOR_UUID, COMMAND_LEN, HEADER_ADDRESS, HEADER_LENGTH,
    SETTINGS_ACCEPTOR_1, SETTINGS_ACCEPTOR_2, SETTINGS_TIMEOUT_MINUTES,
};
use crate::transport::{logging_callback, WatchTransport};
use crate::types::{hex_dump, Channel, Result};
use log::debug;
use std::sync::Arc;
use tokio::time::sleep;

/// Value written to a CCC descriptor to enable notifications
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/// Frames the host sends to the watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the watch to publish its feature list
    ReadAllFeatures,
    /// Open a category during download initialization (10 bytes)
    OpenCategory(u8),
    /// Tell the watch the convoy channel is listening
    ConvoyReady,
    /// First download setup frame: reset convoy parameters
    ResetConvoy,
    /// Convoy parameters: sector size 0x18, window 0x18, value 0x258
    ConvoyParameters,
    /// Download setup: sector size
    SectorSize,
    /// Download setup: window parameters
    SectorWindow,
    /// Request the header block
    RequestHeader,
    /// Request a log or the point memory by address and length
    RequestRange { address: u32, length: u32 },
    /// Acknowledge a continue request
    ContinueAck,
    /// Abort a category
    EndTransmission(u8),
    /// Close a category after a download (10 bytes)
    CloseDownload(u8),
    /// Finish a category after a download
    FinishDownload(u8),
    /// Open a category during an upload (4 bytes)
    OpenUploadCategory(u8),
    /// Connection settings for the remainder of an upload category
    ConnectionSettings { total_length: u32, remaining: u32 },
    /// Close a category during an upload (5 bytes)
    CloseUploadCategory(u8),
    /// Close the connection-setup category at the end of an upload
    FinishUpload,
    /// Last convoy frame of an upload
    FinalConvoyParameters,
}

impl Command {
    /// Channel the command is written to
    pub fn channel(&self) -> Channel {
        match self {
            Command::ReadAllFeatures => Channel::ReadRequestForAllFeatures,
            Command::ConvoyReady
            | Command::ResetConvoy
            | Command::ConvoyParameters
            | Command::SectorSize
            | Command::SectorWindow
            | Command::ConnectionSettings { .. }
            | Command::FinalConvoyParameters => Channel::Convoy,
            _ => Channel::DataRequest,
        }
    }

    /// Bytes of the command as written to the watch
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::ReadAllFeatures => vec![opcode::READ_ALL_FEATURES],
            Command::OpenCategory(id) => padded(&[opcode::OPEN, id]),
            Command::ConvoyReady => vec![0x00, 0x00, 0x00],
            Command::ResetConvoy => padded(&[opcode::FINISH]),
            Command::ConvoyParameters => {
                vec![0x04, 0x01, 0x18, 0x00, 0x18, 0x00, 0x00, 0x00, 0x58, 0x02]
            }
            Command::SectorSize => {
                vec![0x02, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
            }
            Command::SectorWindow => {
                vec![0x02, 0xF0, 0x00, 0x10, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF]
            }
            Command::RequestHeader => range_request(category::HEADER, HEADER_ADDRESS, HEADER_LENGTH),
            Command::RequestRange { address, length } => {
                range_request(category::LOG, address, length)
            }
            Command::ContinueAck => padded(&[opcode::CONTINUE, category::LOG]),
            Command::EndTransmission(id) => padded(&[opcode::END_TRANSMISSION, id]),
            Command::CloseDownload(id) => padded(&[opcode::CLOSE, id]),
            Command::FinishDownload(id) => padded(&[opcode::FINISH, id]),
            Command::OpenUploadCategory(id) => vec![opcode::OPEN, id, 0x00, 0x00],
            Command::ConnectionSettings {
                total_length,
                remaining,
            } => {
                let mut frame = vec![opcode::CONNECTION_SETTINGS];
                frame.extend_from_slice(&total_length.to_le_bytes());
                frame.extend_from_slice(&remaining.to_le_bytes());
                frame.extend_from_slice(&[
                    SETTINGS_ACCEPTOR_1,
                    SETTINGS_ACCEPTOR_2,
                    SETTINGS_TIMEOUT_MINUTES,
                ]);
                frame
            }
            Command::CloseUploadCategory(id) => vec![opcode::CLOSE, id, 0x00, 0x00, 0x00],
            Command::FinishUpload => {
                vec![opcode::FINISH, category::CONNECTION_SETUP, 0x00, 0x00, 0x00]
            }
            Command::FinalConvoyParameters => {
                vec![0x04, 0x01, 0x48, 0x00, 0x50, 0x00, 0x04, 0x00, 0x58, 0x02]
            }
        }
    }
}

/// Zero-pad a frame prefix to the standard command length
fn padded(prefix: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; COMMAND_LEN];
    frame[..prefix.len()].copy_from_slice(prefix);
    frame
}

fn range_request(category_id: u8, address: u32, length: u32) -> Vec<u8> {
    let mut frame = vec![opcode::OPEN, category_id];
    frame.extend_from_slice(&address.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame
}

/// Writes commands to the watch with protocol pacing
#[derive(Clone)]
pub struct WatchController {
    transport: Arc<dyn WatchTransport>,
    config: SyncConfig,
}

impl WatchController {
    pub fn new(transport: Arc<dyn WatchTransport>, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &Arc<dyn WatchTransport> {
        &self.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Write one command, then wait the pacing delay
    pub async fn send(&self, command: Command) -> Result<()> {
        let data = command.encode();
        let channel = command.channel();
        debug!("Sending {:?} on {}: {}", command, channel, hex_dump(&data, 16));
        self.transport
            .write_characteristic(channel.uuid(), &data)
            .await?;
        self.pause().await;
        Ok(())
    }

    /// Enable notifications on a channel through its CCC descriptor
    pub async fn enable_notifications(&self, channel: Channel) -> Result<()> {
        debug!("Enabling notifications on {}", channel);
        self.transport
            .write_descriptor(channel.uuid(), CCC_DESCRIPTOR_UUID, &ENABLE_NOTIFICATIONS)
            .await?;
        self.pause().await;
        Ok(())
    }

    async fn pause(&self) {
        if !self.config.command_delay.is_zero() {
            sleep(self.config.command_delay).await;
        }
    }

    /// Handshake that must precede every download attempt
    pub async fn initialize(&self) -> Result<()> {
        self.transport
            .subscribe(Channel::AllFeatures.uuid(), logging_callback("AllFeatures"))
            .await?;
        self.send(Command::ReadAllFeatures).await?;
        self.enable_notifications(Channel::DataRequest).await?;
        self.enable_notifications(Channel::Convoy).await?;
        self.send(Command::OpenCategory(category::DOWNLOAD_SETUP))
            .await?;
        self.send(Command::ConvoyReady).await
    }

    /// Convoy frames that set up sector size and window parameters
    pub async fn request_download(&self) -> Result<()> {
        for command in [
            Command::ResetConvoy,
            Command::ConvoyParameters,
            Command::SectorSize,
            Command::SectorWindow,
        ] {
            self.send(command).await?;
        }
        Ok(())
    }

    pub async fn request_header(&self) -> Result<()> {
        self.send(Command::RequestHeader).await
    }

    pub async fn request_range(&self, address: u32, length: u32) -> Result<()> {
        self.send(Command::RequestRange { address, length }).await
    }

    pub async fn send_continue(&self) -> Result<()> {
        self.send(Command::ContinueAck).await
    }

    pub async fn abort(&self, category_id: u8) -> Result<()> {
        self.send(Command::EndTransmission(category_id)).await
    }

    /// Closing handshake after a fully received transmission
    pub async fn close_download(&self, category_id: u8) -> Result<()> {
        self.send(Command::CloseDownload(category_id)).await?;
        self.send(Command::FinishDownload(category_id)).await
    }
}
