//! Upload Driver and Route Sender
//!
//! Uploading a route is a strictly linear handshake. Each phase writes its
//! command and then waits for the one notification that lets the next phase
//! start:
//!
//! ```text
//! Init -> ConvoyParams -> for data (0x16) then header (0x15):
//!     CategoryParams -> ConnectionSettings -> Send -> Close
//! -> FinalClose1 -> FinalClose2 -> Done
//! ```
//!
//! Every wait is bounded by `notification_timeout`.

use crate::commands::{Command, WatchController};
use crate::constants::{category, opcode, CONVOY_READY_SENTINEL, MIN_ANNOUNCEMENT_LEN};
use crate::convoy::BufferedConvoySender;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::transport::frame_forwarder;
use crate::types::{hex_dump, Category, Channel, Frame, Result, SyncError};
use log::{debug, info, warn};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Progress percentage added by every completed phase
const PROGRESS_STEP: u8 = 8;

/// Sector geometry the watch reports when a category is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub sector_size: u16,
    pub sector_offset: u32,
    pub raw: Vec<u8>,
}

impl ConnectionParameters {
    /// Parse a convoy notification of kind 2 or 6
    pub fn parse(frame: &[u8]) -> Result<Self> {
        match frame.first() {
            Some(&opcode::CONNECTION_PARAMETERS | &opcode::CONNECTION_PARAMETERS_ALT) => {}
            Some(kind) => {
                return Err(SyncError::InvalidConnectionParameters(format!(
                    "unexpected kind 0x{:02X}",
                    kind
                )))
            }
            None => return Err(SyncError::FrameTooShort(0)),
        }
        if frame.len() < MIN_ANNOUNCEMENT_LEN {
            return Err(SyncError::FrameTooShort(frame.len()));
        }

        Ok(Self {
            sector_size: u16::from_le_bytes([frame[1], frame[2]]),
            sector_offset: u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]),
            raw: frame.to_vec(),
        })
    }

    /// Bytes of a `total_length` payload the watch still needs
    pub fn remaining(&self, total_length: usize) -> i64 {
        total_length as i64 - self.sector_size as i64 * self.sector_offset as i64
    }
}

/// Named phases of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Init,
    ConvoyParams,
    CategoryParams(u8),
    ConnectionSettings(u8),
    Send(u8),
    Close(u8),
    FinalClose1,
    FinalClose2,
    Done,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPhase::Init => write!(f, "Init"),
            UploadPhase::ConvoyParams => write!(f, "ConvoyParams"),
            UploadPhase::CategoryParams(id) => write!(f, "CategoryParams(0x{:02X})", id),
            UploadPhase::ConnectionSettings(id) => write!(f, "ConnectionSettings(0x{:02X})", id),
            UploadPhase::Send(id) => write!(f, "Send(0x{:02X})", id),
            UploadPhase::Close(id) => write!(f, "Close(0x{:02X})", id),
            UploadPhase::FinalClose1 => write!(f, "FinalClose1"),
            UploadPhase::FinalClose2 => write!(f, "FinalClose2"),
            UploadPhase::Done => write!(f, "Done"),
        }
    }
}

/// Sequential upload state machine fed by control and convoy notifications
pub struct UploadDriver {
    controller: WatchController,
    progress: ProgressReporter,
    rx: mpsc::UnboundedReceiver<Frame>,
    phase: UploadPhase,
    percent: u8,
}

impl UploadDriver {
    /// Subscribe to both channels and prepare a driver in the `Init` phase
    pub async fn start(controller: WatchController, progress: ProgressReporter) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        let transport = controller.transport().clone();
        for channel in [Channel::DataRequest, Channel::Convoy] {
            transport
                .subscribe(channel.uuid(), frame_forwarder(tx.clone()))
                .await?;
        }

        Ok(Self {
            controller,
            progress,
            rx,
            phase: UploadPhase::Init,
            percent: PROGRESS_STEP,
        })
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    /// Upload `categories` in order and perform the closing handshake
    pub async fn run(&mut self, categories: &[Category]) -> Result<()> {
        self.init().await?;

        self.enter(UploadPhase::ConvoyParams);
        self.controller.send(Command::ConvoyParameters).await?;
        self.advance("Sent convoy connection parameters");

        for category in categories {
            self.upload_category(category).await?;
        }

        self.enter(UploadPhase::FinalClose1);
        self.controller.send(Command::FinishUpload).await?;
        self.wait_for(Channel::Convoy, "final close acknowledgement", |frame| {
            frame.starts_with(&[opcode::FINISH, 0x00, 0x18])
        })
        .await?;
        self.advance("Finished writing final closing data");

        self.enter(UploadPhase::FinalClose2);
        self.controller.send(Command::FinalConvoyParameters).await?;

        self.enter(UploadPhase::Done);
        self.percent = 100;
        self.advance("Finished sending data");
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        self.enter(UploadPhase::Init);
        self.controller
            .enable_notifications(Channel::DataRequest)
            .await?;
        self.controller.enable_notifications(Channel::Convoy).await?;
        self.controller
            .send(Command::OpenUploadCategory(category::CONNECTION_SETUP))
            .await?;
        self.wait_for(Channel::Convoy, "convoy ready", |frame| {
            frame == CONVOY_READY_SENTINEL
        })
        .await?;
        self.advance("Sent init commands and waited for CCC data");
        Ok(())
    }

    async fn upload_category(&mut self, category: &Category) -> Result<()> {
        let id = category.id;

        self.enter(UploadPhase::CategoryParams(id));
        self.controller
            .send(Command::OpenUploadCategory(id))
            .await?;
        let parameters = self.connection_parameters().await?;
        self.advance("Sent category and waited for connection params");

        self.enter(UploadPhase::ConnectionSettings(id));
        let total_length = category.payload.len();
        let remaining = parameters.remaining(total_length);
        debug!(
            "Category 0x{:02X}: {} bytes, sector size {}, offset {}, remaining {}",
            id, total_length, parameters.sector_size, parameters.sector_offset, remaining
        );
        if remaining > 0 {
            self.controller
                .send(Command::ConnectionSettings {
                    total_length: total_length as u32,
                    remaining: remaining as u32,
                })
                .await?;
        }
        self.wait_for(Channel::DataRequest, "connection settings acknowledgement", |frame| {
            frame.len() >= 2 && frame[0] == opcode::OPEN && frame[1] == id
        })
        .await?;
        self.advance("Sent connection settings based on params");

        self.enter(UploadPhase::Send(id));
        let frames = BufferedConvoySender::new(self.controller.transport().clone())
            .send(&category.payload)
            .await?;
        info!("Sent {} convoy frames for category 0x{:02X}", frames, id);
        self.advance(format!(
            "Finished using buffered convoy sender. Category = 0x{:02X}",
            id
        ));

        self.enter(UploadPhase::Close(id));
        let echo = [opcode::CLOSE, id, 0x00, 0x00, 0x00, 0x00, 0x00];
        self.wait_for(Channel::DataRequest, "category closing echo", |frame| frame == echo)
            .await?;
        self.controller
            .send(Command::CloseUploadCategory(id))
            .await?;
        self.advance("Closed current category and waited for response");
        Ok(())
    }

    /// Wait for a kind 2/6 convoy frame, skipping ones too short to parse
    async fn connection_parameters(&mut self) -> Result<ConnectionParameters> {
        loop {
            let frame = self
                .wait_for(Channel::Convoy, "connection parameters", |frame| {
                    matches!(
                        frame.first(),
                        Some(&opcode::CONNECTION_PARAMETERS | &opcode::CONNECTION_PARAMETERS_ALT)
                    )
                })
                .await?;
            match ConnectionParameters::parse(&frame) {
                Ok(parameters) => return Ok(parameters),
                Err(e) => warn!("Ignoring connection parameters {}: {}", hex_dump(&frame, 16), e),
            }
        }
    }

    /// Receive frames until one on `channel` satisfies `accept`
    async fn wait_for<F>(&mut self, channel: Channel, waiting_for: &str, accept: F) -> Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> bool,
    {
        let limit = self.controller.config().notification_timeout;
        let phase = self.phase;
        let rx = &mut self.rx;

        let wait = async {
            while let Some(frame) = rx.recv().await {
                if frame.channel == channel && accept(&frame.payload) {
                    return Ok(frame.payload);
                }
                debug!(
                    "{}: skipping {} frame {}",
                    phase,
                    frame.channel,
                    hex_dump(&frame.payload, 16)
                );
            }
            Err(SyncError::SessionClosed)
        };

        timeout(limit, wait).await.map_err(|_| SyncError::Timeout {
            waiting_for: waiting_for.to_string(),
            timeout: limit,
        })?
    }

    fn enter(&mut self, phase: UploadPhase) {
        debug!("Upload phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn advance(&mut self, message: impl Into<String>) {
        self.progress
            .report(ProgressEvent::with_percent(self.percent, message));
        self.percent = self.percent.saturating_add(PROGRESS_STEP).min(100);
    }
}

/// Upload a route: the data block as category 0x16, then its header as 0x15
pub async fn send_route(
    controller: WatchController,
    progress: ProgressReporter,
    data: Vec<u8>,
    header: Vec<u8>,
) -> Result<()> {
    info!(
        "Sending route: {} data bytes, {} header bytes",
        data.len(),
        header.len()
    );
    let categories = [
        Category::new(category::ROUTE_DATA, data),
        Category::new(category::ROUTE_HEADER, header),
    ];
    let mut driver = UploadDriver::start(controller, progress).await?;
    driver.run(&categories).await
}
