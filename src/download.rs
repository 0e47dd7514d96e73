//! Download session and Sync Orchestrator
//!
//! A [`DownloadSession`] is a spawned task that exclusively owns one
//! [`Reassembler`]. Notifications reach it through an mpsc channel, so frames
//! and restarts are processed strictly in arrival order, and each attempt's
//! outcome comes back on a oneshot channel.
//!
//! [`SyncOrchestrator`] drives the end-to-end downloads on top of it:
//! headers, a single log and the point memory, each with a bounded
//! CRC-triggered retry loop.

use crate::commands::WatchController;
use crate::constants::{category, HEADER_LENGTH, MAX_HEADER_ORDINAL, POINT_MEMORY_ENTRY_SIZE};
use crate::decoders::{Decoder, DecoderKind, HeaderRecord, LogRecord, PointMemory};
use crate::progress::{
    ProgressReporter, PLEASE_SELECT_LOG_HEADER, SENDING_DOWNLOAD_COMMANDS,
    SENDING_HEADER_COMMANDS, SENDING_LOG_DATA_COMMANDS, STALE_HEADERS,
    TRANSMISSION_ENDED_WITHOUT_ALL_DATA, ZERO_HEADERS,
};
use crate::reassembler::{Completion, Reassembler, Reply};
use crate::transport::frame_forwarder;
use crate::types::{Channel, Frame, Result, SyncError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Messages accepted by a download session
#[derive(Debug)]
pub enum SessionMessage {
    Frame(Frame),
    /// Reset the reassembler and deliver the next completion on the sender
    Restart(oneshot::Sender<Completion>),
}

impl From<Frame> for SessionMessage {
    fn from(frame: Frame) -> Self {
        SessionMessage::Frame(frame)
    }
}

/// Handle to the task that owns a reassembler
pub struct DownloadSession {
    tx: mpsc::UnboundedSender<SessionMessage>,
    handle: JoinHandle<()>,
}

impl DownloadSession {
    /// Spawn the session task and route control and convoy notifications to it.
    ///
    /// Announcements longer than `max_length` bytes are ignored.
    pub async fn start(
        controller: WatchController,
        category_id: u8,
        max_length: usize,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let transport = controller.transport().clone();
        for channel in [Channel::DataRequest, Channel::Convoy] {
            transport
                .subscribe(channel.uuid(), frame_forwarder(tx.clone()))
                .await?;
        }

        let handle = tokio::spawn(run_session(
            Reassembler::new(category_id, max_length),
            controller,
            rx,
        ));

        Ok(Self { tx, handle })
    }

    /// Re-arm the reassembler; the returned receiver resolves once per attempt
    pub fn restart(&self) -> Result<oneshot::Receiver<Completion>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SessionMessage::Restart(done_tx))
            .map_err(|_| SyncError::SessionClosed)?;
        Ok(done_rx)
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_session(
    mut reassembler: Reassembler,
    controller: WatchController,
    mut rx: mpsc::UnboundedReceiver<SessionMessage>,
) {
    let mut pending: Option<oneshot::Sender<Completion>> = None;

    while let Some(message) = rx.recv().await {
        let frame = match message {
            SessionMessage::Restart(done) => {
                reassembler.restart();
                pending = Some(done);
                continue;
            }
            SessionMessage::Frame(frame) => frame,
        };

        let step = reassembler.handle(&frame);

        for reply in step.replies {
            let sent = match reply {
                Reply::Continue => controller.send_continue().await,
                Reply::Abort(id) => controller.abort(id).await,
                Reply::Close(id) => controller.close_download(id).await,
            };
            if let Err(e) = sent {
                warn!("Failed to send {:?} to the watch: {}", reply, e);
            }
        }

        if let Some(completion) = step.completion {
            match pending.take() {
                Some(done) => {
                    if done.send(completion).is_err() {
                        debug!("Completion receiver dropped");
                    }
                }
                None => warn!("Transmission completed with nobody waiting for it"),
            }
        }
    }

    debug!("Download session for category 0x{:02X} stopped", reassembler.category());
}

/// What one transmission asks the watch for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Header,
    Range { address: u32, length: u32 },
}

impl Request {
    /// Bytes the watch may announce in reply
    fn length(&self) -> usize {
        match self {
            Request::Header => HEADER_LENGTH as usize,
            Request::Range { length, .. } => *length as usize,
        }
    }
}

/// Headers read from the watch and when they were read
#[derive(Debug, Clone, Serialize)]
pub struct HeaderListing {
    pub headers: Vec<HeaderRecord>,
    pub point_memory: PointMemory,
    #[serde(skip)]
    pub fetched_at: Instant,
}

impl HeaderListing {
    pub fn new(headers: Vec<HeaderRecord>, point_memory: PointMemory) -> Self {
        Self {
            headers,
            point_memory,
            fetched_at: Instant::now(),
        }
    }

    /// Whether the listing is too old to address logs reliably
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() > max_age
    }

    pub fn header(&self, ordinal: usize) -> Option<&HeaderRecord> {
        self.headers.iter().find(|h| h.ordinal == ordinal)
    }
}

/// End-to-end download operations
pub struct SyncOrchestrator {
    controller: WatchController,
    progress: ProgressReporter,
}

impl SyncOrchestrator {
    pub fn new(controller: WatchController, progress: ProgressReporter) -> Self {
        Self {
            controller,
            progress,
        }
    }

    /// Download and decode the log headers
    pub async fn download_headers(&self) -> Result<HeaderListing> {
        let decoded = self
            .transmit(category::HEADER, Request::Header, DecoderKind::Header)
            .await?;

        let Decoder::Header(decoder) = decoded else {
            return Ok(HeaderListing::new(Vec::new(), PointMemory::default()));
        };

        let headers: Vec<HeaderRecord> = (1..=MAX_HEADER_ORDINAL)
            .filter_map(|i| decoder.record(i))
            .collect();

        let point_memory = decoder.point_memory();
        info!(
            "Decoded {} headers, {} point memory entries",
            headers.len(),
            point_memory.count
        );
        if headers.is_empty() {
            self.progress.message(ZERO_HEADERS);
        }

        Ok(HeaderListing::new(headers, point_memory))
    }

    /// Download and decode the log listed under `ordinal`
    pub async fn download_log(
        &self,
        listing: &HeaderListing,
        ordinal: usize,
    ) -> Result<Vec<LogRecord>> {
        let Some(header) = listing.header(ordinal) else {
            self.progress.message(PLEASE_SELECT_LOG_HEADER);
            return Ok(Vec::new());
        };
        if listing.is_stale(self.controller.config().header_max_age) {
            self.progress.message(STALE_HEADERS);
            return Ok(Vec::new());
        }

        info!(
            "Downloading log {} ({} records of {} bytes from 0x{:08X})",
            ordinal, header.data_count, header.data_size, header.log_address
        );

        let decoded = self
            .transmit(
                category::LOG,
                Request::Range {
                    address: header.log_address,
                    length: header.log_total_length,
                },
                DecoderKind::Log {
                    record_size: header.data_size as usize,
                    record_count: header.data_count as usize,
                },
            )
            .await?;

        match decoded {
            Decoder::Log(decoder) => Ok(decoder.records()),
            Decoder::Header(_) => Ok(Vec::new()),
        }
    }

    /// Download the raw point-memory block
    pub async fn download_point_memory(&self, listing: &HeaderListing) -> Result<Vec<u8>> {
        let point_memory = listing.point_memory;
        if point_memory.count == 0 {
            info!("No point memory entries on the watch");
            return Ok(Vec::new());
        }

        let decoded = self
            .transmit(
                category::LOG,
                Request::Range {
                    address: point_memory.address,
                    length: point_memory.total_length,
                },
                DecoderKind::Log {
                    record_size: POINT_MEMORY_ENTRY_SIZE as usize,
                    record_count: point_memory.count as usize,
                },
            )
            .await?;

        Ok(decoded.raw().to_vec())
    }

    /// Run attempts until one completes without a CRC error
    async fn transmit(
        &self,
        category_id: u8,
        request: Request,
        kind: DecoderKind,
    ) -> Result<Decoder> {
        let config = self.controller.config();
        let session =
            DownloadSession::start(self.controller.clone(), category_id, request.length()).await?;
        let mut retries = 0;

        loop {
            let completion = self.attempt(&session, request).await?;

            if completion.crc_error {
                retries += 1;
                if retries > config.max_crc_retries {
                    error!("Giving up after {} CRC retries", config.max_crc_retries);
                    return Err(SyncError::RetriesExhausted(retries));
                }
                warn!(
                    "CRC error in category 0x{:02X}, retry {}/{}",
                    category_id, retries, config.max_crc_retries
                );
                continue;
            }

            if !completion.successful {
                self.progress.message(TRANSMISSION_ENDED_WITHOUT_ALL_DATA);
            }
            return Ok(kind.decode(completion.data));
        }
    }

    async fn attempt(&self, session: &DownloadSession, request: Request) -> Result<Completion> {
        let config = self.controller.config();

        self.controller.initialize().await?;
        let done = session.restart()?;

        self.progress.message(SENDING_DOWNLOAD_COMMANDS);
        self.controller.request_download().await?;

        match request {
            Request::Header => {
                self.progress.message(SENDING_HEADER_COMMANDS);
                self.controller.request_header().await?;
            }
            Request::Range { address, length } => {
                self.progress.message(SENDING_LOG_DATA_COMMANDS);
                self.controller.request_range(address, length).await?;
            }
        }

        match timeout(config.transmission_timeout, done).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(_)) => Err(SyncError::SessionClosed),
            Err(_) => Err(SyncError::Timeout {
                waiting_for: "end of transmission".to_string(),
                timeout: config.transmission_timeout,
            }),
        }
    }
}
