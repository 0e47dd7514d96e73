//! Progress reporting
//!
//! Long-running operations report human-readable status through a
//! [`ProgressListener`]. Upload phases also carry a percentage.

use log::info;
use std::sync::Arc;

pub const FOUND_CASIO_DEVICE: &str = "Found Casio device. Trying to connect ...";
pub const SUCCESSFULLY_CONNECTED: &str = "Successfully connected to the watch. The watch commands are being sent to the watch. Please wait ...";
pub const FAILED_TO_CONNECT: &str = "Failed to connect to watch";
pub const SCANNING_ABORTED: &str = "Bluetooth: GPR-B1000 device scanning successfully aborted.";
pub const PLEASE_CONNECT_WATCH: &str = "Looking for Casio GPR-B1000 device. Please connect your watch by pressing and holding the bottom left button on it.";
pub const ZERO_HEADERS: &str = "Headers downloading resulted 0 headers. Please make sure you have recorded routes on the watch. If yes, then please try again because the transmission has been terminated by the watch.";
pub const COMMAND_SENDING_ERROR: &str = "An error occured during sending watch commands. Please try to connect again";
pub const PLEASE_SELECT_LOG_HEADER: &str = "Please select a log header from the list or start downloading the list by using the download headers button if you haven't done it yet.";
pub const STALE_HEADERS: &str = "The header data is more than 30 minutes old. Please download the headers again by pressing the Download headers button.";
pub const SENDING_DOWNLOAD_COMMANDS: &str = "Sending download commands to watch.";
pub const SENDING_HEADER_COMMANDS: &str = "Sending download log header commands to watch.";
pub const SENDING_LOG_DATA_COMMANDS: &str = "Sending download log data commands to watch.";
pub const TRANSMISSION_ENDED_WITHOUT_ALL_DATA: &str = "The data downloading from the watch has been ended without receiving all of the data including the end transmission command. Please try again by pressing the download as GPX button again.";

/// One status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Completion percentage, only reported by the upload side
    pub percent: Option<u8>,
    pub message: String,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            percent: None,
            message: message.into(),
        }
    }

    pub fn with_percent(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: Some(percent.min(100)),
            message: message.into(),
        }
    }
}

/// Receiver of progress events
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Optional listener plus log output for every event
#[derive(Clone, Default)]
pub struct ProgressReporter {
    listener: Option<Arc<dyn ProgressListener>>,
}

impl ProgressReporter {
    pub fn new(listener: Arc<dyn ProgressListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    /// Reporter that only logs
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, event: ProgressEvent) {
        match event.percent {
            Some(percent) => info!("[{:>3}%] {}", percent, event.message),
            None => info!("{}", event.message),
        }
        if let Some(listener) = &self.listener {
            listener.on_progress(&event);
        }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.report(ProgressEvent::message(message));
    }
}
