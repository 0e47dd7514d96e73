//! Timing, retry and discovery settings for a sync session

use crate::constants::DEVICE_NAME_PREFIX;
use std::fmt;
use std::time::Duration;

/// Configuration shared by the download and upload sides
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pause after every command write so the watch can process it
    pub command_delay: Duration,

    /// Longest wait for one expected notification during an upload
    pub notification_timeout: Duration,

    /// Longest wait for one download attempt to complete
    pub transmission_timeout: Duration,

    /// Number of CRC-triggered retries before a download gives up
    pub max_crc_retries: u32,

    /// Header listings older than this are refreshed before a log download
    pub header_max_age: Duration,

    /// Advertised name prefix used to recognise the watch while scanning
    pub device_name_prefix: String,

    /// How long discovery may run before giving up
    pub scan_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_millis(20),
            notification_timeout: Duration::from_secs(30),
            transmission_timeout: Duration::from_secs(120),
            max_crc_retries: 5,
            header_max_age: Duration::from_secs(30 * 60), // 30 minutes
            device_name_prefix: DEVICE_NAME_PREFIX.to_string(),
            scan_timeout: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Configuration with no pacing delay and short waits, for scripted transports
    pub fn immediate() -> Self {
        Self {
            command_delay: Duration::ZERO,
            notification_timeout: Duration::from_secs(1),
            transmission_timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

impl fmt::Display for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delay={:?} notification_timeout={:?} transmission_timeout={:?} max_crc_retries={}",
            self.command_delay,
            self.notification_timeout,
            self.transmission_timeout,
            self.max_crc_retries
        )
    }
}
