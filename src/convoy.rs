//! Buffered Convoy Sender
//!
//! Streams an upload payload over the convoy channel. Every payload byte is
//! inverted, frames carry at most [`MAX_CONVOY_PAYLOAD`] bytes after the 0x05
//! type byte, and a frame never spans a 256-byte boundary of the input. The
//! frame that reaches a boundary carries the CRC of the 256 inverted bytes of
//! that window right after its data.

use crate::constants::{opcode, MAX_CONVOY_PAYLOAD, SECTOR_SIZE};
use crate::crc::{crc_bytes, invert};
use crate::transport::WatchTransport;
use crate::types::{hex_dump, Channel, Result};
use log::debug;
use std::sync::Arc;

/// Split `data` into convoy frames ready to be written
pub fn build_convoy_frames(data: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut window = Vec::with_capacity(SECTOR_SIZE);
    let mut i = 0;

    while i < data.len() {
        let mut frame = Vec::with_capacity(MAX_CONVOY_PAYLOAD + 3);
        frame.push(opcode::DATA);

        let mut count = 0;
        while i < data.len() && count < MAX_CONVOY_PAYLOAD {
            let byte = invert(data[i]);
            frame.push(byte);
            window.push(byte);
            i += 1;
            count += 1;
            if i % SECTOR_SIZE == 0 {
                break;
            }
        }

        if i % SECTOR_SIZE == 0 {
            let crc = crc_bytes(&window);
            debug!("Window ending at byte {} carries CRC {:02X}{:02X}", i, crc[0], crc[1]);
            frame.extend_from_slice(&crc);
            window.clear();
        }

        frames.push(frame);
    }

    frames
}

/// Writes a payload to the convoy channel frame by frame
pub struct BufferedConvoySender {
    transport: Arc<dyn WatchTransport>,
}

impl BufferedConvoySender {
    pub fn new(transport: Arc<dyn WatchTransport>) -> Self {
        Self { transport }
    }

    /// Send the whole payload, returning the number of frames written
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        let frames = build_convoy_frames(data);
        debug!(
            "Sending {} bytes in {} convoy frames",
            data.len(),
            frames.len()
        );

        for frame in &frames {
            debug!("Convoy frame: {}", hex_dump(frame, 16));
            self.transport
                .write_characteristic(Channel::Convoy.uuid(), frame)
                .await?;
        }

        Ok(frames.len())
    }
}
