//! Download Reassembler
//!
//! Turns control and convoy notifications into one verified byte buffer.
//!
//! ```text
//! AwaitingAnnouncement --announce--> Receiving --all bytes--> Completed
//!                                        |
//!                                        +--bad CRC / end frame--> Completed (unsuccessful)
//! ```
//!
//! The reassembler is a plain state machine: it never performs I/O. Every call
//! to [`Reassembler::handle`] returns the replies the caller must send to the
//! watch and, once the transmission is over, its [`Completion`].
//!
//! Received bytes are bit-inverted and written into pre-sized 256-byte sectors.
//! Every 256 digested bytes form a checkpoint window whose last two bytes carry
//! the CRC of the preceding 254 bytes.

use crate::constants::{opcode, CRC_LEN, MIN_ANNOUNCEMENT_LEN, SECTOR_SIZE};
use crate::crc::{crc16_kermit, invert};
use crate::types::{hex_dump, Channel, Frame};
use log::{debug, info, warn};

/// Reply the owner of the reassembler has to write to the watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledge a continue request
    Continue,
    /// Ask the watch to abort the category after a CRC failure
    Abort(u8),
    /// Close the category after a complete transmission
    Close(u8),
}

/// How a transmission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Concatenated sector data; empty unless the transmission succeeded
    pub data: Vec<u8>,
    /// A checkpoint window failed verification
    pub crc_error: bool,
    /// All announced bytes arrived and verified
    pub successful: bool,
}

/// Result of feeding one frame
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    pub replies: Vec<Reply>,
    pub completion: Option<Completion>,
}

/// States of one transmission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblerState {
    AwaitingAnnouncement,
    Receiving,
    Completed,
}

/// Exclusive owner of the sector arena for one transmission
pub struct Reassembler {
    category: u8,
    max_length: usize,
    state: ReassemblerState,
    total_length: usize,
    sectors: Vec<[u8; SECTOR_SIZE]>,
    sector_index: usize,
    sector_offset: usize,
    received: usize,
    window: Vec<u8>,
    receiving_allowed: bool,
    crc_error: bool,
    successfully_ended: bool,
}

impl Reassembler {
    /// Create a reassembler for `category`; it accepts no frames until [`restart`](Self::restart).
    ///
    /// `max_length` is the number of bytes that were requested. Announcements
    /// larger than that are ignored.
    pub fn new(category: u8, max_length: usize) -> Self {
        Self {
            category,
            max_length,
            state: ReassemblerState::AwaitingAnnouncement,
            total_length: 0,
            sectors: Vec::new(),
            sector_index: 0,
            sector_offset: 0,
            received: 0,
            window: Vec::with_capacity(SECTOR_SIZE),
            receiving_allowed: false,
            crc_error: false,
            successfully_ended: false,
        }
    }

    /// Drop all transmission state and accept a new announcement
    pub fn restart(&mut self) {
        debug!("Reassembler for category 0x{:02X} restarting", self.category);
        self.state = ReassemblerState::AwaitingAnnouncement;
        self.total_length = 0;
        self.sectors.clear();
        self.sector_index = 0;
        self.sector_offset = 0;
        self.received = 0;
        self.window.clear();
        self.crc_error = false;
        self.successfully_ended = false;
        self.receiving_allowed = true;
    }

    pub fn category(&self) -> u8 {
        self.category
    }

    pub fn state(&self) -> ReassemblerState {
        self.state
    }

    pub fn has_crc_error(&self) -> bool {
        self.crc_error
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Number of pre-allocated sectors
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Feed one notification
    pub fn handle(&mut self, frame: &Frame) -> Step {
        if !self.receiving_allowed {
            debug!(
                "Ignoring {} frame while receiving is not allowed: {}",
                frame.channel,
                hex_dump(&frame.payload, 16)
            );
            return Step::default();
        }

        match frame.channel {
            Channel::DataRequest => self.handle_control(&frame.payload),
            Channel::Convoy => self.handle_convoy(&frame.payload),
            _ => Step::default(),
        }
    }

    fn handle_control(&mut self, payload: &[u8]) -> Step {
        let mut step = Step::default();

        match payload {
            [opcode::OPEN, category, ..]
                if *category == self.category
                    && self.state == ReassemblerState::AwaitingAnnouncement =>
            {
                if payload.len() < MIN_ANNOUNCEMENT_LEN {
                    warn!(
                        "Announcement too short ({} bytes): {}",
                        payload.len(),
                        hex_dump(payload, 16)
                    );
                    return step;
                }
                let total_length = announced_length(payload);
                if total_length > self.max_length {
                    warn!(
                        "Announced length {} exceeds the {} bytes requested: {}",
                        total_length,
                        self.max_length,
                        hex_dump(payload, 16)
                    );
                    return step;
                }
                self.begin(total_length);
                if self.total_length == 0 {
                    step.completion = Some(self.finish(true));
                }
            }
            [opcode::CONTINUE, ..] => {
                debug!("Watch asked to continue the transmission");
                step.replies.push(Reply::Continue);
            }
            [opcode::CLOSE | opcode::END_TRANSMISSION, category, ..]
                if *category == self.category && self.state != ReassemblerState::Receiving =>
            {
                debug!(
                    "Ignoring end frame outside a transmission: {}",
                    hex_dump(payload, 16)
                );
            }
            [opcode::CLOSE | opcode::END_TRANSMISSION, category, ..]
                if *category == self.category =>
            {
                info!(
                    "End of transmission for category 0x{:02X} after {}/{} bytes",
                    self.category, self.received, self.total_length
                );
                let complete = self.received == self.total_length;
                step.completion = Some(self.finish(complete));
                if complete {
                    step.replies.push(Reply::Close(self.category));
                }
            }
            _ => {
                debug!("Unhandled control frame: {}", hex_dump(payload, 16));
            }
        }

        step
    }

    fn begin(&mut self, total_length: usize) {
        let sector_count = total_length.div_ceil(SECTOR_SIZE) + 1;
        info!(
            "Transmission of category 0x{:02X} announced: {} bytes in {} sectors",
            self.category, total_length, sector_count
        );
        self.total_length = total_length;
        self.sectors = vec![[0u8; SECTOR_SIZE]; sector_count];
        self.state = ReassemblerState::Receiving;
    }

    fn handle_convoy(&mut self, payload: &[u8]) -> Step {
        let mut step = Step::default();

        if self.state != ReassemblerState::Receiving {
            return step;
        }
        let Some((&opcode::DATA, data)) = payload.split_first() else {
            debug!("Non-data convoy frame: {}", hex_dump(payload, 16));
            return step;
        };

        for (index, &raw) in data.iter().enumerate() {
            if self.received == self.total_length {
                warn!(
                    "Dropping {} bytes beyond the announced length",
                    data.len() - index
                );
                break;
            }

            let byte = invert(raw);
            self.place(byte);
            self.window.push(byte);

            if self.window.len() == SECTOR_SIZE && !self.checkpoint() {
                self.crc_error = true;
                step.replies.push(Reply::Abort(self.category));
                step.completion = Some(self.finish(false));
                return step;
            }
        }

        if self.received == self.total_length {
            step.completion = Some(self.finish(true));
            step.replies.push(Reply::Close(self.category));
        }

        step
    }

    fn place(&mut self, byte: u8) {
        if self.sector_offset == SECTOR_SIZE {
            self.sector_index += 1;
            self.sector_offset = 0;
        }
        self.sectors[self.sector_index][self.sector_offset] = byte;
        self.sector_offset += 1;
        self.received += 1;
    }

    /// Verify the full window and clear it; false on mismatch
    fn checkpoint(&mut self) -> bool {
        let (body, crc) = self.window.split_at(SECTOR_SIZE - CRC_LEN);
        let received = u16::from_be_bytes([crc[0], crc[1]]);
        let computed = crc16_kermit(body);

        if received != computed {
            warn!(
                "CRC mismatch at byte {}: received 0x{:04X}, computed 0x{:04X}",
                self.received, received, computed
            );
            return false;
        }

        debug!("CRC checkpoint at byte {} verified", self.received);
        self.window.clear();
        true
    }

    fn finish(&mut self, successful: bool) -> Completion {
        self.receiving_allowed = false;
        self.state = ReassemblerState::Completed;
        self.successfully_ended = successful;

        let data = if successful {
            let mut data: Vec<u8> = self.sectors.iter().flatten().copied().collect();
            data.truncate(self.received);
            data
        } else {
            Vec::new()
        };

        Completion {
            data,
            crc_error: self.crc_error,
            successful,
        }
    }
}

/// Total length carried at bytes 6..=9, the top byte optional
fn announced_length(payload: &[u8]) -> usize {
    let top = payload.get(9).copied().unwrap_or(0);
    u32::from_le_bytes([payload[6], payload[7], payload[8], top]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{category, HEADER_LENGTH};
    use crate::testing::{announcement, convoy_frames, pattern, with_window_crcs};

    fn started(len: usize) -> Reassembler {
        let mut reassembler = Reassembler::new(category::HEADER, HEADER_LENGTH as usize);
        reassembler.restart();
        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::HEADER, 0x1000, len as u32),
        ));
        assert!(step.completion.is_none());
        reassembler
    }

    fn feed(reassembler: &mut Reassembler, frames: Vec<Vec<u8>>) -> Option<Completion> {
        let mut completion = None;
        for frame in frames {
            let step = reassembler.handle(&Frame::new(Channel::Convoy, frame));
            if step.completion.is_some() {
                assert!(completion.is_none(), "completed twice");
                completion = step.completion;
            }
        }
        completion
    }

    #[test]
    fn test_frames_ignored_before_restart() {
        let mut reassembler = Reassembler::new(category::HEADER, HEADER_LENGTH as usize);
        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::HEADER, 0, 16),
        ));
        assert_eq!(step, Step::default());
        assert_eq!(reassembler.state(), ReassemblerState::AwaitingAnnouncement);
    }

    #[test]
    fn test_announcement_presizes_sectors() {
        let reassembler = started(1000);
        assert_eq!(reassembler.state(), ReassemblerState::Receiving);
        assert_eq!(reassembler.total_length(), 1000);
        assert_eq!(reassembler.sector_count(), 5);
    }

    #[test]
    fn test_nine_byte_announcement() {
        let mut reassembler = Reassembler::new(category::LOG, 4096);
        reassembler.restart();
        let mut frame = announcement(category::LOG, 0, 300);
        frame.truncate(9);
        reassembler.handle(&Frame::new(Channel::DataRequest, frame));
        assert_eq!(reassembler.total_length(), 300);
    }

    #[test]
    fn test_short_or_foreign_announcement_ignored() {
        let mut reassembler = Reassembler::new(category::HEADER, HEADER_LENGTH as usize);
        reassembler.restart();

        reassembler.handle(&Frame::new(
            Channel::DataRequest,
            vec![0x00, category::HEADER, 0x00, 0x10],
        ));
        assert_eq!(reassembler.state(), ReassemblerState::AwaitingAnnouncement);

        reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::LOG, 0, 64),
        ));
        assert_eq!(reassembler.state(), ReassemblerState::AwaitingAnnouncement);
    }

    #[test]
    fn test_reassembly_independent_of_chunking() {
        let content = with_window_crcs(pattern(700, 3));

        let mut small = started(content.len());
        let one_byte = feed(&mut small, convoy_frames(&content, 1)).unwrap();

        let mut large = started(content.len());
        let full_chunks = feed(&mut large, convoy_frames(&content, 107)).unwrap();

        assert!(one_byte.successful);
        assert!(!one_byte.crc_error);
        assert_eq!(one_byte.data, content);
        assert_eq!(full_chunks.data, content);
    }

    #[test]
    fn test_completion_closes_category() {
        let content = pattern(40, 9);
        let mut reassembler = started(content.len());
        let mut frames = convoy_frames(&content, 20);
        let last = frames.pop().unwrap();
        feed(&mut reassembler, frames);

        let step = reassembler.handle(&Frame::new(Channel::Convoy, last));
        assert_eq!(step.replies, vec![Reply::Close(category::HEADER)]);
        assert_eq!(step.completion.unwrap().data, content);
        assert_eq!(reassembler.state(), ReassemblerState::Completed);
    }

    #[test]
    fn test_corrupted_window_aborts() {
        let mut content = with_window_crcs(pattern(512, 1));
        content[300] ^= 0x01;

        let mut reassembler = started(content.len());
        let mut replies = Vec::new();
        let mut completion = None;
        for frame in convoy_frames(&content, 107) {
            let step = reassembler.handle(&Frame::new(Channel::Convoy, frame));
            replies.extend(step.replies);
            if step.completion.is_some() {
                completion = step.completion;
            }
        }

        let completion = completion.unwrap();
        assert!(completion.crc_error);
        assert!(!completion.successful);
        assert!(completion.data.is_empty());
        assert_eq!(replies, vec![Reply::Abort(category::HEADER)]);
        assert!(reassembler.has_crc_error());
    }

    #[test]
    fn test_frames_after_completion_are_ignored() {
        let content = pattern(10, 0);
        let mut reassembler = started(content.len());
        feed(&mut reassembler, convoy_frames(&content, 10)).unwrap();

        let step = reassembler.handle(&Frame::new(Channel::Convoy, vec![0x05, 0x00]));
        assert_eq!(step, Step::default());
    }

    #[test]
    fn test_restart_clears_crc_error() {
        let mut content = with_window_crcs(pattern(256, 4));
        content[0] ^= 0xFF;
        let mut reassembler = started(content.len());
        assert!(feed(&mut reassembler, convoy_frames(&content, 64))
            .unwrap()
            .crc_error);

        reassembler.restart();
        assert!(!reassembler.has_crc_error());
        assert_eq!(reassembler.received(), 0);
        assert_eq!(reassembler.sector_count(), 0);
    }

    #[test]
    fn test_excess_bytes_never_written() {
        let content = pattern(10, 2);
        let mut reassembler = started(8);
        let completion = feed(&mut reassembler, convoy_frames(&content, 10)).unwrap();
        assert_eq!(completion.data, content[..8].to_vec());
        assert_eq!(reassembler.received(), 8);
    }

    #[test]
    fn test_continue_request_acknowledged() {
        let mut reassembler = started(100);
        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            vec![0x07, 0x0F, 0, 0, 0, 0, 0],
        ));
        assert_eq!(step.replies, vec![Reply::Continue]);
        assert!(step.completion.is_none());
    }

    #[test]
    fn test_early_end_frame_delivers_empty_buffer() {
        let content = pattern(100, 5);
        let mut reassembler = started(200);
        feed(&mut reassembler, convoy_frames(&content, 50));

        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            vec![0x09, category::HEADER, 0, 0, 0, 0, 0],
        ));
        let completion = step.completion.unwrap();
        assert!(!completion.successful);
        assert!(!completion.crc_error);
        assert!(completion.data.is_empty());
        assert!(step.replies.is_empty());
    }

    #[test]
    fn test_zero_length_announcement_completes() {
        let mut reassembler = Reassembler::new(category::LOG, 4096);
        reassembler.restart();
        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::LOG, 0, 0),
        ));
        let completion = step.completion.unwrap();
        assert!(completion.successful);
        assert!(completion.data.is_empty());
    }

    #[test]
    fn test_oversized_announcement_ignored() {
        let mut reassembler = Reassembler::new(category::HEADER, HEADER_LENGTH as usize);
        reassembler.restart();

        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            vec![0x00, 0x0F, 0x00, 0x10, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
        ));
        assert_eq!(step, Step::default());
        assert_eq!(reassembler.state(), ReassemblerState::AwaitingAnnouncement);
        assert_eq!(reassembler.sector_count(), 0);

        // The requested length itself is still accepted
        reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::HEADER, 0x1000, HEADER_LENGTH),
        ));
        assert_eq!(reassembler.state(), ReassemblerState::Receiving);
        assert_eq!(reassembler.total_length(), HEADER_LENGTH as usize);
    }

    #[test]
    fn test_late_end_frame_after_restart_ignored() {
        let mut content = with_window_crcs(pattern(256, 6));
        content[10] ^= 0x01;
        let mut reassembler = started(content.len());
        assert!(feed(&mut reassembler, convoy_frames(&content, 107))
            .unwrap()
            .crc_error);

        reassembler.restart();
        let step = reassembler.handle(&Frame::new(
            Channel::DataRequest,
            vec![0x03, category::HEADER, 0, 0, 0, 0, 0, 0, 0, 0],
        ));
        assert_eq!(step, Step::default());
        assert_eq!(reassembler.state(), ReassemblerState::AwaitingAnnouncement);

        let clean = with_window_crcs(pattern(300, 6));
        reassembler.handle(&Frame::new(
            Channel::DataRequest,
            announcement(category::HEADER, 0x1000, clean.len() as u32),
        ));
        let completion = feed(&mut reassembler, convoy_frames(&clean, 107)).unwrap();
        assert!(completion.successful);
        assert!(!completion.crc_error);
        assert_eq!(completion.data, clean);
    }
}
