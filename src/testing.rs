//! Scripted transport used by the protocol tests

use crate::constants::{opcode, SECTOR_SIZE};
use crate::crc::{crc_bytes, invert_all};
use crate::transport::{NotificationCallback, WatchTransport};
use crate::types::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

type Matcher = Box<dyn Fn(Uuid, &[u8]) -> bool + Send + Sync>;

struct Rule {
    matcher: Matcher,
    responses: Vec<(Uuid, Vec<u8>)>,
    remaining: Option<usize>,
}

/// Everything the mock saw or emitted, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockEvent {
    Write { characteristic: Uuid, data: Vec<u8> },
    Descriptor { characteristic: Uuid, data: Vec<u8> },
    Notify { characteristic: Uuid, data: Vec<u8> },
}

#[derive(Default)]
struct MockState {
    callbacks: HashMap<Uuid, NotificationCallback>,
    rules: Vec<Rule>,
    events: Vec<MockEvent>,
    fail_writes: bool,
}

/// Transport that records writes and replays notifications for matching writes
#[derive(Default)]
pub(crate) struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply with `responses` every time a write matches
    pub(crate) fn on_write<F>(&self, matcher: F, responses: Vec<(Uuid, Vec<u8>)>)
    where
        F: Fn(Uuid, &[u8]) -> bool + Send + Sync + 'static,
    {
        self.push_rule(Box::new(matcher), responses, None);
    }

    /// Reply with `responses` for the first matching write only
    pub(crate) fn on_write_once<F>(&self, matcher: F, responses: Vec<(Uuid, Vec<u8>)>)
    where
        F: Fn(Uuid, &[u8]) -> bool + Send + Sync + 'static,
    {
        self.push_rule(Box::new(matcher), responses, Some(1));
    }

    fn push_rule(&self, matcher: Matcher, responses: Vec<(Uuid, Vec<u8>)>, remaining: Option<usize>) {
        self.state.lock().unwrap().rules.push(Rule {
            matcher,
            responses,
            remaining,
        });
    }

    pub(crate) fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub(crate) fn events(&self) -> Vec<MockEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub(crate) fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                MockEvent::Write {
                    characteristic: c,
                    data,
                } if c == characteristic => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Position of the first write equal to `data` on `characteristic`
    pub(crate) fn position_of_write(&self, characteristic: Uuid, data: &[u8]) -> Option<usize> {
        self.events().iter().position(|event| {
            matches!(event, MockEvent::Write { characteristic: c, data: d } if *c == characteristic && d == data)
        })
    }

    /// Position of the first notification equal to `data` on `characteristic`
    pub(crate) fn position_of_notify(&self, characteristic: Uuid, data: &[u8]) -> Option<usize> {
        self.events().iter().position(|event| {
            matches!(event, MockEvent::Notify { characteristic: c, data: d } if *c == characteristic && d == data)
        })
    }

    fn respond(&self, characteristic: Uuid, data: &[u8]) {
        let deliveries = {
            let mut state = self.state.lock().unwrap();
            let rule = state.rules.iter_mut().find(|rule| {
                rule.remaining != Some(0) && (rule.matcher)(characteristic, data)
            });
            let Some(rule) = rule else {
                return;
            };
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            let responses = rule.responses.clone();
            responses
                .into_iter()
                .map(|(uuid, payload)| {
                    state.events.push(MockEvent::Notify {
                        characteristic: uuid,
                        data: payload.clone(),
                    });
                    (state.callbacks.get(&uuid).cloned(), uuid, payload)
                })
                .collect::<Vec<_>>()
        };

        for (callback, uuid, payload) in deliveries {
            if let Some(callback) = callback {
                callback(uuid, payload);
            }
        }
    }
}

#[async_trait::async_trait]
impl WatchTransport for MockTransport {
    async fn write_characteristic(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(SyncError::BluetoothError("mock write failure".to_string()));
            }
            state.events.push(MockEvent::Write {
                characteristic,
                data: data.to_vec(),
            });
        }
        self.respond(characteristic, data);
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        _descriptor: Uuid,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SyncError::BluetoothError("mock write failure".to_string()));
        }
        state.events.push(MockEvent::Descriptor {
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .callbacks
            .insert(characteristic, callback);
        Ok(())
    }
}

/// Write the checkpoint CRC into the last two bytes of every full window
pub(crate) fn with_window_crcs(mut decoded: Vec<u8>) -> Vec<u8> {
    let full_windows = decoded.len() / SECTOR_SIZE;
    for window in 0..full_windows {
        let start = window * SECTOR_SIZE;
        let crc = crc_bytes(&decoded[start..start + SECTOR_SIZE - 2]);
        decoded[start + SECTOR_SIZE - 2] = crc[0];
        decoded[start + SECTOR_SIZE - 1] = crc[1];
    }
    decoded
}

/// Convoy data frames carrying `decoded` in chunks of `chunk` bytes
pub(crate) fn convoy_frames(decoded: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    invert_all(decoded)
        .chunks(chunk)
        .map(|part| {
            let mut frame = vec![opcode::DATA];
            frame.extend_from_slice(part);
            frame
        })
        .collect()
}

/// Control-channel announcement of a transfer of `length` bytes
pub(crate) fn announcement(category_id: u8, address: u32, length: u32) -> Vec<u8> {
    let mut frame = vec![opcode::OPEN, category_id];
    frame.extend_from_slice(&address.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame
}

/// Deterministic filler content
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
