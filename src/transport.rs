//! Transport port
//!
//! The protocol engine never talks to a BLE stack directly. A connected
//! transport only has to write characteristics and descriptors and deliver
//! notifications; everything else is built on top of these three primitives.

use crate::types::{hex_dump, Channel, Frame, Result};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Callback invoked once per notification with (characteristic, payload)
pub type NotificationCallback = Arc<dyn Fn(Uuid, Vec<u8>) + Send + Sync>;

/// Operations a connected watch transport must provide
#[async_trait::async_trait]
pub trait WatchTransport: Send + Sync {
    /// Write a value to a characteristic
    async fn write_characteristic(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Write a value to a descriptor of a characteristic
    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        data: &[u8],
    ) -> Result<()>;

    /// Deliver notifications of `characteristic` to `callback`
    ///
    /// A later subscription on the same characteristic replaces the earlier one.
    async fn subscribe(&self, characteristic: Uuid, callback: NotificationCallback) -> Result<()>;
}

/// Build a callback that turns notifications into [`Frame`]s on `tx`
///
/// Notifications from characteristics outside the protocol catalogue are
/// dropped. Delivery order per characteristic is preserved because the
/// channel is FIFO.
pub fn frame_forwarder<M>(tx: mpsc::UnboundedSender<M>) -> NotificationCallback
where
    M: From<Frame> + Send + 'static,
{
    Arc::new(move |uuid, payload| {
        let Some(channel) = Channel::from_uuid(uuid) else {
            warn!("Notification from unknown characteristic {}", uuid);
            return;
        };
        debug!("Notification on {}: {}", channel, hex_dump(&payload, 32));
        if tx.send(M::from(Frame::new(channel, payload))).is_err() {
            debug!("Frame receiver dropped, discarding notification on {}", channel);
        }
    })
}

/// Callback that only logs what it receives
pub fn logging_callback(name: &'static str) -> NotificationCallback {
    Arc::new(move |uuid, payload| {
        debug!("{} notification from {}: {}", name, uuid, hex_dump(&payload, 32));
    })
}
