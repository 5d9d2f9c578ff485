//! The physical link: one characteristic that is both written to and
//! notifies.
//!
//! A backend hands the session two things at open time: an implementation of
//! [`Link`] for outbound operations, and a channel of [`LinkEvent`]s carrying
//! everything that arrives asynchronously.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Outbound half of a printer connection.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Subscribe to the notify characteristic.
    async fn start_notifications(&self) -> Result<()>;

    /// Unsubscribe from the notify characteristic.
    async fn stop_notifications(&self) -> Result<()>;

    /// Write without waiting for a link-level acknowledgement.
    async fn write_without_response(&self, data: &[u8]) -> Result<()>;

    /// Tear down the physical connection.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the backend still holds a live connection. Consulted after a
    /// failed write or subscribe, which can beat the `Disconnected` event.
    async fn is_connected(&self) -> bool;
}

/// Inbound event from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Value notified on the characteristic
    Notification(Vec<u8>),
    /// The device went away
    Disconnected,
}

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

/// Create the event channel a backend feeds.
pub fn event_channel() -> (LinkEventSender, LinkEvents) {
    mpsc::unbounded_channel()
}
