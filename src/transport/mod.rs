//! # Printer Transport Layer
//!
//! This module moves packets between the host and the printer.
//!
//! ## Layers
//!
//! - [`link`]: the backend seam, one notify/write characteristic
//! - [`session`]: request/response discipline over a link
//! - [`ble`]: Bluetooth LE backend (feature `ble`, on by default)
//! - [`mock`]: in-process simulated printer for tests and `print --dry-run`

#[cfg(feature = "ble")]
pub mod ble;
pub mod link;
pub mod mock;
pub mod session;

#[cfg(feature = "ble")]
pub use ble::BleLink;
pub use link::{Link, LinkEvent, LinkEvents};
pub use mock::MockPrinter;
pub use session::Session;
