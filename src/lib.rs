//! # Niimbot - Thermal Label Printer Library
//!
//! Niimbot is a Rust library for printing on Niimbot label printers (D11 and
//! relatives) over Bluetooth LE. It provides:
//!
//! - **Protocol implementation**: packet framing and the command set
//! - **Transport**: a one-request-at-a-time session over a BLE characteristic
//! - **Print jobs**: the page sequence, with progress events
//! - **Dithering**: grayscale, threshold, Bayer 4x4, Floyd-Steinberg and
//!   Atkinson, plus rotation into the printer's feed direction
//!
//! ## Quick Start
//!
//! Against the in-process simulated printer; with the `ble` feature,
//! `PrinterClient::connect(&config.device_prefix, config.session.clone())`
//! finds a real one instead.
//!
//! ```no_run
//! use niimbot::{
//!     printer::{Config, PrintJob, PrinterClient},
//!     render::{self, dither::DitheringAlgorithm},
//!     transport::mock::MockPrinter,
//! };
//!
//! # async fn demo() -> niimbot::Result<()> {
//! let config = Config::default();
//!
//! // Dither and rotate the label artwork
//! let image = render::load_image("label.png".as_ref())?;
//! let lines = render::prepare(&image, DitheringAlgorithm::Atkinson, 128)?;
//!
//! // density 3, label type 1, one copy
//! let job = PrintJob::new(lines, 3, 1, 1)?;
//!
//! let (_printer, link, link_events) = MockPrinter::new();
//! let client = PrinterClient::from_link(link, link_events, config.session.clone());
//! client.start_heartbeat();
//!
//! let mut events = PrintJob::spawn(client.clone(), job, config.job.clone());
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet codec and command set |
//! | [`transport`] | Link backends and the request/response session |
//! | [`printer`] | Typed client, print jobs, configuration |
//! | [`render`] | Dithering and bit matrix extraction |
//! | [`error`] | Error types |
//!
//! ## Supported Printers
//!
//! Currently tested with:
//! - Niimbot D11 (12mm printhead, 203 DPI, BLE)
//!
//! Other models speaking the same protocol should work with a different
//! name prefix and label size.

pub mod error;
pub mod printer;
pub mod protocol;
pub mod render;
pub mod transport;

// Re-exports for convenience
pub use error::{NiimbotError, Result};
pub use printer::{PrintJob, PrinterClient};
pub use transport::Session;
