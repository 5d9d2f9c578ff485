//! # Printer Module
//!
//! This module talks to a label printer in terms of what it does rather than
//! how bytes move.
//!
//! ## Modules
//!
//! - [`config`]: Printer hardware specifications and runtime tuning
//! - [`client`]: Typed command set and background heartbeat
//! - [`job`]: Print job orchestration

pub mod client;
pub mod config;
pub mod job;

pub use client::{DeviceInfo, PrinterClient};
pub use config::{Config, HeartbeatPolicy, JobConfig, PrinterModel, SessionConfig};
pub use job::{EventSink, JobState, PrintEvent, PrintEvents, PrintJob};
