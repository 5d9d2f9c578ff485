//! In-process stand-in for a label printer.
//!
//! [`MockPrinter`] implements [`Link`] and simulates just enough of the
//! device to run whole print jobs without hardware: setters acknowledge,
//! `END_PAGE_PRINT` can refuse a few times before accepting, and the page
//! counter reported by `GET_PRINT_STATUS` advances as it is polled.
//!
//! Like the real device, it only delivers a response while notifications are
//! subscribed.
//!
//! Individual command codes can be scripted with [`Reply`] to stay silent,
//! send corrupt bytes, or wait for the test to answer by hand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{NiimbotError, Result};
use crate::protocol::commands::RequestCode;
use crate::protocol::packet::{self, Packet};
use crate::transport::link::{self, Link, LinkEvent, LinkEventSender, LinkEvents};

/// How the mock answers one command code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Behave like the simulated device
    Auto,
    /// Never answer
    Silent,
    /// Record the write; the test answers with [`MockPrinter::notify`]
    Manual,
    /// Answer with this payload
    Payload(Vec<u8>),
    /// Notify these exact bytes, framed or not
    Raw(Vec<u8>),
}

#[derive(Debug, Default)]
struct Device {
    quantity: u16,
    end_page_refusals: u32,
    page_ended: bool,
    status_polls: u32,
    status_polls_per_page: u32,
    disconnect_after_lines: Option<usize>,
}

#[derive(Default)]
struct MockState {
    notifying: bool,
    alive: bool,
    writes: Vec<Vec<u8>>,
    start_calls: usize,
    stop_calls: usize,
    disconnect_calls: usize,
    script: HashMap<u8, Reply>,
    device: Device,
}

struct Shared {
    state: Mutex<MockState>,
    events: LinkEventSender,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Test handle onto a simulated printer. Cheap to clone.
#[derive(Clone)]
pub struct MockPrinter {
    shared: Arc<Shared>,
}

struct MockLink {
    shared: Arc<Shared>,
}

impl MockPrinter {
    /// Create a connected mock: the handle, the link to give a session, and
    /// the link's event channel.
    pub fn new() -> (Self, Arc<dyn Link>, LinkEvents) {
        let (events, rx) = link::event_channel();
        let state = MockState {
            alive: true,
            device: Device {
                quantity: 1,
                status_polls_per_page: 1,
                ..Device::default()
            },
            ..MockState::default()
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            events,
        });
        let link: Arc<dyn Link> = Arc::new(MockLink {
            shared: shared.clone(),
        });
        (Self { shared }, link, rx)
    }

    /// Override the answer to one command code.
    pub fn script(&self, code: u8, reply: Reply) {
        self.shared.state().script.insert(code, reply);
    }

    /// Refuse `END_PAGE_PRINT` this many times before accepting.
    pub fn set_end_page_refusals(&self, n: u32) {
        self.shared.state().device.end_page_refusals = n;
    }

    /// Status polls needed per printed page.
    pub fn set_status_polls_per_page(&self, n: u32) {
        self.shared.state().device.status_polls_per_page = n.max(1);
    }

    /// Drop the link right after the n-th raster line is written.
    pub fn disconnect_after_lines(&self, n: usize) {
        self.shared.state().device.disconnect_after_lines = Some(n);
    }

    /// Push a response notification, as the device would.
    pub fn notify(&self, kind: u8, payload: &[u8]) {
        let bytes = packet::encode(kind, payload);
        deliver(&self.shared, &mut self.shared.state(), bytes);
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self) {
        let mut state = self.shared.state();
        state.alive = false;
        state.notifying = false;
        let _ = self.shared.events.send(LinkEvent::Disconnected);
    }

    /// Kill the link without telling the event channel, as a radio does when
    /// writes start failing before the adapter reports the disconnect.
    pub fn sever(&self) {
        let mut state = self.shared.state();
        state.alive = false;
        state.notifying = false;
    }

    pub fn start_notification_calls(&self) -> usize {
        self.shared.state().start_calls
    }

    pub fn stop_notification_calls(&self) -> usize {
        self.shared.state().stop_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.shared.state().disconnect_calls
    }

    /// Every decodable packet written, in order.
    pub fn packets(&self) -> Vec<Packet> {
        self.shared
            .state()
            .writes
            .iter()
            .filter_map(|w| Packet::decode(w).ok())
            .collect()
    }

    /// Request-response commands written, in order (raster lines excluded).
    pub fn commands(&self) -> Vec<Packet> {
        self.packets()
            .into_iter()
            .filter(|p| p.kind != RequestCode::PrintLine.code())
            .collect()
    }

    /// Codes of [`commands`](Self::commands).
    pub fn command_codes(&self) -> Vec<u8> {
        self.commands().iter().map(|p| p.kind).collect()
    }

    /// Raster line packets written, in order.
    pub fn line_packets(&self) -> Vec<Packet> {
        self.packets()
            .into_iter()
            .filter(|p| p.kind == RequestCode::PrintLine.code())
            .collect()
    }
}

fn deliver(shared: &Shared, state: &mut MockState, bytes: Vec<u8>) {
    if state.notifying {
        let _ = shared.events.send(LinkEvent::Notification(bytes));
    } else {
        log::debug!("mock: not subscribed, dropping {:02x?}", bytes);
    }
}

fn ack() -> Vec<u8> {
    vec![1]
}

impl Device {
    fn respond(&mut self, request: &Packet) -> Option<Vec<u8>> {
        let code = RequestCode::try_from(request.kind).ok();
        let payload = match code? {
            RequestCode::PrintLine => return None,
            RequestCode::GetInfo => vec![request.payload.first().copied().unwrap_or(0), 1],
            RequestCode::GetRfid => vec![0; 8],
            RequestCode::Heartbeat => {
                let mut hb = vec![0u8; 13];
                hb[9] = 0;
                hb[10] = 4;
                hb[11] = 0;
                hb[12] = 1;
                hb
            }
            RequestCode::SetQuantity => {
                if let [hi, lo, ..] = request.payload[..] {
                    self.quantity = u16::from_be_bytes([hi, lo]);
                }
                ack()
            }
            RequestCode::StartPagePrint => {
                self.page_ended = false;
                self.status_polls = 0;
                ack()
            }
            RequestCode::EndPagePrint => {
                if self.end_page_refusals > 0 {
                    self.end_page_refusals -= 1;
                    vec![0]
                } else {
                    self.page_ended = true;
                    ack()
                }
            }
            RequestCode::GetPrintStatus => {
                if self.page_ended {
                    self.status_polls += 1;
                }
                let printed = (self.status_polls / self.status_polls_per_page) as u16;
                let page = printed.min(self.quantity);
                let progress = (page as u32 * 100 / self.quantity.max(1) as u32) as u8;
                let mut status = page.to_be_bytes().to_vec();
                status.extend([progress, 100]);
                status
            }
            RequestCode::SetLabelType
            | RequestCode::SetLabelDensity
            | RequestCode::StartPrint
            | RequestCode::EndPrint
            | RequestCode::AllowPrintClear
            | RequestCode::SetDimension => ack(),
        };
        Some(payload)
    }
}

#[async_trait]
impl Link for MockLink {
    async fn start_notifications(&self) -> Result<()> {
        let mut state = self.shared.state();
        if !state.alive {
            return Err(NiimbotError::Transport("mock link is down".to_string()));
        }
        state.start_calls += 1;
        state.notifying = true;
        Ok(())
    }

    async fn stop_notifications(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.stop_calls += 1;
        state.notifying = false;
        Ok(())
    }

    async fn write_without_response(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.shared.state();
        let state = &mut *guard;
        if !state.alive {
            return Err(NiimbotError::Transport("mock link is down".to_string()));
        }
        state.writes.push(data.to_vec());

        let Ok(request) = Packet::decode(data) else {
            return Ok(());
        };

        if request.kind == RequestCode::PrintLine.code() {
            let lines = state
                .writes
                .iter()
                .filter(|w| w.get(2) == Some(&RequestCode::PrintLine.code()))
                .count();
            if state.device.disconnect_after_lines == Some(lines) {
                state.alive = false;
                state.notifying = false;
                let _ = self.shared.events.send(LinkEvent::Disconnected);
            }
            return Ok(());
        }

        let reply = state.script.get(&request.kind).cloned().unwrap_or(Reply::Auto);
        let bytes = match reply {
            Reply::Silent | Reply::Manual => None,
            Reply::Raw(bytes) => Some(bytes),
            Reply::Payload(payload) => Some(packet::encode(request.kind, &payload)),
            Reply::Auto => state
                .device
                .respond(&request)
                .map(|payload| packet::encode(request.kind, &payload)),
        };
        if let Some(bytes) = bytes {
            deliver(&self.shared, state, bytes);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.shared.state();
        state.disconnect_calls += 1;
        state.alive = false;
        state.notifying = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.shared.state().alive
    }
}

// ============================================================================
// TESTS
// ============================================================================
