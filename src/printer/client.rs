//! # Printer Client
//!
//! Typed command set over a [`Session`], plus the background heartbeat.
//!
//! Each command is a thin wrapper: build the payload from
//! [`crate::protocol::commands`], send it, parse the response. Arguments with
//! a valid range are checked before anything touches the link.
//!
//! ## Command Lock
//!
//! The session holds one pending request at a time and rejects a second with
//! `SessionBusy`. The client owns an async lock that every request-response
//! command takes first, so the heartbeat task and foreground callers queue up
//! instead of colliding. Raster line writes don't expect a response and
//! bypass the lock.
//!
//! ## Example
//!
//! ```no_run
//! use niimbot::printer::{Config, PrinterClient};
//! use niimbot::transport::mock::MockPrinter;
//!
//! # async fn demo() -> niimbot::error::Result<()> {
//! let (_printer, link, events) = MockPrinter::new();
//! let client = PrinterClient::from_link(link, events, Config::default().session);
//! client.start_heartbeat();
//! let battery = client.get_info(niimbot::protocol::InfoKey::Battery).await?;
//! println!("battery: {:?}", battery);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{NiimbotError, Result};
use crate::printer::config::{HeartbeatPolicy, SessionConfig};
use crate::protocol::commands::{
    self, HeartbeatStatus, InfoKey, PrintStatus, RequestCode, DENSITY_RANGE, LABEL_TYPE_RANGE,
    UNIT_PAYLOAD,
};
use crate::transport::link::{Link, LinkEvents};
use crate::transport::session::Session;

struct Inner {
    session: Arc<Session>,
    command_lock: tokio::sync::Mutex<()>,
    config: SessionConfig,
    job_active: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    last_heartbeat: watch::Sender<Option<HeartbeatStatus>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
    }
}

/// Handle onto one connected printer. Clones share the connection.
#[derive(Clone)]
pub struct PrinterClient {
    inner: Arc<Inner>,
}

/// Every `GET_INFO` value the printer answered, keyed by [`InfoKey::name`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceInfo {
    pub values: BTreeMap<&'static str, Vec<u8>>,
}

impl DeviceInfo {
    pub fn get(&self, key: InfoKey) -> Option<&[u8]> {
        self.values.get(key.name()).map(Vec::as_slice)
    }
}

impl PrinterClient {
    /// Open a session over an already connected link.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_link(link: Arc<dyn Link>, events: LinkEvents, config: SessionConfig) -> Self {
        let session = Session::open(link, events, config.command_timeout);
        let (last_heartbeat, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                session,
                command_lock: tokio::sync::Mutex::new(()),
                config,
                job_active: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
                last_heartbeat,
            }),
        }
    }

    /// Scan for a printer advertising `name_prefix` and connect to it.
    #[cfg(feature = "ble")]
    pub async fn connect(name_prefix: &str, config: SessionConfig) -> Result<Self> {
        use crate::transport::ble::{BleLink, DEFAULT_SCAN_TIMEOUT};

        let (link, events) = BleLink::connect(name_prefix, DEFAULT_SCAN_TIMEOUT).await?;
        Ok(Self::from_link(Arc::new(link), events, config))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.is_open()
    }

    /// Stop the heartbeat and close the connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.stop_heartbeat();
        self.inner.session.close().await
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn request(&self, code: RequestCode, payload: &[u8]) -> Result<Vec<u8>> {
        let _turn = self.inner.command_lock.lock().await;
        let packet = self.inner.session.send(code.code(), payload).await?;
        Ok(packet.payload)
    }

    async fn request_ack(&self, code: RequestCode, payload: &[u8]) -> Result<bool> {
        let accepted = commands::parse_ack(&self.request(code, payload).await?);
        log::debug!("{} -> {}", code, accepted);
        Ok(accepted)
    }

    /// Raw value of one device property.
    pub async fn get_info(&self, key: InfoKey) -> Result<Vec<u8>> {
        self.request(RequestCode::GetInfo, &[key.code()]).await
    }

    /// Raw RFID tag data of the loaded label roll.
    pub async fn get_rfid(&self) -> Result<Vec<u8>> {
        self.request(RequestCode::GetRfid, &UNIT_PAYLOAD).await
    }

    /// Query every [`InfoKey`]. Keys the printer fails to answer are logged
    /// and left out.
    ///
    /// A lost or closed connection still aborts the whole query.
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let mut info = DeviceInfo::default();
        for key in InfoKey::ALL {
            match self.get_info(key).await {
                Ok(value) => {
                    info.values.insert(key.name(), value);
                }
                Err(e @ (NiimbotError::ConnectionLost | NiimbotError::NotConnected)) => {
                    return Err(e);
                }
                Err(e) => log::warn!("info {} unavailable: {}", key.name(), e),
            }
        }
        Ok(info)
    }

    /// Label type 1-3.
    pub async fn set_label_type(&self, n: u8) -> Result<bool> {
        let n = commands::check_range("label type", n, LABEL_TYPE_RANGE)?;
        self.request_ack(RequestCode::SetLabelType, &[n]).await
    }

    /// Print density 1-5.
    pub async fn set_label_density(&self, n: u8) -> Result<bool> {
        let n = commands::check_range("label density", n, DENSITY_RANGE)?;
        self.request_ack(RequestCode::SetLabelDensity, &[n]).await
    }

    pub async fn start_print(&self) -> Result<bool> {
        self.request_ack(RequestCode::StartPrint, &UNIT_PAYLOAD).await
    }

    pub async fn end_print(&self) -> Result<bool> {
        self.request_ack(RequestCode::EndPrint, &UNIT_PAYLOAD).await
    }

    pub async fn start_page_print(&self) -> Result<bool> {
        self.request_ack(RequestCode::StartPagePrint, &UNIT_PAYLOAD).await
    }

    /// `false` while the printer is still taking in the page.
    pub async fn end_page_print(&self) -> Result<bool> {
        self.request_ack(RequestCode::EndPagePrint, &UNIT_PAYLOAD).await
    }

    pub async fn allow_print_clear(&self) -> Result<bool> {
        self.request_ack(RequestCode::AllowPrintClear, &UNIT_PAYLOAD).await
    }

    /// Send two dimensions in the order given. The print job passes the row
    /// count first.
    pub async fn set_dimension(&self, w: u16, h: u16) -> Result<bool> {
        self.request_ack(RequestCode::SetDimension, &commands::dimension_payload(w, h))
            .await
    }

    pub async fn set_quantity(&self, n: u16) -> Result<bool> {
        self.request_ack(RequestCode::SetQuantity, &commands::quantity_payload(n))
            .await
    }

    pub async fn get_print_status(&self) -> Result<PrintStatus> {
        let payload = self.request(RequestCode::GetPrintStatus, &UNIT_PAYLOAD).await?;
        PrintStatus::decode(&payload)
    }

    /// One heartbeat exchange. The result is also published to
    /// [`last_heartbeat`](Self::last_heartbeat).
    pub async fn heartbeat(&self) -> Result<HeartbeatStatus> {
        let payload = self.request(RequestCode::Heartbeat, &UNIT_PAYLOAD).await?;
        let status = HeartbeatStatus::decode(&payload);
        self.inner.last_heartbeat.send_replace(Some(status));
        Ok(status)
    }

    /// Write one raster line. No response is expected.
    pub async fn write_line(&self, row: u16, bits: &[bool]) -> Result<()> {
        let packet = commands::line_packet(row, bits);
        self.inner.session.write_raw(&packet.encode()).await
    }

    // ========================================================================
    // HEARTBEAT
    // ========================================================================

    /// Start (or restart) the periodic heartbeat.
    ///
    /// The task ends on its own when the connection closes or is lost.
    pub fn start_heartbeat(&self) {
        let interval = self.inner.config.heartbeat_interval;
        let closed = self.inner.session.closed();
        let task = tokio::spawn(heartbeat_loop(Arc::downgrade(&self.inner), interval, closed));
        if let Some(previous) = lock(&self.inner.heartbeat).replace(task) {
            previous.abort();
        }
        log::info!("heartbeat every {}ms", interval.as_millis());
    }

    pub fn stop_heartbeat(&self) {
        if let Some(handle) = lock(&self.inner.heartbeat).take() {
            handle.abort();
            log::info!("heartbeat stopped");
        }
    }

    /// Whether a heartbeat task is currently scheduled.
    pub fn heartbeat_running(&self) -> bool {
        lock(&self.inner.heartbeat)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Latest heartbeat status, `None` until the first one succeeds.
    pub fn last_heartbeat(&self) -> watch::Receiver<Option<HeartbeatStatus>> {
        self.inner.last_heartbeat.subscribe()
    }

    /// Mark a print job as running until the guard is dropped.
    ///
    /// Fails with [`NiimbotError::SessionBusy`] if another job already runs
    /// on this connection.
    pub(crate) fn begin_job(&self) -> Result<JobGuard> {
        if self.inner.job_active.swap(true, Ordering::AcqRel) {
            return Err(NiimbotError::SessionBusy);
        }
        Ok(JobGuard {
            inner: self.inner.clone(),
        })
    }

    pub fn job_active(&self) -> bool {
        self.inner.job_active.load(Ordering::Acquire)
    }
}

pub(crate) struct JobGuard {
    inner: Arc<Inner>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.inner.job_active.store(false, Ordering::Release);
    }
}

async fn heartbeat_loop(inner: Weak<Inner>, interval: Duration, mut closed: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = closed.changed() => break,
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.config.heartbeat_policy == HeartbeatPolicy::SuspendDuringJob
            && inner.job_active.load(Ordering::Acquire)
        {
            log::debug!("heartbeat skipped during print job");
            continue;
        }
        let client = PrinterClient { inner };
        match client.heartbeat().await {
            Ok(status) => log::debug!("heartbeat {:?}", status),
            Err(NiimbotError::ConnectionLost | NiimbotError::NotConnected) => break,
            Err(e) => log::warn!("heartbeat failed: {}", e),
        }
    }
    log::debug!("heartbeat task finished");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TESTS
// ============================================================================
