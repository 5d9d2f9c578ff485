//! # Transport Session
//!
//! A session owns one connection and runs the request/response discipline on
//! top of it.
//!
//! ## One Request At A Time
//!
//! The device answers a command with a notification that carries no request
//! id, so the only way to pair a response with its request is to never have
//! more than one outstanding. [`Session::send`] installs a pending request in
//! a single slot; a second `send` while the slot is occupied fails with
//! [`NiimbotError::SessionBusy`] and leaves the first untouched.
//!
//! ```text
//! send ──► install pending ──► start notify ──► write ──► wait ─┬─► decode
//!                                                                ├─► timeout
//!                                                                └─► lost
//!      ◄── stop notify ◄── clear pending ◄───────────────────────┘
//! ```
//!
//! ## Teardown
//!
//! A connection ends exactly once, either by [`Session::close`] or by a
//! [`LinkEvent::Disconnected`] from the backend. Whichever comes first fails
//! any pending request and wakes [`Session::closed`] watchers; the other is a
//! no-op. Link loss never calls back into [`Link::disconnect`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{NiimbotError, Result};
use crate::protocol::packet::{self, Packet};
use crate::transport::link::{Link, LinkEvent, LinkEvents};

/// Default response timeout (milliseconds)
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Open,
    /// Closed by the user
    Closed,
    /// Dropped by the device or the radio
    Lost,
}

struct PendingRequest {
    id: u64,
    code: u8,
    deadline: Instant,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

struct SessionState {
    link: LinkState,
    pending: Option<PendingRequest>,
}

/// One open connection to a printer.
pub struct Session {
    link: Arc<dyn Link>,
    state: Mutex<SessionState>,
    closed_tx: watch::Sender<bool>,
    next_id: AtomicU64,
    command_timeout: Duration,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Take ownership of a connected link and start dispatching its events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(link: Arc<dyn Link>, events: LinkEvents, command_timeout: Duration) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            link,
            state: Mutex::new(SessionState {
                link: LinkState::Open,
                pending: None,
            }),
            closed_tx,
            next_id: AtomicU64::new(1),
            command_timeout,
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch(Arc::downgrade(&session), events));
        *lock(&session.dispatcher) = Some(handle);
        log::info!("session opened");
        session
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.state().link == LinkState::Open
    }

    /// Whether a request is currently awaiting its response.
    pub fn is_busy(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Watch channel that turns `true` once the connection has ended.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Send a command with the session's default timeout.
    pub async fn send(&self, kind: u8, payload: &[u8]) -> Result<Packet> {
        self.send_with_timeout(kind, payload, self.command_timeout).await
    }

    /// Send a command and wait for the next notification as its response.
    ///
    /// ## Errors
    ///
    /// - [`NiimbotError::NotConnected`] / [`NiimbotError::ConnectionLost`] if
    ///   the connection has ended, before or during the exchange
    /// - [`NiimbotError::SessionBusy`] if another request is pending
    /// - [`NiimbotError::CommandTimeout`] if nothing arrives in time
    /// - codec errors if the response doesn't decode
    pub async fn send_with_timeout(
        &self,
        kind: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Packet> {
        let (reply, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state();
            check_open(state.link)?;
            if state.pending.is_some() {
                return Err(NiimbotError::SessionBusy);
            }
            state.pending = Some(PendingRequest {
                id,
                code: kind,
                deadline,
                reply,
            });
        }
        let guard = PendingGuard {
            session: self,
            id,
            armed: true,
        };

        log::debug!("-> {:#04x} {:02x?}", kind, payload);
        let result = self.exchange(kind, payload, timeout, deadline, rx).await;
        guard.release();

        if self.is_open() {
            if let Err(e) = self.link.stop_notifications().await {
                log::warn!("failed to stop notifications: {}", e);
            }
        }

        match &result {
            Ok(packet) => log::debug!("<- {:#04x} {:02x?}", packet.kind, packet.payload),
            Err(e) => log::debug!("command {:#04x} failed: {}", kind, e),
        }
        result
    }

    async fn exchange(
        &self,
        kind: u8,
        payload: &[u8],
        timeout: Duration,
        deadline: Instant,
        rx: oneshot::Receiver<Result<Vec<u8>>>,
    ) -> Result<Packet> {
        if let Err(e) = self.link.start_notifications().await {
            return Err(self.link_failed(e).await);
        }
        if let Err(e) = self.link.write_without_response(&packet::encode(kind, payload)).await {
            return Err(self.link_failed(e).await);
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Err(_) => Err(NiimbotError::CommandTimeout(timeout)),
            Ok(Err(_)) => Err(self.ended_error()),
            Ok(Ok(Ok(bytes))) => Packet::decode(&bytes),
            Ok(Ok(Err(e))) => Err(e),
        }
    }

    /// Write bytes without expecting a response (raster lines).
    pub async fn write_raw(&self, data: &[u8]) -> Result<()> {
        check_open(self.state().link)?;
        match self.link.write_without_response(data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.link_failed(e).await),
        }
    }

    /// Classify a backend failure. A dead link ends the session as lost even
    /// when the backend's `Disconnected` event has not been dispatched yet.
    async fn link_failed(&self, error: NiimbotError) -> NiimbotError {
        if !self.is_open() {
            return self.ended_error();
        }
        if self.link.is_connected().await {
            return error;
        }
        log::debug!("link failure with the backend down: {}", error);
        self.on_disconnect();
        self.ended_error()
    }

    /// User-initiated teardown. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let pending = {
            let mut state = self.state();
            if state.link != LinkState::Open {
                return Ok(());
            }
            state.link = LinkState::Closed;
            state.pending.take()
        };
        if let Some(p) = pending {
            let _ = p.reply.send(Err(NiimbotError::NotConnected));
        }
        self.closed_tx.send_replace(true);
        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        log::info!("session closed");
        self.link.disconnect().await
    }

    fn on_notification(&self, bytes: Vec<u8>) {
        let pending = self.state().pending.take();
        match pending {
            Some(p) => {
                let late = Instant::now() > p.deadline;
                log::debug!(
                    "notification for request {} (code {:#04x}){}",
                    p.id,
                    p.code,
                    if late { ", past deadline" } else { "" }
                );
                let _ = p.reply.send(Ok(bytes));
            }
            None => log::warn!("dropping unsolicited notification {:02x?}", bytes),
        }
    }

    fn on_disconnect(&self) {
        let pending = {
            let mut state = self.state();
            if state.link != LinkState::Open {
                return;
            }
            state.link = LinkState::Lost;
            state.pending.take()
        };
        if let Some(p) = pending {
            let _ = p.reply.send(Err(NiimbotError::ConnectionLost));
        }
        self.closed_tx.send_replace(true);
        log::info!("connection lost");
    }

    fn ended_error(&self) -> NiimbotError {
        match self.state().link {
            LinkState::Lost => NiimbotError::ConnectionLost,
            _ => NiimbotError::NotConnected,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
    }
}

/// Clears the pending slot if it still holds this request.
///
/// A guard dropped while still armed means the `send` future was cancelled
/// mid-exchange; the unsubscribe it never reached is spawned instead.
struct PendingGuard<'a> {
    session: &'a Session,
    id: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    /// Normal exit: the caller stops notifications itself.
    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.session.state();
            if state.pending.as_ref().is_some_and(|p| p.id == self.id) {
                state.pending = None;
            }
        }
        if !self.armed || !self.session.is_open() {
            return;
        }
        log::debug!("request {} cancelled, stopping notifications", self.id);
        let link = self.session.link.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = link.stop_notifications().await {
                        log::warn!("failed to stop notifications: {}", e);
                    }
                });
            }
            Err(_) => log::warn!("no runtime to stop notifications on"),
        }
    }
}

fn check_open(state: LinkState) -> Result<()> {
    match state {
        LinkState::Open => Ok(()),
        LinkState::Closed => Err(NiimbotError::NotConnected),
        LinkState::Lost => Err(NiimbotError::ConnectionLost),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn dispatch(session: Weak<Session>, mut events: LinkEvents) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Notification(bytes) => session.on_notification(bytes),
            LinkEvent::Disconnected => {
                session.on_disconnect();
                return;
            }
        }
    }
    // Backend dropped its sender without saying goodbye
    if let Some(session) = session.upgrade() {
        session.on_disconnect();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockPrinter, Reply};

    fn open(mock_timeout_ms: u64) -> (MockPrinter, Arc<Session>) {
        let (mock, link, events) = MockPrinter::new();
        let session = Session::open(link, events, Duration::from_millis(mock_timeout_ms));
        (mock, session)
    }

    #[tokio::test]
    async fn test_send_returns_decoded_response() {
        let (mock, session) = open(1000);
        let packet = session.send(220, &[1]).await.unwrap();
        assert_eq!(packet.kind, 220);
        assert_eq!(packet.payload.len(), 13);

        assert_eq!(mock.start_notification_calls(), 1);
        assert_eq!(mock.stop_notification_calls(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_notifications_started_before_write() {
        // The mock only delivers responses while subscribed
        let (_mock, session) = open(1000);
        assert!(session.send(1, &[1]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending() {
        let (mock, session) = open(10_000);
        mock.script(1, Reply::Silent);

        let err = session.send(1, &[1]).await.unwrap_err();
        assert!(matches!(
            err,
            NiimbotError::CommandTimeout(d) if d == Duration::from_millis(10_000)
        ));
        assert!(!session.is_busy());
        assert_eq!(mock.stop_notification_calls(), 1);

        // Session still usable afterwards
        mock.script(1, Reply::Auto);
        assert!(session.send(1, &[1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_decode_failure_stops_notifications() {
        let (mock, session) = open(1000);
        mock.script(3, Reply::Raw(vec![0x55, 0x55, 0x03, 0x01, 0x01, 0xFF, 0xAA, 0xAA]));

        let err = session.send(3, &[1]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::ChecksumMismatch { .. }));
        assert_eq!(mock.stop_notification_calls(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_busy_does_not_disturb_pending() {
        let (mock, session) = open(5000);
        mock.script(163, Reply::Manual);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send(163, &[1]).await })
        };
        while !session.is_busy() {
            tokio::task::yield_now().await;
        }

        let second = session.send(1, &[1]).await;
        assert!(matches!(second, Err(NiimbotError::SessionBusy)));
        assert!(session.is_busy());

        mock.notify(163, &[0, 1, 100, 100]);
        let packet = first.await.unwrap().unwrap();
        assert_eq!(packet.payload, vec![0, 1, 100, 100]);
        // The rejected call never touched the subscription
        assert_eq!(mock.start_notification_calls(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending() {
        let (mock, session) = open(5000);
        mock.script(163, Reply::Manual);

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.send(163, &[1]).await })
        };
        while !session.is_busy() {
            tokio::task::yield_now().await;
        }

        mock.drop_link();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, NiimbotError::ConnectionLost));
        assert!(!session.is_open());
        assert!(matches!(session.send(1, &[1]).await, Err(NiimbotError::ConnectionLost)));
        assert!(matches!(session.write_raw(&[0]).await, Err(NiimbotError::ConnectionLost)));

        // Link loss is never answered with a second disconnect
        session.close().await.unwrap();
        assert_eq!(mock.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_on_dead_link_is_connection_lost() {
        let (mock, session) = open(1000);
        let mut closed = session.closed();

        // No Disconnected event reaches the dispatcher
        mock.sever();
        let err = session.write_raw(&[0x55]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::ConnectionLost));
        assert!(!session.is_open());
        assert!(*closed.borrow_and_update());

        assert!(matches!(session.write_raw(&[0x55]).await, Err(NiimbotError::ConnectionLost)));
        assert!(matches!(session.send(1, &[1]).await, Err(NiimbotError::ConnectionLost)));
        session.close().await.unwrap();
        assert_eq!(mock.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_on_dead_link_is_connection_lost() {
        let (mock, session) = open(1000);
        mock.sever();

        let err = session.send(220, &[1]).await.unwrap_err();
        assert!(matches!(err, NiimbotError::ConnectionLost));
        assert!(!session.is_open());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_cancelled_send_stops_notifications() {
        let (mock, session) = open(5000);
        mock.script(163, Reply::Manual);

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.send(163, &[1]).await })
        };
        while !session.is_busy() {
            tokio::task::yield_now().await;
        }
        assert_eq!(mock.start_notification_calls(), 1);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(!session.is_busy());

        for _ in 0..10 {
            if mock.stop_notification_calls() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(mock.stop_notification_calls(), 1);

        // Session still usable afterwards
        assert!(session.send(220, &[1]).await.is_ok());
        assert_eq!(mock.start_notification_calls(), 2);
        assert_eq!(mock.stop_notification_calls(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mock, session) = open(1000);
        let mut closed = session.closed();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(mock.disconnect_calls(), 1);
        assert!(*closed.borrow_and_update());
        assert!(matches!(session.send(1, &[1]).await, Err(NiimbotError::NotConnected)));
    }

    #[tokio::test]
    async fn test_write_raw_records_bytes() {
        let (mock, session) = open(1000);
        session.write_raw(&packet::encode(0x85, &[0, 0, 0, 0, 0, 1, 0xFF])).await.unwrap();
        let lines = mock.line_packets();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].payload[6], 0xFF);
    }
}
