//! # Print Job
//!
//! Drives one bit matrix through the printer's page protocol.
//!
//! ## Sequence
//!
//! ```text
//! Idle
//!  │  SET_LABEL_DENSITY, SET_LABEL_TYPE
//!  ▼
//! Configured ── START_PRINT ──► PrintStarted ── START_PAGE_PRINT ──► PageStarted
//!                                                                        │
//!                              SET_DIMENSION(rows, cols), SET_QUANTITY   │
//!                                                                        ▼
//! StreamingLines   one 0x85 packet per row, row order, 10ms apart ◄──────┘
//!  │
//!  ▼
//! PageEnding       END_PAGE_PRINT every 50ms until accepted
//!  │
//!  ▼
//! StatusPolling    GET_PRINT_STATUS every 100ms until page == quantity
//!  │
//!  ▼
//! PrintEnded       END_PRINT
//! ```
//!
//! Any error moves the job to `Failed` and aborts it on the spot. Nothing is
//! rolled back; the printer is left wherever the sequence stopped.
//!
//! ## Events
//!
//! [`PrintJob::spawn`] runs the job in a task and returns [`PrintEvents`], a
//! finite stream that yields each [`PrintEvent`] and ends after completion or
//! after a single `Err`. Dropping the handle cancels the job at its next
//! suspension point.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::{NiimbotError, Result};
use crate::printer::client::PrinterClient;
use crate::printer::config::JobConfig;
use crate::protocol::commands::{self, RequestCode, DENSITY_RANGE, LABEL_TYPE_RANGE};
use crate::render::bitmap::BitMatrix;

/// Events buffered before the job waits for the consumer
const EVENT_BUFFER: usize = 64;

/// Progress notification from a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintEvent {
    /// Raster line `row` was written
    WriteLine { row: u16 },
    /// The printer accepted the end of the page
    EndPage,
    /// The printed page counter changed
    PageStatus {
        page: u16,
        progress1: u8,
        progress2: u8,
    },
}

/// Where a job is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Configured,
    PrintStarted,
    PageStarted,
    StreamingLines,
    PageEnding,
    StatusPolling,
    PrintEnded,
    Failed,
}

/// Receiver of job events.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: PrintEvent);
}

#[async_trait]
impl EventSink for Vec<PrintEvent> {
    async fn emit(&mut self, event: PrintEvent) {
        self.push(event);
    }
}

#[async_trait]
impl EventSink for mpsc::Sender<Result<PrintEvent>> {
    async fn emit(&mut self, event: PrintEvent) {
        // A closed channel is noticed by the task driving the job
        let _ = self.send(Ok(event)).await;
    }
}

/// A validated print job.
#[derive(Debug, Clone)]
pub struct PrintJob {
    width: u16,
    height: u16,
    density: u8,
    label_type: u8,
    quantity: u16,
    lines: BitMatrix,
}

impl PrintJob {
    /// Build a job from an already rotated bit matrix.
    ///
    /// ## Errors
    ///
    /// [`NiimbotError::InvalidParameter`] if density or label type are out of
    /// range, quantity is zero, or the matrix exceeds 65535 rows or columns.
    pub fn new(lines: BitMatrix, density: u8, label_type: u8, quantity: u16) -> Result<Self> {
        let density = commands::check_range("label density", density, DENSITY_RANGE)?;
        let label_type = commands::check_range("label type", label_type, LABEL_TYPE_RANGE)?;
        if quantity == 0 {
            return Err(NiimbotError::InvalidParameter(
                "quantity must be at least 1".to_string(),
            ));
        }
        let dim = |what: &str, n: usize| {
            u16::try_from(n).map_err(|_| {
                NiimbotError::InvalidParameter(format!("{} {} exceeds {}", what, n, u16::MAX))
            })
        };
        Ok(Self {
            width: dim("width", lines.width())?,
            height: dim("height", lines.height())?,
            density,
            label_type,
            quantity,
            lines,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn density(&self) -> u8 {
        self.density
    }

    pub fn label_type(&self) -> u8 {
        self.label_type
    }

    pub fn quantity(&self) -> u16 {
        self.quantity
    }

    pub fn lines(&self) -> &BitMatrix {
        &self.lines
    }

    /// Run the job in the current task, feeding events to `sink`.
    pub async fn run(
        client: &PrinterClient,
        job: &PrintJob,
        config: &JobConfig,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let (state, _) = watch::channel(JobState::Idle);
        job.execute(client, config, sink, &state).await
    }

    /// Run the job in a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(client: PrinterClient, job: PrintJob, config: JobConfig) -> PrintEvents {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(JobState::Idle);

        tokio::spawn(async move {
            let mut sink = tx.clone();
            tokio::select! {
                result = job.execute(&client, &config, &mut sink, &state_tx) => {
                    if let Err(e) = result {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                _ = tx.closed() => {
                    state_tx.send_replace(JobState::Failed);
                    log::info!("print job cancelled");
                }
            }
        });

        PrintEvents {
            events: rx,
            state: state_rx,
        }
    }

    async fn execute(
        &self,
        client: &PrinterClient,
        config: &JobConfig,
        sink: &mut impl EventSink,
        state: &watch::Sender<JobState>,
    ) -> Result<()> {
        let _active = client.begin_job()?;
        log::info!(
            "print job: {}x{} dots, density {}, label type {}, quantity {}",
            self.width,
            self.height,
            self.density,
            self.label_type,
            self.quantity
        );

        let result = self.steps(client, config, sink, state).await;
        match &result {
            Ok(()) => log::info!("print job finished"),
            Err(e) => {
                state.send_replace(JobState::Failed);
                log::warn!("print job failed: {}", e);
            }
        }
        result
    }

    async fn steps(
        &self,
        client: &PrinterClient,
        config: &JobConfig,
        sink: &mut impl EventSink,
        state: &watch::Sender<JobState>,
    ) -> Result<()> {
        let enter = |s: JobState| {
            log::debug!("job state -> {:?}", s);
            state.send_replace(s);
        };

        accepted(RequestCode::SetLabelDensity, client.set_label_density(self.density).await?);
        accepted(RequestCode::SetLabelType, client.set_label_type(self.label_type).await?);
        enter(JobState::Configured);

        accepted(RequestCode::StartPrint, client.start_print().await?);
        enter(JobState::PrintStarted);

        accepted(RequestCode::StartPagePrint, client.start_page_print().await?);
        accepted(
            RequestCode::SetDimension,
            client.set_dimension(self.height, self.width).await?,
        );
        accepted(RequestCode::SetQuantity, client.set_quantity(self.quantity).await?);
        enter(JobState::PageStarted);

        enter(JobState::StreamingLines);
        for (row, bits) in (0..self.height).zip(self.lines.rows()) {
            client.write_line(row, bits).await?;
            sink.emit(PrintEvent::WriteLine { row }).await;
            tokio::time::sleep(config.line_delay).await;
        }

        enter(JobState::PageEnding);
        let deadline = config.end_page_timeout.map(|t| Instant::now() + t);
        while !client.end_page_print().await? {
            check_deadline(deadline, RequestCode::EndPagePrint)?;
            tokio::time::sleep(config.end_page_interval).await;
        }
        sink.emit(PrintEvent::EndPage).await;

        enter(JobState::StatusPolling);
        let deadline = config.status_timeout.map(|t| Instant::now() + t);
        let mut previous_page = 0;
        loop {
            let status = client.get_print_status().await?;
            if status.page != previous_page {
                log::info!("page {}/{}", status.page, self.quantity);
                sink.emit(PrintEvent::PageStatus {
                    page: status.page,
                    progress1: status.progress1,
                    progress2: status.progress2,
                })
                .await;
                previous_page = status.page;
            }
            if status.page == self.quantity {
                break;
            }
            check_deadline(deadline, RequestCode::GetPrintStatus)?;
            tokio::time::sleep(config.status_interval).await;
        }

        accepted(RequestCode::EndPrint, client.end_print().await?);
        enter(JobState::PrintEnded);
        Ok(())
    }
}

/// The printer doesn't act on refusals during setup either; log and go on.
fn accepted(code: RequestCode, ok: bool) {
    if !ok {
        log::warn!("printer refused {}", code);
    }
}

fn check_deadline(deadline: Option<Instant>, code: RequestCode) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(NiimbotError::PollTimeout { stage: code.name() }),
        _ => Ok(()),
    }
}

/// Handle onto a spawned job.
pub struct PrintEvents {
    events: mpsc::Receiver<Result<PrintEvent>>,
    state: watch::Receiver<JobState>,
}

impl PrintEvents {
    /// Next event, or `None` once the job has ended.
    pub async fn next(&mut self) -> Option<Result<PrintEvent>> {
        self.events.recv().await
    }

    /// Current job state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch every state transition.
    pub fn state_changes(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Drain the stream. Returns the events seen, or the job's error.
    pub async fn collect(mut self) -> Result<Vec<PrintEvent>> {
        let mut seen = Vec::new();
        while let Some(event) = self.next().await {
            seen.push(event?);
        }
        Ok(seen)
    }
}

// ============================================================================
// TESTS
// ============================================================================
