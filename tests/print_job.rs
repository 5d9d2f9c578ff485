//! # Print Job Tests
//!
//! Drive the full stack (client, session, codec) against the simulated
//! printer in `transport::mock`, through the public API only.

use std::time::Duration;

use image::{Rgba, RgbaImage};
use niimbot::NiimbotError;
use niimbot::printer::{
    HeartbeatPolicy, JobConfig, JobState, PrintEvent, PrintJob, PrinterClient, SessionConfig,
};
use niimbot::protocol::{Packet, RequestCode};
use niimbot::render::{self, bitmap::BitMatrix, dither::DitheringAlgorithm};
use niimbot::transport::mock::{MockPrinter, Reply};
use pretty_assertions::assert_eq;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn connect(config: SessionConfig) -> (MockPrinter, PrinterClient) {
    let (mock, link, events) = MockPrinter::new();
    (mock, PrinterClient::from_link(link, events, config))
}

fn count(mock: &MockPrinter, code: RequestCode) -> usize {
    mock.command_codes()
        .iter()
        .filter(|&&c| c == code.code())
        .count()
}

/// Position of the first command with `code`.
fn first(mock: &MockPrinter, code: RequestCode) -> Option<usize> {
    mock.command_codes().iter().position(|&c| c == code.code())
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_by_three_job() {
    let (mock, client) = connect(SessionConfig::default());
    let lines = BitMatrix::from_bits(&[&[1, 1, 0], &[0, 0, 1]]).unwrap();
    let job = PrintJob::new(lines, 3, 1, 1).unwrap();

    let mut events = PrintJob::spawn(client.clone(), job, JobConfig::default());
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        seen.push(event.unwrap());
    }

    assert_eq!(
        seen,
        vec![
            PrintEvent::WriteLine { row: 0 },
            PrintEvent::WriteLine { row: 1 },
            PrintEvent::EndPage,
            PrintEvent::PageStatus {
                page: 1,
                progress1: 100,
                progress2: 100,
            },
        ]
    );
    assert_eq!(events.state(), JobState::PrintEnded);
    assert!(!client.job_active());

    // Every header on the wire
    let packets: Vec<Packet> = mock.packets();
    assert_eq!(packets.len(), 11);
    assert_eq!(packets[6].kind, RequestCode::PrintLine.code());
    assert_eq!(packets[6].payload, vec![0, 0, 0, 0, 0, 1, 0b1100_0000]);
    assert_eq!(packets[7].payload, vec![0, 1, 0, 0, 0, 1, 0b0010_0000]);
}

#[tokio::test(start_paused = true)]
async fn test_image_to_printer() {
    let (mock, client) = connect(SessionConfig::default());

    // Black bar across the top of a 40x16 label
    let mut label = RgbaImage::from_pixel(40, 16, Rgba([255, 255, 255, 255]));
    for x in 0..40 {
        for y in 0..4 {
            label.put_pixel(x, y, Rgba([0, 0, 0, 255]));
        }
    }

    let lines = render::prepare(&label, DitheringAlgorithm::Threshold, 128).unwrap();
    assert_eq!((lines.width(), lines.height()), (16, 40));

    let job = PrintJob::new(lines, 2, 1, 1).unwrap();
    let mut sink: Vec<PrintEvent> = Vec::new();
    PrintJob::run(&client, &job, &JobConfig::default(), &mut sink)
        .await
        .unwrap();

    let rows = mock.line_packets();
    assert_eq!(rows.len(), 40);
    // After the clockwise turn the bar sits on the right of every line
    for row in &rows {
        assert_eq!(&row.payload[6..], &[0b0000_0000, 0b0000_1111]);
    }

    let dimension = &mock.commands()[first(&mock, RequestCode::SetDimension).unwrap()];
    assert_eq!(dimension.payload, vec![0, 40, 0, 16]);
}

// ============================================================================
// POLLING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_multiple_copies_report_each_page() {
    let (mock, client) = connect(SessionConfig::default());
    mock.set_end_page_refusals(2);
    mock.set_status_polls_per_page(2);
    let lines = BitMatrix::from_bits(&[&[1]]).unwrap();
    let job = PrintJob::new(lines, 3, 1, 3).unwrap();

    let events = PrintJob::spawn(client, job, JobConfig::default())
        .collect()
        .await
        .unwrap();

    let pages: Vec<u16> = events
        .iter()
        .filter_map(|e| match e {
            PrintEvent::PageStatus { page, .. } => Some(*page),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(count(&mock, RequestCode::EndPagePrint), 3);
    assert_eq!(count(&mock, RequestCode::GetPrintStatus), 6);
    assert_eq!(count(&mock, RequestCode::EndPrint), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_printer_times_out() {
    let (mock, client) = connect(SessionConfig::default());
    mock.script(
        RequestCode::GetPrintStatus.code(),
        Reply::Payload(vec![0, 0, 50, 0]),
    );
    let job = PrintJob::new(BitMatrix::from_bits(&[&[1]]).unwrap(), 3, 1, 1).unwrap();

    let err = PrintJob::spawn(client, job, JobConfig::default())
        .collect()
        .await
        .unwrap_err();
    assert!(matches!(err, NiimbotError::PollTimeout { .. }));
    assert_eq!(count(&mock, RequestCode::EndPrint), 0);
}

// ============================================================================
// HEARTBEAT VS JOB
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_serialized_heartbeat_never_collides() {
    let (mock, client) = connect(SessionConfig {
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_policy: HeartbeatPolicy::Serialized,
        ..SessionConfig::default()
    });
    client.start_heartbeat();

    let rows: Vec<Vec<bool>> = (0..50).map(|i| vec![i % 2 == 0; 8]).collect();
    let job = PrintJob::new(BitMatrix::new(rows).unwrap(), 3, 1, 1).unwrap();
    PrintJob::spawn(client.clone(), job, JobConfig::default())
        .collect()
        .await
        .unwrap();

    // Heartbeats interleaved with the job and none of them hit SessionBusy
    assert!(count(&mock, RequestCode::Heartbeat) > 1);
    let start = first(&mock, RequestCode::StartPrint).unwrap();
    let end = first(&mock, RequestCode::EndPrint).unwrap();
    assert!(mock.command_codes()[start..end].contains(&RequestCode::Heartbeat.code()));
    client.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_suspended_heartbeat_stays_out_of_job() {
    let (mock, client) = connect(SessionConfig {
        heartbeat_interval: Duration::from_millis(20),
        heartbeat_policy: HeartbeatPolicy::SuspendDuringJob,
        ..SessionConfig::default()
    });

    let rows: Vec<Vec<bool>> = (0..50).map(|_| vec![true; 8]).collect();
    let job = PrintJob::new(BitMatrix::new(rows).unwrap(), 3, 1, 1).unwrap();
    let events = PrintJob::spawn(client.clone(), job, JobConfig::default());
    // Job is marked active before the first heartbeat tick
    tokio::task::yield_now().await;
    client.start_heartbeat();
    events.collect().await.unwrap();

    let codes = mock.command_codes();
    let start = first(&mock, RequestCode::SetLabelDensity).unwrap();
    let end = first(&mock, RequestCode::EndPrint).unwrap();
    assert!(!codes[start..=end].contains(&RequestCode::Heartbeat.code()));

    // Resumes once the job is done
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(count(&mock, RequestCode::Heartbeat) > 0);
    client.close().await.unwrap();
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_link_loss_surfaces_as_connection_lost() {
    let (mock, client) = connect(SessionConfig::default());
    mock.disconnect_after_lines(3);
    let rows: Vec<Vec<bool>> = (0..10).map(|_| vec![true; 8]).collect();
    let job = PrintJob::new(BitMatrix::new(rows).unwrap(), 3, 1, 1).unwrap();

    let mut events = PrintJob::spawn(client.clone(), job, JobConfig::default());
    let mut written = 0;
    let mut last = None;
    while let Some(event) = events.next().await {
        match event {
            Ok(PrintEvent::WriteLine { .. }) => written += 1,
            Ok(other) => panic!("unexpected {:?}", other),
            Err(e) => last = Some(e),
        }
    }
    assert_eq!(written, 3);
    assert!(matches!(last, Some(NiimbotError::ConnectionLost)));
    assert!(!client.is_connected());
    assert!(matches!(client.heartbeat().await, Err(NiimbotError::ConnectionLost)));
}

#[tokio::test]
async fn test_link_loss_without_line_delay() {
    let (mock, client) = connect(SessionConfig::default());
    mock.disconnect_after_lines(1);
    let rows: Vec<Vec<bool>> = (0..10).map(|_| vec![true; 8]).collect();
    let job = PrintJob::new(BitMatrix::new(rows).unwrap(), 3, 1, 1).unwrap();
    let config = JobConfig {
        line_delay: Duration::ZERO,
        ..JobConfig::default()
    };

    let err = PrintJob::spawn(client.clone(), job, config)
        .collect()
        .await
        .unwrap_err();
    assert!(matches!(err, NiimbotError::ConnectionLost));
    assert_eq!(mock.line_packets().len(), 1);
    assert!(matches!(client.write_line(1, &[true; 8]).await, Err(NiimbotError::ConnectionLost)));
    assert_eq!(mock.disconnect_calls(), 0);
}

#[tokio::test]
async fn test_user_close_is_not_connected() {
    let (mock, client) = connect(SessionConfig::default());
    client.close().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(mock.disconnect_calls(), 1);
    assert!(matches!(client.start_print().await, Err(NiimbotError::NotConnected)));
}

#[tokio::test]
async fn test_invalid_job_sends_nothing() {
    let (mock, _client) = connect(SessionConfig::default());
    let lines = BitMatrix::from_bits(&[&[1, 0]]).unwrap();
    assert!(matches!(
        PrintJob::new(lines, 9, 1, 1),
        Err(NiimbotError::InvalidParameter(_))
    ));
    assert!(mock.packets().is_empty());
}
