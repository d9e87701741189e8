//! Session against fake SCPI instruments on localhost sockets.
//!
//! Exercises the real TCP transport, connection handling and teardown
//! order without bench hardware. The DUT side is a `tokio_test` byte mock.

use bench_logger::config::Settings;
use bench_logger::hardware::InstrumentSet;
use bench_logger::log_writer::CorrelatedLogWriter;
use bench_logger::session::{arm_instruments, Session};
use bench_logger::stream::LineReader;
use bench_logger::SessionOutcome;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_test::io::Builder;

/// Accept one connection, answer scripted queries, and return every line
/// received once the client hangs up.
async fn fake_instrument(
    responses: HashMap<&'static str, &'static str>,
) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(answer) = responses.get(line.as_str()) {
                write
                    .write_all(format!("{}\n", answer).as_bytes())
                    .await
                    .unwrap();
            }
            received.push(line);
        }
        received
    });

    (port, handle)
}

#[tokio::test]
async fn session_over_real_sockets() {
    let (meter_port, meter_server) = fake_instrument(HashMap::from([
        ("MEAS:VOLT? \"voltMeasBuffer\", READ", "+3.300E+00"),
        ("MEAS:CURR? \"currMeasBuffer\", READ", "+2.000E-02"),
    ]))
    .await;
    let (load_port, load_server) = fake_instrument(HashMap::from([
        ("MEAS:CURR?", "0.151"),
        ("MEAS:POW?", "0.560"),
    ]))
    .await;

    let mut settings = Settings::default();
    settings.log.echo = false;
    settings.meter.endpoint.host = "127.0.0.1".into();
    settings.meter.endpoint.port = meter_port;
    settings.meter.settle = Duration::ZERO;
    settings.load.endpoint.host = "127.0.0.1".into();
    settings.load.endpoint.port = load_port;
    settings.load.settle = Duration::ZERO;

    let mut instruments = InstrumentSet::connect(&settings).await;
    assert!(instruments.meter.is_present());
    assert!(instruments.load.is_present());
    arm_instruments(&mut instruments, &settings).await;

    let dut = Builder::new()
        .read(b"boot\r\n")
        .read(b"SETUP COMPLETE !!\r\n")
        .read(b"a\r\nb\r\n")
        .read(b"Test Complete\r\n")
        .build();
    let dir = tempdir().unwrap();
    let path = dir.path().join("log").join("serial_log.txt");
    let writer = CorrelatedLogWriter::create(&path).unwrap();

    let report = Session::new(settings, instruments, LineReader::new(dut, "dut"), writer)
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(report.teardown.iter().all(|s| s.succeeded()));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "boot\nSETUP COMPLETE !!\na\nb,+3.300E+00,+2.000E-02,0.151,0.560\nTest Complete\n"
    );

    let load_lines = tokio::time::timeout(Duration::from_secs(5), load_server)
        .await
        .unwrap()
        .unwrap();
    let meter_lines = tokio::time::timeout(Duration::from_secs(5), meter_server)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(load_lines.first().map(String::as_str), Some("*RST;*WAI"));
    assert!(load_lines.contains(&":SYST:BEEP 1000, 0.2".to_string()));
    assert_eq!(load_lines.last().map(String::as_str), Some(":OUTP OFF"));
    assert!(meter_lines.contains(&"*CLS".to_string()));
    assert!(meter_lines.contains(&":SYST:BEEP 1500, 0.2".to_string()));
}

#[tokio::test]
async fn unreachable_bench_leaves_both_roles_absent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut settings = Settings::default();
    for endpoint in [&mut settings.meter.endpoint, &mut settings.load.endpoint] {
        endpoint.host = "127.0.0.1".into();
        endpoint.port = port;
        endpoint.timeout = Duration::from_millis(200);
    }

    let instruments = InstrumentSet::connect(&settings).await;
    assert!(!instruments.any_present());
    assert!(instruments.meter.status().contains("127.0.0.1"));
}
