//! Hosted session service, driven through the real binary

use std::time::{Duration, Instant};

use mindset_capture::service::{HostConfig, ServiceHost};
use mindset_capture::{CaptureSession, EegBands, Sample, Session, SessionState};

fn service_binary() -> &'static str {
    env!("CARGO_BIN_EXE_mindset-capture")
}

fn recorded_capture() -> CaptureSession {
    let mut capture = CaptureSession::new();
    let wave: Vec<Sample> = (0..256).map(Sample::RawWave).collect();
    capture.append(&wave);
    capture.append(&[
        Sample::Attention(42),
        Sample::Meditation(17),
        Sample::EegBands(EegBands {
            delta: 1,
            theta: 2,
            lo_alpha: 3,
            hi_alpha: 4,
            lo_beta: 5,
            hi_beta: 6,
            lo_gamma: 7,
            mid_gamma: 8,
        }),
    ]);
    capture.finalize();
    capture
}

#[test]
fn test_hosted_replay_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.json");
    recorded_capture().save(&path).unwrap();

    let config = HostConfig::new(service_binary())
        .arg("serve")
        .env("MINDSET_REPLAY_FILE", &path)
        .env("MINDSET_LISTEN", "127.0.0.1:0")
        .env("RUST_LOG", "warn")
        .ready_timeout(Duration::from_secs(30));
    let hosted = ServiceHost::start(&config).unwrap();
    assert!(hosted.address().starts_with("127.0.0.1:"));

    let proxy = hosted.proxy();
    assert_eq!(proxy.state().unwrap(), SessionState::Disconnected);
    proxy.connect(None).unwrap();
    proxy.start().unwrap();
    assert_eq!(proxy.state().unwrap(), SessionState::Running);

    let first = proxy.read_batch().unwrap();
    assert_eq!(first.len(), 64);
    assert_eq!(first[0], Sample::RawWave(0));

    hosted.reload().unwrap();

    // Same address after the reload; the proxy reconnected on its own
    let second = proxy.read_batch().unwrap();
    assert_eq!(second.len(), 64);
    assert_eq!(second[0], Sample::RawWave(64));

    let mut eighth = Vec::new();
    for _ in 2..8 {
        eighth = proxy.read_batch().unwrap();
    }
    assert!(eighth.contains(&Sample::Attention(42)));
    assert!(eighth.contains(&Sample::Meditation(17)));
    assert_eq!(eighth.len(), 64 + 3);
    assert_eq!(proxy.stats().unwrap().frames_decoded, 8);

    hosted.shutdown(Duration::from_secs(10)).unwrap();
}

#[cfg(unix)]
fn start_replay_service(path: &std::path::Path) -> mindset_capture::service::HostedSession {
    let config = HostConfig::new(service_binary())
        .arg("serve")
        .env("MINDSET_REPLAY_FILE", path)
        .env("RUST_LOG", "warn")
        .ready_timeout(Duration::from_secs(30));
    ServiceHost::start(&config).unwrap()
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: &str) {
    let status = std::process::Command::new("kill")
        .arg(format!("-{}", signal))
        .arg(pid.to_string())
        .status()
        .unwrap();
    assert!(status.success(), "kill -{} {} failed", signal, pid);
}

#[cfg(unix)]
#[test]
fn test_hangup_rebinds_same_address_and_keeps_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.json");
    recorded_capture().save(&path).unwrap();

    let hosted = start_replay_service(&path);
    let address = hosted.address().to_string();
    let proxy = hosted.proxy();
    proxy.connect(None).unwrap();
    proxy.start().unwrap();
    assert_eq!(proxy.read_batch().unwrap()[0], Sample::RawWave(0));

    send_signal(hosted.pid().unwrap(), "HUP");
    std::thread::sleep(Duration::from_millis(500));

    // The kept connection was dropped by the rebind; calls reconnect to the same address
    let deadline = Instant::now() + Duration::from_secs(10);
    while let Err(e) = proxy.ping() {
        assert!(Instant::now() < deadline, "service did not answer after SIGHUP: {}", e);
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(hosted.address(), address);
    assert_eq!(proxy.state().unwrap(), SessionState::Running);
    assert_eq!(proxy.read_batch().unwrap()[0], Sample::RawWave(64));

    hosted.shutdown(Duration::from_secs(10)).unwrap();
}

#[cfg(unix)]
#[test]
fn test_interrupt_stops_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.json");
    recorded_capture().save(&path).unwrap();

    let hosted = start_replay_service(&path);
    let proxy = hosted.proxy();
    proxy.connect(None).unwrap();
    proxy.start().unwrap();

    send_signal(hosted.pid().unwrap(), "INT");

    let deadline = Instant::now() + Duration::from_secs(10);
    while proxy.ping().is_ok() {
        assert!(Instant::now() < deadline, "service still answering after SIGINT");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Exited cleanly on its own; nothing left for the shutdown request to do
    hosted.shutdown(Duration::from_secs(10)).unwrap();
}

#[test]
fn test_missing_replay_file_fails_start() {
    let config = HostConfig::new(service_binary())
        .arg("serve")
        .env("MINDSET_REPLAY_FILE", "/nonexistent/mindset/capture.json")
        .env("RUST_LOG", "off")
        .ready_timeout(Duration::from_secs(30));

    let err = ServiceHost::start(&config).err().expect("start must fail");
    assert!(err.is_connect());
}

#[cfg(target_os = "linux")]
#[test]
fn test_never_ready_child_is_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    let script = format!(
        "echo $$ > '{}'; echo '{{\"address\":\"127.0.0.1:9\",\"pid\":0}}'; exec sleep 30",
        pid_file.display()
    );

    let mut config = HostConfig::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .ready_timeout(Duration::from_millis(800))
        .poll_interval(Duration::from_millis(100));
    config.io_timeout = Duration::from_millis(200);

    let started = Instant::now();
    let err = ServiceHost::start(&config).err().expect("start must fail");
    assert!(err.is_connect());
    assert!(err.to_string().contains("not ready"), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let proc_dir = format!("/proc/{}", pid.trim());
    assert!(
        !std::path::Path::new(&proc_dir).exists(),
        "child {} still present",
        pid.trim()
    );
}

#[cfg(unix)]
#[test]
fn test_silent_child_times_out() {
    let config = HostConfig::new("/bin/sh")
        .arg("-c")
        .arg("exec sleep 30")
        .ready_timeout(Duration::from_millis(500));

    let started = Instant::now();
    let err = ServiceHost::start(&config).err().expect("start must fail");
    assert!(err.is_connect());
    assert!(err.to_string().contains("no address handed off"), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(10));
}
