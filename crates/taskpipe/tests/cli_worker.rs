#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use taskpipe::frame::FrameConfig;
use taskpipe::transport::{IpcStream, UnixDomainSocket};
use taskpipe::{Dispatcher, InputTask, Status, TaskCodec};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/tpcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn taskpipe() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskpipe"));
    cmd.args(["--log-level", "error", "--format", "json"]);
    cmd
}

/// Accept one worker connection or give up after `timeout`.
fn accept_within(listener: UnixDomainSocket, timeout: Duration) -> (UnixDomainSocket, IpcStream) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stream = listener.accept().expect("accept should succeed");
        let _ = tx.send((listener, stream));
    });
    rx.recv_timeout(timeout).expect("worker should connect")
}

fn wait_within(child: &mut Child, timeout: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child should be waitable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_path(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("{} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn work_reads_pipe_from_stdin_and_stops_on_sentinel() {
    let dir = unique_temp_dir("work");
    let sock_path = dir.join("worker.sock");
    let listener = UnixDomainSocket::bind(&sock_path).expect("bind should succeed");

    let mut child = taskpipe()
        .arg("work")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("work command should start");
    let mut stdin = child.stdin.take().expect("stdin should be piped");
    writeln!(stdin, "{}", sock_path.display()).unwrap();
    stdin.flush().unwrap();

    let (_listener, stream) = accept_within(listener, Duration::from_secs(10));
    let frame = FrameConfig {
        read_timeout: Some(Duration::from_secs(5)),
        ..FrameConfig::default()
    };
    let mut dispatcher = Dispatcher::from_stream(stream, TaskCodec::default(), frame).unwrap();

    let reply = dispatcher
        .dispatch(&InputTask::new("hello").with_correlation_id("t-1"))
        .expect("worker should reply");
    assert_eq!(reply.message, "Processed: hello");
    assert_eq!(reply.status, Status::DONE);

    writeln!(stdin, "__quit__").unwrap();
    stdin.flush().unwrap();

    let status = wait_within(&mut child, Duration::from_secs(5));
    assert!(status.success(), "worker exited with {status:?}");

    let output = child.wait_with_output().expect("output should be readable");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"termination\":\"shutdown\""), "{stdout}");
    assert!(stdout.contains("\"tasksHandled\":1"), "{stdout}");

    drop(dispatcher);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn dispatch_command_drives_work_command() {
    let dir = unique_temp_dir("dispatch");
    let sock_path = dir.join("host.sock");

    let host = taskpipe()
        .arg("dispatch")
        .arg(&sock_path)
        .args(["-m", "alpha", "-m", "beta", "--timeout", "5s"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("dispatch command should start");
    wait_for_path(&sock_path, Duration::from_secs(5));

    let mut worker = taskpipe()
        .arg("work")
        .arg(&sock_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("work command should start");

    let host_output = host.wait_with_output().expect("dispatch should finish");
    assert!(host_output.status.success());
    let lines: Vec<String> = String::from_utf8_lossy(&host_output.stdout)
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines[0].contains("\"message\":\"Processed: alpha\""));
    assert!(lines[1].contains("\"message\":\"Processed: beta\""));
    assert!(lines[0].contains("\"statusName\":\"DONE\""));

    let status = wait_within(&mut worker, Duration::from_secs(5));
    assert!(status.success(), "worker exited with {status:?}");
    let stdout = worker.wait_with_output().unwrap().stdout;
    let stdout = String::from_utf8_lossy(&stdout);
    assert!(stdout.contains("\"termination\":\"peer_closed\""), "{stdout}");
    assert!(stdout.contains("\"tasksHandled\":2"), "{stdout}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn work_without_pipe_name_is_usage_error() {
    let output = taskpipe()
        .arg("work")
        .stdin(Stdio::null())
        .output()
        .expect("work should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn work_against_missing_socket_fails() {
    let missing = unique_temp_dir("missing").join("absent.sock");
    let output = taskpipe()
        .arg("work")
        .arg(&missing)
        .stdin(Stdio::null())
        .output()
        .expect("work should run");

    assert!(!output.status.success());
}

#[test]
fn version_prints_crate_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_taskpipe"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("taskpipe {}", env!("CARGO_PKG_VERSION")));
}
