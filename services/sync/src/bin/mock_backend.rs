//! Mock monitoring backend for testing
//!
//! A simple mock backend that speaks the sync wire protocol: it assigns a
//! session id on connect (or accepts a resume frame), pushes a run
//! snapshot, echoes commands as check events, and emits a periodic check
//! for every started monitor.
//!
//! Usage:
//!   mock_backend [--port PORT]
//!
//! The port can also be set via the MOCK_BACKEND_PORT environment variable.
//! Command line argument takes precedence over environment variable.
//! Default port is 8080.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A monitor the mock pretends to probe
#[derive(Clone)]
struct MockMonitor {
    project_id: String,
    url: String,
    interval: u64,
    running: bool,
}

type Monitors = Arc<Mutex<HashMap<String, MockMonitor>>>;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Port from `--port N`, `--port=N`, or a bare numeric argument
fn port_from_args<I: Iterator<Item = String>>(mut args: I) -> Option<u16> {
    while let Some(arg) = args.next() {
        if arg == "--port" {
            return args.next().and_then(|s| s.parse().ok());
        }
        if let Some(value) = arg.strip_prefix("--port=") {
            return value.parse().ok();
        }
        if let Ok(port) = arg.parse() {
            return Some(port);
        }
    }
    None
}

fn main() {
    // Port priority: command line arg > environment variable > default (8080)
    let port = port_from_args(std::env::args().skip(1))
        .or_else(|| {
            std::env::var("MOCK_BACKEND_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(8080u16);

    eprintln!("Mock backend starting on port {}", port);

    let listener = match TcpListener::bind(format!("127.0.0.1:{}", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let monitors: Monitors = Arc::new(Mutex::new(HashMap::new()));

    // Set a timeout so we can check shutdown flag periodically
    listener
        .set_nonblocking(true)
        .expect("Cannot set non-blocking");

    eprintln!("Mock backend listening on port {}", port);

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                eprintln!("Connection from {}", addr);
                let shutdown_clone = shutdown.clone();
                let monitors_clone = monitors.clone();
                std::thread::spawn(move || {
                    handle_client(stream, monitors_clone, shutdown_clone);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection available, sleep briefly
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => {
                eprintln!("Accept error: {}", e);
            }
        }
    }

    eprintln!("Mock backend shutting down");
}

fn handle_client(mut stream: TcpStream, monitors: Monitors, shutdown: Arc<AtomicBool>) {
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(1)))
        .ok();
    stream
        .set_write_timeout(Some(std::time::Duration::from_secs(5)))
        .ok();

    let reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to clone stream: {}", e);
            return;
        }
    });
    let mut lines = reader.lines();

    // The client either resumes with a session frame right away or waits
    // for us to assign one. Peek at the first line with the read timeout:
    // a timeout means a fresh anonymous connect.
    let mut session_id: Option<String> = None;
    let mut first_line: Option<String> = None;
    match lines.next() {
        Some(Ok(line)) => {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&line) {
                if let Some(resumed) = v.get("sessionId").and_then(|s| s.as_str()) {
                    if v.get("action").is_none() {
                        eprintln!("Client resumed session {}", resumed);
                        session_id = Some(resumed.to_string());
                    }
                }
            }
            if session_id.is_none() {
                first_line = Some(line);
            }
        }
        Some(Err(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        _ => return,
    }

    let session_id = session_id.unwrap_or_else(|| {
        let id = format!("mock-session-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));
        eprintln!("Assigning session {}", id);
        id
    });
    if writeln!(stream, "{}", serde_json::json!({ "sessionId": session_id })).is_err() {
        return;
    }

    // Run snapshot: everything we currently know about
    let snapshot: Vec<serde_json::Value> = {
        let guard = monitors.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .values()
            .map(|m| {
                serde_json::json!({
                    "siteId": format!("site-{}", m.project_id),
                    "projectId": m.project_id,
                    "url": m.url,
                    "interval": m.interval,
                    "status": if m.running { serde_json::Value::Null } else { serde_json::json!("paused") },
                })
            })
            .collect()
    };
    if writeln!(stream, "{}", serde_json::Value::Array(snapshot)).is_err() {
        return;
    }
    if stream.flush().is_err() {
        return;
    }
    eprintln!("Sent session and snapshot");

    // Replay a command that raced the resume detection
    if let Some(line) = first_line {
        handle_command(&line, &mut stream, &monitors);
    }

    let mut last_push = std::time::Instant::now();

    loop {
        match lines.next() {
            Some(Ok(request)) => {
                if request.is_empty() {
                    continue;
                }
                eprintln!("Received: {}", request);
                handle_command(&request, &mut stream, &monitors);
            }
            Some(Err(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Timeout: push periodic checks and test the shutdown flag
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if last_push.elapsed() >= std::time::Duration::from_secs(1) {
                    last_push = std::time::Instant::now();
                    if push_checks(&mut stream, &monitors).is_err() {
                        break;
                    }
                }
            }
            _ => break,
        }
    }

    eprintln!("Client disconnected");
}

/// Emit one check event per running monitor
fn push_checks(stream: &mut TcpStream, monitors: &Monitors) -> std::io::Result<()> {
    let running: Vec<MockMonitor> = {
        let guard = monitors.lock().unwrap_or_else(|p| p.into_inner());
        guard.values().filter(|m| m.running).cloned().collect()
    };
    for m in running {
        let event = serde_json::json!({
            "projectId": m.project_id,
            "responseTime": 42,
            "statusCode": 200,
        });
        writeln!(stream, "{}", event)?;
    }
    stream.flush()
}

fn handle_command(request: &str, stream: &mut TcpStream, monitors: &Monitors) {
    let req: serde_json::Value = match serde_json::from_str(request) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Unparsable command: {}", e);
            return;
        }
    };

    let action = req.get("action").and_then(|a| a.as_str()).unwrap_or("");
    let website = req.get("website").cloned().unwrap_or(serde_json::Value::Null);
    let project_id = website
        .get("projectId")
        .and_then(|p| p.as_str())
        .unwrap_or("")
        .to_string();
    let url = website
        .get("url")
        .and_then(|u| u.as_str())
        .unwrap_or("")
        .to_string();
    let interval = website.get("interval").and_then(|i| i.as_u64()).unwrap_or(30);

    let mut guard = monitors.lock().unwrap_or_else(|p| p.into_inner());
    match action {
        "start" => {
            guard.insert(
                project_id.clone(),
                MockMonitor {
                    project_id: project_id.clone(),
                    url,
                    interval,
                    running: true,
                },
            );
        }
        "pause" | "stop" => {
            if let Some(m) = guard.get_mut(&project_id) {
                m.running = false;
            }
        }
        "resume" => {
            if let Some(m) = guard.get_mut(&project_id) {
                m.running = true;
            }
            drop(guard);
            // Echo the resume on the next check event
            let event = serde_json::json!({
                "projectId": project_id,
                "responseTime": 42,
                "statusCode": 200,
                "action": "resume",
            });
            let _ = writeln!(stream, "{}", event);
            let _ = stream.flush();
            return;
        }
        "delete" => {
            guard.remove(&project_id);
        }
        "ping" => {
            drop(guard);
            let event = serde_json::json!({
                "projectId": project_id,
                "responseTime": 42,
                "statusCode": 200,
            });
            let _ = writeln!(stream, "{}", event);
            let _ = stream.flush();
            return;
        }
        other => {
            eprintln!("Unknown action: {}", other);
        }
    }
}
