//! Shared helpers for integration tests.

#![allow(dead_code)]

use kiln::dev::{BuildEngine, BuildEvent, ControlChannel, PortAllocator, WatchContext};
use kiln::DevError;
use parking_lot::Mutex;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

/// One step of a scripted build engine.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(BuildEvent),
    Write(PathBuf, String),
    Sleep(Duration),
}

/// Build engine that plays a fixed script, then waits for cancellation.
#[derive(Default)]
pub struct ScriptedEngine {
    steps: Vec<Step>,
    setup_error: Option<String>,
    stop_error: Option<String>,
    pub watch_calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            ..Self::default()
        })
    }

    /// Plays `steps`, then fails with `message` once stopped.
    pub fn failing_stop(steps: Vec<Step>, message: &str) -> Arc<Self> {
        Arc::new(Self {
            steps,
            stop_error: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn failing_setup(message: &str) -> Arc<Self> {
        Arc::new(Self {
            setup_error: Some(message.to_string()),
            ..Self::default()
        })
    }
}

impl BuildEngine for ScriptedEngine {
    fn watch(&self, ctx: WatchContext) -> Result<JoinHandle<Result<(), DevError>>, DevError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.setup_error {
            return Err(DevError::EngineSetup(message.clone()));
        }

        let steps = self.steps.clone();
        let stop_error = self.stop_error.clone();
        Ok(tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Emit(event) => {
                        if !ctx.emit(event).await {
                            return Ok(());
                        }
                    }
                    Step::Write(path, content) => {
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent).unwrap();
                        }
                        std::fs::write(path, content).unwrap();
                    }
                    Step::Sleep(duration) => {
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(duration) => {}
                        }
                    }
                }
            }
            ctx.cancel.cancelled().await;
            match stop_error {
                Some(message) => Err(DevError::Server(message)),
                None => Ok(()),
            }
        }))
    }
}

/// Tracing writer that keeps everything in memory.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Install as the default subscriber for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Allocator that counts probes and reports every port free.
#[derive(Clone, Default)]
pub struct CountingAllocator {
    pub probes: Arc<AtomicUsize>,
}

impl PortAllocator for CountingAllocator {
    fn is_free(&self, _port: u16) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Unbound channel that records every LOG line it echoes.
pub fn recording_channel() -> (ControlChannel, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let channel = ControlChannel::with_log_sink(
        Duration::ZERO,
        Arc::new(move |line: &str| sink.lock().push(line.to_string())),
    );
    (channel, lines)
}

/// Receive until `done` matches a message or nothing arrives for a while.
pub async fn collect_until(
    rx: &mut mpsc::Receiver<String>,
    done: impl Fn(&[String]) -> bool,
) -> Vec<String> {
    let mut messages = Vec::new();
    while !done(&messages) {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(message)) => messages.push(message),
            _ => break,
        }
    }
    messages
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Minimal HTTP/1.1 GET returning the raw response.
pub async fn http_get(port: u16, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Open a WebSocket over a raw TCP stream and return it after the `101`.
pub async fn ws_connect(port: u16) -> (tokio::net::TcpStream, String) {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!(
        "GET /socket HTTP/1.1\r\n\
         Host: 127.0.0.1:{}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        port
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // Read byte by byte so no frame data is consumed with the headers.
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.unwrap();
        head.push(byte);
    }
    (stream, String::from_utf8_lossy(&head).into_owned())
}

/// Read one unmasked server frame, returning its opcode and payload.
pub async fn ws_read_frame(stream: &mut tokio::net::TcpStream) -> (u8, Vec<u8>) {
    let first = stream.read_u8().await.unwrap();
    let second = stream.read_u8().await.unwrap();
    let len = match second & 0x7f {
        126 => stream.read_u16().await.unwrap() as usize,
        127 => stream.read_u64().await.unwrap() as usize,
        len => len as usize,
    };
    let mut payload = vec![0; len];
    stream.read_exact(&mut payload).await.unwrap();
    (first & 0x0f, payload)
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
