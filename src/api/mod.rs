//! HTTP surface.
//!
//! - `GET /video_feed`: annotated MJPEG stream driven by the detection loop
//! - `GET /get_firebase_data`: latest sensor record per device
//! - `GET /get_firebase_logs`: newest sensor records per device
//! - `GET /health`: liveness check
//!
//! One thread per connection. The detection loop is exclusive: while one
//! client streams, other `/video_feed` requests get `503`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

use crate::error::StoreError;
use crate::history::{SensorHistory, DEFAULT_LOG_LIMIT};
use crate::pipeline::DetectionLoop;
use crate::store::SnapshotStore;
use crate::stream::MULTIPART_CONTENT_TYPE;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const NO_DATA_FOUND: &str = "No data found";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Records per device returned by `/get_firebase_logs`.
    pub log_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

/// Resources shared by all connections.
pub struct AppState {
    pipeline: Mutex<DetectionLoop>,
    history: SensorHistory<Arc<dyn SnapshotStore>>,
}

impl AppState {
    pub fn new(pipeline: DetectionLoop, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            pipeline: Mutex::new(pipeline),
            history: SensorHistory::new(store),
        }
    }

    /// Stop the detection loop and close its alert sink.
    ///
    /// Blocks until an active stream releases the loop; call after
    /// `ApiHandle::stop` so streaming connections see the shutdown flag.
    pub fn stop(&self) {
        let mut pipeline = match self.pipeline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pipeline.stop();
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<AppState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                    log::error!("http api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &state, &shutdown) {
                        log::warn!("http request from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &AppState,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.raw_path);

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }
    if request.method != "GET" {
        log::warn!("rejected {} {}: method not allowed", request.method, request.raw_path);
        return write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}));
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        "/video_feed" => stream_video(stream, state, shutdown),
        "/get_firebase_data" => {
            let result = state.history.latest_view();
            write_history_response(&mut stream, result)
        }
        "/get_firebase_logs" => {
            let result = state.history.logs_view(cfg.log_limit);
            write_history_response(&mut stream, result)
        }
        _ => {
            log::warn!("rejected GET {}: no such route", request.raw_path);
            write_json_response(&mut stream, 404, &json!({"error": "not_found"}))
        }
    }
}

fn stream_video(mut stream: TcpStream, state: &AppState, shutdown: &AtomicBool) -> Result<()> {
    let mut pipeline = match state.pipeline.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            log::warn!("rejected /video_feed: stream already in use");
            return write_json_response(&mut stream, 503, &json!({"error": "stream_busy"}));
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            log::warn!("previous stream panicked; reusing detection loop");
            poisoned.into_inner()
        }
    };

    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        MULTIPART_CONTENT_TYPE
    );
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    stream.write_all(header.as_bytes())?;

    let peer = stream.peer_addr()?;
    log::info!("video stream started for {}", peer);
    let mut sent = 0u64;
    for chunk in pipeline.chunks() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Err(err) = stream.write_all(&chunk).and_then(|_| stream.flush()) {
            log::info!("video client {} disconnected after {} frames: {}", peer, sent, err);
            return Ok(());
        }
        sent += 1;
    }
    log::info!("video stream for {} ended after {} frames", peer, sent);
    Ok(())
}

fn write_history_response<T: Serialize>(
    stream: &mut TcpStream,
    result: Result<T, StoreError>,
) -> Result<()> {
    match result {
        Ok(view) => write_json_response(stream, 200, &view),
        Err(StoreError::NotFound(path)) => {
            log::warn!("sensor history missing: {}", path);
            write_json_response(stream, 404, &json!({"error": NO_DATA_FOUND}))
        }
        Err(err) => {
            log::warn!("sensor history read failed: {}", err);
            write_json_response(stream, 502, &json!({"error": err.to_string()}))
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
    })
}

fn write_json_response<T: Serialize + ?Sized>(
    stream: &mut TcpStream,
    status: u16,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, OPTIONS\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
}
