//! Minimal HTTP/1.1 front end for the MJPEG stream.
//!
//! Routes:
//! - `GET /` serves a page embedding the stream.
//! - `GET /video_feed` streams `multipart/x-mixed-replace` parts, one HTTP
//!   chunk per frame, until the capture session ends or the client leaves.
//! - `GET /health` reports liveness and the current viewer count.

mod hub;

pub use hub::{FrameHub, ProviderFactory, Subscription};

use anyhow::{anyhow, Context, Result};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{AppConfig, CaptureConfig};
use crate::encode::{multipart_content_type, StreamEncoder};
use crate::ingest::{DeviceProvider, SourceProvider};

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub const INDEX_HTML: &str = r#"<html>
  <head><title>USB MJPEG Camera</title></head>
  <body>
    <h1>USB MJPEG Camera</h1>
    <img src="/video_feed"/>
  </body>
</html>
"#;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub capture: CaptureConfig,
    pub jpeg_quality: u8,
    /// Upper bound on a single write to a viewer before it is dropped.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl ServerConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            addr: app.bind_addr(),
            capture: app.capture.clone(),
            jpeg_quality: app.jpeg_quality,
            write_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    hub: FrameHub,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Viewers currently attached to `/video_feed`.
    pub fn subscribers(&self) -> usize {
        self.hub.subscribers()
    }

    /// Stop accepting, end every open stream and release the device.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.hub.shutdown();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("video server thread panicked"))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

pub struct VideoServer {
    cfg: ServerConfig,
    providers: ProviderFactory,
}

impl VideoServer {
    pub fn new(cfg: ServerConfig) -> Self {
        Self::with_provider(
            cfg,
            Arc::new(|| Box::new(DeviceProvider) as Box<dyn SourceProvider>),
        )
    }

    /// Serve frames from sources built by `providers` instead of the real
    /// devices.
    pub fn with_provider(cfg: ServerConfig, providers: ProviderFactory) -> Self {
        Self { cfg, providers }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind video server to {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let hub = FrameHub::new(
            self.cfg.capture.clone(),
            StreamEncoder::new(self.cfg.jpeg_quality),
            self.providers,
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let hub_thread = hub.clone();
        let write_timeout = self.cfg.write_timeout;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, hub_thread, write_timeout, shutdown_thread) {
                log::error!("video server stopped: {}", err);
            }
        });

        log::info!("video server listening on http://{}", addr);
        Ok(ServerHandle {
            addr,
            hub,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    hub: FrameHub,
    write_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &hub, write_timeout) {
                        log::warn!("video server request from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) if is_fatal_accept_error(&err) => return Err(err.into()),
            Err(err) => {
                log::warn!("video server accept failed: {}; retrying", err);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    Ok(())
}

/// Whether the listening socket itself is unusable. Everything else
/// (aborted handshakes, descriptor exhaustion, interrupted calls) only costs
/// one connection.
fn is_fatal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    )
}

fn handle_connection(mut stream: TcpStream, hub: &FrameHub, write_timeout: Duration) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(write_timeout))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes()),
        "/video_feed" => stream_video(&mut stream, hub),
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "subscribers": hub.subscribers(),
            });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn stream_video(stream: &mut TcpStream, hub: &FrameHub) -> Result<()> {
    let mut subscription = hub.subscribe();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n",
        multipart_content_type()
    );
    stream.write_all(header.as_bytes())?;

    let mut sent = 0u64;
    while let Some(part) = subscription.next_frame() {
        if let Err(err) = write_chunk(stream, part.as_bytes()) {
            log::info!("video_feed: viewer left after {} frames ({})", sent, err);
            return Ok(());
        }
        sent += 1;
    }
    stream.write_all(b"0\r\n\r\n")?;
    stream.flush()?;
    log::info!("video_feed: stream ended after {} frames", sent);
    Ok(())
}

fn write_chunk(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(format!("{:x}\r\n", data.len()).as_bytes())?;
    stream.write_all(data)?;
    stream.write_all(b"\r\n")?;
    stream.flush()
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
    parse_request(&data)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\
         Cache-Control: no-store\r\nConnection: close\r\n\r\n",
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
}
