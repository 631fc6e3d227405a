//! HTTP surface for viewers.
//!
//! - `GET /video_feed`: `multipart/x-mixed-replace; boundary=frame`, one JPEG per new frame
//! - `GET /inference_speed`, `GET /people_counter`: `text/event-stream`, one `data:` line per tick
//! - `GET /status`: JSON counters and debouncer state
//! - `GET /health`: liveness
//!
//! Every connection gets its own thread; streaming responses run until the viewer goes
//! away or the server stops.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::StreamSettings;
use crate::live::LiveState;
use crate::pace::Pacer;

const MAX_REQUEST_BYTES: usize = 8192;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const BOUNDARY: &str = "frame";

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open streams end at their next tick.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    settings: StreamSettings,
    live: Arc<LiveState>,
}

impl ApiServer {
    pub fn new(settings: StreamSettings, live: Arc<LiveState>) -> Self {
        Self { settings, live }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .settings
            .listen_addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.settings.listen_addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ConnectionContext {
            settings: self.settings,
            live: self.live,
            shutdown: shutdown.clone(),
            clients: AtomicUsize::new(0),
        });
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("stream api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ConnectionContext {
    settings: StreamSettings,
    live: Arc<LiveState>,
    shutdown: Arc<AtomicBool>,
    clients: AtomicUsize,
}

/// Holds one of the `max_clients` slots until dropped.
struct ClientSlot(Arc<ConnectionContext>);

impl ClientSlot {
    fn acquire(ctx: &Arc<ConnectionContext>) -> Option<Self> {
        let previous = ctx.clients.fetch_add(1, Ordering::SeqCst);
        if previous >= ctx.settings.max_clients {
            ctx.clients.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(ctx.clone()))
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ConnectionContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let Some(slot) = ClientSlot::acquire(&ctx) else {
                    log::warn!("rejecting {}: too many viewers", peer);
                    let _ = stream.set_nonblocking(false);
                    let _ = write_json_response(&mut stream, 503, r#"{"error":"busy"}"#);
                    continue;
                };
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &slot.0) {
                            log::debug!("connection from {} closed: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    match request.path.as_str() {
        "/video_feed" => stream_video(&mut stream, ctx),
        "/inference_speed" => {
            stream_events(&mut stream, ctx, |live| format_metric(live.inference_ms()))
        }
        "/people_counter" => {
            stream_events(&mut stream, ctx, |live| live.object_count().to_string())
        }
        "/status" => {
            let payload = serde_json::to_vec(&ctx.live.status())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// One multipart part per newly encoded frame, paced to the frame interval.
///
/// Ticks without a new frame write nothing, so they check whether the viewer has gone.
fn stream_video(stream: &mut TcpStream, ctx: &ConnectionContext) -> Result<()> {
    write_stream_header(
        stream,
        &format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
    )?;
    let mut pacer = Pacer::new(ctx.settings.frame_interval);
    let mut last_sent = 0u64;
    while !ctx.shutdown.load(Ordering::SeqCst) {
        pacer.wait();
        let fresh = ctx
            .live
            .latest_frame()
            .filter(|frame| frame.sequence != last_sent);
        let Some(frame) = fresh else {
            if peer_closed(stream)? {
                return Ok(());
            }
            continue;
        };
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            frame.jpeg.len()
        );
        stream.write_all(header.as_bytes())?;
        stream.write_all(&frame.jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        last_sent = frame.sequence;
    }
    Ok(())
}

/// Server-sent events carrying the latest value of one metric.
fn stream_events<F>(stream: &mut TcpStream, ctx: &ConnectionContext, value: F) -> Result<()>
where
    F: Fn(&LiveState) -> String,
{
    write_stream_header(stream, "text/event-stream")?;
    let mut pacer = Pacer::new(ctx.settings.metrics_interval);
    while !ctx.shutdown.load(Ordering::SeqCst) {
        pacer.wait();
        let event = format!("data:{}\n\n", value(&ctx.live));
        stream.write_all(event.as_bytes())?;
        stream.flush()?;
    }
    Ok(())
}

/// True once the viewer has closed or reset the connection.
fn peer_closed(stream: &TcpStream) -> Result<bool> {
    stream.set_nonblocking(true)?;
    let mut byte = [0u8; 1];
    let closed = match stream.peek(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    };
    stream.set_nonblocking(false)?;
    Ok(closed)
}

/// Milliseconds with at most two decimals; whole numbers print without a fraction.
fn format_metric(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    format!("{}", (value * 100.0).round() / 100.0)
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
    parse_request(&String::from_utf8_lossy(&data))
}

fn parse_request(text: &str) -> Result<HttpRequest> {
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_stream_header(stream: &mut TcpStream, content_type: &str) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        content_type
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()?;
    Ok(())
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
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_is_parsed() -> Result<()> {
        let request =
            parse_request("GET /video_feed?x=1 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n")?;
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/video_feed");
        assert!(parse_request("").is_err());
        Ok(())
    }

    #[test]
    fn metrics_print_compactly() {
        assert_eq!(format_metric(12.0), "12");
        assert_eq!(format_metric(7.256), "7.26");
        assert_eq!(format_metric(f64::NAN), "0");
    }
}
