use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gesture_hub::api::{ApiHandle, ApiServer};
use gesture_hub::config::StreamSettings;
use gesture_hub::dispatch::DispatchStats;
use gesture_hub::live::LiveState;

fn settings() -> StreamSettings {
    StreamSettings {
        listen_addr: "127.0.0.1:0".to_string(),
        frame_interval: Duration::from_millis(10),
        metrics_interval: Duration::from_millis(10),
        jpeg_quality: 80,
        max_clients: 8,
    }
}

fn start(live: Arc<LiveState>) -> ApiHandle {
    ApiServer::new(settings(), live).spawn().expect("spawn api")
}

fn start_with_clients(live: Arc<LiveState>, max_clients: usize) -> ApiHandle {
    let settings = StreamSettings {
        max_clients,
        ..settings()
    };
    ApiServer::new(settings, live).spawn().expect("spawn api")
}

fn request(addr: SocketAddr, method: &str, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("read timeout");
    let req = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, path);
    stream.write_all(req.as_bytes()).expect("write request");
    stream
}

/// Read until `needle` shows up in the response or five seconds pass.
fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while Instant::now() < deadline {
        if data.windows(needle.len()).any(|w| w == needle) {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            // A reset after a short response still leaves the bytes read so far.
            Err(_) => break,
        }
    }
    data
}

fn read_to_close(stream: &mut TcpStream) -> String {
    let data = read_until(stream, b"\0never\0");
    String::from_utf8_lossy(&data).into_owned()
}

#[test]
fn inference_speed_streams_server_sent_events() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    live.publish_inference(12.5, None, 9.0);
    let handle = start(live.clone());

    let mut stream = request(handle.addr, "GET", "/inference_speed");
    let body = String::from_utf8_lossy(&read_until(&mut stream, b"data:12.5\n\n")).into_owned();
    assert!(body.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(body.contains("Content-Type: text/event-stream"));
    assert!(body.contains("data:12.5\n\n"));

    live.publish_inference(3.0, None, 9.0);
    let body = String::from_utf8_lossy(&read_until(&mut stream, b"data:3\n\n")).into_owned();
    assert!(body.contains("data:3\n\n"));

    drop(stream);
    handle.stop().expect("stop api");
}

#[test]
fn people_counter_reports_detected_objects() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    live.publish_inference(1.0, Some(4), 0.0);
    let handle = start(live);

    let mut stream = request(handle.addr, "GET", "/people_counter");
    let body = String::from_utf8_lossy(&read_until(&mut stream, b"data:4\n\n")).into_owned();
    assert!(body.contains("data:4\n\n"));

    drop(stream);
    handle.stop().expect("stop api");
}

#[test]
fn video_feed_sends_multipart_jpeg_parts() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    let jpeg = vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
    live.publish_frame(1, jpeg.clone());
    let handle = start(live);

    let mut stream = request(handle.addr, "GET", "/video_feed");
    let data = read_until(&mut stream, &[0xFF, 0xD9, b'\r', b'\n']);
    let text = String::from_utf8_lossy(&data);
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 6\r\n\r\n"));
    assert!(data.windows(jpeg.len()).any(|w| w == jpeg.as_slice()));

    drop(stream);
    handle.stop().expect("stop api");
}

#[test]
fn status_and_health_return_json() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    live.record_capture();
    live.record_capture();
    live.record_inference_error();
    let handle = start(live);

    let mut stream = request(handle.addr, "GET", "/status");
    let response = read_to_close(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    let body = response.split("\r\n\r\n").nth(1).expect("body");
    let status: serde_json::Value = serde_json::from_str(body).expect("status json");
    assert_eq!(status["frames_captured"], 2);
    assert_eq!(status["inference_errors"], 1);
    assert_eq!(status["dispatch"]["dropped"], 0);

    let mut stream = request(handle.addr, "GET", "/health");
    let response = read_to_close(&mut stream);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(r#"{"status":"ok"}"#));

    handle.stop().expect("stop api");
}

#[test]
fn unknown_paths_and_methods_are_rejected() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    let handle = start(live);

    let mut stream = request(handle.addr, "GET", "/nope");
    assert!(read_to_close(&mut stream).starts_with("HTTP/1.1 404 Not Found\r\n"));

    let mut stream = request(handle.addr, "POST", "/video_feed");
    assert!(read_to_close(&mut stream).starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

    handle.stop().expect("stop api");
}

#[test]
fn video_viewers_that_leave_before_any_frame_free_their_slots() {
    let live = Arc::new(LiveState::new(Arc::new(DispatchStats::default())));
    let handle = start_with_clients(live, 2);

    for _ in 0..2 {
        let mut viewer = request(handle.addr, "GET", "/video_feed");
        let header = read_until(&mut viewer, b"\r\n\r\n");
        assert!(String::from_utf8_lossy(&header).starts_with("HTTP/1.1 200 OK\r\n"));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut response = String::new();
    while Instant::now() < deadline {
        let mut stream = request(handle.addr, "GET", "/health");
        response = read_to_close(&mut stream);
        if response.starts_with("HTTP/1.1 200 OK\r\n") {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(
        response.starts_with("HTTP/1.1 200 OK\r\n"),
        "viewer slots were not released: {}",
        response
    );

    handle.stop().expect("stop api");
}
