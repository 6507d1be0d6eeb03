use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use insect_watch::{
    encode_jpeg, CameraConfig, Frame, FrameSource, LineNotifier, MjpegSource, Notifier,
    RestSnapshotStore, SnapshotStore, StoreCredentials, StoreError,
};

type Requests = Arc<Mutex<Vec<String>>>;

/// Serve every connection with `respond`, recording each raw request.
fn serve<F>(respond: F) -> (SocketAddr, Requests)
where
    F: Fn(&str) -> (u16, &'static str, Vec<u8>) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let request = read_request(&mut stream);
            seen.lock().unwrap().push(request.clone());
            let (status, content_type, body) = respond(&request);
            let head = format!(
                "HTTP/1.1 {} Test\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                content_type,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    (addr, requests)
}

fn read_request(stream: &mut TcpStream) -> String {
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + body_len {
                break;
            }
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn store_at(addr: SocketAddr) -> RestSnapshotStore {
    let credentials: StoreCredentials = serde_json::from_value(serde_json::json!({
        "database_url": format!("http://{}/", addr),
        "auth_token": "tok"
    }))
    .unwrap();
    RestSnapshotStore::new(&credentials, Duration::from_secs(2))
}

#[test]
fn store_reads_path_with_auth_query() {
    let (addr, requests) = serve(|_| {
        (200, "application/json", br#"{"a":{"timestamp":1}}"#.to_vec())
    });
    let value = store_at(addr).read("/Client/SensorData").unwrap();
    assert_eq!(value, serde_json::json!({"a": {"timestamp": 1}}));

    let requests = requests.lock().unwrap();
    assert!(requests[0].starts_with("GET /Client/SensorData.json?auth=tok HTTP/1.1"));
}

#[test]
fn store_maps_null_body_to_not_found() {
    let (addr, requests) = serve(|_| (200, "application/json", b"null".to_vec()));
    let err = store_at(addr).read("/").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{}", err);
    assert!(requests.lock().unwrap()[0].starts_with("GET /.json?auth=tok "));
}

#[test]
fn store_maps_status_and_transport_errors_to_unreachable() {
    let (addr, _) = serve(|_| {
        (401, "application/json", br#"{"error":"Permission denied"}"#.to_vec())
    });
    let err = store_at(addr).read("/").unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(ref msg) if msg.contains("401")), "{}", err);

    let closed = TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_addr = closed.local_addr().unwrap();
    drop(closed);
    let err = store_at(closed_addr).read("/").unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)), "{}", err);
}

#[test]
fn store_rejects_non_json_body() {
    let (addr, _) = serve(|_| (200, "text/html", b"<html>".to_vec()));
    let err = store_at(addr).read("/").unwrap_err();
    assert!(matches!(err, StoreError::Malformed(_)), "{}", err);
}

#[test]
fn notifier_posts_form_message_with_bearer_token() {
    let (addr, requests) = serve(|_| (200, "application/json", br#"{"status":200}"#.to_vec()));
    let notifier = LineNotifier::new(
        format!("http://{}/api/notify", addr),
        "line-token",
        Duration::from_secs(2),
    )
    .unwrap();
    notifier.notify("Insect detected").unwrap();

    let requests = requests.lock().unwrap();
    let request = &requests[0];
    let lower = request.to_lowercase();
    assert!(request.starts_with("POST /api/notify HTTP/1.1"));
    assert!(lower.contains("authorization: bearer line-token"));
    assert!(lower.contains("content-type: application/x-www-form-urlencoded"));
    assert!(request.ends_with("message=Insect+detected"));
}

#[test]
fn notifier_treats_anything_but_200_as_failure() {
    for status in [201u16, 401, 500] {
        let (addr, requests) = serve(move |_| (status, "application/json", b"{}".to_vec()));
        let notifier = LineNotifier::new(
            format!("http://{}/api/notify", addr),
            "line-token",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = notifier.notify("Insect detected").unwrap_err();
        assert!(err.to_string().contains(&status.to_string()), "{}", err);
        // sent exactly once, never retried
        assert_eq!(requests.lock().unwrap().len(), 1);
    }
}

#[test]
fn snapshot_camera_is_polled_at_the_target_rate() {
    let jpeg = encode_jpeg(&Frame::solid(16, 12, [40, 80, 120]), 90).unwrap();
    let (addr, requests) = serve(move |_| (200, "image/jpeg", jpeg.clone()));

    let mut source = MjpegSource::new(CameraConfig {
        source: format!("http://{}/capture", addr),
        target_fps: 10,
        width: 16,
        height: 12,
    })
    .unwrap();
    source.connect().unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.dimensions(), (16, 12));
    }

    // one request to connect, then one per frame
    assert_eq!(requests.lock().unwrap().len(), 4);
    assert!(started.elapsed() >= Duration::from_millis(190));
    assert_eq!(source.stats().frames_captured, 3);
}
