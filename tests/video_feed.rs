use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use usbcam_mjpeg::server::{ServerConfig, ServerHandle, VideoServer};
use usbcam_mjpeg::CaptureConfig;

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

fn start(device: &str, framerate: u32) -> Result<ServerHandle> {
    let cfg = ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        capture: CaptureConfig::new(device, 32, 24, framerate),
        jpeg_quality: 75,
        write_timeout: Duration::from_secs(2),
    };
    VideoServer::new(cfg).spawn()
}

fn connect(addr: SocketAddr, method: &str, path: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    write!(stream, "{method} {path} HTTP/1.1\r\nHost: camera\r\n\r\n")?;
    Ok(stream)
}

fn fetch(addr: SocketAddr, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = connect(addr, method, path)?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("no header terminator"))?;
    let head = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((head, response[split + 4..].to_vec()))
}

fn subscribers(addr: SocketAddr) -> Result<u64> {
    let (head, body) = fetch(addr, "GET", "/health")?;
    assert!(head.starts_with("HTTP/1.1 200"));
    let json: Value = serde_json::from_slice(&body)?;
    assert_eq!(json["status"], "ok");
    json["subscribers"]
        .as_u64()
        .ok_or_else(|| anyhow!("missing subscriber count"))
}

/// Client side of a `/video_feed` response: headers, then one multipart part
/// per HTTP chunk.
struct FeedClient {
    reader: BufReader<TcpStream>,
    head: String,
}

impl FeedClient {
    fn open(addr: SocketAddr) -> Result<Self> {
        let mut reader = BufReader::new(connect(addr, "GET", "/video_feed")?);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(anyhow!("connection closed inside headers"));
            }
            if line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        Ok(Self { reader, head })
    }

    /// Next part, or `None` at the terminating zero-length chunk.
    fn next_part(&mut self) -> Result<Option<Vec<u8>>> {
        let mut size_line = String::new();
        self.reader.read_line(&mut size_line)?;
        let size = usize::from_str_radix(size_line.trim(), 16)?;
        let mut data = vec![0u8; size + 2];
        self.reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(anyhow!("chunk not terminated by CRLF"));
        }
        data.truncate(size);
        Ok(if size == 0 { None } else { Some(data) })
    }
}

fn assert_jpeg_part(part: &[u8]) {
    assert!(part.starts_with(PART_HEADER), "bad part header");
    assert!(part.ends_with(b"\r\n"));
    let jpeg = &part[PART_HEADER.len()..part.len() - 2];
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
}

fn wait_for(mut check: impl FnMut() -> Result<bool>) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check()? {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    Err(anyhow!("condition not reached in time"))
}

#[test]
fn index_page_embeds_the_stream() -> Result<()> {
    let handle = start("stub://index", 30)?;
    let (head, body) = fetch(handle.addr, "GET", "/")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: text/html"));
    let html = String::from_utf8(body)?;
    assert!(html.contains(r#"<img src="/video_feed"/>"#));

    // Serving the page does not touch the camera.
    assert_eq!(subscribers(handle.addr)?, 0);
    handle.stop()
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let handle = start("stub://errors", 30)?;
    let (head, _) = fetch(handle.addr, "GET", "/snapshot.jpg")?;
    assert!(head.starts_with("HTTP/1.1 404"));
    let (head, _) = fetch(handle.addr, "POST", "/video_feed")?;
    assert!(head.starts_with("HTTP/1.1 405"));
    handle.stop()
}

#[test]
fn video_feed_streams_multipart_jpeg_parts() -> Result<()> {
    let handle = start("stub://feed", 60)?;
    let mut client = FeedClient::open(handle.addr)?;
    assert!(client.head.starts_with("HTTP/1.1 200 OK"));
    assert!(client
        .head
        .contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(client.head.contains("Transfer-Encoding: chunked"));

    for _ in 0..3 {
        let part = client.next_part()?.ok_or_else(|| anyhow!("stream ended early"))?;
        assert_jpeg_part(&part);
    }
    handle.stop()
}

#[test]
fn two_viewers_share_one_session() -> Result<()> {
    let handle = start("stub://shared", 60)?;
    let mut a = FeedClient::open(handle.addr)?;
    let mut b = FeedClient::open(handle.addr)?;
    assert_eq!(subscribers(handle.addr)?, 2);

    for client in [&mut a, &mut b] {
        let mut previous: Option<Vec<u8>> = None;
        for _ in 0..4 {
            let part = client.next_part()?.ok_or_else(|| anyhow!("stream ended early"))?;
            assert_jpeg_part(&part);
            // The test pattern moves every frame, so a repeated part would
            // mean a frame was delivered twice.
            assert_ne!(previous.as_ref(), Some(&part));
            previous = Some(part);
        }
    }

    // One viewer leaving does not disturb the other.
    drop(a);
    wait_for(|| Ok(subscribers(handle.addr)? == 1))?;
    let part = b.next_part()?.ok_or_else(|| anyhow!("stream ended early"))?;
    assert_jpeg_part(&part);

    drop(b);
    wait_for(|| Ok(subscribers(handle.addr)? == 0))?;
    handle.stop()
}

#[test]
fn stream_end_terminates_the_response() -> Result<()> {
    // Three frames per tier, then both tiers are exhausted.
    let handle = start("stub://short?frames=3", 20)?;
    let mut client = FeedClient::open(handle.addr)?;
    let mut parts = 0;
    while let Some(part) = client.next_part()? {
        assert_jpeg_part(&part);
        parts += 1;
    }
    assert!((1..=6).contains(&parts), "got {parts} parts");

    // A new viewer starts a fresh session from the preferred tier.
    let mut again = FeedClient::open(handle.addr)?;
    assert!(again.next_part()?.is_some());
    drop(again);
    handle.stop()
}

#[test]
fn unavailable_camera_ends_the_stream_immediately() -> Result<()> {
    let handle = start("stub://gone?preferred=fail&fallback=fail", 30)?;
    let mut client = FeedClient::open(handle.addr)?;
    assert!(client.head.starts_with("HTTP/1.1 200 OK"));
    assert!(client.next_part()?.is_none());
    handle.stop()
}

#[test]
fn stopping_the_server_closes_open_streams() -> Result<()> {
    let handle = start("stub://stop", 60)?;
    let mut client = FeedClient::open(handle.addr)?;
    assert!(client.next_part()?.is_some());
    handle.stop()?;

    // Any parts already in flight, then the terminator.
    while client.next_part()?.is_some() {}
    Ok(())
}
