//! Shared fixtures: fake origins on real sockets and an in-memory backend.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use waypoint::error::ProxyError;
use waypoint::http::headers::Headers;
use waypoint::http::parser::{content_length, find_headers_end, parse_header_lines, parse_http_request};
use waypoint::http::request::Request;
use waypoint::http::response::{Response, ResponseBuilder, StatusCode};
use waypoint::proxy::{Backend, LoadBalancer};

/// An HTTP origin answering every request with its own name.
///
/// Liveness probes (identified by their User-Agent) are answered
/// immediately and are not recorded.
pub struct FakeOrigin {
    pub addr: SocketAddr,
    pub name: &'static str,
    pub requests: Arc<Mutex<Vec<Request>>>,
    healthy: Arc<AtomicBool>,
}

impl FakeOrigin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub async fn recorded(&self) -> Vec<Request> {
        self.requests.lock().await.clone()
    }
}

pub async fn spawn_origin(name: &'static str, delay: Duration) -> FakeOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let healthy = Arc::new(AtomicBool::new(true));

    let (recorded, flag) = (Arc::clone(&requests), Arc::clone(&healthy));
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let recorded = Arc::clone(&recorded);
            let flag = Arc::clone(&flag);

            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };

                let is_probe = request
                    .header("User-Agent")
                    .is_some_and(|ua| ua.starts_with("waypoint-health"));

                let reply = if !flag.load(Ordering::SeqCst) {
                    raw_response(503, "Service Unavailable", "down")
                } else if is_probe {
                    raw_response(200, "OK", "ok")
                } else {
                    recorded.lock().await.push(request);
                    tokio::time::sleep(delay).await;
                    raw_response(200, "OK", name)
                };

                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    FakeOrigin {
        addr,
        name,
        requests,
        healthy,
    }
}

/// An origin that reads one request per connection and replies with fixed bytes.
pub async fn spawn_raw_origin(reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_some() {
                    let _ = socket.write_all(reply).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    addr
}

/// An origin that accepts connections and never answers.
pub async fn spawn_silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// An address nothing is listening on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    loop {
        if let Ok((request, _)) = parse_http_request(&buf) {
            return Some(request);
        }
        let mut chunk = [0u8; 1024];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn raw_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nX-Origin: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body,
        body
    )
}

/// Send raw bytes and read until the peer closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out).await;
    String::from_utf8_lossy(&out).into_owned()
}

/// Read exactly one Content-Length framed response from `stream`.
pub async fn read_response(stream: &mut TcpStream) -> (u16, Headers, Vec<u8>) {
    let mut buf = Vec::new();
    loop {
        if let Some(end) = find_headers_end(&buf) {
            let head = std::str::from_utf8(&buf[..end]).unwrap().to_string();
            let mut lines = head.split("\r\n");
            let status: u16 = lines.next().unwrap().split(' ').nth(1).unwrap().parse().unwrap();
            let headers = parse_header_lines(lines).unwrap();
            let length = content_length(&headers).unwrap().unwrap_or(0);

            while buf.len() < end + 4 + length {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed mid-body");
                buf.extend_from_slice(&chunk[..n]);
            }
            return (status, headers, buf[end + 4..end + 4 + length].to_vec());
        }

        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before response");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// In-memory backend with a switchable liveness flag.
pub struct FlagBackend {
    address: String,
    alive: AtomicBool,
    probe_delay: Duration,
    pub probes: AtomicUsize,
    pub forwards: AtomicUsize,
}

impl FlagBackend {
    pub fn new(address: &str, alive: bool) -> Arc<Self> {
        Self::with_probe_delay(address, alive, Duration::ZERO)
    }

    /// A backend whose liveness answer takes `delay`, yielding meanwhile.
    pub fn with_probe_delay(address: &str, alive: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            alive: AtomicBool::new(alive),
            probe_delay: delay,
            probes: AtomicUsize::new(0),
            forwards: AtomicUsize::new(0),
        })
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FlagBackend {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_alive(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        self.alive.load(Ordering::SeqCst)
    }

    async fn forward(&self, _request: &Request) -> Result<Response, ProxyError> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseBuilder::new(StatusCode::OK)
            .body(self.address.as_bytes().to_vec())
            .build())
    }
}

/// Build flag backends and a balancer over them, in the given order.
pub fn flag_pool(spec: &[(&str, bool)]) -> (Vec<Arc<FlagBackend>>, LoadBalancer) {
    slow_flag_pool(spec, Duration::ZERO)
}

/// Like [`flag_pool`], with every liveness answer taking `delay`.
pub fn slow_flag_pool(spec: &[(&str, bool)], delay: Duration) -> (Vec<Arc<FlagBackend>>, LoadBalancer) {
    let flags: Vec<Arc<FlagBackend>> = spec
        .iter()
        .map(|(address, alive)| FlagBackend::with_probe_delay(address, *alive, delay))
        .collect();
    let backends = flags
        .iter()
        .map(|b| Arc::clone(b) as Arc<dyn Backend>)
        .collect();

    (flags, LoadBalancer::new(backends).unwrap())
}
