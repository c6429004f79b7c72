//! Upstream connection and request forwarding
//!
//! A [`Forwarder`] is bound to one backend origin. It rewrites inbound
//! requests for that origin, sends them over a fresh connection and reads
//! the backend's response back into memory for relaying.

use crate::config::Config;
use crate::error::ProxyError;
use crate::http::headers::{Headers, strip_hop_by_hop};
use crate::http::parser::{
    MAX_HEADER_BYTES, ParseError, content_length, decode_chunked, find_headers_end,
    parse_header_lines,
};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Time limits applied to every backend exchange
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    /// Covers sending the request and reading the whole response
    pub request: Duration,
    /// Covers a whole liveness probe, connect included
    pub probe: Duration,
}

impl Timeouts {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            connect: Duration::from_millis(cfg.proxy.connect_timeout_ms),
            request: Duration::from_millis(cfg.proxy.request_timeout_ms),
            probe: Duration::from_millis(cfg.health.probe_timeout_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            request: Duration::from_secs(5),
            probe: Duration::from_secs(2),
        }
    }
}

/// Forwards requests to a single backend origin
#[derive(Debug)]
pub struct Forwarder {
    origin: Url,

    /// `host:port` used to open connections
    authority: String,

    /// Value of the rewritten Host header
    host_header: String,

    /// Origin path prefix without a trailing slash
    base_path: String,

    timeouts: Timeouts,
}

impl Forwarder {
    /// Create a forwarder for an already validated origin.
    pub fn new(origin: Url, timeouts: Timeouts) -> Self {
        let host = origin.host_str().unwrap_or("localhost").to_string();
        let port = origin.port_or_known_default().unwrap_or(80);

        let host_header = match origin.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        let base_path = origin.path().trim_end_matches('/').to_string();

        Self {
            authority: format!("{}:{}", host, port),
            host_header,
            base_path,
            origin,
            timeouts,
        }
    }

    /// Relay `request` to the origin and return its response.
    pub async fn forward(&self, request: &Request) -> Result<Response, ProxyError> {
        self.exchange(request, self.timeouts.request).await
    }

    /// Issue a GET for `path` and return the status the origin answered with.
    pub async fn probe(&self, path: &str) -> Result<StatusCode, ProxyError> {
        let mut headers = Headers::new();
        headers.append("User-Agent", concat!("waypoint-health/", env!("CARGO_PKG_VERSION")));
        headers.append("Accept", "*/*");

        let request = Request {
            method: Method::GET,
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers,
            body: Vec::new(),
        };

        let limit = self.timeouts.probe;
        timeout(limit, self.exchange(&request, limit))
            .await
            .map_err(|_| ProxyError::ResponseTimeout {
                origin: self.origin.to_string(),
            })?
            .map(|response| response.status)
    }

    async fn exchange(&self, request: &Request, response_timeout: Duration) -> Result<Response, ProxyError> {
        let origin = || self.origin.to_string();

        let stream = timeout(self.timeouts.connect, TcpStream::connect(&self.authority))
            .await
            .map_err(|_| ProxyError::ConnectTimeout { origin: origin() })?
            .map_err(|source| ProxyError::Connect {
                origin: origin(),
                source,
            })?;

        tracing::trace!(origin = %self.origin, "Connected to backend");

        timeout(response_timeout, self.send_request_and_receive_response(stream, request))
            .await
            .map_err(|_| ProxyError::ResponseTimeout { origin: origin() })?
    }

    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        request: &Request,
    ) -> Result<Response, ProxyError> {
        let request_bytes = self.build_http_request(request);
        stream
            .write_all(&request_bytes)
            .await
            .map_err(|e| self.upstream_error(e))?;
        stream.flush().await.map_err(|e| self.upstream_error(e))?;

        tracing::trace!("Request sent to backend");

        self.read_http_response(&mut stream, request.method == Method::HEAD)
            .await
    }

    /// Build the request bytes sent to the origin.
    ///
    /// Method, target and body pass through unchanged. Host is rewritten,
    /// hop-by-hop headers are dropped and the upstream connection is
    /// single-use.
    pub fn build_http_request(&self, request: &Request) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(512 + request.body.len());

        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", request.method, self.target_path(&request.path)).as_bytes(),
        );

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove("Expect");
        headers.insert("Host", self.host_header.clone());

        if !request.body.is_empty() || headers.contains("Content-Length") {
            headers.insert("Content-Length", request.body.len().to_string());
        }
        headers.insert("Connection", "close");

        for (key, value) in headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        // End of headers
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        buffer
    }

    /// Join the origin's base path with the inbound request target.
    ///
    /// An absolute-form target contributes only its path and query.
    fn target_path(&self, path: &str) -> String {
        let origin_form;
        let path = match Url::parse(path) {
            Ok(url) if url.has_host() => {
                origin_form = match url.query() {
                    Some(query) => format!("{}?{}", url.path(), query),
                    None => url.path().to_string(),
                };
                origin_form.as_str()
            }
            _ => path,
        };

        match path {
            "" => format!("{}/", self.base_path),
            "*" => "*".to_string(),
            p if p.starts_with('/') => format!("{}{}", self.base_path, p),
            p => format!("{}/{}", self.base_path, p),
        }
    }

    /// Read a full response from the origin.
    ///
    /// Interim 1xx responses are skipped. Chunked bodies are decoded and the
    /// relayed response carries a Content-Length instead.
    pub async fn read_http_response<R>(&self, stream: &mut R, head_only: bool) -> Result<Response, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        let (status, mut headers) = loop {
            let (status, headers) = self.read_response_head(stream, &mut buffer).await?;
            if status.is_informational() && status.as_u16() != 101 {
                continue;
            }
            break (status, headers);
        };

        let body = if head_only || !status.permits_body() {
            Vec::new()
        } else if headers.contains("Transfer-Encoding") {
            let codings: Vec<&str> = headers
                .get_all("Transfer-Encoding")
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|coding| !coding.is_empty())
                .collect();

            // Only a body framed by chunking alone can be relayed with a Content-Length
            match codings.as_slice() {
                [coding] if coding.eq_ignore_ascii_case("chunked") => {
                    self.read_chunked_body(stream, &mut buffer).await?
                }
                _ => {
                    return Err(self.malformed(format!(
                        "unsupported transfer coding: {}",
                        codings.join(", ")
                    )));
                }
            }
        } else {
            let length = content_length(&headers)
                .map_err(|e| self.malformed(format!("{:?}", e)))?;
            match length {
                Some(length) => self.read_exact_body(stream, &mut buffer, length).await?,
                None => self.read_until_close(stream, &mut buffer).await?,
            }
        };

        if headers.contains("Transfer-Encoding") {
            headers.remove("Content-Length");
        }
        strip_hop_by_hop(&mut headers);

        let response = ResponseBuilder::new(status).headers(headers).body(body);

        // A HEAD answer keeps whatever length the origin declared
        if head_only {
            Ok(response.build_without_length())
        } else {
            Ok(response.build())
        }
    }

    async fn read_response_head<R>(
        &self,
        stream: &mut R,
        buffer: &mut BytesMut,
    ) -> Result<(StatusCode, Headers), ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(headers_end) = find_headers_end(&buffer[..]) {
                if headers_end > MAX_HEADER_BYTES {
                    return Err(self.malformed("response headers too large".to_string()));
                }
                let head = buffer.split_to(headers_end + 4);
                return self.parse_response_head(&head[..headers_end]);
            }

            // Prevent unbounded header growth
            if buffer.len() > MAX_HEADER_BYTES {
                return Err(self.malformed("response headers too large".to_string()));
            }

            let n = stream
                .read_buf(buffer)
                .await
                .map_err(|e| self.upstream_error(e))?;
            if n == 0 {
                return Err(self.upstream_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response headers were received",
                )));
            }
        }
    }

    fn parse_response_head(&self, head: &[u8]) -> Result<(StatusCode, Headers), ProxyError> {
        let head = std::str::from_utf8(head)
            .map_err(|_| self.malformed("invalid UTF-8 in response headers".to_string()))?;

        let mut lines = head.split("\r\n");

        let status_line = lines
            .next()
            .ok_or_else(|| self.malformed("empty response".to_string()))?;
        let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

        if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
            return Err(self.malformed(format!("invalid status line: {}", status_line)));
        }

        let status = parts[1]
            .parse::<u16>()
            .ok()
            .and_then(StatusCode::from_u16)
            .ok_or_else(|| self.malformed(format!("invalid status code: {}", parts[1])))?;

        let headers = parse_header_lines(lines)
            .map_err(|_| self.malformed("invalid response header".to_string()))?;

        Ok((status, headers))
    }

    async fn read_exact_body<R>(
        &self,
        stream: &mut R,
        buffer: &mut BytesMut,
        length: usize,
    ) -> Result<Vec<u8>, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        while buffer.len() < length {
            let n = stream
                .read_buf(buffer)
                .await
                .map_err(|e| self.upstream_error(e))?;
            if n == 0 {
                return Err(self.upstream_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before complete body was received",
                )));
            }
        }

        Ok(buffer.split_to(length).to_vec())
    }

    async fn read_chunked_body<R>(&self, stream: &mut R, buffer: &mut BytesMut) -> Result<Vec<u8>, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match decode_chunked(&buffer[..]) {
                Ok((body, _)) => return Ok(body),
                Err(ParseError::Incomplete) => {}
                Err(e) => return Err(self.malformed(format!("bad chunked body: {:?}", e))),
            }

            let n = stream
                .read_buf(buffer)
                .await
                .map_err(|e| self.upstream_error(e))?;
            if n == 0 {
                return Err(self.upstream_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside chunked body",
                )));
            }
        }
    }

    async fn read_until_close<R>(&self, stream: &mut R, buffer: &mut BytesMut) -> Result<Vec<u8>, ProxyError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let n = stream
                .read_buf(buffer)
                .await
                .map_err(|e| self.upstream_error(e))?;
            if n == 0 {
                return Ok(buffer.split().to_vec());
            }
        }
    }

    fn upstream_error(&self, source: io::Error) -> ProxyError {
        ProxyError::Upstream {
            origin: self.origin.to_string(),
            source,
        }
    }

    fn malformed(&self, reason: String) -> ProxyError {
        ProxyError::MalformedResponse {
            origin: self.origin.to_string(),
            reason,
        }
    }
}
