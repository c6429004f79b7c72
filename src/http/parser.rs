use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Upper bound on the request line plus header block.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a buffered request body, after de-chunking.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    UnsupportedTransferEncoding,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. A chunked body
/// is decoded and the request is rewritten to carry a Content-Length.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) if end > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || path.is_empty() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let mut headers = parse_header_lines(lines)?;

    let (body, body_consumed) = if let Some(coding) = headers.get("Transfer-Encoding") {
        if !coding.trim().eq_ignore_ascii_case("chunked") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        let (body, consumed) = match decode_chunked(body_bytes) {
            // Bound the buffered encoding as well as the decoded body
            Err(ParseError::Incomplete) if body_bytes.len() > 2 * MAX_BODY_BYTES => {
                return Err(ParseError::BodyTooLarge);
            }
            result => result?,
        };
        if body.len() > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge);
        }
        headers.remove("Transfer-Encoding");
        headers.insert("Content-Length", body.len().to_string());
        (body, consumed)
    } else {
        let content_length = content_length(&headers)?.unwrap_or(0);
        if content_length > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge);
        }
        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }
        (body_bytes[..content_length].to_vec(), content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    Ok((request, headers_end + 4 + body_consumed))
}

/// Parses `Name: value` lines up to the end of the header block.
pub fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        if key.is_empty() || key.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

/// Reads Content-Length, rejecting conflicting repeated values.
pub fn content_length(headers: &Headers) -> Result<Option<usize>, ParseError> {
    let mut found = None;

    for value in headers.get_all("Content-Length") {
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?;
        if found.is_some_and(|prior| prior != parsed) {
            return Err(ParseError::InvalidContentLength);
        }
        found = Some(parsed);
    }

    Ok(found)
}

/// Decodes a chunked body from the front of `buf`.
///
/// Returns the decoded bytes and how many input bytes the encoding used,
/// including the terminating chunk and any trailer section.
pub fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)? + pos;
        let size_line = std::str::from_utf8(&buf[pos..line_end]).map_err(|_| ParseError::InvalidChunk)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos = line_end + 2;

        if size == 0 {
            // Trailer section ends at an empty line
            loop {
                let trailer_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)? + pos;
                let empty = trailer_end == pos;
                pos = trailer_end + 2;
                if empty {
                    return Ok((body, pos));
                }
            }
        }

        let data_end = pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
        if buf.len() < data_end + 2 {
            return Err(ParseError::Incomplete);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }

        body.extend_from_slice(&buf[pos..data_end]);
        pos = data_end + 2;
    }
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
