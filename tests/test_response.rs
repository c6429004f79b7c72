use waypoint::http::response::{Response, ResponseBuilder, StatusCode};
use waypoint::http::writer::serialize_response;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::OK.as_u16(), 200);
    assert_eq!(StatusCode::NO_CONTENT.as_u16(), 204);
    assert_eq!(StatusCode::BAD_GATEWAY.as_u16(), 502);
    assert_eq!(StatusCode::SERVICE_UNAVAILABLE.as_u16(), 503);
    assert_eq!(StatusCode::GATEWAY_TIMEOUT.as_u16(), 504);
}

#[test]
fn test_status_code_from_u16() {
    assert_eq!(StatusCode::from_u16(418).map(|s| s.as_u16()), Some(418));
    assert_eq!(StatusCode::from_u16(200), Some(StatusCode::OK));
    assert_eq!(StatusCode::from_u16(99), None);
    assert_eq!(StatusCode::from_u16(1000), None);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::BAD_GATEWAY.reason_phrase(), "Bad Gateway");
    assert_eq!(StatusCode::from_u16(599).unwrap().reason_phrase(), "");
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .header("Set-Cookie", "a=1")
        .header("Set-Cookie", "b=2")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("content-type"), Some("text/plain"));
    assert_eq!(response.headers.get_all("Set-Cookie").count(), 2);
}

#[test]
fn test_response_builder_auto_content_length() {
    let body = b"This is the body".to_vec();
    let response = ResponseBuilder::new(StatusCode::OK).body(body.clone()).build();

    assert_eq!(response.headers.get("Content-Length"), Some(body.len().to_string().as_str()));
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("content-length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length"), Some("999"));
    assert_eq!(response.headers.len(), 1);
}

#[test]
fn test_response_builder_no_length_for_bodiless_status() {
    let response = ResponseBuilder::new(StatusCode::NO_CONTENT).build();

    assert!(response.body.is_empty());
    assert!(!response.headers.contains("Content-Length"));
}

#[test]
fn test_text_response() {
    let response = Response::text(StatusCode::SERVICE_UNAVAILABLE, "No backend servers are available.");

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers.get("Content-Type").unwrap().starts_with("text/plain"));
    assert!(String::from_utf8_lossy(&response.body).starts_with("503 Service Unavailable"));
}

#[test]
fn test_serialize_response_sets_connection() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Connection", "close")
        .header("X-Origin", "a")
        .body(b"hi".to_vec())
        .build();

    let raw = String::from_utf8(serialize_response(&response, true)).unwrap();

    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(raw.contains("X-Origin: a\r\n"));
    assert!(raw.contains("Connection: keep-alive\r\n"));
    assert!(!raw.contains("Connection: close"));
    assert!(raw.ends_with("\r\n\r\nhi"));
}

#[test]
fn test_serialize_response_close() {
    let raw = String::from_utf8(serialize_response(&Response::bad_request(), false)).unwrap();

    assert!(raw.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(raw.contains("Connection: close\r\n"));
}
