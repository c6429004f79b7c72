//! HTTP/1.1 protocol handling for both sides of the proxy.
//!
//! # Architecture
//!
//! - **`connection`**: The inbound connection handler implementing the request-response state machine
//! - **`headers`**: Ordered, case-insensitive header list and hop-by-hop filtering
//! - **`parser`**: Parses requests, header blocks and chunked bodies from byte buffers
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Dispatch to a backend
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close / shutting down → Closed
//! ```
//!
//! An idle connection in `Reading` is closed as soon as shutdown begins.

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
