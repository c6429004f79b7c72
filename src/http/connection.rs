use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::LoadBalancer;

/// One inbound client connection
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    state: ConnectionState,
    balancer: Arc<LoadBalancer>,
    shutdown: watch::Receiver<bool>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Malformed(ParseError),
    Closed,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        balancer: Arc<LoadBalancer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            balancer,
            shutdown,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Malformed(e) => {
                        tracing::debug!(peer = %self.peer, error = ?e, "Rejecting malformed request");
                        let response = parse_error_response(&e);
                        ConnectionState::Writing(ResponseWriter::new(&response, false), false)
                    }
                    ReadOutcome::Closed => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    // A request read before shutdown is still answered, but
                    // the connection ends with it.
                    let keep_alive = req.keep_alive() && !self.shutting_down();
                    let response = self.handle_request(req).await;

                    ConnectionState::Writing(ResponseWriter::new(&response, keep_alive), keep_alive)
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Ok(ReadOutcome::Malformed(e)),
            }

            // Between requests the connection is idle and shutdown closes it.
            let idle = self.buffer.is_empty();
            if idle && self.shutting_down() {
                return Ok(ReadOutcome::Closed);
            }

            let n = if idle {
                tokio::select! {
                    res = self.stream.read_buf(&mut self.buffer) => res?,
                    _ = self.shutdown.changed() => return Ok(ReadOutcome::Closed),
                }
            } else {
                self.stream.read_buf(&mut self.buffer).await?
            };

            if n == 0 {
                // Client closed connection
                return Ok(ReadOutcome::Closed);
            }
        }
    }

    async fn handle_request(&self, mut req: Request) -> Response {
        req.add_forwarded_for(self.peer.ip());

        match self.balancer.dispatch(&req).await {
            Ok(response) => response,
            Err(e) => e.to_response(),
        }
    }
}

fn parse_error_response(e: &ParseError) -> Response {
    match e {
        ParseError::HeadersTooLarge => Response::text(
            StatusCode::HEADER_FIELDS_TOO_LARGE,
            "The request header block is too large.",
        ),
        ParseError::BodyTooLarge => Response::text(
            StatusCode::CONTENT_TOO_LARGE,
            "The request body is too large.",
        ),
        ParseError::UnsupportedTransferEncoding => Response::text(
            StatusCode::NOT_IMPLEMENTED,
            "The request transfer coding is not supported.",
        ),
        _ => Response::bad_request(),
    }
}
