//! Single-shot request/response client for the live session protocol.
//!
//! One request per TCP connection: connect, write one JSON object, read until
//! a complete JSON value parses or the peer closes. Every failure comes back
//! as a [`ClientError`] value; no retries happen here.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::SessionConfig;

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot resolve {addr}")]
    Resolve { addr: String },
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed without a response")]
    Closed,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Errors that mean nothing is listening, as opposed to a broken exchange.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClientError::Resolve { .. } | ClientError::Connect { .. }
        )
    }
}

pub type Response = Result<Value, ClientError>;

/// The live session as seen by the pipeline.
pub trait SessionClient {
    /// Send one command and wait up to `timeout` for its reply.
    fn send(&self, command: &str, params: Value, timeout: Duration) -> Response;

    /// Bare TCP connect probe.
    fn is_port_open(&self, timeout: Duration) -> bool;
}

/// TCP client for the live session bridge.
#[derive(Debug, Clone)]
pub struct TcpSessionClient {
    host: String,
    port: u16,
    command_field: String,
}

impl TcpSessionClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            command_field: "type".to_string(),
        }
    }

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            command_field: cfg.command_field.clone(),
        }
    }

    pub fn with_command_field(mut self, field: impl Into<String>) -> Self {
        self.command_field = field.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn socket_addr(&self) -> Result<SocketAddr, ClientError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ClientError::Resolve {
                addr: self.address(),
            })
    }

    fn request_bytes(&self, command: &str, params: Value) -> Result<Vec<u8>, ClientError> {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let mut request = Map::new();
        request.insert(
            self.command_field.clone(),
            Value::String(command.to_string()),
        );
        request.insert("params".to_string(), params);
        serde_json::to_vec(&Value::Object(request))
            .map_err(|e| ClientError::Malformed(format!("serialize request: {e}")))
    }

    fn exchange(&self, command: &str, params: Value, timeout: Duration) -> Response {
        let addr = self.socket_addr()?;
        let started = Instant::now();
        let mut stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|source| ClientError::Connect {
                addr: self.address(),
                source,
            })?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_read_timeout(Some(timeout))?;

        let payload = self.request_bytes(command, params)?;
        stream.write_all(&payload).map_err(|e| timeout_or_io(e, timeout))?;
        stream.flush()?;

        read_response(&mut stream, started, timeout)
    }
}

impl SessionClient for TcpSessionClient {
    #[instrument(skip(self, params), fields(addr = %self.address()))]
    fn send(&self, command: &str, params: Value, timeout: Duration) -> Response {
        let result = self.exchange(command, params, timeout);
        match &result {
            Ok(_) => debug!("command answered"),
            Err(err) if err.is_unreachable() => debug!(err = %err, "session unreachable"),
            Err(err) => warn!(err = %err, "command failed"),
        }
        result
    }

    fn is_port_open(&self, timeout: Duration) -> bool {
        match self.socket_addr() {
            Ok(addr) => TcpStream::connect_timeout(&addr, timeout).is_ok(),
            Err(_) => false,
        }
    }
}

fn read_response<R: Read>(reader: &mut R, started: Instant, timeout: Duration) -> Response {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        if started.elapsed() > timeout {
            return Err(ClientError::Timeout(timeout));
        }
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(timeout_or_io(e, timeout)),
        };
        if n == 0 {
            return if buf.is_empty() {
                Err(ClientError::Closed)
            } else {
                parse_complete(&buf)
            };
        }
        buf.extend_from_slice(&chunk[..n]);
        match serde_json::from_slice::<Value>(&buf) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_eof() => continue,
            Err(e) => return Err(ClientError::Malformed(e.to_string())),
        }
    }
}

fn parse_complete(buf: &[u8]) -> Response {
    serde_json::from_slice::<Value>(buf).map_err(|e| ClientError::Malformed(e.to_string()))
}

fn timeout_or_io(err: std::io::Error, timeout: Duration) -> ClientError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ClientError::Timeout(timeout),
        _ => ClientError::Io(err),
    }
}
