//! Connection management
//!
//! [`Connection`] is the capability the pool and pipeline are written
//! against: buffer a command, flush, receive one reply, report liveness,
//! close. [`TcpConnection`] implements it over a `tokio` socket with the
//! RESP2 codec; tests and alternate transports supply their own
//! implementation through a [`ConnectionFactory`].

use crate::protocol::{RespDecoder, RespEncoder};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use redis_keeper_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::Command,
    value::RespValue,
};
use std::io::Cursor;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, Span};

/// One live session to the store.
///
/// A connection is owned by exactly one borrower at a time, so every method
/// takes `&mut self`. Replies are returned as values: a `RespValue::Error`
/// reply is a successful receive, while `Err` always means the transport
/// itself failed.
#[async_trait]
pub trait Connection: Send {
    /// Queue a command in the write buffer without performing I/O
    async fn send(&mut self, command: &Command) -> RedisResult<()>;

    /// Write every queued command to the store
    async fn flush(&mut self) -> RedisResult<()>;

    /// Read exactly one reply
    async fn receive(&mut self) -> RedisResult<RespValue>;

    /// Whether the connection can still be used
    fn is_open(&self) -> bool;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Send one command and read its reply
    async fn request(&mut self, command: &Command) -> RedisResult<RespValue> {
        self.send(command).await?;
        self.flush().await?;
        self.receive().await
    }

    /// Liveness probe
    async fn ping(&mut self) -> RedisResult<()> {
        match self.request(&Command::new("PING")).await? {
            RespValue::SimpleString(ref s) if s == "PONG" => Ok(()),
            RespValue::Error(e) => Err(RedisError::Server(e)),
            other => Err(RedisError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

/// Creates new connections for the pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> RedisResult<Box<dyn Connection>>;

    /// Human readable endpoint, used in log fields
    fn endpoint(&self) -> String;
}

/// A connection to a Redis server over TCP
pub struct TcpConnection {
    stream: Option<TcpStream>,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    operation_timeout: Duration,
    span: Span,
}

impl TcpConnection {
    /// Connect to a Redis server, authenticating and selecting the database
    /// when the configuration asks for it. Log events go under `span`.
    pub async fn connect(
        host: &str,
        port: u16,
        config: &ConnectionConfig,
        span: Span,
    ) -> RedisResult<Self> {
        let addr = format!("{}:{}", host, port);
        debug!(parent: &span, "Connecting to Redis at {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(|e| RedisError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let stream = match config.tcp_keepalive {
            Some(keepalive) => {
                let socket = socket2::Socket::from(stream.into_std()?);
                let params = socket2::TcpKeepalive::new().with_time(keepalive);
                socket.set_tcp_keepalive(&params).map_err(|e| {
                    RedisError::Connection(format!("Failed to set TCP keepalive: {}", e))
                })?;
                TcpStream::from_std(socket.into())?
            }
            None => stream,
        };

        let mut conn = Self {
            stream: Some(stream),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(1024),
            operation_timeout: config.operation_timeout,
            span,
        };

        if let Some(ref password) = config.password {
            conn.authenticate(password).await?;
        }
        if config.database != 0 {
            conn.select_database(config.database).await?;
        }

        Ok(conn)
    }

    async fn authenticate(&mut self, password: &str) -> RedisResult<()> {
        debug!(parent: &self.span, "Authenticating with Redis server");
        match self.request(&Command::new("AUTH").arg(password)).await? {
            reply if reply.is_ok() => Ok(()),
            RespValue::Error(e) => Err(RedisError::Auth(e)),
            _ => Err(RedisError::Auth(
                "Unexpected authentication response".to_string(),
            )),
        }
    }

    async fn select_database(&mut self, db: u8) -> RedisResult<()> {
        match self.request(&Command::new("SELECT").arg(u32::from(db))).await? {
            reply if reply.is_ok() => Ok(()),
            RespValue::Error(e) => Err(RedisError::Server(e)),
            other => Err(RedisError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    fn stream(&mut self) -> RedisResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| RedisError::Connection("Connection is closed".to_string()))
    }

    /// Mark the connection dead when a transport error escapes
    fn check<T>(&mut self, result: RedisResult<T>) -> RedisResult<T> {
        if matches!(result, Err(ref e) if e.is_transport()) {
            self.close();
        }
        result
    }

    async fn read_reply(&mut self) -> RedisResult<RespValue> {
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            if let Some(value) = RespDecoder::decode(&mut cursor)? {
                let pos = cursor.position() as usize;
                self.read_buffer.advance(pos);
                return Ok(value);
            }

            let operation_timeout = self.operation_timeout;
            let stream = self.stream.as_mut().ok_or_else(|| {
                RedisError::Connection("Connection is closed".to_string())
            })?;
            let n = timeout(operation_timeout, stream.read_buf(&mut self.read_buffer))
                .await
                .map_err(|_| RedisError::Timeout)??;
            if n == 0 {
                return Err(RedisError::Connection(
                    "Connection closed by server".to_string(),
                ));
            }
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, command: &Command) -> RedisResult<()> {
        self.stream()?;
        RespEncoder::encode_command(command, &mut self.write_buffer);
        Ok(())
    }

    async fn flush(&mut self) -> RedisResult<()> {
        let operation_timeout = self.operation_timeout;
        let buffer = self.write_buffer.split().freeze();
        let result = match self.stream() {
            Ok(stream) => timeout(operation_timeout, stream.write_all(&buffer))
                .await
                .map_err(|_| RedisError::Timeout)
                .and_then(|r| r.map_err(RedisError::Io)),
            Err(e) => Err(e),
        };
        self.check(result)
    }

    async fn receive(&mut self) -> RedisResult<RespValue> {
        let result = self.read_reply().await;
        self.check(result)
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        // Dropping the stream closes the socket.
        self.stream = None;
        self.read_buffer.clear();
        self.write_buffer.clear();
    }
}

/// Opens [`TcpConnection`]s to the configured endpoint
pub struct TcpConnector {
    host: String,
    port: u16,
    config: ConnectionConfig,
    span: Span,
}

impl TcpConnector {
    /// Create a connector from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] if the endpoint cannot be parsed.
    pub fn new(config: ConnectionConfig) -> RedisResult<Self> {
        let (host, port) = config.endpoint()?;
        Ok(Self {
            host,
            port,
            config,
            span: Span::none(),
        })
    }

    /// Emit connection events under `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnector {
    async fn connect(&self) -> RedisResult<Box<dyn Connection>> {
        let conn =
            TcpConnection::connect(&self.host, self.port, &self.config, self.span.clone()).await?;
        Ok(Box::new(conn))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
