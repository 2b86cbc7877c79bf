//! HTTP/1.1 server on the asupersync runtime.
//!
//! One task accepts connections and drives up to
//! [`ServerConfig::max_connections`] of them at once. Each request is
//! parsed, framed, rooted in a [`Context`] carrying the server's [`Cx`] and
//! handed to the [`NativeHandler`]. Handlers run to completion on the
//! serving task; their response bytes go out once they return.

use std::future::poll_fn;
use std::io::{self, Write};
use std::mem;
use std::net::{self, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Poll;
use std::time::{Duration, Instant};

use asupersync::Cx;
use asupersync::net::{TcpListener, TcpStream};
use asupersync::runtime::RuntimeBuilder;
use japi_core::{
    ApiError, Body, Context, Method, NativeHandler, Request, Response, StatusCode, Void, Writer,
};
use parking_lot::Mutex;

use crate::body::{
    BodyConfig, BodyError, BodyLength, DEFAULT_MAX_BODY_SIZE, parse_body_with_consumed,
    validate_content_length,
};
use crate::parser::{ParseError, RequestHead, parse_head};
use crate::response::ConnWriter;
use crate::timer::{Timer, TimerHandle, read_until, write_all_until};

/// Default limit on the request line plus headers (10 KiB).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 10 * 1024;

/// Default limit on connections served at once.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

const READ_CHUNK: usize = 8 * 1024;

/// How long a rejected connection drains client input before closing.
const LINGER: Duration = Duration::from_millis(500);

/// Server settings.
///
/// The defaults bound every phase of a connection so a slow or idle client
/// cannot hold a connection slot forever.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    addr: String,
    read_header_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    max_header_bytes: usize,
    max_body_size: usize,
    max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_owned(),
            read_header_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    /// Default settings listening on `addr`.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self::default().with_addr(addr)
    }

    /// Set the listen address.
    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Time allowed to receive a complete request head.
    #[must_use]
    pub fn with_read_header_timeout(mut self, timeout: Duration) -> Self {
        self.read_header_timeout = timeout;
        self
    }

    /// Time allowed to receive a whole request, head and body.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Time allowed for each write to the client.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Time a kept-alive connection may wait for its next request.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Limit on the request line plus headers.
    #[must_use]
    pub fn with_max_header_bytes(mut self, max: usize) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Limit on a decoded request body.
    #[must_use]
    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    /// Limit on connections served at once. Further connections wait in
    /// the listen backlog until a slot frees. Zero is treated as one.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// The listen address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// See [`with_read_header_timeout`](Self::with_read_header_timeout).
    #[must_use]
    pub fn read_header_timeout(&self) -> Duration {
        self.read_header_timeout
    }

    /// See [`with_read_timeout`](Self::with_read_timeout).
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// See [`with_write_timeout`](Self::with_write_timeout).
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// See [`with_idle_timeout`](Self::with_idle_timeout).
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// See [`with_max_header_bytes`](Self::with_max_header_bytes).
    #[must_use]
    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// See [`with_max_body_size`](Self::with_max_body_size).
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// See [`with_max_connections`](Self::with_max_connections).
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn body_config(&self) -> BodyConfig {
        BodyConfig::new().with_max_size(self.max_body_size)
    }
}

/// Error starting or running the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The configured address.
        addr: String,
        /// The underlying error.
        source: io::Error,
    },
    /// The runtime could not be built.
    #[error("failed to start runtime: {0}")]
    Runtime(String),
    /// Accepting or configuring the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}

/// Stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stopped: Arc<AtomicBool>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl ShutdownHandle {
    /// Stops accepting connections. Open connections get the write timeout
    /// to finish, then close.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Wake the pending accept.
        if let Some(addr) = *self.local_addr.lock() {
            let _ = net::TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// HTTP/1.1 server.
///
/// ```no_run
/// use japi_core::{Request, Response, wrap};
/// use japi_http::{Server, ServerConfig};
///
/// let server = Server::new(ServerConfig::new("127.0.0.1:8080"));
/// server.serve(wrap(|_req: Request| Response::ok("hello")))?;
/// # Ok::<(), japi_http::ServerError>(())
/// ```
#[derive(Debug)]
pub struct Server {
    config: Arc<ServerConfig>,
    shutdown: ShutdownHandle,
    next_request_id: Arc<AtomicU64>,
}

type ConnectionTask = Pin<Box<dyn Future<Output = ()> + Send>>;

impl Server {
    /// Creates a server. Nothing is bound until [`serve`](Self::serve).
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: ShutdownHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                local_addr: Arc::new(Mutex::new(None)),
            },
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The server's settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// A handle that stops the accept loop from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Binds the configured address and serves until shut down, blocking
    /// the calling thread on a current-thread runtime.
    pub fn serve(&self, handler: impl NativeHandler + 'static) -> Result<(), ServerError> {
        let runtime = RuntimeBuilder::current_thread()
            .build()
            .map_err(|err| ServerError::Runtime(format!("{err:?}")))?;
        runtime.block_on(async {
            // The runtime hands out no root Cx; requests share a detached one.
            let cx = Cx::for_testing();
            let listener = bind(&self.config.addr).await?;
            self.serve_on(&cx, listener, handler).await
        })
    }

    /// Serves on an already bound listener until shut down or until `cx`
    /// is cancelled. Every request context carries a clone of `cx`.
    pub async fn serve_on(
        &self,
        cx: &Cx,
        listener: TcpListener,
        handler: impl NativeHandler + 'static,
    ) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        *self.shutdown.local_addr.lock() = Some(local);
        let handler: Arc<dyn NativeHandler> = Arc::new(handler);
        let timer = Timer::start()?;
        let limit = self.config.max_connections;
        tracing::info!(addr = %local, max_connections = limit, "listening");

        let mut open: Vec<ConnectionTask> = Vec::new();
        let mut accepting = Box::pin(listener.accept());
        loop {
            let next = poll_fn(|task| {
                open.retain_mut(|conn| conn.as_mut().poll(task).is_pending());
                if self.shutdown.is_shutdown() || cx.is_cancel_requested() {
                    return Poll::Ready(None);
                }
                if open.len() >= limit {
                    return Poll::Pending;
                }
                accepting.as_mut().poll(task).map(Some)
            })
            .await;
            let Some(accepted) = next else {
                break;
            };
            accepting = Box::pin(listener.accept());
            match accepted {
                Ok((stream, peer)) => {
                    let conn = Connection {
                        stream,
                        peer,
                        buf: Vec::with_capacity(READ_CHUNK),
                        config: Arc::clone(&self.config),
                        handler: Arc::clone(&handler),
                        request_ids: Arc::clone(&self.next_request_id),
                        cx: cx.clone(),
                        timer: timer.handle(),
                    };
                    open.push(Box::pin(conn.run()));
                }
                Err(err) => tracing::warn!(error = %err, "accept failed"),
            }
        }
        drop(accepting);

        let grace = Instant::now() + self.config.write_timeout;
        let timers = timer.handle();
        poll_fn(|task| {
            open.retain_mut(|conn| conn.as_mut().poll(task).is_pending());
            if open.is_empty() || Instant::now() >= grace {
                return Poll::Ready(());
            }
            timers.wake_at(grace, task.waker());
            Poll::Pending
        })
        .await;
        if !open.is_empty() {
            tracing::debug!(open = open.len(), "closing connections after shutdown");
        }

        tracing::info!(addr = %local, "server stopped");
        Ok(())
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr.to_owned())
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_owned(),
            source,
        })
}

/// Response bytes waiting for the socket.
#[derive(Debug, Clone, Default)]
struct Outbox(Arc<Mutex<Vec<u8>>>);

impl Outbox {
    fn take(&self) -> Vec<u8> {
        mem::take(&mut *self.0.lock())
    }
}

impl Write for Outbox {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Why a connection stopped reading requests.
#[derive(Debug)]
enum ReadFailure {
    /// The peer closed or went idle between requests.
    Closed,
    /// The peer sent something unusable; answer with this status and close.
    Reject(StatusCode, String),
    /// The socket failed or timed out mid-request.
    Io(io::Error),
}

impl From<io::Error> for ReadFailure {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ParseError> for ReadFailure {
    fn from(err: ParseError) -> Self {
        let status = match err {
            ParseError::HeadTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ParseError::UnsupportedMethod(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::Reject(status, err.to_string())
    }
}

impl From<BodyError> for ReadFailure {
    fn from(err: BodyError) -> Self {
        let status = match err {
            BodyError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::Reject(status, err.to_string())
    }
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
    config: Arc<ServerConfig>,
    handler: Arc<dyn NativeHandler>,
    request_ids: Arc<AtomicU64>,
    cx: Cx,
    timer: TimerHandle,
}

impl Connection {
    async fn run(mut self) {
        let peer = self.peer;
        tracing::trace!(%peer, "connection opened");

        loop {
            match self.read_request().await {
                Ok((head, request)) => match self.respond(&head, request).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        tracing::debug!(%peer, error = %err, "write failed");
                        break;
                    }
                },
                Err(ReadFailure::Closed) => break,
                Err(ReadFailure::Reject(status, detail)) => {
                    tracing::debug!(
                        %peer,
                        status = status.as_u16(),
                        detail = %detail,
                        "rejecting request"
                    );
                    self.reject(status, detail).await;
                    self.linger().await;
                    break;
                }
                Err(ReadFailure::Io(err)) => {
                    tracing::debug!(%peer, error = %err, "read failed");
                    break;
                }
            }
        }

        tracing::trace!(%peer, "connection closed");
    }

    /// Reads more bytes into the buffer before `deadline`. Returns the
    /// number read, zero at end of stream.
    async fn fill(&mut self, deadline: Instant) -> io::Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);
        let read = read_until(
            &mut self.stream,
            &mut self.buf[start..],
            deadline,
            &self.timer,
        )
        .await;
        self.buf.truncate(start + read.as_ref().map_or(0, |n| *n));
        read
    }

    async fn read_request(&mut self) -> Result<(RequestHead, Request), ReadFailure> {
        if self.buf.is_empty() {
            let idle = Instant::now() + self.config.idle_timeout;
            match self.fill(idle).await {
                Ok(0) => return Err(ReadFailure::Closed),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(ReadFailure::Closed);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let started = Instant::now();
        let header_deadline = started + self.config.read_header_timeout;
        let (head, consumed) = loop {
            if let Some(parsed) = parse_head(&self.buf, self.config.max_header_bytes)? {
                break parsed;
            }
            if self.fill(header_deadline).await? == 0 {
                return Err(ReadFailure::Io(io::ErrorKind::UnexpectedEof.into()));
            }
        };
        self.buf.drain(..consumed);

        let body_config = self.config.body_config();
        if let BodyLength::ContentLength(len) = head.body_length {
            validate_content_length(len, &body_config)?;
        }
        let body_deadline = started + self.config.read_timeout;
        let body = loop {
            match parse_body_with_consumed(&self.buf, head.body_length, &body_config) {
                Ok((body, used)) => {
                    self.buf.drain(..used);
                    break body;
                }
                Err(BodyError::Incomplete { .. }) => {
                    if self.fill(body_deadline).await? == 0 {
                        return Err(ReadFailure::Io(io::ErrorKind::UnexpectedEof.into()));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        };

        let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        let mut request = Request::new(head.method, head.path.clone())
            .with_context(Context::with_cx(self.cx.clone(), id));
        request.set_query(head.query.clone());
        *request.headers_mut() = head.headers.clone();
        if let Some(body) = body {
            request.set_body(Body::from(body));
        }
        Ok((head, request))
    }

    /// Serves one request. Returns whether the connection stays open.
    async fn respond(&mut self, head: &RequestHead, request: Request) -> io::Result<bool> {
        let outbox = Outbox::default();
        let keep_alive = {
            let writer = Writer::new(ConnWriter::new(
                outbox.clone(),
                head.method == Method::Head,
                head.version == 0,
                head.keep_alive(),
            ));
            let handler = &self.handler;
            let served =
                panic::catch_unwind(AssertUnwindSafe(|| handler.serve(writer.clone(), request)));
            if served.is_err() {
                tracing::error!(path = %head.path, "handler panicked, closing connection");
                false
            } else {
                writer.finish()?;
                let closing = writer
                    .lock()
                    .headers()
                    .get_str("connection")
                    .is_some_and(|v| v.eq_ignore_ascii_case("close"));
                head.keep_alive() && !closing
            }
        };
        self.send(&outbox.take()).await?;
        Ok(keep_alive)
    }

    async fn send(&mut self, wire: &[u8]) -> io::Result<()> {
        if wire.is_empty() {
            return Ok(());
        }
        let deadline = Instant::now() + self.config.write_timeout;
        write_all_until(&mut self.stream, wire, deadline, &self.timer).await
    }

    async fn reject(&mut self, status: StatusCode, detail: String) {
        let outbox = Outbox::default();
        {
            let writer = Writer::new(ConnWriter::new(outbox.clone(), false, false, false));
            let response = Response::<Void>::with_errors(status, [ApiError::from_detail(detail)]);
            if let Err(err) = writer.send(response) {
                tracing::debug!(error = %err, "failed to encode rejection");
            }
            if let Err(err) = writer.finish() {
                tracing::debug!(error = %err, "failed to encode rejection");
            }
        }
        if let Err(err) = self.send(&outbox.take()).await {
            tracing::debug!(error = %err, "failed to send rejection");
        }
    }

    /// Drains client input for a moment so the client reads the last
    /// response instead of a reset.
    async fn linger(&mut self) {
        let deadline = Instant::now() + LINGER;
        let mut scratch = [0_u8; 1024];
        loop {
            let read = read_until(&mut self.stream, &mut scratch, deadline, &self.timer).await;
            if !matches!(read, Ok(n) if n > 0) {
                break;
            }
        }
    }
}
