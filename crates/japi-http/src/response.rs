//! Connection response writer.

use std::fmt;
use std::io::{self, Write};

use japi_core::{Headers, ResponseWriter, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Nothing on the wire yet. Body bytes are held so the response can
    /// carry a Content-Length.
    Buffering,
    /// The head is on the wire. Body bytes go out as they arrive.
    Streaming { chunked: bool },
    /// The response is complete.
    Finished,
}

/// [`ResponseWriter`] over a connection's write half.
///
/// The whole response is buffered until [`finish`](ResponseWriter::finish)
/// and sent with a `Content-Length`. An explicit [`flush`](Write::flush)
/// sends the head at once and switches to chunked transfer encoding, which
/// is how handlers stream. Body bytes are dropped for `HEAD` requests and
/// for statuses that cannot carry a body.
pub struct ConnWriter<W> {
    out: W,
    headers: Headers,
    sent_headers: Headers,
    status: Option<StatusCode>,
    body: Vec<u8>,
    mode: Mode,
    head_request: bool,
    http10: bool,
    keep_alive: bool,
}

impl<W: Write + Send> ConnWriter<W> {
    /// Creates a writer for one response.
    ///
    /// `keep_alive` is false when the connection closes after this response;
    /// the head then carries `Connection: close`.
    #[must_use]
    pub fn new(out: W, head_request: bool, http10: bool, keep_alive: bool) -> Self {
        Self {
            out,
            headers: Headers::new(),
            sent_headers: Headers::new(),
            status: None,
            body: Vec::new(),
            mode: Mode::Buffering,
            head_request,
            http10,
            keep_alive,
        }
    }

    /// Whether the connection can serve another request after this response.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the underlying sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn status_or_ok(&mut self) -> StatusCode {
        if self.status.is_none() {
            self.freeze(StatusCode::OK);
        }
        self.status.unwrap_or(StatusCode::OK)
    }

    fn freeze(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.sent_headers = self.headers.clone();
        let closing = self
            .sent_headers
            .get_str("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        if closing {
            self.keep_alive = false;
        }
    }

    fn body_allowed(&self, status: StatusCode) -> bool {
        status.allows_body() && !self.head_request
    }

    fn encode_head(&self, status: StatusCode, framing: Option<Framing>) -> Vec<u8> {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(b"HTTP/1.1 ");
        head.extend_from_slice(status.as_u16().to_string().as_bytes());
        head.push(b' ');
        head.extend_from_slice(status.canonical_reason().as_bytes());
        head.extend_from_slice(b"\r\n");

        for (name, value) in self.sent_headers.iter() {
            let framing_header = name.eq_ignore_ascii_case("transfer-encoding")
                || name.eq_ignore_ascii_case("connection")
                || (framing.is_some() && name.eq_ignore_ascii_case("content-length"));
            if framing_header {
                continue;
            }
            push_header(&mut head, name, value);
        }
        match framing {
            Some(Framing::Length(len)) => {
                push_header(&mut head, "content-length", len.to_string().as_bytes());
            }
            Some(Framing::Chunked) => push_header(&mut head, "transfer-encoding", b"chunked"),
            None => {}
        }
        if !self.keep_alive {
            push_header(&mut head, "connection", b"close");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    fn start_streaming(&mut self) -> io::Result<()> {
        let status = self.status_or_ok();
        let declared = self.sent_headers.contains("content-length");
        let framing = if declared || !self.body_allowed(status) {
            None
        } else if self.http10 {
            // HTTP/1.0 without a length: the body runs until close.
            self.keep_alive = false;
            self.headers.insert("Connection", "close");
            None
        } else {
            Some(Framing::Chunked)
        };
        let chunked = matches!(framing, Some(Framing::Chunked));
        let head = self.encode_head(status, framing);
        self.out.write_all(&head)?;
        self.mode = Mode::Streaming { chunked };
        let pending = std::mem::take(&mut self.body);
        self.send_body(&pending)
    }

    fn send_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Mode::Streaming { chunked } = self.mode else {
            return Ok(());
        };
        let Some(status) = self.status else {
            return Ok(());
        };
        if bytes.is_empty() || !self.body_allowed(status) {
            return Ok(());
        }
        if chunked {
            write!(self.out, "{:x}\r\n", bytes.len())?;
            self.out.write_all(bytes)?;
            self.out.write_all(b"\r\n")
        } else {
            self.out.write_all(bytes)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Framing {
    Length(usize),
    Chunked,
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

impl<W: Write + Send> Write for ConnWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status_or_ok();
        match self.mode {
            Mode::Buffering => self.body.extend_from_slice(buf),
            Mode::Streaming { .. } => self.send_body(buf)?,
            Mode::Finished => {
                return Err(io::Error::other("response already finished"));
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.mode {
            Mode::Buffering => self.start_streaming()?,
            Mode::Streaming { .. } => {}
            Mode::Finished => return Ok(()),
        }
        self.out.flush()
    }
}

impl<W: Write + Send> ResponseWriter for ConnWriter<W> {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        match self.status {
            Some(first) => {
                tracing::debug!(
                    first = first.as_u16(),
                    ignored = status.as_u16(),
                    "status already written"
                );
            }
            None => self.freeze(status),
        }
        Ok(())
    }

    fn status_written(&self) -> Option<StatusCode> {
        self.status
    }

    fn finish(&mut self) -> io::Result<()> {
        match self.mode {
            Mode::Buffering => {
                let status = self.status_or_ok();
                let framing = if status.allows_body() {
                    Some(Framing::Length(self.body.len()))
                } else {
                    None
                };
                let mut wire = self.encode_head(status, framing);
                if self.body_allowed(status) {
                    wire.extend_from_slice(&self.body);
                }
                self.out.write_all(&wire)?;
            }
            Mode::Streaming { chunked: true } => {
                if self.status.is_some_and(|s| self.body_allowed(s)) {
                    self.out.write_all(b"0\r\n\r\n")?;
                }
            }
            Mode::Streaming { chunked: false } => {}
            Mode::Finished => return Ok(()),
        }
        self.mode = Mode::Finished;
        self.body = Vec::new();
        self.out.flush()
    }
}

impl<W> fmt::Debug for ConnWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnWriter")
            .field("status", &self.status)
            .field("mode", &self.mode)
            .field("buffered", &self.body.len())
            .field("head_request", &self.head_request)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}
