//! Response writers.
//!
//! [`ResponseWriter`] is the sink a connection exposes to the handler chain.
//! The adaptation layer wraps it in a [`Writer`] and attaches that handle to
//! the request context, which is how handlers reach the raw connection (the
//! escape hatch) and how [`set_header`] finds the outgoing headers.

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::context::SingletonError;
use crate::request::{Headers, Request};
use crate::response::{Response, WriteError};
use crate::status::StatusCode;

/// A sink for one HTTP response.
///
/// Headers may be changed until the status is written. Writing body bytes
/// before a status implies 200. A status written twice is ignored.
pub trait ResponseWriter: io::Write + Send {
    /// Outgoing headers.
    fn headers(&self) -> &Headers;

    /// Mutable outgoing headers. Changes after the status line has been
    /// written have no effect on the wire.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Writes the status line and headers.
    fn write_status(&mut self, status: StatusCode) -> io::Result<()>;

    /// The status already written, if any.
    fn status_written(&self) -> Option<StatusCode>;

    /// Completes the response once the handler has returned.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared handle to the connection's [`ResponseWriter`].
///
/// Cloning is cheap. This is the type attached to the request context, so
/// `request.singleton::<Writer>()` yields the raw sink.
#[derive(Clone)]
pub struct Writer {
    inner: Arc<Mutex<Box<dyn ResponseWriter>>>,
}

impl Writer {
    /// Wraps a response writer.
    #[must_use]
    pub fn new(writer: impl ResponseWriter + 'static) -> Self {
        Self::from_boxed(Box::new(writer))
    }

    /// Wraps an already boxed response writer.
    #[must_use]
    pub fn from_boxed(writer: Box<dyn ResponseWriter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Locks the underlying writer.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn ResponseWriter>> {
        self.inner.lock()
    }

    /// Sets an outgoing header, replacing existing values.
    pub fn set_header(&self, name: &str, value: impl Into<Vec<u8>>) {
        self.lock().headers_mut().insert(name, value);
    }

    /// Writes the status line.
    pub fn write_status(&self, status: StatusCode) -> io::Result<()> {
        self.lock().write_status(status)
    }

    /// Writes body bytes.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.lock().write_all(bytes)
    }

    /// Pushes buffered bytes to the client.
    pub fn flush(&self) -> io::Result<()> {
        self.lock().flush()
    }

    /// Serializes `response` into the writer.
    pub fn send<T: Serialize>(&self, response: Response<T>) -> Result<(), WriteError> {
        let mut guard = self.lock();
        response.write_to(&mut **guard)
    }

    /// Completes the response.
    pub fn finish(&self) -> io::Result<()> {
        self.lock().finish()
    }

    /// The status already written, if any.
    #[must_use]
    pub fn status_written(&self) -> Option<StatusCode> {
        self.lock().status_written()
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.try_lock().map(|w| w.status_written());
        f.debug_struct("Writer")
            .field("status_written", &status)
            .finish_non_exhaustive()
    }
}

/// Set a response header on the writer attached to `req`.
///
/// Fails if the request did not pass through [`wrap`](crate::wrap).
pub fn set_header(
    req: &Request,
    name: &str,
    value: impl Into<Vec<u8>>,
) -> Result<(), SingletonError> {
    req.singleton::<Writer>()?.set_header(name, value);
    Ok(())
}

/// What a [`Recorder`] captured.
///
/// Headers are those present when the status was written (or when the
/// response finished without one).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    status: Option<StatusCode>,
    headers: Headers,
    headers_captured: bool,
    body: Vec<u8>,
}

impl Recording {
    /// Written status, defaulting to 200 when none was written.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Written status, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    /// Captured headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a captured header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    /// Captured body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text; invalid UTF-8 is replaced.
    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the body is not valid JSON.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|err| panic!("response body is not JSON ({err}): {}", self.body_string()))
    }
}

/// In-memory [`ResponseWriter`] for tests.
pub struct Recorder {
    headers: Headers,
    shared: Arc<Mutex<Recording>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            headers: Headers::new(),
            shared: Arc::new(Mutex::new(Recording::default())),
        }
    }

    /// What has been recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Recording {
        let mut recording = self.shared.lock().clone();
        if !recording.headers_captured {
            recording.headers = self.headers.clone();
        }
        recording
    }

    /// State shared with clones handed out before the recorder was boxed.
    pub(crate) fn shared(&self) -> Arc<Mutex<Recording>> {
        Arc::clone(&self.shared)
    }

    fn capture_headers(&self, recording: &mut Recording) {
        if !recording.headers_captured {
            recording.headers = self.headers.clone();
            recording.headers_captured = true;
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recording = self.shared.lock();
        f.debug_struct("Recorder")
            .field("status", &recording.status)
            .field("headers", &self.headers.len())
            .field("body_len", &recording.body.len())
            .finish()
    }
}

impl io::Write for Recorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let shared = Arc::clone(&self.shared);
        let mut recording = shared.lock();
        if recording.status.is_none() {
            recording.status = Some(StatusCode::OK);
        }
        self.capture_headers(&mut recording);
        recording.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for Recorder {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let mut recording = shared.lock();
        if recording.status.is_some() {
            tracing::debug!(status = status.as_u16(), "superfluous write_status call ignored");
            return Ok(());
        }
        recording.status = Some(status);
        self.capture_headers(&mut recording);
        Ok(())
    }

    fn status_written(&self) -> Option<StatusCode> {
        self.shared.lock().status
    }

    fn finish(&mut self) -> io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let mut recording = shared.lock();
        self.capture_headers(&mut recording);
        Ok(())
    }
}
