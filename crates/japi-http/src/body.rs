//! HTTP request body framing.
//!
//! Bodies are framed by `Content-Length` or by chunked transfer encoding.
//! Both readers work on the bytes buffered so far and report
//! [`BodyError::Incomplete`] when more input is needed, which lets the
//! connection loop read again and retry.
//!
//! # Body Size Limits
//!
//! By default, bodies are limited to 1 MiB. The limit is checked against the
//! declared length before any body byte is buffered, and against the running
//! total for chunked bodies.
//!
//! # Example
//!
//! ```
//! use japi_http::body::{BodyConfig, BodyLength, parse_body};
//!
//! let config = BodyConfig::default().with_max_size(64);
//! let body = parse_body(b"5\r\nhello\r\n0\r\n\r\n", BodyLength::Chunked, &config).unwrap();
//! assert_eq!(body.as_deref(), Some(&b"hello"[..]));
//! ```

use memchr::memmem;

/// Default maximum body size (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Configuration for body reading.
#[derive(Debug, Clone)]
pub struct BodyConfig {
    max_size: usize,
    initial_capacity: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_BODY_SIZE,
            initial_capacity: 4096,
        }
    }
}

impl BodyConfig {
    /// Create a new body configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum body size.
    #[must_use]
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the initial buffer capacity for decoded chunked bodies.
    #[must_use]
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Returns the maximum body size.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the initial buffer capacity.
    #[must_use]
    pub fn initial_capacity(&self) -> usize {
        self.initial_capacity
    }
}

/// How the body of a request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body.
    None,
    /// Exactly this many bytes follow the head.
    ContentLength(usize),
    /// Chunked transfer encoding.
    Chunked,
}

/// Error types for body reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    /// Body exceeds maximum allowed size.
    #[error("body too large: {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// The declared or decoded size.
        size: usize,
        /// The maximum allowed size.
        max: usize,
    },
    /// Invalid chunked encoding.
    #[error("invalid chunked encoding: {detail}")]
    InvalidChunkedEncoding {
        /// Description of the error.
        detail: &'static str,
    },
    /// More bytes are needed.
    #[error("incomplete body: received {received} bytes")]
    Incomplete {
        /// Body bytes available so far.
        received: usize,
        /// Expected total size, if known.
        expected: Option<usize>,
    },
}

// ============================================================================
// Content-Length Body Reading
// ============================================================================

/// Reads a body with a known Content-Length.
#[derive(Debug)]
pub struct ContentLengthReader<'a> {
    buffer: &'a [u8],
    length: usize,
}

impl<'a> ContentLengthReader<'a> {
    /// Create a new Content-Length reader over the bytes buffered after the
    /// request head.
    ///
    /// # Errors
    ///
    /// Returns `BodyError::TooLarge` if `length` exceeds the configured maximum.
    pub fn new(buffer: &'a [u8], length: usize, config: &BodyConfig) -> Result<Self, BodyError> {
        validate_content_length(length, config)?;
        Ok(Self { buffer, length })
    }

    /// Returns the expected body length.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns true if the whole body is buffered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.buffer.len() >= self.length
    }

    /// Borrow the body.
    ///
    /// # Errors
    ///
    /// Returns `BodyError::Incomplete` if the buffer doesn't contain enough data.
    pub fn read_all(&self) -> Result<&'a [u8], BodyError> {
        if !self.is_complete() {
            return Err(BodyError::Incomplete {
                received: self.buffer.len(),
                expected: Some(self.length),
            });
        }
        Ok(&self.buffer[..self.length])
    }
}

// ============================================================================
// Chunked Transfer Encoding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers,
    Complete,
}

/// Parses chunked transfer encoding.
///
/// ```text
/// chunk-size [; ext] CRLF
/// chunk-data CRLF
/// ...
/// 0 CRLF
/// [trailers] CRLF
/// ```
#[derive(Debug)]
pub struct ChunkedReader<'a> {
    buffer: &'a [u8],
    position: usize,
    state: ChunkedState,
    total_size: usize,
    config: BodyConfig,
}

impl<'a> ChunkedReader<'a> {
    /// Create a new chunked reader.
    #[must_use]
    pub fn new(buffer: &'a [u8], config: &BodyConfig) -> Self {
        Self {
            buffer,
            position: 0,
            state: ChunkedState::ChunkSize,
            total_size: 0,
            config: config.clone(),
        }
    }

    /// Returns true if the terminating chunk and trailers were consumed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == ChunkedState::Complete
    }

    /// Returns the number of bytes consumed from the raw buffer.
    #[must_use]
    pub fn bytes_consumed(&self) -> usize {
        self.position
    }

    fn line_end(&self) -> Result<usize, BodyError> {
        memmem::find(&self.buffer[self.position..], b"\r\n").ok_or(BodyError::Incomplete {
            received: self.total_size,
            expected: None,
        })
    }

    fn parse_chunk_size(&self) -> Result<(usize, usize), BodyError> {
        let line_end = self.line_end()?;
        let line = &self.buffer[self.position..self.position + line_end];
        let size = match memchr::memchr(b';', line) {
            Some(semi) => &line[..semi],
            None => line,
        };
        let size = std::str::from_utf8(size).map_err(|_| BodyError::InvalidChunkedEncoding {
            detail: "invalid UTF-8 in chunk size",
        })?;
        let size = usize::from_str_radix(size.trim(), 16).map_err(|_| {
            BodyError::InvalidChunkedEncoding {
                detail: "invalid hex chunk size",
            }
        })?;
        Ok((size, line_end + 2))
    }

    /// Decode all chunks into a single buffer.
    ///
    /// # Errors
    ///
    /// Fails if the decoded size exceeds the limit, the encoding is
    /// malformed, or the buffer ends early.
    pub fn decode_all(&mut self) -> Result<Vec<u8>, BodyError> {
        let mut output = Vec::with_capacity(self.config.initial_capacity);

        loop {
            match self.state {
                ChunkedState::ChunkSize => {
                    let (size, consumed) = self.parse_chunk_size()?;
                    let new_total = self.total_size.saturating_add(size);
                    if new_total > self.config.max_size {
                        return Err(BodyError::TooLarge {
                            size: new_total,
                            max: self.config.max_size,
                        });
                    }
                    self.position += consumed;
                    self.state = if size == 0 {
                        ChunkedState::Trailers
                    } else {
                        ChunkedState::ChunkData { remaining: size }
                    };
                }
                ChunkedState::ChunkData { remaining } => {
                    let available = self.buffer.len().saturating_sub(self.position);
                    if available < remaining {
                        return Err(BodyError::Incomplete {
                            received: self.total_size + available,
                            expected: None,
                        });
                    }
                    output.extend_from_slice(&self.buffer[self.position..self.position + remaining]);
                    self.position += remaining;
                    self.total_size += remaining;
                    self.state = ChunkedState::ChunkDataEnd;
                }
                ChunkedState::ChunkDataEnd => {
                    let rest = &self.buffer[self.position..];
                    if rest.len() < 2 {
                        return Err(BodyError::Incomplete {
                            received: self.total_size,
                            expected: None,
                        });
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(BodyError::InvalidChunkedEncoding {
                            detail: "expected CRLF after chunk data",
                        });
                    }
                    self.position += 2;
                    self.state = ChunkedState::ChunkSize;
                }
                ChunkedState::Trailers => {
                    // Trailer fields are skipped.
                    let line_end = self.line_end()?;
                    self.position += line_end + 2;
                    if line_end == 0 {
                        self.state = ChunkedState::Complete;
                    }
                }
                ChunkedState::Complete => break,
            }
        }

        Ok(output)
    }
}

// ============================================================================
// Body Parsing from Headers
// ============================================================================

/// Parse a request body from the bytes following the head.
///
/// Returns `None` when the request has no body.
///
/// # Errors
///
/// Fails if the body exceeds the limit, the chunked encoding is malformed,
/// or the buffer is incomplete.
pub fn parse_body(
    buffer: &[u8],
    body_length: BodyLength,
    config: &BodyConfig,
) -> Result<Option<Vec<u8>>, BodyError> {
    let (body, _) = parse_body_with_consumed(buffer, body_length, config)?;
    Ok(body)
}

/// Parse a request body and return both the decoded body and the number of
/// raw bytes it occupied, so the caller can find the next pipelined request.
///
/// # Errors
///
/// Same as [`parse_body`].
pub fn parse_body_with_consumed(
    buffer: &[u8],
    body_length: BodyLength,
    config: &BodyConfig,
) -> Result<(Option<Vec<u8>>, usize), BodyError> {
    match body_length {
        BodyLength::None => Ok((None, 0)),
        BodyLength::ContentLength(len) => {
            let reader = ContentLengthReader::new(buffer, len, config)?;
            Ok((Some(reader.read_all()?.to_vec()), len))
        }
        BodyLength::Chunked => {
            let mut reader = ChunkedReader::new(buffer, config);
            let body = reader.decode_all()?;
            Ok((Some(body), reader.bytes_consumed()))
        }
    }
}

/// Rejects a declared Content-Length over the limit before buffering.
///
/// # Errors
///
/// Returns `BodyError::TooLarge` if the content length exceeds the limit.
pub fn validate_content_length(
    content_length: usize,
    config: &BodyConfig,
) -> Result<(), BodyError> {
    if content_length > config.max_size {
        return Err(BodyError::TooLarge {
            size: content_length,
            max: config.max_size,
        });
    }
    Ok(())
}
