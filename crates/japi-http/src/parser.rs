//! Request head parsing.

use japi_core::{Headers, Method};
use memchr::memmem;

use crate::body::BodyLength;

/// Maximum number of header fields in one request.
pub const MAX_HEADERS: usize = 64;

/// Error raised while parsing a request head.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The head grew past the configured limit before it was complete.
    #[error("request head exceeds {max} bytes")]
    HeadTooLarge {
        /// The configured limit.
        max: usize,
    },
    /// `httparse` rejected the head.
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),
    /// The method is not one the server knows.
    #[error("unsupported method {0}")]
    UnsupportedMethod(String),
    /// The request target is not an origin-form path.
    #[error("invalid request target")]
    InvalidTarget,
    /// Unusable `Content-Length` or `Transfer-Encoding` headers.
    #[error("invalid body framing: {0}")]
    InvalidFraming(&'static str),
}

/// A parsed request line and header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, without `?`.
    pub query: Option<String>,
    /// Minor HTTP version (`1` for HTTP/1.1).
    pub version: u8,
    /// Header fields in arrival order.
    pub headers: Headers,
    /// How the body is delimited.
    pub body_length: BodyLength,
}

impl RequestHead {
    /// Whether the client allows the connection to stay open afterwards.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers.get_str("connection").map(str::to_ascii_lowercase);
        let has = |token: &str| {
            connection
                .as_deref()
                .is_some_and(|v| v.split(',').any(|t| t.trim() == token))
        };
        if self.version == 0 {
            has("keep-alive")
        } else {
            !has("close")
        }
    }
}

/// Parses a request head from the start of `buf`.
///
/// Returns `Ok(None)` while the head is incomplete, or the head and the
/// number of bytes it occupied.
///
/// # Errors
///
/// Fails when the head exceeds `max_head_bytes` or is malformed.
pub fn parse_head(
    buf: &[u8],
    max_head_bytes: usize,
) -> Result<Option<(RequestHead, usize)>, ParseError> {
    let Some(end) = memmem::find(buf, b"\r\n\r\n") else {
        if buf.len() > max_head_bytes {
            return Err(ParseError::HeadTooLarge {
                max: max_head_bytes,
            });
        }
        return Ok(None);
    };
    let head_len = end + 4;
    if head_len > max_head_bytes {
        return Err(ParseError::HeadTooLarge {
            max: max_head_bytes,
        });
    }

    let mut fields = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut fields);
    let httparse::Status::Complete(consumed) = req.parse(&buf[..head_len])? else {
        return Ok(None);
    };

    let method_token = req.method.unwrap_or_default();
    let method = Method::parse(method_token)
        .ok_or_else(|| ParseError::UnsupportedMethod(method_token.to_owned()))?;
    let target = req.path.unwrap_or_default();
    if !target.starts_with('/') {
        return Err(ParseError::InvalidTarget);
    }
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    };

    let mut headers = Headers::new();
    for field in req.headers.iter() {
        headers.append(field.name, field.value);
    }

    Ok(Some((
        RequestHead {
            method,
            path,
            query,
            version: req.version.unwrap_or(1),
            body_length: body_length(&headers)?,
            headers,
        },
        consumed,
    )))
}

fn body_length(headers: &Headers) -> Result<BodyLength, ParseError> {
    if let Some(te) = headers.get_str("transfer-encoding") {
        if headers.contains("content-length") {
            return Err(ParseError::InvalidFraming(
                "both Content-Length and Transfer-Encoding",
            ));
        }
        let last = te.rsplit(',').next().unwrap_or_default().trim();
        if !last.eq_ignore_ascii_case("chunked") {
            return Err(ParseError::InvalidFraming("unsupported Transfer-Encoding"));
        }
        return Ok(BodyLength::Chunked);
    }

    let mut lengths = headers.get_all("content-length");
    let Some(first) = lengths.next() else {
        return Ok(BodyLength::None);
    };
    if lengths.any(|other| other != first) {
        return Err(ParseError::InvalidFraming("conflicting Content-Length"));
    }
    let len = std::str::from_utf8(first)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::InvalidFraming("invalid Content-Length"))?;
    Ok(BodyLength::ContentLength(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(raw: &[u8]) -> Result<Option<(RequestHead, usize)>, ParseError> {
        parse_head(raw, 1024)
    }

    #[test]
    fn simple_get() {
        let raw = b"GET /posts?page=2 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
        let (head, consumed) = parse(raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.path, "/posts");
        assert_eq!(head.query.as_deref(), Some("page=2"));
        assert_eq!(head.version, 1);
        assert_eq!(head.headers.get_str("host"), Some("example.com"));
        assert_eq!(head.body_length, BodyLength::None);
        assert!(head.keep_alive());
    }

    #[test]
    fn consumed_stops_at_the_head() {
        let raw = b"POST /posts HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}";
        let (head, consumed) = parse(raw).unwrap().unwrap();
        assert_eq!(&raw[consumed..], b"{}");
        assert_eq!(head.body_length, BodyLength::ContentLength(2));
    }

    #[test]
    fn incomplete_head() {
        assert!(parse(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap().is_none());
        assert!(parse(b"").unwrap().is_none());
    }

    #[test]
    fn head_limit() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        raw.extend(std::iter::repeat_n(b'a', 2000));
        assert_eq!(
            parse(&raw).unwrap_err(),
            ParseError::HeadTooLarge { max: 1024 }
        );
        raw.extend_from_slice(b"\r\n\r\n");
        assert_eq!(
            parse(&raw).unwrap_err(),
            ParseError::HeadTooLarge { max: 1024 }
        );
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(matches!(
            parse(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert_eq!(
            parse(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::UnsupportedMethod("BREW".into())
        );
        assert_eq!(
            parse(b"GET * HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::InvalidTarget
        );
    }

    #[test]
    fn body_framing() {
        let head = |extra: &str| parse(format!("POST / HTTP/1.1\r\n{extra}\r\n").as_bytes());
        assert_eq!(
            head("Transfer-Encoding: gzip, chunked\r\n").unwrap().unwrap().0.body_length,
            BodyLength::Chunked
        );
        assert_eq!(
            head("Content-Length: 5\r\nContent-Length: 5\r\n").unwrap().unwrap().0.body_length,
            BodyLength::ContentLength(5)
        );
        for bad in [
            "Transfer-Encoding: gzip\r\n",
            "Transfer-Encoding: chunked\r\nContent-Length: 5\r\n",
            "Content-Length: 5\r\nContent-Length: 6\r\n",
            "Content-Length: -1\r\n",
            "Content-Length: +5\r\n",
        ] {
            assert!(
                matches!(head(bad), Err(ParseError::InvalidFraming(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn keep_alive_by_version() {
        let ka = |raw: &[u8]| parse(raw).unwrap().unwrap().0.keep_alive();
        assert!(!ka(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n"));
        assert!(!ka(b"GET / HTTP/1.0\r\n\r\n"));
        assert!(ka(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n"));
        assert!(ka(b"GET / HTTP/1.1\r\nConnection: upgrade, keep-alive\r\n\r\n"));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse(&raw);
        }

        #[test]
        fn path_and_query_split(path in "/[a-z0-9/]{0,20}", query in "[a-z0-9=&]{0,20}") {
            let raw = format!("GET {path}?{query} HTTP/1.1\r\n\r\n");
            let (head, _) = parse(raw.as_bytes()).unwrap().unwrap();
            prop_assert_eq!(head.path, path);
            prop_assert_eq!(head.query, Some(query));
        }
    }
}
