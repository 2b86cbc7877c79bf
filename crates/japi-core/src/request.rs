//! HTTP request types.

use std::fmt;
use std::sync::Arc;

use crate::context::{Context, SingletonError};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// All methods, in registration order.
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
        Method::Patch,
    ];

    /// Parses an upper-case method token.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == token)
    }

    /// The method token as sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP headers collection.
///
/// Keeps insertion order and the original name casing; lookups are
/// case-insensitive and a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    /// Create empty headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value for a header (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Get the first value for a header as UTF-8, if it is valid UTF-8.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Iterate over every value of a header in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a header, replacing all existing values.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Add a value without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every value of a header.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Iterate over all headers as (name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    /// Returns the number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// Empty body.
    #[default]
    Empty,
    /// Bytes body.
    Bytes(Vec<u8>),
}

impl Body {
    /// Borrow the body bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Bytes(b) => b,
        }
    }

    /// Get body as bytes, consuming it.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Empty => Vec::new(),
            Self::Bytes(b) => b,
        }
    }

    /// Check if body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

/// HTTP request.
///
/// Besides the usual parts, a request owns its [`Context`]. The singleton
/// helpers replace that carrier with an extended one; contexts cloned out of
/// the request earlier are not affected.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Body,
    path_params: Vec<(String, String)>,
    context: Context,
}

impl Request {
    /// Create a new request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: Headers::new(),
            body: Body::Empty,
            path_params: Vec::new(),
            context: Context::new(),
        }
    }

    /// Get the HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the query string.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Set the query string.
    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query;
    }

    /// Get the headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Get the body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Take the body, replacing with Empty.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Set the body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Declared `Content-Length`, if present and numeric.
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get_str("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Look up a path parameter by name.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a path parameter, replacing an existing one with the same name.
    pub fn set_path_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.path_params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.path_params.push((name, value)),
        }
    }

    /// All path parameters in match order.
    #[must_use]
    pub fn path_params(&self) -> &[(String, String)] {
        &self.path_params
    }

    /// Builder form of [`set_query`](Self::set_query).
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Builder form of appending a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Builder form of [`set_body`](Self::set_body).
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder form of [`set_path_param`](Self::set_path_param).
    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_path_param(name, value);
        self
    }

    /// The request's singleton carrier.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Replace the singleton carrier.
    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// Builder form of [`set_context`](Self::set_context).
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Attach a singleton to the request context.
    ///
    /// On error the request keeps its current context.
    pub fn attach<T: Send + Sync + 'static>(&mut self, value: T) -> Result<(), SingletonError> {
        self.context = self.context.attach(value)?;
        Ok(())
    }

    /// Like [`attach`](Self::attach) but panics if a `T` is already present.
    pub fn must_attach<T: Send + Sync + 'static>(&mut self, value: T) {
        self.context = self.context.must_attach(value);
    }

    /// Borrow a singleton from the request context.
    pub fn singleton<T: Send + Sync + 'static>(&self) -> Result<&T, SingletonError> {
        self.context.get::<T>()
    }

    /// Shared handle to a singleton from the request context.
    pub fn singleton_arc<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, SingletonError> {
        self.context.get_arc::<T>()
    }

    /// Like [`singleton`](Self::singleton) but panics if no `T` is present.
    #[must_use]
    pub fn must_singleton<T: Send + Sync + 'static>(&self) -> &T {
        self.context.must_get::<T>()
    }

    /// Return the stored `T`, building and attaching it first if needed.
    ///
    /// The extended context is kept by the request, so the factory runs at
    /// most once per request.
    pub fn singleton_or_insert_with<T, F>(&mut self, make: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let (context, value) = self.context.get_or_insert_with(make);
        self.context = context;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive_and_multi_valued() {
        let mut headers = Headers::new();
        headers.append("Sec-WebSocket-Protocol", "Authorization");
        headers.append("sec-websocket-protocol", "secret");
        headers.insert("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some(&b"text/plain"[..]));
        let all: Vec<_> = headers.get_all("SEC-WEBSOCKET-PROTOCOL").collect();
        assert_eq!(all, vec![&b"Authorization"[..], &b"secret"[..]]);

        headers.insert("content-type", "application/json");
        assert_eq!(headers.get_str("Content-Type"), Some("application/json"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn method_round_trip() {
        for method in Method::ALL {
            assert_eq!(Method::parse(method.as_str()), Some(method));
        }
        assert_eq!(Method::parse("get"), None);
    }

    #[test]
    fn path_params_replace_by_name() {
        let req = Request::new(Method::Get, "/posts/1")
            .with_path_param("id", "1")
            .with_path_param("id", "2");
        assert_eq!(req.path_param("id"), Some("2"));
        assert_eq!(req.path_params().len(), 1);
        assert_eq!(req.path_param("missing"), None);
    }

    #[test]
    fn request_singletons_replace_own_carrier_only() {
        let mut req = Request::new(Method::Get, "/");
        let before = req.context().clone();
        req.attach(5_u8).unwrap();
        assert_eq!(*req.singleton::<u8>().unwrap(), 5);
        assert!(before.get::<u8>().is_err());
        assert!(req.attach(6_u8).is_err());
        assert_eq!(*req.must_singleton::<u8>(), 5);
    }

    #[test]
    fn singleton_or_insert_with_threads_automatically() {
        let mut req = Request::new(Method::Get, "/");
        let mut calls = 0;
        let first = req.singleton_or_insert_with(|| {
            calls += 1;
            String::from("aragorn")
        });
        let second = req.singleton_or_insert_with(|| {
            calls += 1;
            String::from("gandalf")
        });
        assert_eq!(calls, 1);
        assert_eq!(*first, "aragorn");
        assert_eq!(*second, "aragorn");
    }

    #[test]
    fn content_length_parses_header() {
        let req = Request::new(Method::Post, "/").with_header("Content-Length", " 12 ");
        assert_eq!(req.content_length(), Some(12));
        assert!(req.body().is_empty());
    }
}
