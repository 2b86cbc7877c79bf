//! The JSON:API response envelope.
//!
//! A handler returns a [`Response`]; the adaptation layer serializes it once
//! against the connection's [`ResponseWriter`].
//!
//! # Wire format
//!
//! | Outcome | Body |
//! |---------|------|
//! | success | `{"data":<T>}\n` |
//! | failure | `{"errors":[...]}\n` |
//! | 1xx, 204, 304 | none, `Content-Length: 0` |
//!
//! A response with no status and no payload is the *no-op sentinel*: the
//! handler already wrote its output through the [`Writer`](crate::Writer)
//! singleton, so nothing is written at all.
//!
//! <https://jsonapi.org/format/#document-top-level>

use std::fmt;
use std::io::{self, Write as _};

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::status::StatusCode;
use crate::writer::ResponseWriter;

/// The JSON:API media type, used when a handler did not set `Content-Type`.
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// Payload type for handlers that never return data.
///
/// `Void` has no values, so a `Response<Void>` can only be empty or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Void {}

impl Serialize for Void {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        match *self {}
    }
}

/// The primary outcome carried by a [`Response`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload<T> {
    /// Nothing: either a body-less status or the no-op sentinel.
    #[default]
    Empty,
    /// Primary data returned on success.
    Data(T),
    /// Error objects returned on failure. An empty list still resolves to
    /// 400 but leaves `errors` out of the document.
    Errors(Vec<ApiError>),
}

/// Error returned by [`Response::write_to`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The response could not be encoded. A 500 was written instead.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    /// The underlying writer failed.
    #[error("failed to write response: {0}")]
    Io(#[from] io::Error),
}

/// A handler's outcome.
///
/// `T` is the type of the primary data; it defaults to an arbitrary JSON
/// value. Prefer the constructors ([`ok`](Self::ok),
/// [`bad_request`](Self::bad_request), ...) to filling fields by hand.
#[derive(Clone, PartialEq)]
pub struct Response<T = Value> {
    /// Explicit status. When unset it resolves to 200, or 400 for errors.
    pub status: Option<StatusCode>,
    /// Primary data, errors, or nothing.
    pub payload: Payload<T>,
    /// Top-level `meta` member.
    pub meta: Option<Map<String, Value>>,
    /// Top-level `links` member.
    pub links: Option<Map<String, Value>>,
    /// Top-level `included` member.
    pub included: Option<Vec<Value>>,
    /// Top-level `jsonapi` member.
    pub jsonapi: Option<Map<String, Value>>,
}

impl<T> Default for Response<T> {
    fn default() -> Self {
        Self::no_response()
    }
}

impl<T> Response<T> {
    /// Do not send any response.
    ///
    /// Return it from a handler that wrote to the connection itself, for
    /// example after taking over the socket for a streaming protocol.
    #[must_use]
    pub fn no_response() -> Self {
        Self {
            status: None,
            payload: Payload::Empty,
            meta: None,
            links: None,
            included: None,
            jsonapi: None,
        }
    }

    fn with_payload(status: StatusCode, payload: Payload<T>) -> Self {
        Self {
            status: Some(status),
            payload,
            ..Self::no_response()
        }
    }

    /// Respond with 200 and primary data.
    ///
    /// <https://jsonapi.org/format/#fetching-resources-responses-200>
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self::with_payload(StatusCode::OK, Payload::Data(data))
    }

    /// Respond with 201 and the created resource.
    #[must_use]
    pub fn created(data: T) -> Self {
        Self::with_payload(StatusCode::CREATED, Payload::Data(data))
    }

    /// Respond with 202.
    #[must_use]
    pub fn accepted(data: T) -> Self {
        Self::with_payload(StatusCode::ACCEPTED, Payload::Data(data))
    }

    /// Respond with 204. The response has no body.
    #[must_use]
    pub fn no_content() -> Self {
        Self::with_payload(StatusCode::NO_CONTENT, Payload::Empty)
    }

    /// Respond with 304. The client keeps using its cached copy.
    #[must_use]
    pub fn not_modified() -> Self {
        Self::with_payload(StatusCode::NOT_MODIFIED, Payload::Empty)
    }

    /// Respond with 400 and one error.
    #[must_use]
    pub fn bad_request(error: ApiError) -> Self {
        Self::with_errors(StatusCode::BAD_REQUEST, [error])
    }

    /// Respond with 401 and one error.
    #[must_use]
    pub fn unauthorized(error: ApiError) -> Self {
        Self::with_errors(StatusCode::UNAUTHORIZED, [error])
    }

    /// Respond with 403 and one error.
    #[must_use]
    pub fn forbidden(error: ApiError) -> Self {
        Self::with_errors(StatusCode::FORBIDDEN, [error])
    }

    /// Respond with 404 and one error.
    ///
    /// <https://jsonapi.org/format/#fetching-resources-responses-404>
    #[must_use]
    pub fn not_found(error: ApiError) -> Self {
        Self::with_errors(StatusCode::NOT_FOUND, [error])
    }

    /// Respond with 415 and one error.
    #[must_use]
    pub fn unsupported_media_type(error: ApiError) -> Self {
        Self::with_errors(StatusCode::UNSUPPORTED_MEDIA_TYPE, [error])
    }

    /// Respond with 500 and one error.
    #[must_use]
    pub fn internal_server_error(error: ApiError) -> Self {
        Self::with_errors(StatusCode::INTERNAL_SERVER_ERROR, [error])
    }

    /// Respond with any status and a list of errors.
    ///
    /// An empty list writes the status with an empty document (`{}`).
    #[must_use]
    pub fn with_errors(status: StatusCode, errors: impl IntoIterator<Item = ApiError>) -> Self {
        Self::with_payload(status, Payload::Errors(errors.into_iter().collect()))
    }

    /// Override the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a top-level `meta` entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add a top-level `links` entry.
    #[must_use]
    pub fn with_link(mut self, name: impl Into<String>, link: impl Into<Value>) -> Self {
        self.links
            .get_or_insert_with(Map::new)
            .insert(name.into(), link.into());
        self
    }

    /// Set the `included` resources.
    #[must_use]
    pub fn with_included(mut self, included: Vec<Value>) -> Self {
        self.included = Some(included);
        self
    }

    /// Add a `jsonapi` object entry, such as `version`.
    #[must_use]
    pub fn with_jsonapi(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.jsonapi
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Returns true for the no-op sentinel.
    #[must_use]
    pub fn is_no_response(&self) -> bool {
        self.status.is_none() && matches!(self.payload, Payload::Empty)
    }

    /// Borrow the primary data, if any.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match &self.payload {
            Payload::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Borrow the errors, if any. An empty list counts as none.
    #[must_use]
    pub fn errors(&self) -> Option<&[ApiError]> {
        match &self.payload {
            Payload::Errors(errors) if !errors.is_empty() => Some(errors),
            _ => None,
        }
    }

    /// The status the response is written with.
    #[must_use]
    pub fn resolved_status(&self) -> StatusCode {
        match (self.status, &self.payload) {
            (Some(status), _) => status,
            (None, Payload::Errors(_)) => StatusCode::BAD_REQUEST,
            (None, _) => StatusCode::OK,
        }
    }

    /// Convert the primary data, keeping everything else.
    #[must_use]
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        let payload = match self.payload {
            Payload::Empty => Payload::Empty,
            Payload::Data(data) => Payload::Data(f(data)),
            Payload::Errors(errors) => Payload::Errors(errors),
        };
        Response {
            status: self.status,
            payload,
            meta: self.meta,
            links: self.links,
            included: self.included,
            jsonapi: self.jsonapi,
        }
    }
}

impl<T: Serialize> Response<T> {
    /// Converts the data to a JSON value.
    ///
    /// Data that fails to serialize becomes a 500 error response.
    #[must_use]
    pub fn into_erased(self) -> Response<Value> {
        let erased = match self.payload {
            Payload::Data(ref data) => serde_json::to_value(data).map(Some),
            _ => Ok(None),
        };
        match erased {
            Ok(value) => self.map_data(|_| value.unwrap_or(Value::Null)),
            Err(err) => {
                tracing::warn!(error = %err, "response data is not serializable");
                Response::internal_server_error(ApiError::new())
            }
        }
    }

    /// Writes the response into `writer`.
    ///
    /// The no-op sentinel writes nothing. Body-less statuses get
    /// `Content-Length: 0` and no body. Otherwise the document is encoded
    /// first and written in one go followed by a newline; if encoding fails
    /// a bare 500 is written instead and the encoding error is returned.
    ///
    /// Errors without `code` or `title` are filled in from the status.
    pub fn write_to(mut self, writer: &mut dyn ResponseWriter) -> Result<(), WriteError> {
        if self.is_no_response() {
            return Ok(());
        }
        if !writer.headers().contains("content-type") {
            writer.headers_mut().insert("Content-Type", MEDIA_TYPE);
        }

        let status = self.resolved_status();
        if !status.allows_body() {
            writer.headers_mut().insert("Content-Length", "0");
            writer.write_status(status)?;
            return Ok(());
        }

        if let Payload::Errors(errors) = &mut self.payload {
            for error in errors {
                error.fill_defaults(status);
            }
        }

        match serde_json::to_vec(&self) {
            Ok(mut body) => {
                body.push(b'\n');
                writer.write_status(status)?;
                writer.write_all(&body)?;
                Ok(())
            }
            Err(err) => {
                writer.write_status(StatusCode::INTERNAL_SERVER_ERROR)?;
                Err(WriteError::Encode(err))
            }
        }
    }
}

impl<T: Serialize> Serialize for Response<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct Document<'a, T> {
            #[serde(skip_serializing_if = "Option::is_none")]
            data: Option<&'a T>,
            #[serde(skip_serializing_if = "Option::is_none")]
            errors: Option<&'a [ApiError]>,
            #[serde(skip_serializing_if = "Option::is_none")]
            included: Option<&'a [Value]>,
            #[serde(skip_serializing_if = "Option::is_none")]
            jsonapi: Option<&'a Map<String, Value>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            links: Option<&'a Map<String, Value>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            meta: Option<&'a Map<String, Value>>,
        }

        Document {
            data: self.data(),
            errors: self.errors(),
            included: self.included.as_deref(),
            jsonapi: self.jsonapi.as_ref(),
            links: self.links.as_ref(),
            meta: self.meta.as_ref(),
        }
        .serialize(serializer)
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = match &self.payload {
            Payload::Empty => "empty".to_owned(),
            Payload::Data(_) => "data".to_owned(),
            Payload::Errors(errors) => format!("{} error(s)", errors.len()),
        };
        f.debug_struct("Response")
            .field("status", &self.status.map(StatusCode::as_u16))
            .field("payload", &payload)
            .field("meta", &self.meta.as_ref().map(Map::len))
            .field("links", &self.links.as_ref().map(Map::len))
            .field("included", &self.included.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}
