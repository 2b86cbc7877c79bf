//! JSON:API error objects.
//!
//! <https://jsonapi.org/format/#error-objects>

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::StatusCode;

/// A single JSON:API error object.
///
/// Every member is optional and omitted from the wire when unset. When a
/// response is written, an error without `code` or `title` is filled in from
/// the response status (see [`Response::write_to`](crate::Response::write_to)).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// A unique identifier for this particular occurrence of the problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// A short, human-readable summary of the problem.
    ///
    /// It should not change between occurrences of the same problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// A human-readable explanation specific to this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// The HTTP status code applicable to this problem, as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// An application-specific error code, as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Reference to the part of the request that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,

    /// Non-standard meta-information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// What in the request caused an error. Exactly one member is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// A JSON Pointer (RFC 6901) into the request document.
    Pointer(String),
    /// The URI query parameter that caused the error.
    Parameter(String),
    /// The name of the request header that caused the error.
    Header(String),
}

impl ApiError {
    /// Create an empty error object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortcut for an error carrying only `detail`.
    #[must_use]
    pub fn from_detail(detail: impl Into<String>) -> Self {
        Self::new().with_detail(detail)
    }

    /// Set the occurrence id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the status member.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16().to_string());
        self
    }

    /// Set the application code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the source reference.
    #[must_use]
    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Add one meta entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Fill `code` and `title` from `status` where they are unset.
    pub(crate) fn fill_defaults(&mut self, status: StatusCode) {
        if self.code.as_deref().is_none_or(str::is_empty) {
            self.code = Some(status.as_u16().to_string());
        }
        if self.title.as_deref().is_none_or(str::is_empty) {
            let reason = status.canonical_reason();
            if !reason.is_empty() {
                self.title = Some(reason.to_owned());
            }
        }
    }
}

impl ErrorSource {
    /// Source pointing into the request document.
    #[must_use]
    pub fn pointer(pointer: impl Into<String>) -> Self {
        Self::Pointer(pointer.into())
    }

    /// Source naming a query parameter.
    #[must_use]
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    /// Source naming a request header.
    #[must_use]
    pub fn header(name: impl Into<String>) -> Self {
        Self::Header(name.into())
    }
}
