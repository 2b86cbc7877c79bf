//! Reading JSON:API request documents.
//!
//! <https://jsonapi.org/format/#crud-creating>

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::request::Request;

/// Top-level request document. Unknown members are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document<A> {
    /// Primary data; `None` when absent or `null`.
    pub data: Option<ResourceObject<A>>,
}

/// A resource object carried as primary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceObject<A> {
    /// The resource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Client-side ids are not accepted by [`read`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The resource attributes.
    pub attributes: A,
}

impl<A> ResourceObject<A> {
    /// Returns true if the object carries a non-empty id.
    #[must_use]
    pub fn has_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Error returned by [`read`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// No body bytes at all.
    #[error("request body is empty")]
    EmptyBody,
    /// Malformed JSON, unknown members, or attributes of the wrong shape.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The document has no primary data.
    #[error("data field not found in request body")]
    MissingData,
    /// The resource type is not the expected one.
    #[error("unexpected request type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// The type the endpoint accepts.
        expected: String,
        /// The type the client sent.
        actual: String,
    },
    /// The client supplied a resource id.
    #[error("requests cannot contain id")]
    IdNotAllowed,
}

impl From<ReadError> for ApiError {
    fn from(err: ReadError) -> Self {
        ApiError::from_detail(err.to_string())
    }
}

/// Reads the attributes of a `kind` resource from the request body.
///
/// ```
/// use japi_core::{Method, Request, body};
///
/// #[derive(serde::Deserialize)]
/// struct Post {
///     title: String,
/// }
///
/// let req = Request::new(Method::Post, "/posts")
///     .with_body(r#"{"data":{"type":"posts","attributes":{"title":"hello"}}}"#);
/// let post: Post = body::read("posts", &req).unwrap();
/// assert_eq!(post.title, "hello");
/// ```
pub fn read<T: DeserializeOwned>(kind: &str, req: &Request) -> Result<T, ReadError> {
    read_bytes(kind, req.body().as_bytes())
}

/// [`read`] over raw bytes.
pub fn read_bytes<T: DeserializeOwned>(kind: &str, bytes: &[u8]) -> Result<T, ReadError> {
    if bytes.is_empty() {
        return Err(ReadError::EmptyBody);
    }
    let document: Document<T> = serde_json::from_slice(bytes)?;
    let data = document.data.ok_or(ReadError::MissingData)?;
    if data.kind != kind {
        return Err(ReadError::UnexpectedType {
            expected: kind.to_owned(),
            actual: data.kind,
        });
    }
    if data.has_id() {
        return Err(ReadError::IdNotAllowed);
    }
    Ok(data.attributes)
}
