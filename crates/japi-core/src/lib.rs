//! Core types and traits for japi.
//!
//! This crate provides the building blocks of a JSON:API service:
//! - [`Context`], the immutable per-request singleton store
//! - [`Request`] and the [`Response`] envelope
//! - [`Handler`] / [`NativeHandler`] and the [`wrap`] / [`unwrap`] adapters
//! - [`ApiError`] error objects and typed [`path_id`] parameters
//! - request [`body`] reading and the type-routing [`Dispatcher`]
//! - [`middleware`] and [`testing`] helpers
//!
//! # Design Principles
//!
//! - Handlers are plain functions from request to response
//! - Extending a context never mutates it
//! - Protocol errors are values; only wiring bugs panic
//! - Cancellation follows the asupersync [`Cx`](asupersync::Cx) the request
//!   was rooted with

#![forbid(unsafe_code)]

pub mod body;
mod context;
mod dispatcher;
mod error;
mod handler;
pub mod middleware;
mod path;
mod request;
mod response;
mod status;
pub mod testing;
mod writer;

pub use context::{CancelledError, Context, SingletonError};
pub use dispatcher::Dispatcher;
pub use error::{ApiError, ErrorSource};
pub use handler::{
    BoxHandler, BoxNativeHandler, Handler, NativeHandler, Unwrapped, Wrapped, unwrap, wrap,
};
pub use path::{PathInteger, path_id};
pub use request::{Body, Headers, Method, Request};
pub use response::{MEDIA_TYPE, Payload, Response, Void, WriteError};
pub use status::StatusCode;
pub use writer::{Recorder, Recording, ResponseWriter, Writer, set_header};

// Re-export the capability context for servers that root requests in one
pub use asupersync::Cx;
