//! HTTP/1.1 server for japi on the asupersync runtime.
//!
//! Parses request heads with `httparse`, frames bodies by `Content-Length`
//! or chunked encoding, and serves a bounded number of connections from one
//! task. Every request context carries the server's `Cx`.
//!
//! # Features
//!
//! - Timeouts on every phase of a connection (see [`ServerConfig`])
//! - A limit on connections served at once
//! - Limits on head and body size, answered with JSON:API errors
//! - Keep-alive and pipelining
//! - Buffered responses with `Content-Length`, chunked after an explicit
//!   flush
//!
//! # Example
//!
//! ```no_run
//! use japi_core::{Request, Response, wrap};
//! use japi_http::{Server, ServerConfig};
//!
//! let config = ServerConfig::new("0.0.0.0:8080");
//! Server::new(config).serve(wrap(|_req: Request| Response::ok("pong")))?;
//! # Ok::<(), japi_http::ServerError>(())
//! ```

#![forbid(unsafe_code)]

pub mod body;
mod parser;
mod response;
mod server;
mod timer;

pub use body::{BodyConfig, BodyError, BodyLength, DEFAULT_MAX_BODY_SIZE};
pub use parser::{MAX_HEADERS, ParseError, RequestHead, parse_head};
pub use response::ConnWriter;
pub use server::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_HEADER_BYTES, Server, ServerConfig, ServerError,
    ShutdownHandle,
};
