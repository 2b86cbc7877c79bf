//! JSON:API handlers with request-scoped singletons.
//!
//! japi is a thin layer over a blocking HTTP/1.1 server:
//!
//! - **Plain handlers**: a handler is a function from [`Request`] to
//!   [`Response`], and the response is the whole JSON:API envelope
//! - **Singletons**: middleware attaches values to the request by type, and
//!   handlers read them back with [`Request::singleton`]
//! - **Escape hatch**: the connection [`Writer`] is itself a singleton, for
//!   handlers that need to stream
//!
//! # Quick Start
//!
//! ```no_run
//! use japi::prelude::*;
//!
//! #[derive(Serialize)]
//! struct Greeting {
//!     message: String,
//! }
//!
//! fn hello(req: Request) -> Response<Greeting> {
//!     match path_id::<u32>(&req, "times") {
//!         Ok(n) => Response::ok(Greeting {
//!             message: "hello ".repeat(n as usize),
//!         }),
//!         Err(err) => Response::bad_request(err),
//!     }
//! }
//!
//! let mut router = Router::new();
//! router.get("/hello/{times}", wrap(hello));
//! japi::serve("127.0.0.1:8080", router)?;
//! # Ok::<(), japi::http::ServerError>(())
//! ```
//!
//! # Crate Structure
//!
//! - [`japi_core`]: context, envelope, handlers, middleware, test helpers
//! - [`japi_router`]: method and path routing
//! - [`japi_http`]: the server

#![forbid(unsafe_code)]

// Re-export crates
pub use japi_core as core;
pub use japi_http as http;
pub use japi_router as router;

// Re-export commonly used types
pub use japi_core::{
    ApiError, Context, Dispatcher, ErrorSource, Handler, MEDIA_TYPE, Method, NativeHandler,
    Payload, Request, Response, StatusCode, Void, Writer, body, middleware, path_id, set_header,
    testing, unwrap, wrap,
};
pub use japi_http::{Server, ServerConfig, ServerError};
pub use japi_router::Router;

/// Serves `handler` on `addr` with the default timeouts and limits.
///
/// Blocks until the process exits. Use [`Server`] directly for custom
/// settings or a shutdown handle.
pub fn serve(addr: &str, handler: impl NativeHandler + 'static) -> Result<(), ServerError> {
    Server::new(ServerConfig::new(addr)).serve(handler)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        ApiError, Context, Dispatcher, ErrorSource, Handler, Method, NativeHandler, Request,
        Response, Router, Server, ServerConfig, StatusCode, Void, Writer, path_id, set_header,
        unwrap, wrap,
    };
    pub use japi_core::middleware::{auth, content_type, logger, recover, with, with_all};
    pub use serde::{Deserialize, Serialize};
}
