//! Handler middleware.
//!
//! Every middleware is a function taking a [`Handler`](crate::Handler) and
//! returning a new one, so layers compose by nesting calls:
//!
//! ```
//! use japi_core::middleware::{content_type, recover, with};
//! use japi_core::{Request, Response, Void};
//!
//! #[derive(Clone)]
//! struct Db;
//!
//! let handler = recover(with(Db, content_type("", |req: Request| {
//!     assert!(req.singleton::<Db>().is_ok());
//!     Response::<Void>::no_content()
//! })));
//! # let _ = handler;
//! ```
//!
//! The outermost layer runs first. Each layer can only add singletons for the
//! layers inside it; nothing flows back out.

mod auth;
mod content_type;
mod logger;
mod recover;
mod with;

pub use auth::{AuthError, auth};
pub use content_type::content_type;
pub use logger::{RequestLogger, logger};
pub use recover::recover;
pub use with::{Singletons, with, with_all};
