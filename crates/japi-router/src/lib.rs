//! HTTP router for japi.
//!
//! Maps a method and a path pattern to a [`NativeHandler`](japi_core::NativeHandler).
//!
//! # Features
//!
//! - Literal segments and `{name}` parameters (`/posts/{id}`)
//! - Trailing `{name...}` parameters that capture the rest of the path
//! - Literal segments take precedence over parameters
//! - `405 Method Not Allowed` with an `Allow` header when only the method
//!   is wrong

#![warn(unsafe_code)]

mod r#match;
mod router;

pub use r#match::{AllowedMethods, RouteLookup, RouteMatch};
pub use router::{PatternError, Route, Router};
