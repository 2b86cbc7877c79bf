//! Routing of one endpoint by resource type.
//!
//! A [`Dispatcher`] accepts `{"data": {"type": ..., "attributes": ...}}` and
//! hands the attributes to the handler registered for that `type`.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::body::Document;
use crate::context::Context;
use crate::error::ApiError;
use crate::handler::Handler;
use crate::middleware::RequestLogger;
use crate::request::Request;
use crate::response::Response;

type DispatchFn = Box<dyn Fn(&Context, Value) -> Response<Value> + Send + Sync>;

/// Type-discriminated request handler.
///
/// ```
/// use japi_core::{Context, Dispatcher, Response};
///
/// #[derive(serde::Deserialize)]
/// #[serde(deny_unknown_fields)]
/// struct Ping {
///     n: u32,
/// }
///
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.register("ping", |_ctx: &Context, ping: Ping| Response::ok(ping.n + 1));
///
/// let body = br#"{"data":{"type":"ping","attributes":{"n":1}}}"#;
/// let response = dispatcher.dispatch(&Context::new(), body);
/// assert_eq!(response.data(), Some(&serde_json::json!(2)));
/// ```
pub struct Dispatcher {
    handlers: HashMap<String, DispatchFn>,
}

impl Dispatcher {
    /// Creates a dispatcher with no types registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for requests of type `kind`.
    ///
    /// Attributes are decoded into `R`; give `R` `#[serde(deny_unknown_fields)]`
    /// to reject unknown attributes.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `kind` is already registered.
    pub fn register<R, T, F>(&mut self, kind: impl Into<String>, handler: F) -> &mut Self
    where
        R: DeserializeOwned,
        T: Serialize,
        F: Fn(&Context, R) -> Response<T> + Send + Sync + 'static,
    {
        let kind = kind.into();
        assert!(
            !self.handlers.contains_key(&kind),
            "the dispatcher already contains a handler for type {kind}"
        );
        let decode_and_call = move |ctx: &Context, attributes: Value| {
            match serde_json::from_value::<R>(attributes) {
                Ok(request) => handler(ctx, request).into_erased(),
                Err(err) => Response::bad_request(invalid_json(&err)),
            }
        };
        self.handlers.insert(kind, Box::new(decode_and_call));
        self
    }

    /// Registered types, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Decodes `body` and calls the handler for its type.
    ///
    /// Every decoding problem becomes a 400 response. If `ctx` carries a
    /// [`RequestLogger`], the handler sees a child logger tagged with the
    /// request type.
    pub fn dispatch(&self, ctx: &Context, body: &[u8]) -> Response<Value> {
        let document: Document<Value> = match serde_json::from_slice(body) {
            Ok(document) => document,
            Err(err) => return Response::bad_request(invalid_json(&err)),
        };
        let Some(data) = document.data else {
            return Response::bad_request(
                ApiError::new().with_title("JSON request misses the data field"),
            );
        };
        if data.has_id() {
            return Response::bad_request(ApiError::new().with_title("request cannot contain id"));
        }
        let Some(handler) = self.handlers.get(&data.kind) else {
            tracing::debug!(request_type = %data.kind, "no handler for request type");
            return Response::bad_request(ApiError::new().with_title("Unsupported request type"));
        };

        match ctx.get::<RequestLogger>() {
            Ok(logger) => {
                let child = logger.for_request_type(&data.kind);
                let ctx = ctx.shadow(child.clone());
                child.in_scope(|| handler(&ctx, data.attributes))
            }
            Err(_) => handler(ctx, data.attributes),
        }
    }
}

fn invalid_json(err: &serde_json::Error) -> ApiError {
    ApiError::new()
        .with_title("Invalid JSON request")
        .with_detail(err.to_string())
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Handler<Value> for Dispatcher {
    fn call(&self, req: Request) -> Response<Value> {
        self.dispatch(req.context(), req.body().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::logger;
    use crate::request::Method;
    use crate::status::StatusCode;
    use serde::Deserialize;
    use serde_json::json;
    use tracing::Span;
    use tracing_test::traced_test;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct CreatePost {
        title: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct CreateUser {
        name: String,
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register("posts", |_ctx: &Context, req: CreatePost| {
            Response::created(json!({"type": "posts", "title": req.title}))
        })
        .register("users", |_ctx: &Context, req: CreateUser| Response::ok(req.name));
        d
    }

    fn title_of(resp: &Response<Value>) -> Option<&str> {
        resp.errors()?.first()?.title.as_deref()
    }

    #[test]
    fn routes_by_type() {
        let d = dispatcher();
        let ctx = Context::new();
        let post = d.dispatch(&ctx, br#"{"data":{"type":"posts","attributes":{"title":"hi"}}}"#);
        assert_eq!(post.resolved_status(), StatusCode::CREATED);
        assert_eq!(post.data().unwrap()["title"], "hi");

        let user = d.dispatch(&ctx, br#"{"data":{"type":"users","attributes":{"name":"sam"}}}"#);
        assert_eq!(user.data(), Some(&json!("sam")));
        assert_eq!(d.kinds(), ["posts", "users"]);
    }

    #[test]
    fn protocol_errors_are_bad_requests() {
        let d = dispatcher();
        let ctx = Context::new();
        let cases: [(&[u8], &str); 6] = [
            (b"", "Invalid JSON request"),
            (b"{\"data\":", "Invalid JSON request"),
            (b"{\"data\":null,\"extra\":1}", "Invalid JSON request"),
            (b"{}", "JSON request misses the data field"),
            (
                br#"{"data":{"type":"posts","id":"1","attributes":{"title":"x"}}}"#,
                "request cannot contain id",
            ),
            (
                br#"{"data":{"type":"comments","attributes":{}}}"#,
                "Unsupported request type",
            ),
        ];
        for (body, title) in cases {
            let resp = d.dispatch(&ctx, body);
            assert_eq!(resp.resolved_status(), StatusCode::BAD_REQUEST);
            assert_eq!(title_of(&resp), Some(title), "{}", String::from_utf8_lossy(body));
        }
    }

    #[test]
    fn unknown_attributes_are_rejected() {
        let resp = dispatcher().dispatch(
            &Context::new(),
            br#"{"data":{"type":"posts","attributes":{"title":"x","body":"y"}}}"#,
        );
        assert_eq!(title_of(&resp), Some("Invalid JSON request"));
        let detail = resp.errors().unwrap()[0].detail.clone().unwrap();
        assert!(detail.contains("body"), "{detail}");
    }

    #[test]
    #[should_panic(expected = "already contains a handler for type posts")]
    fn duplicate_registration_panics() {
        let mut d = dispatcher();
        d.register("posts", |_ctx: &Context, _req: CreatePost| Response::ok(()));
    }

    #[test]
    #[traced_test]
    fn handler_logs_carry_request_type() {
        let mut d = Dispatcher::new();
        d.register("posts", |ctx: &Context, _req: CreatePost| {
            ctx.must_get::<RequestLogger>()
                .in_scope(|| tracing::info!("creating post"));
            Response::ok(())
        });
        let handler = logger(Span::current(), d);
        let req = Request::new(Method::Post, "/posts")
            .with_body(r#"{"data":{"type":"posts","attributes":{"title":"x"}}}"#);
        let resp = handler.call(req);
        assert_eq!(resp.resolved_status(), StatusCode::OK);
        assert!(logs_contain("creating post"));
        assert!(logs_contain("request_type=\"posts\""));
    }
}
