use tracing::Span;

use crate::handler::Handler;
use crate::request::Request;

/// Request-scoped logger attached by [`logger`].
///
/// Wraps the request's [`Span`]; events emitted inside
/// [`in_scope`](Self::in_scope) carry the request fields.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    span: Span,
}

impl RequestLogger {
    /// Wraps an existing span.
    #[must_use]
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// The request span.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Runs `f` inside the request span.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        self.span.in_scope(f)
    }

    /// A child logger tagged with the dispatched request type.
    #[must_use]
    pub fn for_request_type(&self, request_type: &str) -> Self {
        Self::new(tracing::info_span!(parent: &self.span, "dispatch", request_type))
    }
}

/// Attaches a [`RequestLogger`] whose span is a child of `parent` and runs
/// `handler` inside it.
///
/// The span records the method, path, declared content length, and request
/// id.
///
/// # Panics
///
/// The returned handler panics if a `RequestLogger` is already attached.
pub fn logger<H, R>(parent: Span, handler: H) -> impl Handler<R>
where
    H: Handler<R>,
{
    move |mut req: Request| {
        let span = tracing::info_span!(
            parent: &parent,
            "request",
            method = %req.method(),
            path = req.path(),
            content_length = req.content_length(),
            request_id = req.context().request_id(),
        );
        req.must_attach(RequestLogger::new(span.clone()));
        span.in_scope(|| {
            tracing::debug!("handling request");
            handler.call(req)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::request::Method;
    use crate::response::{Response, Void};
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn attaches_a_logger_with_request_fields() {
        let handler = logger(Span::current(), |req: Request| {
            let log = req.must_singleton::<RequestLogger>();
            log.in_scope(|| tracing::info!("inside handler"));
            Response::<Void>::no_content()
        });
        let req = Request::new(Method::Post, "/posts")
            .with_header("Content-Length", "12")
            .with_context(Context::with_request_id(77));
        let _ = handler.call(req);

        assert!(logs_contain("inside handler"));
        assert!(logs_contain("method=POST"));
        assert!(logs_contain("path=\"/posts\""));
        assert!(logs_contain("content_length=12"));
        assert!(logs_contain("request_id=77"));
    }

    #[test]
    #[traced_test]
    fn child_logger_adds_request_type() {
        let log = RequestLogger::new(tracing::info_span!(parent: &Span::current(), "request"));
        log.for_request_type("posts")
            .in_scope(|| tracing::info!("dispatched"));
        assert!(logs_contain("request_type=\"posts\""));
    }
}
