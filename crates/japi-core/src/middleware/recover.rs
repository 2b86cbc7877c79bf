use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::logger::RequestLogger;
use crate::error::ApiError;
use crate::handler::Handler;
use crate::request::Request;
use crate::response::Response;

/// Turns a panic in `handler` into a 500 response.
///
/// The client only sees the generic title `Internal server error`. The panic
/// message is logged through the request's [`RequestLogger`] when one is
/// attached, otherwise through the global subscriber.
pub fn recover<H, R>(handler: H) -> impl Handler<R>
where
    H: Handler<R>,
{
    move |req: Request| {
        let logger = req.singleton::<RequestLogger>().ok().cloned();
        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(req))) {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let log = || tracing::error!(panic = message, "handler panicked");
                match &logger {
                    Some(logger) => logger.in_scope(log),
                    None => log(),
                }
                Response::internal_server_error(ApiError::new().with_title("Internal server error"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::wrap;
    use crate::middleware::logger;
    use crate::request::Method;
    use crate::status::StatusCode;
    use crate::testing::serve;
    use tracing::Span;
    use tracing_test::traced_test;

    fn get() -> Request {
        Request::new(Method::Get, "http://example.com/foo")
    }

    #[test]
    fn passes_responses_through() {
        let native = wrap(recover(|_req: Request| Response::ok("hi")));
        let rec = serve(&native, get());
        assert_eq!(rec.status(), StatusCode::OK);
        assert_eq!(rec.body_string(), "{\"data\":\"hi\"}\n");
    }

    #[test]
    #[traced_test]
    fn panic_becomes_500() {
        let native = wrap(recover(|_req: Request| -> Response<String> { panic!("oh no") }));
        let rec = serve(&native, get());
        assert_eq!(rec.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = rec.json();
        assert_eq!(body["errors"][0]["title"], "Internal server error");
        assert_eq!(body["errors"][0]["code"], "500");
        assert!(!rec.body_string().contains("oh no"));
        assert!(logs_contain("handler panicked"));
    }

    #[test]
    #[traced_test]
    fn panic_is_logged_in_the_request_span() {
        let handler = logger(
            Span::current(),
            recover(|_req: Request| -> Response<String> {
                panic!("{}", String::from("formatted boom"))
            }),
        );
        let response = handler.call(get());
        assert_eq!(response.resolved_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logs_contain("formatted boom"));
        assert!(logs_contain("path=\"http://example.com/foo\""));
    }
}
