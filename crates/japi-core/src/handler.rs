//! Handler traits and the adapters between the two calling conventions.
//!
//! A [`Handler`] takes a request and returns a [`Response`]. The connection
//! layer speaks [`NativeHandler`]: it hands over a [`Writer`] and expects the
//! callee to write. [`wrap`] turns the former into the latter; [`unwrap`]
//! goes the other way for code that must own the connection.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;

use crate::request::Request;
use crate::response::Response;
use crate::writer::Writer;

/// A function from request to response.
///
/// Implemented for every `Fn(Request) -> Response<T> + Send + Sync`.
pub trait Handler<T = Value>: Send + Sync {
    /// Handles one request.
    fn call(&self, req: Request) -> Response<T>;
}

impl<T, F> Handler<T> for F
where
    F: Fn(Request) -> Response<T> + Send + Sync,
{
    fn call(&self, req: Request) -> Response<T> {
        self(req)
    }
}

/// A handler that writes its output itself.
///
/// Implemented for every `Fn(Writer, Request) + Send + Sync`.
pub trait NativeHandler: Send + Sync {
    /// Serves one request into `writer`.
    fn serve(&self, writer: Writer, req: Request);
}

impl<F> NativeHandler for F
where
    F: Fn(Writer, Request) + Send + Sync,
{
    fn serve(&self, writer: Writer, req: Request) {
        self(writer, req);
    }
}

/// Boxed [`Handler`].
pub type BoxHandler<T = Value> = Box<dyn Handler<T>>;

/// Boxed [`NativeHandler`].
pub type BoxNativeHandler = Box<dyn NativeHandler>;

/// Adapts a [`Handler`] to the connection's calling convention.
///
/// For going the other way around, see [`unwrap`].
pub fn wrap<T, H>(handler: H) -> Wrapped<H, T>
where
    H: Handler<T>,
    T: Serialize,
{
    Wrapped {
        handler,
        _data: PhantomData,
    }
}

/// Adapts a [`NativeHandler`] so it can sit inside a [`Handler`] chain.
///
/// The returned handler must run inside a [`wrap`]ped call: it takes the
/// [`Writer`] from the request context and panics if there is none. It
/// always returns the no-op sentinel so the outer layer writes nothing.
pub fn unwrap<N: NativeHandler>(native: N) -> Unwrapped<N> {
    Unwrapped { native }
}

/// A [`Handler`] adapted by [`wrap`].
pub struct Wrapped<H, T> {
    handler: H,
    _data: PhantomData<fn() -> T>,
}

impl<H, T> NativeHandler for Wrapped<H, T>
where
    H: Handler<T>,
    T: Serialize,
{
    fn serve(&self, writer: Writer, mut req: Request) {
        if let Err(err) = req.attach(writer.clone()) {
            tracing::trace!(error = %err, "request already carries a writer");
        }
        let response = self.handler.call(req);
        if let Err(err) = writer.send(response) {
            tracing::warn!(error = %err, "failed to write response");
        }
    }
}

impl<H, T> fmt::Debug for Wrapped<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("data", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// A [`NativeHandler`] adapted by [`unwrap`].
#[derive(Debug)]
pub struct Unwrapped<N> {
    native: N,
}

impl<N, T> Handler<T> for Unwrapped<N>
where
    N: NativeHandler,
{
    fn call(&self, req: Request) -> Response<T> {
        let writer = req.must_singleton::<Writer>().clone();
        self.native.serve(writer, req);
        Response::no_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::request::Method;
    use crate::response::Void;
    use crate::status::StatusCode;
    use crate::testing::serve;

    fn get() -> Request {
        Request::new(Method::Get, "/foo")
    }

    #[test]
    fn wrap_writes_the_response() {
        let native = wrap(|_req: Request| Response::ok("hi"));
        let rec = serve(&native, get());
        assert_eq!(rec.status(), StatusCode::OK);
        assert_eq!(rec.body_string(), "{\"data\":\"hi\"}\n");
    }

    #[test]
    fn wrap_exposes_the_writer_singleton() {
        let native = wrap(|req: Request| {
            assert!(req.singleton::<Writer>().is_ok());
            Response::<Void>::no_content()
        });
        let rec = serve(&native, get());
        assert_eq!(rec.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn unwrap_writes_once() {
        let inner = |writer: Writer, _req: Request| {
            writer.set_header("Content-Type", "text/plain");
            writer.write_status(StatusCode::ACCEPTED).unwrap();
            writer.write_all(b"raw").unwrap();
        };
        let native = wrap::<Void, _>(unwrap(inner));
        let rec = serve(&native, get());
        assert_eq!(rec.status(), StatusCode::ACCEPTED);
        assert_eq!(rec.header("content-type"), Some("text/plain"));
        assert_eq!(rec.body_string(), "raw");
    }

    #[test]
    #[should_panic(expected = "no value of type")]
    fn unwrap_outside_wrap_panics() {
        let handler = unwrap(|_w: Writer, _r: Request| {});
        let _: Response<Void> = handler.call(get());
    }

    #[test]
    fn handlers_box_for_dynamic_dispatch() {
        let handlers: Vec<BoxHandler<Void>> = vec![
            Box::new(|_req: Request| Response::<Void>::no_content()),
            Box::new(|_req: Request| {
                Response::<Void>::bad_request(ApiError::from_detail("x"))
            }),
        ];
        let statuses: Vec<_> = handlers
            .iter()
            .map(|h| h.call(get()).resolved_status())
            .collect();
        assert_eq!(statuses, [StatusCode::NO_CONTENT, StatusCode::BAD_REQUEST]);
    }
}
