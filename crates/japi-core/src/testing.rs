//! Helpers for testing handlers.
//!
//! ```
//! use japi_core::testing::TestRequest;
//! use japi_core::{Request, Response, StatusCode, wrap};
//!
//! let native = wrap(|req: Request| Response::ok(req.path().to_owned()));
//! let rec = TestRequest::get("/hello").serve(&native);
//! assert_eq!(rec.status(), StatusCode::OK);
//! assert_eq!(rec.body_string(), "{\"data\":\"/hello\"}\n");
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::Context;
use crate::handler::NativeHandler;
use crate::request::{Body, Method, Request};
use crate::response::MEDIA_TYPE;
use crate::writer::{Recorder, Recording, Writer};

/// Interval between attempts of [`wait_for`].
pub const WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Runs `native` against an in-memory writer and returns what it wrote.
pub fn serve<N: NativeHandler + ?Sized>(native: &N, req: Request) -> Recording {
    let recorder = Recorder::new();
    let shared = recorder.shared();
    let writer = Writer::new(recorder);
    native.serve(writer.clone(), req);
    if let Err(err) = writer.finish() {
        tracing::warn!(error = %err, "recorder failed to finish");
    }
    shared.lock().clone()
}

/// Retries `attempt` until it succeeds or `max_wait` has passed.
///
/// `attempt` always runs at least once. On timeout the last error is
/// returned.
pub fn wait_for<E>(
    max_wait: Duration,
    mut attempt: impl FnMut() -> Result<(), E>,
) -> Result<(), E> {
    let deadline = Instant::now() + max_wait;
    loop {
        let result = attempt();
        if result.is_ok() || Instant::now() >= deadline {
            return result;
        }
        thread::sleep(WAIT_INTERVAL);
    }
}

/// Memoizes fixture functions for the duration of one test.
///
/// Create one scope per test and pass it down. A fixture is a plain
/// `fn(&Fixtures) -> V` and is identified by its address, so two fixtures
/// with the same signature keep separate values. It can pull other fixtures
/// from the same scope. Each fixture function runs at most once per scope
/// and every caller gets the same value.
///
/// ```
/// use japi_core::testing::Fixtures;
///
/// fn config(_: &Fixtures) -> String {
///     "postgres://localhost/test".to_owned()
/// }
///
/// fn pool(fx: &Fixtures) -> Vec<String> {
///     vec![fx.get(config).to_string(); 2]
/// }
///
/// let fx = Fixtures::new();
/// assert!(std::sync::Arc::ptr_eq(&fx.get(pool), &fx.get(pool)));
/// ```
#[derive(Default)]
pub struct Fixtures {
    values: Mutex<HashMap<FixtureKey, Arc<dyn Any + Send + Sync>>>,
}

/// Value type and function address of a fixture.
type FixtureKey = (TypeId, usize);

impl Fixtures {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `fixture`, running it if this scope has not yet.
    ///
    /// The fixture runs without the scope locked, so it may request other
    /// fixtures. If two threads race on the same fixture, the first value
    /// stored wins.
    pub fn get<V>(&self, fixture: fn(&Fixtures) -> V) -> Arc<V>
    where
        V: Send + Sync + 'static,
    {
        let key = (TypeId::of::<V>(), fixture as usize);
        if let Some(value) = self.lookup::<V>(key) {
            return value;
        }
        let made = Arc::new(fixture(self));
        let erased = Arc::clone(&made);
        let stored = Arc::clone(self.values.lock().entry(key).or_insert(erased));
        stored.downcast::<V>().unwrap_or(made)
    }

    /// Number of fixtures computed in this scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Returns true if no fixture has run yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    fn lookup<V: Send + Sync + 'static>(&self, key: FixtureKey) -> Option<Arc<V>> {
        let value = Arc::clone(self.values.lock().get(&key)?);
        value.downcast::<V>().ok()
    }
}

impl fmt::Debug for Fixtures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixtures")
            .field("computed", &self.len())
            .finish()
    }
}

/// Builder for requests in tests.
#[derive(Debug)]
pub struct TestRequest {
    request: Request,
}

impl TestRequest {
    /// A request with any method.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (path, None),
        };
        let mut request = Request::new(method, path);
        request.set_query(query);
        Self { request }
    }

    /// A GET request.
    #[must_use]
    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    /// A POST request.
    #[must_use]
    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    /// A PATCH request.
    #[must_use]
    pub fn patch(path: &str) -> Self {
        Self::new(Method::Patch, path)
    }

    /// A DELETE request.
    #[must_use]
    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request.headers_mut().append(name, value);
        self
    }

    /// Sets a raw body and its `Content-Length`.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        let body = body.into();
        self.request
            .headers_mut()
            .insert("Content-Length", body.as_bytes().len().to_string());
        self.request.set_body(body);
        self
    }

    /// Sets a JSON:API document body with the matching `Content-Type`.
    #[must_use]
    pub fn json_api(self, document: &serde_json::Value) -> Self {
        let mut this = self.body(document.to_string().into_bytes());
        this.request.headers_mut().insert("Content-Type", MEDIA_TYPE);
        this
    }

    /// Sets a path parameter, as a router would.
    #[must_use]
    pub fn path_param(mut self, name: &str, value: &str) -> Self {
        self.request.set_path_param(name, value);
        self
    }

    /// Roots the request in `context`.
    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.request.set_context(context);
        self
    }

    /// Attaches a singleton.
    ///
    /// # Panics
    ///
    /// Panics if a value of the same type is already attached.
    #[must_use]
    pub fn singleton<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.request.must_attach(value);
        self
    }

    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }

    /// Serves the request with `native`.
    pub fn serve<N: NativeHandler + ?Sized>(self, native: &N) -> Recording {
        serve(native, self.request)
    }
}
