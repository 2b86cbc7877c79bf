//! Route table and request dispatch.

use std::borrow::Cow;
use std::fmt;

use japi_core::{
    ApiError, BoxNativeHandler, Method, NativeHandler, Request, Response, StatusCode, Void,
    Writer,
};

use crate::r#match::{AllowedMethods, RouteLookup, RouteMatch};

/// Error returned when a route cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Patterns are absolute paths.
    #[error("pattern {0:?} must start with '/'")]
    MissingLeadingSlash(String),
    /// A `{}` segment without a name, or with characters other than
    /// alphanumerics and `_`.
    #[error("pattern {0:?} has an invalid parameter name")]
    InvalidParam(String),
    /// The same parameter name twice in one pattern.
    #[error("pattern {pattern:?} repeats parameter {name}")]
    DuplicateParam {
        /// The offending pattern.
        pattern: String,
        /// The repeated name.
        name: String,
    },
    /// `{name...}` anywhere but the last segment.
    #[error("pattern {0:?} has a rest parameter before its last segment")]
    RestNotLast(String),
    /// The pattern matches exactly the same paths as an existing one.
    #[error("pattern {new:?} conflicts with {existing:?}")]
    Conflict {
        /// Pattern already registered.
        existing: String,
        /// Pattern being registered.
        new: String,
    },
    /// A handler for this method and pattern already exists.
    #[error("{method} {pattern} is already registered")]
    Duplicate {
        /// Method of the second registration.
        method: Method,
        /// Pattern of the second registration.
        pattern: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 2,
            Self::Param(_) => 1,
            Self::Rest(_) => 0,
        }
    }

    fn shape(&self) -> &str {
        match self {
            Self::Literal(lit) => lit,
            Self::Param(_) => "{}",
            Self::Rest(_) => "{...}",
        }
    }
}

/// One path pattern and the handlers registered for it, by method.
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    rank: Vec<u8>,
    handlers: Vec<(Method, BoxNativeHandler)>,
}

impl Route {
    fn parse(pattern: &str) -> Result<Self, PatternError> {
        let body = pattern
            .strip_prefix('/')
            .ok_or_else(|| PatternError::MissingLeadingSlash(pattern.to_owned()))?;
        let parts: Vec<&str> = body.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                None => Segment::Literal((*part).to_owned()),
                Some(inner) => {
                    let (name, rest) = match inner.strip_suffix("...") {
                        Some(name) => (name, true),
                        None => (inner, false),
                    };
                    if !is_param_name(name) {
                        return Err(PatternError::InvalidParam(pattern.to_owned()));
                    }
                    if rest && idx + 1 != parts.len() {
                        return Err(PatternError::RestNotLast(pattern.to_owned()));
                    }
                    let name = name.to_owned();
                    if rest { Segment::Rest(name) } else { Segment::Param(name) }
                }
            };
            if let Segment::Param(name) | Segment::Rest(name) = &segment {
                let seen = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(n) | Segment::Rest(n) if n == name));
                if seen {
                    return Err(PatternError::DuplicateParam {
                        pattern: pattern.to_owned(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }
        Ok(Self {
            pattern: pattern.to_owned(),
            rank: segments.iter().map(Segment::rank).collect(),
            segments,
            handlers: Vec::new(),
        })
    }

    /// The pattern as registered.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Methods with a handler, normalized for an `Allow` header.
    #[must_use]
    pub fn methods(&self) -> AllowedMethods {
        AllowedMethods::new(self.handlers.iter().map(|(m, _)| *m).collect())
    }

    /// Handler for `method`, where `HEAD` falls back to `GET`.
    #[must_use]
    pub fn handler(&self, method: Method) -> Option<&dyn NativeHandler> {
        self.resolve(method).map(|(_, handler)| handler)
    }

    fn resolve(&self, method: Method) -> Option<(Method, &dyn NativeHandler)> {
        let find = |wanted: Method| {
            self.handlers
                .iter()
                .find(|(m, _)| *m == wanted)
                .map(|(m, h)| (*m, h.as_ref()))
        };
        find(method).or_else(|| {
            if method == Method::Head {
                find(Method::Get)
            } else {
                None
            }
        })
    }

    fn same_shape(&self, other: &Route) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.shape() == b.shape())
    }

    fn capture<'a>(&'a self, path: &'a str) -> Option<Vec<(&'a str, Cow<'a, str>)>> {
        let parts: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        let mut params = Vec::new();
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    // The slash before the rest segment must be present.
                    let rest = parts.get(idx..).filter(|rest| !rest.is_empty())?.join("/");
                    params.push((name.as_str(), Cow::Owned(percent_decode(&rest).into_owned())));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if parts.get(idx) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let part = parts.get(idx).copied().filter(|p| !p.is_empty())?;
                    params.push((name.as_str(), percent_decode(part)));
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods().header_value())
            .finish()
    }
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Decode `%XX` escapes. Malformed escapes are kept as-is.
fn percent_decode(s: &str) -> Cow<'_, str> {
    if !s.contains('%') {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                result.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&result).into_owned())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Method and path router.
///
/// ```
/// use japi_core::testing::TestRequest;
/// use japi_core::{Request, Response, StatusCode, path_id, wrap};
/// use japi_router::Router;
///
/// let mut router = Router::new();
/// router.get(
///     "/posts/{id}",
///     wrap(|req: Request| match path_id::<u32>(&req, "id") {
///         Ok(id) => Response::ok(id),
///         Err(err) => Response::bad_request(err),
///     }),
/// );
///
/// let rec = TestRequest::get("/posts/7").serve(&router);
/// assert_eq!(rec.body_string(), "{\"data\":7}\n");
///
/// let rec = TestRequest::delete("/posts/7").serve(&router);
/// assert_eq!(rec.status(), StatusCode::METHOD_NOT_ALLOWED);
/// assert_eq!(rec.header("Allow"), Some("GET, HEAD"));
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` requests matching `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or the registration conflicts
    /// with an existing one. See [`try_route`](Self::try_route).
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl NativeHandler + 'static,
    ) -> &mut Self {
        if let Err(err) = self.try_route(method, pattern, handler) {
            panic!("{err}");
        }
        self
    }

    /// Fallible form of [`route`](Self::route).
    pub fn try_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl NativeHandler + 'static,
    ) -> Result<&mut Self, PatternError> {
        let parsed = Route::parse(pattern)?;
        let idx = match self.routes.iter().position(|r| r.same_shape(&parsed)) {
            Some(idx) => idx,
            None => {
                self.routes.push(parsed);
                self.routes.len() - 1
            }
        };
        let route = &mut self.routes[idx];
        if route.pattern != pattern {
            return Err(PatternError::Conflict {
                existing: route.pattern.clone(),
                new: pattern.to_owned(),
            });
        }
        if route.handlers.iter().any(|(m, _)| *m == method) {
            return Err(PatternError::Duplicate {
                method,
                pattern: pattern.to_owned(),
            });
        }
        tracing::trace!(%method, pattern, "route registered");
        route.handlers.push((method, Box::new(handler)));
        Ok(self)
    }

    /// Registers a `GET` handler. It also serves `HEAD`.
    pub fn get(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Get, pattern, handler)
    }

    /// Registers a `HEAD` handler.
    pub fn head(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Head, pattern, handler)
    }

    /// Registers a `POST` handler.
    pub fn post(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Post, pattern, handler)
    }

    /// Registers a `PUT` handler.
    pub fn put(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Put, pattern, handler)
    }

    /// Registers a `PATCH` handler.
    pub fn patch(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Patch, pattern, handler)
    }

    /// Registers a `DELETE` handler.
    pub fn delete(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Delete, pattern, handler)
    }

    /// Registers an `OPTIONS` handler.
    pub fn options(&mut self, pattern: &str, handler: impl NativeHandler + 'static) -> &mut Self {
        self.route(Method::Options, pattern, handler)
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Number of distinct patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the handler for `method` and `path`.
    ///
    /// Among patterns matching the path, the most specific one with a
    /// handler for the method wins. If patterns match but none has the
    /// method, the union of their methods is reported.
    #[must_use]
    pub fn lookup<'a>(&'a self, method: Method, path: &'a str) -> RouteLookup<'a> {
        let mut candidates: Vec<_> = self
            .routes
            .iter()
            .filter_map(|route| route.capture(path).map(|params| (route, params)))
            .collect();
        if candidates.is_empty() {
            return RouteLookup::NotFound;
        }
        candidates.sort_by(|(a, _), (b, _)| b.rank.cmp(&a.rank));

        let mut allowed = Vec::new();
        for (route, params) in candidates {
            if let Some((method, handler)) = route.resolve(method) {
                return RouteLookup::Match(RouteMatch {
                    route,
                    method,
                    handler,
                    params,
                });
            }
            allowed.extend(route.handlers.iter().map(|(m, _)| *m));
        }
        RouteLookup::MethodNotAllowed {
            allowed: AllowedMethods::new(allowed),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .finish()
    }
}

impl NativeHandler for Router {
    fn serve(&self, writer: Writer, mut req: Request) {
        let method = req.method();
        let path = req.path().to_owned();
        let response = match self.lookup(method, &path) {
            RouteLookup::Match(found) => {
                for (name, value) in &found.params {
                    req.set_path_param(*name, &**value);
                }
                found.handler.serve(writer, req);
                return;
            }
            RouteLookup::MethodNotAllowed { allowed } => {
                tracing::debug!(%method, path = %path, "method not allowed");
                writer.set_header("Allow", allowed.header_value());
                Response::<Void>::with_errors(
                    StatusCode::METHOD_NOT_ALLOWED,
                    [ApiError::from_detail(format!(
                        "method {method} is not allowed for {path}"
                    ))],
                )
            }
            RouteLookup::NotFound => {
                tracing::debug!(%method, path = %path, "no route matched");
                Response::not_found(ApiError::from_detail(format!("no route for {path}")))
            }
        };
        if let Err(err) = writer.send(response) {
            tracing::warn!(error = %err, "failed to write routing error");
        }
    }
}
