use std::fmt;

use crate::error::ApiError;
use crate::handler::Handler;
use crate::request::Request;
use crate::response::Response;

/// Why [`auth`] rejected a request. The message becomes the 401 `detail`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// `Authorization` is present but not a bearer token.
    #[error("Unsupported Authorization type")]
    UnsupportedType,
    /// `Authorization: Bearer` with nothing after it.
    #[error("Authorization token is empty")]
    EmptyToken,
    /// No token in either `Authorization` or `Sec-WebSocket-Protocol`.
    #[error("Authorization header not found")]
    Missing,
    /// The validator refused the token.
    #[error("{0}")]
    Rejected(String),
}

/// Authenticates every request with `validator` before calling `handler`.
///
/// The token comes from `Authorization: Bearer <token>`. Browsers cannot set
/// that header on a WebSocket handshake, so when it is absent the token is
/// read from `Sec-WebSocket-Protocol` as the value following an
/// `Authorization` entry, e.g. `Sec-WebSocket-Protocol: Authorization, <token>`.
///
/// On success the user returned by the validator is attached to the request.
/// Any failure responds with 401.
///
/// # Panics
///
/// The returned handler panics if a `U` is already attached.
pub fn auth<U, E, V, H, R>(validator: V, handler: H) -> impl Handler<R>
where
    U: Send + Sync + 'static,
    E: fmt::Display,
    V: Fn(&str) -> Result<U, E> + Send + Sync,
    H: Handler<R>,
{
    move |mut req: Request| match authenticate(&validator, &req) {
        Ok(user) => {
            req.must_attach(user);
            handler.call(req)
        }
        Err(err) => Response::unauthorized(ApiError::from_detail(err.to_string())),
    }
}

fn authenticate<U, E, V>(validator: &V, req: &Request) -> Result<U, AuthError>
where
    E: fmt::Display,
    V: Fn(&str) -> Result<U, E>,
{
    let token = match req.headers().get_str("authorization") {
        Some(header) if !header.is_empty() => bearer_token(header)?,
        _ => websocket_token(req).ok_or(AuthError::Missing)?,
    };
    validator(token).map_err(|err| AuthError::Rejected(err.to_string()))
}

fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::UnsupportedType)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(token)
}

fn websocket_token(req: &Request) -> Option<&str> {
    let mut found = false;
    for value in req.headers().get_all("sec-websocket-protocol") {
        let Ok(value) = std::str::from_utf8(value) else {
            continue;
        };
        for token in value.split(',').map(str::trim) {
            if token == "Authorization" {
                found = true;
            } else if found {
                return Some(token);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::wrap;
    use crate::request::Method;
    use crate::status::StatusCode;
    use crate::testing::serve;

    #[derive(Debug, PartialEq)]
    struct User(&'static str);

    fn check(headers: &[(&str, &str)], expected: StatusCode) {
        let handler = |req: Request| {
            assert_eq!(req.must_singleton::<User>(), &User("Aragorn"));
            Response::ok("all is good")
        };
        let validator = |token: &str| {
            if token == "secret" {
                Ok(User("Aragorn"))
            } else {
                Err(format!("bad token: {token}"))
            }
        };
        let native = wrap(auth(validator, handler));

        let mut req = Request::new(Method::Get, "http://example.com/foo");
        for (name, value) in headers {
            req.headers_mut().append(*name, *value);
        }
        let rec = serve(&native, req);
        assert_eq!(rec.status(), expected, "{headers:?}: {}", rec.body_string());
    }

    #[test]
    fn authorization_header() {
        check(&[], StatusCode::UNAUTHORIZED);
        check(&[("Authorization", "secret")], StatusCode::UNAUTHORIZED);
        check(&[("Authorization", "Bearer ohno")], StatusCode::UNAUTHORIZED);
        check(&[("Authorization", "Bearer secret")], StatusCode::OK);
    }

    #[test]
    fn websocket_protocol_header() {
        let ws = "Sec-WebSocket-Protocol";
        check(&[(ws, "secret")], StatusCode::UNAUTHORIZED);
        check(&[(ws, "secret, Authorization")], StatusCode::UNAUTHORIZED);
        check(&[(ws, "Authorization, ohno")], StatusCode::UNAUTHORIZED);
        check(&[(ws, "Authorization, secret")], StatusCode::OK);
        check(&[(ws, "Authorization"), (ws, "secret")], StatusCode::OK);
        check(&[(ws, "secret"), (ws, "Authorization")], StatusCode::UNAUTHORIZED);
        check(
            &[(ws, "Authorization"), (ws, "ohno"), (ws, "secret")],
            StatusCode::UNAUTHORIZED,
        );
    }

    #[test]
    fn failure_details() {
        let validator = |token: &str| -> Result<User, String> { Err(format!("bad token: {token}")) };
        let cases = [
            (None, "Authorization header not found"),
            (Some("Basic abc"), "Unsupported Authorization type"),
            (Some("Bearer   "), "Authorization token is empty"),
            (Some("Bearer ohno"), "bad token: ohno"),
        ];
        for (header, detail) in cases {
            let mut req = Request::new(Method::Get, "/");
            if let Some(header) = header {
                req.headers_mut().insert("Authorization", header);
            }
            let resp = auth(validator, |_req: Request| Response::ok(())).call(req);
            assert_eq!(resp.resolved_status(), StatusCode::UNAUTHORIZED);
            assert_eq!(resp.errors().unwrap()[0].detail.as_deref(), Some(detail));
        }
    }
}
