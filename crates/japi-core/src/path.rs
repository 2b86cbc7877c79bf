//! Typed integer path parameters.

use crate::error::ApiError;
use crate::request::Request;

/// Integer types [`path_id`] can parse into.
pub trait PathInteger: Sized + Copy {
    /// Parses a base-10 value that fits the type.
    fn parse_param(raw: &str) -> Option<Self>;
}

macro_rules! signed_path_integer {
    ($($ty:ty),+) => {$(
        impl PathInteger for $ty {
            fn parse_param(raw: &str) -> Option<Self> {
                raw.parse().ok()
            }
        }
    )+};
}

macro_rules! unsigned_path_integer {
    ($($ty:ty),+) => {$(
        impl PathInteger for $ty {
            fn parse_param(raw: &str) -> Option<Self> {
                // Unsigned values take no sign at all.
                if raw.starts_with('+') {
                    return None;
                }
                raw.parse().ok()
            }
        }
    )+};
}

signed_path_integer!(i8, i16, i32, i64, i128, isize);
unsigned_path_integer!(u8, u16, u32, u64, u128, usize);

/// Reads the path parameter `name` as an integer.
///
/// The error is ready to be sent back with
/// [`Response::bad_request`](crate::Response::bad_request).
///
/// ```
/// use japi_core::{Method, Request, path_id};
///
/// let req = Request::new(Method::Get, "/users/13").with_path_param("id", "13");
/// assert_eq!(path_id::<u32>(&req, "id").unwrap(), 13);
/// ```
pub fn path_id<I: PathInteger>(req: &Request, name: &str) -> Result<I, ApiError> {
    let raw = req.path_param(name).unwrap_or_default();
    if raw.is_empty() {
        return Err(ApiError::from_detail(format!(
            "path parameter {name} is required"
        )));
    }
    I::parse_param(raw)
        .ok_or_else(|| ApiError::from_detail(format!("invalid path parameter {name}")))
}
