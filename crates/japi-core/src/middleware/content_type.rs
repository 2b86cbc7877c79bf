use crate::error::ApiError;
use crate::handler::Handler;
use crate::request::Request;
use crate::response::{MEDIA_TYPE, Response};

/// Rejects requests whose media type is not `expected` with 415.
///
/// An empty `expected` means the JSON:API media type. Parameters after `;`
/// and letter case are ignored on the request side.
pub fn content_type<H, R>(expected: impl Into<String>, handler: H) -> impl Handler<R>
where
    H: Handler<R>,
{
    let mut expected = expected.into().to_ascii_lowercase();
    if expected.is_empty() {
        expected = MEDIA_TYPE.to_owned();
    }
    move |req: Request| {
        if media_type(&req) != expected {
            return Response::unsupported_media_type(
                ApiError::new()
                    .with_title("Unsupported Content-Type")
                    .with_detail(format!("The request must have {expected} Content-Type")),
            );
        }
        handler.call(req)
    }
}

fn media_type(req: &Request) -> String {
    let header = req.headers().get_str("content-type").unwrap_or_default();
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
