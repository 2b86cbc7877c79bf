//! Integration tests for the response envelope as seen on the wire.
//!
//! Every test goes through `wrap` and the in-memory recorder, the same path a
//! real connection takes.

use japi_core::testing::{TestRequest, serve};
use japi_core::{
    ApiError, ErrorSource, MEDIA_TYPE, Request, Response, StatusCode, Void, Writer, set_header,
    unwrap, wrap,
};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
struct Post {
    id: u32,
    title: String,
}

fn post() -> Post {
    Post {
        id: 1,
        title: "hello".into(),
    }
}

// ============================================================================
// SUCCESS ENVELOPES
// ============================================================================

#[test]
fn test_ok_wraps_data() {
    let native = wrap(|_req: Request| Response::ok(post()));
    let rec = TestRequest::get("/posts/1").serve(&native);
    assert_eq!(rec.status(), StatusCode::OK);
    assert_eq!(rec.header("Content-Type"), Some(MEDIA_TYPE));
    assert_eq!(
        rec.body_string(),
        "{\"data\":{\"id\":1,\"title\":\"hello\"}}\n"
    );
}

#[test]
fn test_created_and_accepted_statuses() {
    let created = wrap(|_req: Request| Response::created(post()));
    assert_eq!(
        TestRequest::post("/posts").serve(&created).status(),
        StatusCode::CREATED
    );
    let accepted = wrap(|_req: Request| Response::accepted(json!({"job": 7})));
    let rec = TestRequest::post("/jobs").serve(&accepted);
    assert_eq!(rec.status(), StatusCode::ACCEPTED);
    assert_eq!(rec.json(), json!({"data": {"job": 7}}));
}

#[test]
fn test_data_without_status_defaults_to_200() {
    let native = wrap(|_req: Request| {
        let mut resp = Response::ok(vec![1, 2, 3]);
        resp.status = None;
        resp
    });
    let rec = TestRequest::get("/").serve(&native);
    assert_eq!(rec.status(), StatusCode::OK);
    assert_eq!(rec.body_string(), "{\"data\":[1,2,3]}\n");
}

#[test]
fn test_meta_and_links_follow_data() {
    let native = wrap(|_req: Request| {
        Response::ok(vec![post()])
            .with_link("self", "/posts")
            .with_meta("total", 1)
    });
    let rec = TestRequest::get("/posts").serve(&native);
    assert_eq!(
        rec.json(),
        json!({
            "data": [{"id": 1, "title": "hello"}],
            "links": {"self": "/posts"},
            "meta": {"total": 1},
        })
    );
}

// ============================================================================
// EMPTY ENVELOPES
// ============================================================================

#[test]
fn test_no_content_has_no_body() {
    let native = wrap(|_req: Request| Response::<Void>::no_content());
    let rec = TestRequest::delete("/posts/1").serve(&native);
    assert_eq!(rec.status(), StatusCode::NO_CONTENT);
    assert_eq!(rec.header("Content-Length"), Some("0"));
    assert!(rec.body().is_empty());
}

#[test]
fn test_not_modified_ignores_data() {
    let native = wrap(|_req: Request| Response::ok(post()).with_status(StatusCode::NOT_MODIFIED));
    let rec = TestRequest::get("/posts/1").serve(&native);
    assert_eq!(rec.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(rec.header("Content-Length"), Some("0"));
    assert!(rec.body().is_empty());
}

#[test]
fn test_no_response_leaves_writer_untouched() {
    let native = wrap(|_req: Request| Response::<Void>::no_response());
    let rec = TestRequest::get("/").serve(&native);
    assert_eq!(rec.status_code(), None);
    assert!(rec.header("Content-Type").is_none());
    assert!(rec.body().is_empty());
}

// ============================================================================
// ERROR ENVELOPES
// ============================================================================

#[test]
fn test_errors_without_status_default_to_400() {
    let native = wrap(|_req: Request| Response::<Void> {
        payload: japi_core::Payload::Errors(vec![ApiError::from_detail("oh no")]),
        ..Response::no_response()
    });
    let rec = TestRequest::get("/").serve(&native);
    assert_eq!(rec.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        rec.json(),
        json!({"errors": [{"title": "Bad Request", "detail": "oh no", "code": "400"}]})
    );
}

#[test]
fn test_error_defaults_come_from_the_status() {
    let native = wrap(|_req: Request| Response::<Void>::not_found(ApiError::from_detail("oh no")));
    let rec = TestRequest::get("/posts/9").serve(&native);
    assert_eq!(rec.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        rec.body_string(),
        "{\"errors\":[{\"title\":\"Not Found\",\"detail\":\"oh no\",\"code\":\"404\"}]}\n"
    );
}

#[test]
fn test_explicit_error_members_are_kept() {
    let native = wrap(|_req: Request| {
        Response::<Void>::with_errors(
            StatusCode::UNPROCESSABLE_ENTITY,
            [
                ApiError::new()
                    .with_code("TITLE_TOO_SHORT")
                    .with_title("Title too short")
                    .with_source(ErrorSource::pointer("/data/attributes/title")),
                ApiError::from_detail("second"),
            ],
        )
    });
    let rec = TestRequest::post("/posts").serve(&native);
    assert_eq!(rec.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        rec.json(),
        json!({"errors": [
            {
                "title": "Title too short",
                "code": "TITLE_TOO_SHORT",
                "source": {"pointer": "/data/attributes/title"},
            },
            {"title": "Unprocessable Entity", "detail": "second", "code": "422"},
        ]})
    );
}

// ============================================================================
// ESCAPE HATCH
// ============================================================================

#[test]
fn test_handler_can_add_headers_through_the_writer() {
    let native = wrap(|req: Request| {
        set_header(&req, "Location", "/posts/1").unwrap();
        Response::created(post())
    });
    let rec = TestRequest::post("/posts").serve(&native);
    assert_eq!(rec.status(), StatusCode::CREATED);
    assert_eq!(rec.header("location"), Some("/posts/1"));
}

#[test]
fn test_handler_writing_itself_is_not_written_twice() {
    let native = wrap(|req: Request| {
        let writer = req.must_singleton::<Writer>();
        writer.set_header("Content-Type", "text/event-stream");
        writer.write_status(StatusCode::OK).unwrap();
        writer.write_all(b"data: one\n\n").unwrap();
        writer.flush().unwrap();
        writer.write_all(b"data: two\n\n").unwrap();
        Response::<Void>::no_response()
    });
    let rec = TestRequest::get("/events").serve(&native);
    assert_eq!(rec.header("content-type"), Some("text/event-stream"));
    assert_eq!(rec.body_string(), "data: one\n\ndata: two\n\n");
}

#[test]
fn test_unwrapped_native_handler_inside_a_chain() {
    let raw = |writer: Writer, req: Request| {
        writer.write_status(StatusCode::ACCEPTED).unwrap();
        writer.write_all(req.path().as_bytes()).unwrap();
    };
    let native = wrap(japi_core::middleware::with::<_, _, Void>(1_u8, unwrap(raw)));
    let rec = serve(&native, Request::new(japi_core::Method::Get, "/raw"));
    assert_eq!(rec.status(), StatusCode::ACCEPTED);
    assert_eq!(rec.body_string(), "/raw");
}
