//! Router behavior with middleware-wrapped handlers.

use japi_core::middleware::{content_type, recover, with};
use japi_core::testing::TestRequest;
use japi_core::{ApiError, MEDIA_TYPE, Request, Response, StatusCode, Void, path_id, wrap};
use japi_router::{RouteLookup, Router};
use serde_json::json;

#[derive(Debug, Clone)]
struct Store(&'static str);

fn app() -> Router {
    let mut router = Router::new();
    router
        .get(
            "/posts",
            wrap(with(Store("memory"), |req: Request| {
                Response::ok(json!([{"store": req.must_singleton::<Store>().0}]))
            })),
        )
        .post(
            "/posts",
            wrap(content_type("", |_req: Request| Response::created(json!({"id": "1"})))),
        )
        .get(
            "/posts/{id}",
            wrap(|req: Request| match path_id::<u64>(&req, "id") {
                Ok(id) => Response::ok(json!({"id": id})),
                Err(err) => Response::bad_request(err),
            }),
        )
        .delete(
            "/posts/{id}",
            wrap(recover(|_req: Request| -> Response<Void> { panic!("boom") })),
        );
    router
}

#[test]
fn test_list_sees_attached_singleton() {
    let rec = TestRequest::get("/posts").serve(&app());
    assert_eq!(rec.status(), StatusCode::OK);
    assert_eq!(rec.json(), json!({"data": [{"store": "memory"}]}));
}

#[test]
fn test_create_requires_json_api_content_type() {
    let router = app();
    let rec = TestRequest::post("/posts")
        .header("Content-Type", "application/json")
        .body("{}")
        .serve(&router);
    assert_eq!(rec.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let rec = TestRequest::post("/posts")
        .header("Content-Type", MEDIA_TYPE)
        .body("{}")
        .serve(&router);
    assert_eq!(rec.status(), StatusCode::CREATED);
}

#[test]
fn test_path_id_is_parsed_from_the_route() {
    let router = app();
    assert_eq!(
        TestRequest::get("/posts/12").serve(&router).json(),
        json!({"data": {"id": 12}})
    );
    let rec = TestRequest::get("/posts/abc").serve(&router);
    assert_eq!(rec.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        rec.json()["errors"][0]["detail"],
        "invalid path parameter id"
    );
}

#[test]
fn test_panicking_handler_becomes_500() {
    let rec = TestRequest::delete("/posts/1").serve(&app());
    assert_eq!(rec.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(rec.json()["errors"][0]["title"], "Internal server error");
}

#[test]
fn test_unknown_method_and_path() {
    let router = app();
    let rec = TestRequest::patch("/posts/1").serve(&router);
    assert_eq!(rec.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(rec.header("Allow"), Some("GET, HEAD, DELETE"));
    assert_eq!(rec.header("Content-Type"), Some(MEDIA_TYPE));

    let rec = TestRequest::get("/comments").serve(&router);
    assert_eq!(rec.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_routes_are_listed_in_registration_order() {
    let router = app();
    let listed: Vec<_> = router
        .routes()
        .map(|route| (route.pattern().to_owned(), route.methods().header_value()))
        .collect();
    assert_eq!(
        listed,
        [
            ("/posts".to_owned(), "GET, HEAD, POST".to_owned()),
            ("/posts/{id}".to_owned(), "GET, HEAD, DELETE".to_owned()),
        ]
    );
    assert!(matches!(
        router.lookup(japi_core::Method::Head, "/posts/3"),
        RouteLookup::Match(_)
    ));
}

#[test]
fn test_router_nests_as_a_handler() {
    let mut inner = Router::new();
    inner.get(
        "/health",
        wrap(|_req: Request| Response::<Void>::not_found(ApiError::from_detail("down"))),
    );
    let mut outer = Router::new();
    outer.get("/health", inner);
    let rec = TestRequest::get("/health").serve(&outer);
    assert_eq!(rec.status(), StatusCode::NOT_FOUND);
    assert_eq!(rec.json()["errors"][0]["detail"], "down");
}
