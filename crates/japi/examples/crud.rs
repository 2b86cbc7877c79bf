//! A CRUD service for blog posts.
//!
//! Run the app:
//!
//! ```text
//! RUST_LOG=debug cargo run -p japi --example crud
//! ```
//!
//! Create a post:
//!
//! ```text
//! curl localhost:8080/posts -H 'Content-Type: application/vnd.api+json' \
//!     --data-raw '{"data":{"type":"posts","attributes":{"title":"hello"}}}'
//! ```
//!
//! List, get, update and delete:
//!
//! ```text
//! curl localhost:8080/posts
//! curl localhost:8080/posts/0
//! curl -X PATCH localhost:8080/posts/0 -H 'Content-Type: application/vnd.api+json' \
//!     --data-raw '{"data":{"type":"posts","attributes":{"title":"world"}}}'
//! curl -X DELETE localhost:8080/posts/0
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use japi::body;
use japi::prelude::*;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize)]
struct Post {
    id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct NewPost {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PostPatch {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default)]
struct Posts {
    next_id: u64,
    items: BTreeMap<u64, Post>,
}

type Store = Arc<Mutex<Posts>>;

fn not_found<T>() -> Response<T> {
    Response::not_found(ApiError::from_detail(
        "post with the given ID does not exist",
    ))
}

fn create_post(req: Request) -> Response<Post> {
    let new: NewPost = match body::read("posts", &req) {
        Ok(new) => new,
        Err(err) => return Response::bad_request(err.into()),
    };
    let mut posts = req.must_singleton::<Store>().lock();
    let post = Post {
        id: posts.next_id,
        title: new.title,
    };
    posts.next_id += 1;
    posts.items.insert(post.id, post.clone());
    if let Err(err) = set_header(&req, "Location", format!("/posts/{}", post.id)) {
        tracing::warn!(error = %err, "no writer to set Location on");
    }
    Response::created(post)
}

fn list_posts(req: Request) -> Response<Vec<Post>> {
    let posts = req.must_singleton::<Store>().lock();
    let list: Vec<Post> = posts.items.values().cloned().collect();
    let total = list.len();
    Response::ok(list).with_meta("total", total)
}

fn get_post(req: Request) -> Response<Post> {
    let id = match path_id::<u64>(&req, "id") {
        Ok(id) => id,
        Err(err) => return Response::bad_request(err),
    };
    match req.must_singleton::<Store>().lock().items.get(&id) {
        Some(post) => Response::ok(post.clone()),
        None => not_found(),
    }
}

fn update_post(req: Request) -> Response<Void> {
    let id = match path_id::<u64>(&req, "id") {
        Ok(id) => id,
        Err(err) => return Response::bad_request(err),
    };
    let patch: PostPatch = match body::read("posts", &req) {
        Ok(patch) => patch,
        Err(err) => return Response::bad_request(err.into()),
    };
    let mut posts = req.must_singleton::<Store>().lock();
    let Some(post) = posts.items.get_mut(&id) else {
        return not_found();
    };
    if let Some(title) = patch.title.filter(|t| !t.is_empty()) {
        post.title = title;
    }
    Response::no_content()
}

fn delete_post(req: Request) -> Response<Void> {
    match path_id::<u64>(&req, "id") {
        Ok(id) => {
            req.must_singleton::<Store>().lock().items.remove(&id);
            Response::no_content()
        }
        Err(err) => Response::bad_request(err),
    }
}

/// The middleware every route shares.
fn stack<T, H>(store: &Store, handler: H) -> impl NativeHandler + use<T, H>
where
    T: Serialize + 'static,
    H: Handler<T> + 'static,
{
    let app = tracing::info_span!("crud");
    wrap(logger(app, recover(with(Arc::clone(store), handler))))
}

/// Same as [`stack`], for handlers that read a request document.
fn writing<T, H>(store: &Store, handler: H) -> impl NativeHandler + use<T, H>
where
    T: Serialize + 'static,
    H: Handler<T> + 'static,
{
    stack(store, content_type("", handler))
}

fn main() -> Result<(), japi::ServerError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store: Store = Arc::default();
    let mut router = Router::new();
    router
        .get("/posts", stack(&store, list_posts))
        .post("/posts", writing(&store, create_post))
        .get("/posts/{id}", stack(&store, get_post))
        .patch("/posts/{id}", writing(&store, update_post))
        .delete("/posts/{id}", stack(&store, delete_post));

    let config = ServerConfig::new("127.0.0.1:8080");
    tracing::info!(addr = config.addr(), "listening on http://localhost:8080");
    Server::new(config).serve(router)
}
