use crate::handler::Handler;
use crate::request::Request;

/// Attaches a clone of `value` to every request before calling `handler`.
///
/// # Panics
///
/// The returned handler panics if a value of type `T` is already attached.
pub fn with<T, H, R>(value: T, handler: H) -> impl Handler<R>
where
    T: Clone + Send + Sync + 'static,
    H: Handler<R>,
{
    move |mut req: Request| {
        req.must_attach(value.clone());
        handler.call(req)
    }
}

/// Attaches every value of a tuple, in order, before calling `handler`.
///
/// ```
/// use japi_core::middleware::with_all;
/// use japi_core::{Request, Response};
///
/// let handler = with_all((1_u8, "name"), |req: Request| {
///     Response::ok(format!("{} {}", req.must_singleton::<u8>(), req.must_singleton::<&str>()))
/// });
/// # let _ = handler;
/// ```
///
/// # Panics
///
/// The returned handler panics if any of the types is already attached.
pub fn with_all<S, H, R>(values: S, handler: H) -> impl Handler<R>
where
    S: Singletons,
    H: Handler<R>,
{
    move |mut req: Request| {
        values.attach_to(&mut req);
        handler.call(req)
    }
}

/// A group of values attached together by [`with_all`].
///
/// Implemented for tuples of up to six `Clone` values.
pub trait Singletons: Send + Sync + 'static {
    /// Attaches clones of the values to `req`.
    fn attach_to(&self, req: &mut Request);
}

macro_rules! tuple_singletons {
    ($($name:ident),+) => {
        impl<$($name),+> Singletons for ($($name,)+)
        where
            $($name: Clone + Send + Sync + 'static),+
        {
            #[allow(non_snake_case)]
            fn attach_to(&self, req: &mut Request) {
                let ($($name,)+) = self;
                $(req.must_attach($name.clone());)+
            }
        }
    };
}

tuple_singletons!(A);
tuple_singletons!(A, B);
tuple_singletons!(A, B, C);
tuple_singletons!(A, B, C, D);
tuple_singletons!(A, B, C, D, E);
tuple_singletons!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use crate::response::Response;

    #[derive(Clone, Debug, PartialEq)]
    struct Db(&'static str);

    #[derive(Clone, Debug, PartialEq)]
    struct Config {
        debug: bool,
    }

    fn get() -> Request {
        Request::new(Method::Get, "/")
    }

    #[test]
    fn with_attaches_a_fresh_copy_per_request() {
        let handler = with(Db("main"), |req: Request| {
            Response::ok(req.must_singleton::<Db>().0)
        });
        for _ in 0..2 {
            assert_eq!(handler.call(get()).data(), Some(&"main"));
        }
    }

    #[test]
    fn with_all_attaches_every_member() {
        let handler = with_all((Db("main"), Config { debug: true }, 3_u32), |req: Request| {
            let db = req.must_singleton::<Db>().0;
            let debug = req.must_singleton::<Config>().debug;
            let n = *req.must_singleton::<u32>();
            Response::ok(format!("{db} {debug} {n}"))
        });
        assert_eq!(
            handler.call(get()).data().map(String::as_str),
            Some("main true 3")
        );
    }

    #[test]
    #[should_panic(expected = "already contains")]
    fn nested_with_of_same_type_panics() {
        let inner = |_req: Request| Response::ok(());
        let handler = with(Db("outer"), with(Db("inner"), inner));
        let _ = handler.call(get());
    }
}
