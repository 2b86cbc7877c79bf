//! Request-scoped singleton store.
//!
//! [`Context`] is an immutable chain of layers. Every [`attach`](Context::attach)
//! returns a new context that shares all existing layers with its parent, so a
//! context handed to another thread or closure never changes underneath it.
//!
//! Each layer holds exactly one value keyed by its [`TypeId`]. A type can be
//! attached at most once per chain: attaching it again is an error, never an
//! overwrite.
//!
//! # Example
//!
//! ```
//! use japi_core::Context;
//!
//! #[derive(Debug, PartialEq)]
//! struct User(&'static str);
//!
//! let root = Context::new();
//! let ctx = root.attach(User("aragorn")).unwrap();
//!
//! assert_eq!(ctx.get::<User>().unwrap(), &User("aragorn"));
//! assert!(root.get::<User>().is_err());
//! assert!(ctx.attach(User("gandalf")).is_err());
//! ```

use asupersync::Cx;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

type Shared = Arc<dyn Any + Send + Sync>;

/// Error returned by singleton operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SingletonError {
    /// A value of this type is already somewhere in the chain.
    #[error("context already contains value of type {type_name}")]
    AlreadyPresent {
        /// Name of the rejected type.
        type_name: &'static str,
    },
    /// No value of this type is in the chain.
    #[error("no value of type {type_name} in the context")]
    NotFound {
        /// Name of the requested type.
        type_name: &'static str,
    },
}

impl SingletonError {
    fn already_present<T: ?Sized>() -> Self {
        Self::AlreadyPresent {
            type_name: type_name::<T>(),
        }
    }

    fn not_found<T: ?Sized>() -> Self {
        Self::NotFound {
            type_name: type_name::<T>(),
        }
    }
}

/// Error returned when a request has been cancelled.
///
/// This is returned by [`Context::checkpoint`] when the capability context
/// the request was started with reports a pending cancellation.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("request cancelled")]
pub struct CancelledError;

struct Root {
    cx: Option<Cx>,
    request_id: u64,
}

struct Layer {
    key: TypeId,
    type_name: &'static str,
    value: Shared,
    parent: Option<Arc<Layer>>,
}

/// Immutable, copy-on-write carrier of per-request singletons.
///
/// Cloning is cheap: it copies two `Arc`s. Extension never mutates the
/// receiver, which makes a context safe to read from several threads spawned
/// by the same request.
#[derive(Clone)]
pub struct Context {
    root: Arc<Root>,
    head: Option<Arc<Layer>>,
}

impl Context {
    /// Creates an empty context with request id `0` and no cancellation source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(0)
    }

    /// Creates an empty context tagged with a request id.
    #[must_use]
    pub fn with_request_id(request_id: u64) -> Self {
        Self {
            root: Arc::new(Root {
                cx: None,
                request_id,
            }),
            head: None,
        }
    }

    /// Creates an empty context whose cancellation follows the given [`Cx`].
    #[must_use]
    pub fn with_cx(cx: Cx, request_id: u64) -> Self {
        Self {
            root: Arc::new(Root {
                cx: Some(cx),
                request_id,
            }),
            head: None,
        }
    }

    /// Returns the request id the chain was rooted with.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.root.request_id
    }

    /// Returns the capability context, if the chain was rooted with one.
    #[must_use]
    pub fn cx(&self) -> Option<&Cx> {
        self.root.cx.as_ref()
    }

    /// Checks if cancellation has been requested.
    ///
    /// A context without a [`Cx`] is never cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.root
            .cx
            .as_ref()
            .is_some_and(|cx| cx.is_cancel_requested())
    }

    /// Cooperative cancellation checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CancelledError`] if the request has been cancelled and
    /// cancellation is not currently masked.
    pub fn checkpoint(&self) -> Result<(), CancelledError> {
        match &self.root.cx {
            Some(cx) => cx.checkpoint().map_err(|_| CancelledError),
            None => Ok(()),
        }
    }

    /// Returns a new context carrying `value`.
    ///
    /// The receiver is left untouched and stays valid.
    ///
    /// # Errors
    ///
    /// Returns [`SingletonError::AlreadyPresent`] if a `T` is already in the chain.
    pub fn attach<T: Send + Sync + 'static>(&self, value: T) -> Result<Self, SingletonError> {
        if self.contains::<T>() {
            return Err(SingletonError::already_present::<T>());
        }
        Ok(self.push(Arc::new(value)))
    }

    /// Like [`attach`](Self::attach) but panics if a `T` is already present.
    ///
    /// Only use it where the absence of `T` has already been established.
    #[must_use]
    pub fn must_attach<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.attach(value).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Borrows the `T` stored in the chain.
    ///
    /// # Errors
    ///
    /// Returns [`SingletonError::NotFound`] if no `T` was attached.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<&T, SingletonError> {
        self.find(TypeId::of::<T>())
            .and_then(|value| (**value).downcast_ref::<T>())
            .ok_or_else(SingletonError::not_found::<T>)
    }

    /// Returns a shared handle to the `T` stored in the chain.
    ///
    /// # Errors
    ///
    /// Returns [`SingletonError::NotFound`] if no `T` was attached.
    pub fn get_arc<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, SingletonError> {
        self.find(TypeId::of::<T>())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
            .ok_or_else(SingletonError::not_found::<T>)
    }

    /// Like [`get`](Self::get) but panics if no `T` is present.
    #[must_use]
    pub fn must_get<T: Send + Sync + 'static>(&self) -> &T {
        self.get::<T>().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Returns the stored `T`, or builds, attaches, and returns it.
    ///
    /// `make` runs only when the chain holds no `T`. The returned context must
    /// be threaded forward: calling this again on the original context runs
    /// `make` again.
    pub fn get_or_insert_with<T, F>(&self, make: F) -> (Self, Arc<T>)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Ok(value) = self.get_arc::<T>() {
            return (self.clone(), value);
        }
        let value = Arc::new(make());
        (self.push(Arc::clone(&value)), value)
    }

    /// Returns true if a `T` is anywhere in the chain.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.find(TypeId::of::<T>()).is_some()
    }

    /// Number of singletons in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers().count()
    }

    /// Returns true if nothing has been attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Type names of the attached singletons, newest first.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.layers().map(|layer| layer.type_name)
    }

    /// Pushes a `T` that hides any older `T` for holders of the new context.
    ///
    /// Reserved for refining framework-owned singletons (the request logger)
    /// for a nested call; user values go through [`attach`](Self::attach).
    pub(crate) fn shadow<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.push(Arc::new(value))
    }

    fn push<T: Send + Sync + 'static>(&self, value: Arc<T>) -> Self {
        let value: Shared = value;
        let layer = Layer {
            key: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value,
            parent: self.head.clone(),
        };
        Self {
            root: Arc::clone(&self.root),
            head: Some(Arc::new(layer)),
        }
    }

    fn find(&self, key: TypeId) -> Option<&Shared> {
        self.layers()
            .find(|layer| layer.key == key)
            .map(|layer| &layer.value)
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        std::iter::successors(self.head.as_deref(), |layer| layer.parent.as_deref())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.root.request_id)
            .field("singletons", &self.type_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct User(String);

    #[derive(Debug, PartialEq)]
    struct Admin(String);

    #[test]
    fn attach_then_get_returns_value() {
        let ctx = Context::new().attach(User("aragorn".into())).unwrap();
        assert_eq!(ctx.get::<User>().unwrap(), &User("aragorn".into()));
    }

    #[test]
    fn get_missing_is_not_found() {
        let err = Context::new().get::<User>().unwrap_err();
        assert!(matches!(err, SingletonError::NotFound { .. }));
        assert!(err.to_string().contains("User"));
    }

    #[test]
    fn distinct_types_are_isolated() {
        // Same layout, different types.
        let ctx = Context::new()
            .attach(User("frodo".into()))
            .unwrap()
            .attach(Admin("gandalf".into()))
            .unwrap();
        assert_eq!(ctx.get::<User>().unwrap().0, "frodo");
        assert_eq!(ctx.get::<Admin>().unwrap().0, "gandalf");
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn double_attach_is_rejected() {
        let ctx = Context::new().attach(User("sam".into())).unwrap();
        let ctx = ctx.attach(7_u8).unwrap();
        let err = ctx.attach(User("merry".into())).unwrap_err();
        assert!(matches!(err, SingletonError::AlreadyPresent { .. }));
        assert_eq!(ctx.get::<User>().unwrap().0, "sam");
    }

    #[test]
    fn parent_is_unaffected_by_extension() {
        let parent = Context::new().attach(1_u32).unwrap();
        let child = parent.attach(User("pippin".into())).unwrap();
        assert!(parent.get::<User>().is_err());
        assert_eq!(*parent.get::<u32>().unwrap(), 1);
        assert_eq!(*child.get::<u32>().unwrap(), 1);

        // Siblings built from the same parent do not see each other.
        let sibling = parent.attach(User("boromir".into())).unwrap();
        assert_eq!(child.get::<User>().unwrap().0, "pippin");
        assert_eq!(sibling.get::<User>().unwrap().0, "boromir");
    }

    #[test]
    fn get_arc_shares_the_stored_value() {
        let ctx = Context::new().attach(User("legolas".into())).unwrap();
        let a = ctx.get_arc::<User>().unwrap();
        let b = ctx.get_arc::<User>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn get_or_insert_with_runs_factory_once_when_threaded() {
        let calls = AtomicUsize::new(0);
        let make = || {
            calls.fetch_add(1, Ordering::SeqCst);
            User("aragorn".into())
        };

        let ctx = Context::new();
        let (ctx, first) = ctx.get_or_insert_with(make);
        let (_ctx, second) = ctx.get_or_insert_with(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            User("gandalf".into())
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.0, "aragorn");
        assert_eq!(second.0, "aragorn");
    }

    #[test]
    fn get_or_insert_with_recomputes_on_discarded_context() {
        let calls = AtomicUsize::new(0);
        let root = Context::new();
        for _ in 0..2 {
            let _ = root.get_or_insert_with(|| calls.fetch_add(1, Ordering::SeqCst));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "already contains")]
    fn must_attach_panics_on_duplicate() {
        let ctx = Context::new().must_attach(1_i64);
        let _ = ctx.must_attach(2_i64);
    }

    #[test]
    #[should_panic(expected = "no value of type")]
    fn must_get_panics_when_missing() {
        let _ = Context::new().must_get::<User>();
    }

    #[test]
    fn shadow_hides_older_value_for_new_holders_only() {
        let outer = Context::new().attach(User("old".into())).unwrap();
        let inner = outer.shadow(User("new".into()));
        assert_eq!(inner.get::<User>().unwrap().0, "new");
        assert_eq!(outer.get::<User>().unwrap().0, "old");
    }

    #[test]
    fn shared_across_threads_without_leakage() {
        let base = Context::with_request_id(9).attach(User("base".into())).unwrap();
        std::thread::scope(|scope| {
            for i in 0..8_u64 {
                let base = &base;
                scope.spawn(move || {
                    let ctx = base.attach(i).unwrap();
                    assert_eq!(*ctx.get::<u64>().unwrap(), i);
                    assert_eq!(ctx.get::<User>().unwrap().0, "base");
                    assert_eq!(ctx.request_id(), 9);
                });
            }
        });
        assert!(base.get::<u64>().is_err());
    }

    #[test]
    fn debug_lists_singletons() {
        let ctx = Context::with_request_id(3).attach(5_u16).unwrap();
        let text = format!("{ctx:?}");
        assert!(text.contains("request_id: 3"));
        assert!(text.contains("u16"));
    }

    #[test]
    fn context_without_cx_is_never_cancelled() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.checkpoint().is_ok());
    }

    #[test]
    fn checkpoint_follows_cx_cancellation() {
        let ctx = Context::with_cx(Cx::for_testing(), 1);
        assert!(ctx.checkpoint().is_ok());
        let extended = ctx.attach(User("x".into())).unwrap();
        ctx.cx().unwrap().set_cancel_requested(true);
        assert!(extended.is_cancelled());
        assert!(extended.checkpoint().is_err());
    }
}
