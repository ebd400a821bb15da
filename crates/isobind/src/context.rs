//! Execution contexts.
//!
//! A context is a realm (global object plus builtins) bound to one isolate
//! for its whole life. It owns the values retained by callbacks and the
//! stack of module resolvers active during instantiation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use deno_core::v8;

use crate::console;
use crate::error::Result;
use crate::exception::{self, StackTrace};
use crate::handle_table::Token;
use crate::isolate::IsolateRef;
use crate::lifetime::{Releasable, TrackedHandle};
use crate::module::ResolveFailure;
use crate::object::Object;
use crate::script;
use crate::template::ObjectTemplate;
use crate::value::Value;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Resolver installed for one `Module::instantiate` call.
pub(crate) struct ResolveFrame {
    pub token: Token,
    pub failure: Option<ResolveFailure>,
}

pub(crate) struct ContextInner {
    id: u64,
    isolate: IsolateRef,
    handle: Rc<TrackedHandle<v8::Context>>,
    /// Callback arguments kept alive by `FunctionCallbackInfo::retain`
    retained: RefCell<Vec<Rc<dyn Releasable>>>,
    resolve_frames: RefCell<Vec<ResolveFrame>>,
    closed: Cell<bool>,
    internal: bool,
}

impl ContextInner {
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if self.isolate.is_disposed() {
            // Disposal already freed the native handles
            self.retained.borrow_mut().clear();
            if !self.internal {
                log::warn!(
                    "context {} closed after its isolate {} was disposed",
                    self.id,
                    self.isolate.id()
                );
            }
            return;
        }

        let retained = std::mem::take(&mut *self.retained.borrow_mut());
        let released = retained.iter().filter(|h| h.release()).count();
        if !self.internal && !self.handle.is_released() {
            self.isolate.with_raw_scope(|scope| {
                let context = self.handle.local(scope);
                console::detach(&self.isolate, context);
            });
        }
        self.handle.release();
        if !self.internal {
            log::debug!(
                "closed context {} ({} retained values released)",
                self.id,
                released
            );
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// An execution environment bound to one isolate.
///
/// Cloning shares the context. It is closed by [`Context::close`] or when
/// the last clone (including the ones held by values) is dropped.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl Context {
    /// Create a context with a plain global object.
    pub fn new(isolate: &IsolateRef) -> Self {
        Self::create(isolate, None, false)
    }

    /// Create a context whose global object is built from `global`.
    pub fn with_global_template(isolate: &IsolateRef, global: &ObjectTemplate) -> Self {
        Self::create(isolate, Some(global), false)
    }

    pub(crate) fn internal(isolate: &IsolateRef) -> Self {
        Self::create(isolate, None, true)
    }

    fn create(isolate: &IsolateRef, global: Option<&ObjectTemplate>, internal: bool) -> Self {
        isolate.assert_alive();
        let handle = isolate.with_raw_scope(|scope| {
            let context = match global {
                Some(template) => {
                    let template = template.local(scope);
                    v8::Context::new(
                        scope,
                        v8::ContextOptions {
                            global_template: Some(template),
                            ..Default::default()
                        },
                    )
                }
                None => v8::Context::new(scope, Default::default()),
            };
            let global = v8::Global::new(scope, context);
            TrackedHandle::new(&isolate.inner.lifetimes, global)
        });

        let inner = Rc::new(ContextInner {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            isolate: isolate.clone(),
            handle,
            retained: RefCell::new(Vec::new()),
            resolve_frames: RefCell::new(Vec::new()),
            closed: Cell::new(false),
            internal,
        });
        let ctx = Context { inner };

        if !internal {
            isolate.register_context(&ctx.inner);
            console::attach(&ctx);
            log::debug!("created context {} in isolate {}", ctx.id(), isolate.id());
        }
        ctx
    }

    pub(crate) fn from_inner(inner: Rc<ContextInner>) -> Self {
        Context { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn isolate(&self) -> &IsolateRef {
        &self.inner.isolate
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn same_context(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open and backed by a live native context.
    pub(crate) fn is_usable(&self) -> bool {
        !self.inner.is_closed() && !self.inner.handle.is_released()
    }

    /// Release the context's native resources and every value retained in
    /// it. The isolate stays alive. Calling it again is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }

    fn assert_open(&self) {
        self.inner.isolate.assert_alive();
        if self.inner.is_closed() {
            panic!("context has been closed");
        }
    }

    pub(crate) fn local<'s>(&self, scope: &mut v8::HandleScope<'s, ()>) -> v8::Local<'s, v8::Context> {
        self.inner.handle.local(scope)
    }

    /// Enter the isolate with this context entered.
    pub(crate) fn with_scope<R>(&self, f: impl FnOnce(&mut v8::HandleScope<'_>) -> R) -> R {
        self.assert_open();
        self.inner.isolate.with_raw_scope(|scope| {
            let context = self.local(scope);
            let scope = &mut v8::ContextScope::new(scope, context);
            f(scope)
        })
    }

    /// Compile and run a classic script.
    ///
    /// `origin` names the script in locations and stack traces.
    pub fn run_script(&self, source: &str, origin: &str) -> Result<Value> {
        self.with_scope(|scope| {
            let tc = &mut v8::TryCatch::new(scope);
            let code = exception::new_string(tc, source)?;
            let script_origin = script::origin(tc, origin, false)?;
            self.isolate().record_source(-1, origin, source);

            let script = match v8::Script::compile(tc, code, Some(&script_origin)) {
                Some(script) => script,
                None => return Err(exception::take(tc, self)),
            };
            match script.run(tc) {
                Some(result) => Ok(Value::from_local(self, tc, result)),
                None => Err(exception::take(tc, self)),
            }
        })
    }

    /// The context's global object.
    pub fn global(&self) -> Object {
        self.with_scope(|scope| {
            let global = scope.get_current_context().global(scope);
            Object::from_local(self, scope, global)
        })
    }

    /// Values currently kept alive by retained callback arguments.
    pub fn retained_value_count(&self) -> usize {
        self.inner.retained.borrow().len()
    }

    pub(crate) fn retain(&self, handles: impl IntoIterator<Item = Rc<dyn Releasable>>) {
        self.inner.retained.borrow_mut().extend(handles);
    }

    /// Run pending promise jobs on the owning isolate.
    pub fn perform_microtask_checkpoint(&self) {
        self.assert_open();
        self.inner.isolate.perform_microtask_checkpoint();
    }

    /// Capture the script stack at the point of the call, innermost first.
    ///
    /// Empty when no script is running.
    pub fn current_stack_trace(&self, frame_limit: usize) -> StackTrace {
        self.with_scope(|scope| {
            let limit = frame_limit.min(i32::MAX as usize);
            let trace = v8::StackTrace::current_stack_trace(scope, limit);
            StackTrace::from_local(self, scope, trace)
        })
    }

    pub(crate) fn push_resolve_frame(&self, token: Token) {
        self.inner.resolve_frames.borrow_mut().push(ResolveFrame {
            token,
            failure: None,
        });
    }

    pub(crate) fn pop_resolve_frame(&self) -> Option<ResolveFrame> {
        self.inner.resolve_frames.borrow_mut().pop()
    }

    /// Token of the resolver for the innermost instantiation in progress.
    pub(crate) fn current_resolver(&self) -> Option<Token> {
        self.inner.resolve_frames.borrow().last().map(|f| f.token)
    }

    /// Keep the first resolution failure of the innermost instantiation.
    pub(crate) fn record_resolve_failure(&self, failure: ResolveFailure) {
        if let Some(frame) = self.inner.resolve_frames.borrow_mut().last_mut() {
            frame.failure.get_or_insert(failure);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("isolate", &self.inner.isolate.id())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}
