//! Isolates: one engine instance with its own heap.
//!
//! [`Isolate`] is the single owner of the native isolate and disposes it when
//! dropped. Everything derived from it (contexts, values, templates) holds an
//! [`IsolateRef`], a cheap non-owning handle that panics once the owner has
//! disposed the native isolate.
//!
//! Native scopes are entered through [`IsolateRef::with_raw_scope`]. The
//! outermost entry opens a fresh handle scope; entries made while script is
//! running (from inside a callback) open a callback scope first, which is
//! what lets a callback run more script on the same isolate.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use deno_core::v8;
use isobind_diagnostics::SourceCache;
use serde::Serialize;

use crate::callback::FunctionCallback;
use crate::config::{IsolateConfig, ResourceConstraints};
use crate::console::{ConsoleInspector, ConsoleListener};
use crate::context::{Context, ContextInner};
use crate::error::{Error, Result};
use crate::handle_table::{HandleTable, Token};
use crate::lifetime::LifetimeRegistry;
use crate::module::ModuleResolver;
use crate::platform;
use crate::promise::{self, PromiseRejectListener};
use crate::script::{CompileOptions, UnboundScript};
use crate::value::Value;

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Host objects the engine refers to by token.
#[derive(Clone)]
pub(crate) enum HostObject {
    Function(Rc<FunctionCallback>),
    Resolver(Rc<dyn ModuleResolver>),
    Console(Rc<dyn ConsoleListener>),
    PromiseReject(Rc<dyn PromiseRejectListener>),
}

impl HostObject {
    fn kind(&self) -> &'static str {
        match self {
            HostObject::Function(_) => "function callback",
            HostObject::Resolver(_) => "module resolver",
            HostObject::Console(_) => "console listener",
            HostObject::PromiseReject(_) => "promise reject listener",
        }
    }
}

/// Stored in the native isolate so engine callbacks can find their way back.
struct IsolateSlot(Weak<IsolateInner>);

/// State shared by the near-heap-limit callback.
struct HeapLimitGuard {
    handle: v8::IsolateHandle,
    /// Heap limit at the moment the callback fired
    hit: Cell<Option<usize>>,
}

extern "C" fn near_heap_limit_callback(
    data: *mut c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the boxed guard owned by `IsolateInner`; the
    // callback is removed before the guard is dropped.
    let guard = unsafe { &*(data as *const HeapLimitGuard) };
    guard.hit.set(Some(current_heap_limit));
    guard.handle.terminate_execution();
    // Leave room for the termination to unwind the running script
    current_heap_limit * 2
}

pub(crate) struct IsolateInner {
    id: u64,
    config: IsolateConfig,
    native: RefCell<Option<v8::OwnedIsolate>>,
    raw: Cell<Option<NonNull<v8::Isolate>>>,
    /// Nesting depth of `with_raw_scope`
    depth: Cell<usize>,
    termination: v8::IsolateHandle,
    pub(crate) lifetimes: LifetimeRegistry,
    pub(crate) host_objects: HandleTable<HostObject>,
    contexts: RefCell<Vec<Weak<ContextInner>>>,
    /// Context for values that are not created inside a user context
    internal_context: RefCell<Option<Context>>,
    null: RefCell<Option<Value>>,
    undefined: RefCell<Option<Value>>,
    pub(crate) sources: RefCell<SourceCache>,
    /// Origin names of compiled modules by script id
    module_origins: RefCell<HashMap<i32, String>>,
    console_listener: Cell<Option<Token>>,
    reject_listener: Cell<Option<Token>>,
    /// Present when the console is installed
    pub(crate) console: RefCell<Option<ConsoleInspector>>,
    heap_guard: RefCell<Option<Box<HeapLimitGuard>>>,
}

/// Owner of one engine instance. Disposes the isolate when dropped.
///
/// Dereferences to [`IsolateRef`], which carries every operation.
pub struct Isolate {
    handle: IsolateRef,
}

/// Non-owning handle to an isolate.
#[derive(Clone)]
pub struct IsolateRef {
    pub(crate) inner: Rc<IsolateInner>,
}

impl Isolate {
    pub fn new() -> Self {
        Self::with_config(IsolateConfig::default())
    }

    /// Create an isolate with the given heap limits. Constraints are only
    /// read here.
    pub fn with_constraints(constraints: ResourceConstraints) -> Self {
        Self::with_config(IsolateConfig::default().with_constraints(constraints))
    }

    pub fn with_config(config: IsolateConfig) -> Self {
        platform::init();

        let mut native = v8::Isolate::new(config.constraints.create_params());
        native.set_microtasks_policy(v8::MicrotasksPolicy::Explicit);
        if config.stack_trace_limit > 0 {
            native.set_capture_stack_trace_for_uncaught_exceptions(true, config.stack_trace_limit);
        }
        native.set_promise_reject_callback(promise::promise_reject_callback);

        let termination = native.thread_safe_handle();
        let heap_guard = if config.terminate_on_heap_limit {
            let guard = Box::new(HeapLimitGuard {
                handle: native.thread_safe_handle(),
                hit: Cell::new(None),
            });
            let data = &*guard as *const HeapLimitGuard as *mut c_void;
            native.add_near_heap_limit_callback(near_heap_limit_callback, data);
            Some(guard)
        } else {
            None
        };

        let raw = NonNull::from(&mut *native as &mut v8::Isolate);
        // A new isolate is entered on this thread; it is re-entered only
        // while a scope is open, so isolates can be disposed in any order.
        // SAFETY: the isolate was entered by its constructor.
        unsafe { native.exit() };
        let id = NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed);
        let sources = SourceCache::with_capacity(config.source_cache_capacity);

        let inner = Rc::new_cyclic(|weak| {
            native.set_slot(IsolateSlot(weak.clone()));
            IsolateInner {
                id,
                config,
                native: RefCell::new(Some(native)),
                raw: Cell::new(Some(raw)),
                depth: Cell::new(0),
                termination,
                lifetimes: LifetimeRegistry::new(),
                host_objects: HandleTable::new(),
                contexts: RefCell::new(Vec::new()),
                internal_context: RefCell::new(None),
                null: RefCell::new(None),
                undefined: RefCell::new(None),
                sources: RefCell::new(sources),
                module_origins: RefCell::new(HashMap::new()),
                console_listener: Cell::new(None),
                reject_listener: Cell::new(None),
                console: RefCell::new(None),
                heap_guard: RefCell::new(heap_guard),
            }
        });

        let handle = IsolateRef { inner };
        if handle.inner.config.install_console {
            let weak = Rc::downgrade(&handle.inner);
            let console = handle.with_raw_scope(|scope| ConsoleInspector::new(scope, weak));
            *handle.inner.console.borrow_mut() = Some(console);
        }
        let internal = Context::internal(&handle);
        *handle.inner.null.borrow_mut() = Some(Value::null_in(&internal));
        *handle.inner.undefined.borrow_mut() = Some(Value::undefined_in(&internal));
        *handle.inner.internal_context.borrow_mut() = Some(internal);

        log::debug!("created isolate {}", id);
        Isolate { handle }
    }

    /// A non-owning handle to this isolate.
    pub fn handle(&self) -> IsolateRef {
        self.handle.clone()
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Isolate {
    type Target = IsolateRef;

    fn deref(&self) -> &IsolateRef {
        &self.handle
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        self.handle.dispose();
    }
}

/// Keeps the isolate entered on this thread for the outermost scope.
struct EnteredIsolate {
    raw: NonNull<v8::Isolate>,
}

impl EnteredIsolate {
    /// # Safety
    ///
    /// `raw` must stay valid until the guard is dropped.
    unsafe fn enter(raw: NonNull<v8::Isolate>) -> Self {
        (*raw.as_ptr()).enter();
        Self { raw }
    }
}

impl Drop for EnteredIsolate {
    fn drop(&mut self) {
        // SAFETY: entered in `enter`; scopes opened after it are gone.
        unsafe { (*self.raw.as_ptr()).exit() };
    }
}

/// Decrements the scope depth when a native entry ends, including by panic.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }

    fn is_outermost(&self) -> bool {
        self.depth.get() == 1
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

impl IsolateRef {
    /// Find the isolate that owns a native isolate, from inside an engine
    /// callback.
    pub(crate) fn from_native(isolate: &v8::Isolate) -> Option<IsolateRef> {
        let slot = isolate.get_slot::<IsolateSlot>()?;
        slot.0.upgrade().map(|inner| IsolateRef { inner })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &IsolateConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.raw.get().is_none()
    }

    pub(crate) fn assert_alive(&self) {
        if self.is_disposed() {
            panic!("isolate has been disposed");
        }
    }

    pub fn same_isolate(&self, other: &IsolateRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether script is currently running on this isolate.
    pub fn is_running(&self) -> bool {
        self.inner.depth.get() > 0
    }

    fn raw(&self) -> NonNull<v8::Isolate> {
        match self.inner.raw.get() {
            Some(raw) => raw,
            None => panic!("isolate has been disposed"),
        }
    }

    /// Enter the isolate with a handle scope but no context.
    pub(crate) fn with_raw_scope<R>(&self, f: impl FnOnce(&mut v8::HandleScope<'_, ()>) -> R) -> R {
        let raw = self.raw();
        let depth = DepthGuard::enter(&self.inner.depth);
        if depth.is_outermost() {
            // SAFETY: `raw` stays valid until `dispose`, which refuses to run
            // while any entry is active. `_entered` drops after the scope.
            let _entered = unsafe { EnteredIsolate::enter(raw) };
            let isolate = unsafe { &mut *raw.as_ptr() };
            let scope = &mut v8::HandleScope::new(isolate);
            f(scope)
        } else {
            // SAFETY: as above.
            let isolate = unsafe { &mut *raw.as_ptr() };
            // SAFETY: the outer scope is suspended for the duration of `f`;
            // nothing uses it until this entry returns.
            let scope = &mut unsafe { v8::CallbackScope::new(isolate) };
            let scope = &mut v8::HandleScope::new(scope);
            f(scope)
        }
    }

    /// Enter the isolate inside its internal context.
    pub(crate) fn with_scope<R>(&self, f: impl FnOnce(&mut v8::HandleScope<'_>) -> R) -> R {
        self.internal_context().with_scope(f)
    }

    pub(crate) fn depth(&self) -> usize {
        self.inner.depth.get()
    }

    /// The context used for values created outside any user context.
    pub(crate) fn internal_context(&self) -> Context {
        self.assert_alive();
        match self.inner.internal_context.borrow().as_ref() {
            Some(ctx) => ctx.clone(),
            None => panic!("isolate has been disposed"),
        }
    }

    pub(crate) fn register_context(&self, context: &Rc<ContextInner>) {
        let mut contexts = self.inner.contexts.borrow_mut();
        contexts.retain(|c| c.strong_count() > 0);
        contexts.push(Rc::downgrade(context));
    }

    /// Match a native context against the contexts created on this isolate.
    pub(crate) fn context_for(
        &self,
        scope: &mut v8::HandleScope<'_, ()>,
        current: v8::Local<'_, v8::Context>,
    ) -> Option<Context> {
        let mut candidates: Vec<Context> = self
            .inner
            .contexts
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Context::from_inner)
            .collect();
        if let Some(internal) = self.inner.internal_context.borrow().as_ref() {
            candidates.push(internal.clone());
        }

        candidates
            .into_iter()
            .filter(|ctx| ctx.is_usable())
            .find(|ctx| ctx.local(scope) == current)
    }

    /// Number of live contexts, including the internal one.
    pub fn context_count(&self) -> usize {
        let user = self
            .inner
            .contexts
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .count();
        user + usize::from(self.inner.internal_context.borrow().is_some())
    }

    pub(crate) fn register_host_object(&self, object: HostObject) -> Token {
        self.assert_alive();
        let kind = object.kind();
        let token = self.inner.host_objects.register(object);
        log::debug!("isolate {}: registered {} {}", self.inner.id, kind, token);
        token
    }

    pub(crate) fn host_object(&self, token: Token) -> Result<HostObject> {
        self.inner.host_objects.resolve(token)
    }

    pub(crate) fn unregister_host_object(&self, token: Token) {
        self.inner.host_objects.unregister(token);
    }

    /// Number of host objects the engine can currently reach by token.
    pub fn registered_callback_count(&self) -> usize {
        self.inner.host_objects.len()
    }

    pub fn null(&self) -> Value {
        match self.inner.null.borrow().as_ref() {
            Some(value) => value.clone(),
            None => panic!("isolate has been disposed"),
        }
    }

    pub fn undefined(&self) -> Value {
        match self.inner.undefined.borrow().as_ref() {
            Some(value) => value.clone(),
            None => panic!("isolate has been disposed"),
        }
    }

    /// Record a compiled script so frames and emitters can show its source.
    pub(crate) fn record_source(&self, id: i32, name: &str, source: &str) {
        if self.inner.config.cache_script_sources {
            self.inner.sources.borrow_mut().add_script(
                isobind_diagnostics::ScriptId(id),
                name,
                source,
            );
        }
    }

    pub(crate) fn record_module_origin(&self, script_id: i32, origin: &str) {
        self.inner
            .module_origins
            .borrow_mut()
            .insert(script_id, origin.to_string());
    }

    pub(crate) fn module_origin(&self, script_id: i32) -> Option<String> {
        self.inner.module_origins.borrow().get(&script_id).cloned()
    }

    /// Sources of every script compiled on this isolate.
    pub fn source_cache(&self) -> std::cell::Ref<'_, SourceCache> {
        self.inner.sources.borrow()
    }

    /// Route `console.*` calls from every context to `listener`, replacing
    /// the previous listener.
    pub fn set_console_listener(&self, listener: impl ConsoleListener + 'static) {
        let token = self.register_host_object(HostObject::Console(Rc::new(listener)));
        if let Some(previous) = self.inner.console_listener.replace(Some(token)) {
            self.unregister_host_object(previous);
        }
    }

    pub fn clear_console_listener(&self) {
        if let Some(previous) = self.inner.console_listener.take() {
            self.unregister_host_object(previous);
        }
    }

    pub(crate) fn console_listener(&self) -> Option<Rc<dyn ConsoleListener>> {
        let token = self.inner.console_listener.get()?;
        match self.host_object(token) {
            Ok(HostObject::Console(listener)) => Some(listener),
            _ => None,
        }
    }

    /// Receive notifications about rejected promises, replacing the
    /// previous listener.
    pub fn set_promise_reject_listener(&self, listener: impl PromiseRejectListener + 'static) {
        let token = self.register_host_object(HostObject::PromiseReject(Rc::new(listener)));
        if let Some(previous) = self.inner.reject_listener.replace(Some(token)) {
            self.unregister_host_object(previous);
        }
    }

    pub fn clear_promise_reject_listener(&self) {
        if let Some(previous) = self.inner.reject_listener.take() {
            self.unregister_host_object(previous);
        }
    }

    pub(crate) fn promise_reject_listener(&self) -> Option<Rc<dyn PromiseRejectListener>> {
        let token = self.inner.reject_listener.get()?;
        match self.host_object(token) {
            Ok(HostObject::PromiseReject(listener)) => Some(listener),
            _ => None,
        }
    }

    /// Compile a script without binding it to a context.
    pub fn compile_unbound_script(
        &self,
        source: &str,
        origin: &str,
        options: CompileOptions,
    ) -> Result<UnboundScript> {
        UnboundScript::compile(self, source, origin, options)
    }

    /// Run pending promise jobs. Microtasks never run implicitly.
    pub fn perform_microtask_checkpoint(&self) {
        self.with_raw_scope(|scope| scope.perform_microtask_checkpoint());
    }

    /// Forcefully stop the script running on this isolate.
    pub fn terminate_execution(&self) {
        self.assert_alive();
        self.inner.termination.terminate_execution();
    }

    pub fn is_execution_terminating(&self) -> bool {
        self.assert_alive();
        self.inner.termination.is_execution_terminating()
    }

    /// A handle that can terminate execution from another thread.
    pub fn termination_handle(&self) -> TerminationHandle {
        self.assert_alive();
        TerminationHandle {
            handle: self.inner.termination.clone(),
        }
    }

    /// Clear a termination so the isolate can run script again.
    pub(crate) fn cancel_termination(&self) {
        self.inner.termination.cancel_terminate_execution();
    }

    /// Take the heap limit recorded by the near-heap-limit callback.
    pub(crate) fn take_heap_limit_hit(&self) -> Option<usize> {
        self.inner
            .heap_guard
            .borrow()
            .as_ref()
            .and_then(|guard| guard.hit.take())
    }

    /// Ask the engine to free as much memory as it can.
    pub fn low_memory_notification(&self) {
        self.with_raw_scope(|scope| scope.low_memory_notification());
    }

    pub fn heap_statistics(&self) -> HeapStatistics {
        self.with_raw_scope(|scope| {
            let mut stats = v8::HeapStatistics::default();
            scope.get_heap_statistics(&mut stats);
            HeapStatistics {
                total_heap_size: stats.total_heap_size(),
                total_heap_size_executable: stats.total_heap_size_executable(),
                total_physical_size: stats.total_physical_size(),
                total_available_size: stats.total_available_size(),
                used_heap_size: stats.used_heap_size(),
                heap_size_limit: stats.heap_size_limit(),
                malloced_memory: stats.malloced_memory(),
                external_memory: stats.external_memory(),
                peak_malloced_memory: stats.peak_malloced_memory(),
                number_of_native_contexts: stats.number_of_native_contexts(),
                number_of_detached_contexts: stats.number_of_detached_contexts(),
            }
        })
    }

    /// Handles still registered against this isolate.
    pub fn live_handle_count(&self) -> usize {
        self.inner.lifetimes.live_count()
    }

    /// Tear down the isolate.
    ///
    /// Every handle issued against it is released, every registered host
    /// object is dropped, then the native isolate is freed. Later use of
    /// the isolate or anything derived from it panics. Calling it again is
    /// a no-op. Panics if called while script is running on the isolate.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.raw.get().is_none() {
            return;
        }
        assert!(
            inner.depth.get() == 0,
            "cannot dispose an isolate while it is running"
        );

        // These hold contexts and values, which hold this isolate.
        inner.null.take();
        inner.undefined.take();
        let internal = inner.internal_context.take();

        let released = inner.lifetimes.release_all();
        drop(internal);
        inner.console_listener.set(None);
        inner.reject_listener.set(None);
        let callbacks = inner.host_objects.clear();
        inner.contexts.borrow_mut().clear();

        if let Some(console) = inner.console.take() {
            self.with_raw_scope(|_| drop(console));
        }

        let guard = inner.heap_guard.take();
        if let Some(native) = inner.native.borrow_mut().as_mut() {
            if guard.is_some() {
                native.remove_near_heap_limit_callback(near_heap_limit_callback, 0);
            }
        }
        drop(guard);

        inner.raw.set(None);
        if let Some(mut native) = inner.native.borrow_mut().take() {
            // The owner exits the isolate when dropped and requires it to be
            // the current one.
            // SAFETY: nothing else runs on the isolate at depth 0.
            unsafe { native.enter() };
            drop(native);
        }
        inner.sources.borrow_mut().clear();
        inner.module_origins.borrow_mut().clear();

        log::debug!(
            "disposed isolate {} ({} handles, {} callbacks released)",
            inner.id,
            released,
            callbacks
        );
    }
}

impl std::fmt::Debug for IsolateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolateRef")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl std::fmt::Debug for Isolate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.handle.fmt(f)
    }
}

/// Terminates script execution from any thread.
#[derive(Clone)]
pub struct TerminationHandle {
    handle: v8::IsolateHandle,
}

impl TerminationHandle {
    /// Returns false if the isolate is already gone.
    pub fn terminate_execution(&self) -> bool {
        self.handle.terminate_execution()
    }

    pub fn is_execution_terminating(&self) -> bool {
        self.handle.is_execution_terminating()
    }
}

/// Heap usage snapshot. Reading it has no side effects on the isolate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStatistics {
    pub total_heap_size: usize,
    pub total_heap_size_executable: usize,
    pub total_physical_size: usize,
    pub total_available_size: usize,
    pub used_heap_size: usize,
    pub heap_size_limit: usize,
    pub malloced_memory: usize,
    pub external_memory: usize,
    pub peak_malloced_memory: usize,
    pub number_of_native_contexts: usize,
    pub number_of_detached_contexts: usize,
}

/// Turn a termination observed while running script into an error, and
/// clear it once control is back at the outermost entry.
pub(crate) fn termination_error(isolate: &IsolateRef) -> Error {
    if isolate.depth() <= 1 {
        isolate.cancel_termination();
    }
    match isolate.take_heap_limit_hit() {
        Some(limit) => Error::HeapLimit { limit },
        None => Error::Terminated,
    }
}
