//! Promises, resolvers and rejection tracking.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::function::{self, Function};
use crate::isolate::IsolateRef;
use crate::lifetime::TrackedHandle;
use crate::value::{ToValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// A value known to be a promise.
#[derive(Clone)]
pub struct Promise {
    value: Value,
}

impl Promise {
    pub(crate) fn from_value(value: Value) -> Self {
        Promise { value }
    }

    fn from_local(
        ctx: &Context,
        scope: &mut v8::HandleScope<'_, ()>,
        local: v8::Local<v8::Promise>,
    ) -> Self {
        Promise {
            value: Value::from_local(ctx, scope, local.into()),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn context(&self) -> &Context {
        self.value.context()
    }

    fn with_promise<R>(
        &self,
        f: impl for<'s> FnOnce(&mut v8::HandleScope<'s>, v8::Local<'s, v8::Promise>) -> R,
    ) -> R {
        self.value.with_local(|scope, value| {
            match v8::Local::<v8::Promise>::try_from(value) {
                Ok(promise) => f(scope, promise),
                Err(_) => panic!("value is not a promise"),
            }
        })
    }

    pub fn state(&self) -> PromiseState {
        self.with_promise(|_, promise| match promise.state() {
            v8::PromiseState::Pending => PromiseState::Pending,
            v8::PromiseState::Fulfilled => PromiseState::Fulfilled,
            v8::PromiseState::Rejected => PromiseState::Rejected,
        })
    }

    /// The fulfillment value or rejection reason; `None` while pending.
    pub fn result(&self) -> Option<Value> {
        let ctx = self.context();
        self.with_promise(|scope, promise| {
            if promise.state() == v8::PromiseState::Pending {
                return None;
            }
            let result = promise.result(scope);
            Some(Value::from_local(ctx, scope, result))
        })
    }

    /// Whether a handler was ever attached.
    pub fn has_handler(&self) -> bool {
        self.with_promise(|_, promise| promise.has_handler())
    }

    /// `promise.then(on_fulfilled)`
    pub fn then(&self, on_fulfilled: &Function) -> Result<Promise> {
        self.chain(&[on_fulfilled], |tc, promise, handlers| {
            promise.then(tc, handlers[0])
        })
    }

    /// `promise.then(on_fulfilled, on_rejected)`
    pub fn then2(&self, on_fulfilled: &Function, on_rejected: &Function) -> Result<Promise> {
        self.chain(&[on_fulfilled, on_rejected], |tc, promise, handlers| {
            promise.then2(tc, handlers[0], handlers[1])
        })
    }

    /// `promise.catch(on_rejected)`
    pub fn catch(&self, on_rejected: &Function) -> Result<Promise> {
        self.chain(&[on_rejected], |tc, promise, handlers| {
            promise.catch(tc, handlers[0])
        })
    }

    fn chain(
        &self,
        handlers: &[&Function],
        attach: impl for<'s> FnOnce(
            &mut v8::TryCatch<'_, v8::HandleScope<'s>>,
            v8::Local<'s, v8::Promise>,
            &[v8::Local<'s, v8::Function>],
        ) -> Option<v8::Local<'s, v8::Promise>>,
    ) -> Result<Promise> {
        let ctx = self.context();
        ctx.with_scope(|scope| {
            let promise = v8::Local::<v8::Promise>::try_from(self.value.local(scope))
                .map_err(|_| Error::Type { expected: "a promise" })?;
            let mut locals = Vec::with_capacity(handlers.len());
            for handler in handlers {
                locals.push(function::function_local(scope, handler.value())?);
            }

            let tc = &mut v8::TryCatch::new(scope);
            match attach(tc, promise, &locals) {
                Some(chained) => Ok(Promise::from_local(ctx, tc, chained)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Promise({:?})", self.value)
    }
}

/// Creates a promise and settles it from Rust.
pub struct PromiseResolver {
    ctx: Context,
    handle: Rc<TrackedHandle<v8::PromiseResolver>>,
}

impl PromiseResolver {
    pub fn new(ctx: &Context) -> Result<Self> {
        ctx.with_scope(|scope| {
            let resolver = v8::PromiseResolver::new(scope)
                .ok_or_else(|| Error::engine("promise resolver could not be created"))?;
            let global = v8::Global::new(scope, resolver);
            Ok(PromiseResolver {
                ctx: ctx.clone(),
                handle: TrackedHandle::new(&ctx.isolate().inner.lifetimes, global),
            })
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> Promise {
        self.ctx.with_scope(|scope| {
            let promise = self.handle.local(scope).get_promise(scope);
            Promise::from_local(&self.ctx, scope, promise)
        })
    }

    /// Fulfill the promise. Returns false if it was already settled.
    pub fn resolve(&self, value: impl ToValue) -> Result<bool> {
        self.settle(value, false)
    }

    /// Reject the promise. Returns false if it was already settled.
    pub fn reject(&self, reason: impl ToValue) -> Result<bool> {
        self.settle(reason, true)
    }

    fn settle(&self, value: impl ToValue, reject: bool) -> Result<bool> {
        let value = value.to_value(&self.ctx)?;
        let ctx = &self.ctx;
        ctx.with_scope(|scope| {
            let resolver = self.handle.local(scope);
            let promise = resolver.get_promise(scope);
            let pending = promise.state() == v8::PromiseState::Pending;
            let value = value.local(scope);

            let tc = &mut v8::TryCatch::new(scope);
            let settled = if reject {
                resolver.reject(tc, value)
            } else {
                resolver.resolve(tc, value)
            };
            match settled {
                Some(_) => Ok(pending),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }
}

/// Why the engine reported a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseRejectKind {
    /// Rejected with no handler attached.
    RejectWithNoHandler,
    /// A handler was attached to an already rejected promise.
    HandlerAddedAfterReject,
    RejectAfterResolved,
    ResolveAfterResolved,
}

impl From<v8::PromiseRejectEvent> for PromiseRejectKind {
    fn from(event: v8::PromiseRejectEvent) -> Self {
        match event {
            v8::PromiseRejectEvent::PromiseRejectWithNoHandler => Self::RejectWithNoHandler,
            v8::PromiseRejectEvent::PromiseHandlerAddedAfterReject => {
                Self::HandlerAddedAfterReject
            }
            v8::PromiseRejectEvent::PromiseRejectAfterResolved => Self::RejectAfterResolved,
            v8::PromiseRejectEvent::PromiseResolveAfterResolved => Self::ResolveAfterResolved,
        }
    }
}

/// Payload of a promise rejection notification.
#[derive(Debug)]
pub struct PromiseRejectEvent {
    pub kind: PromiseRejectKind,
    pub promise: Promise,
    /// The rejection reason; absent for `HandlerAddedAfterReject`.
    pub value: Option<Value>,
}

/// Receives promise rejection notifications from every context of an
/// isolate.
pub trait PromiseRejectListener {
    fn promise_rejected(&self, event: &PromiseRejectEvent);
}

impl<F> PromiseRejectListener for F
where
    F: Fn(&PromiseRejectEvent),
{
    fn promise_rejected(&self, event: &PromiseRejectEvent) {
        self(event)
    }
}

pub(crate) extern "C" fn promise_reject_callback(message: v8::PromiseRejectMessage) {
    // SAFETY: called by the engine on the isolate's thread with the
    // rejected promise's context entered.
    let scope = &mut unsafe { v8::CallbackScope::new(&message) };
    let Some(isolate) = IsolateRef::from_native(scope) else {
        return;
    };
    let Some(listener) = isolate.promise_reject_listener() else {
        return;
    };

    let current = scope.get_current_context();
    let Some(ctx) = isolate.context_for(scope, current) else {
        log::debug!("isolate {}: promise rejected in an unknown context", isolate.id());
        return;
    };

    let event = PromiseRejectEvent {
        kind: message.get_event().into(),
        promise: Promise::from_local(&ctx, scope, message.get_promise()),
        value: message
            .get_value()
            .map(|value| Value::from_local(&ctx, scope, value)),
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| listener.promise_rejected(&event)));
    if result.is_err() {
        log::error!("isolate {}: promise reject listener panicked", isolate.id());
    }
}
