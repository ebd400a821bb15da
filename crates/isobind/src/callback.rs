//! The callback bridge.
//!
//! Every host function the engine can call goes through
//! [`function_trampoline`]. The function's data slot holds the token of a
//! closure registered in the isolate's handle table; the trampoline looks
//! it up, wraps the receiver and arguments as [`Value`]s, runs the closure
//! and turns its result (or panic) back into a return value or a pending
//! exception. All per-call state lives in the [`FunctionCallbackInfo`] on
//! the trampoline's stack frame, so callbacks may re-enter the engine and be
//! re-entered themselves.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use deno_core::v8;

use crate::context::Context;
use crate::error::Error;
use crate::exception;
use crate::handle_table::Token;
use crate::isolate::{HostObject, IsolateRef};
use crate::object::Object;
use crate::value::Value;

/// What a host function returns: a value, `None` for `undefined`, or an
/// error to throw.
pub type CallbackResult = Result<Option<Value>, CallbackError>;

pub(crate) type FunctionCallback = dyn Fn(&FunctionCallbackInfo) -> CallbackResult;

/// Constructor used for a thrown [`CallbackError::Throw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

/// An error raised by a host function, thrown into script.
#[derive(Debug)]
pub enum CallbackError {
    /// Throw the message as a plain string.
    Message(String),
    /// Throw a new error object of the given kind.
    Throw { kind: ErrorKind, message: String },
    /// Throw an existing value.
    Exception(Value),
}

impl CallbackError {
    pub fn error(message: impl Into<String>) -> Self {
        CallbackError::Throw {
            kind: ErrorKind::Error,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        CallbackError::Throw {
            kind: ErrorKind::TypeError,
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        CallbackError::Throw {
            kind: ErrorKind::RangeError,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackError::Message(message) => f.write_str(message),
            CallbackError::Throw { kind, message } => write!(f, "{:?}: {}", kind, message),
            CallbackError::Exception(value) => write!(f, "{:?}", value),
        }
    }
}

impl From<Error> for CallbackError {
    fn from(err: Error) -> Self {
        CallbackError::error(err.to_string())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        CallbackError::Message(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        CallbackError::Message(message.to_string())
    }
}

impl From<Value> for CallbackError {
    fn from(value: Value) -> Self {
        CallbackError::Exception(value)
    }
}

/// The receiver and arguments of one host function call.
///
/// Arguments are released when the call returns, so clones kept past the
/// call panic on use. Call [`retain`](Self::retain) to keep them alive until
/// the context is closed instead.
pub struct FunctionCallbackInfo {
    ctx: Context,
    this: Object,
    args: Vec<Value>,
    retained: Cell<bool>,
}

impl FunctionCallbackInfo {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn isolate(&self) -> &IsolateRef {
        self.ctx.isolate()
    }

    /// The receiver (`this`) of the call.
    pub fn this(&self) -> &Object {
        &self.this
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, or `undefined` past the end like in script.
    pub fn arg(&self, index: usize) -> Value {
        match self.args.get(index) {
            Some(value) => value.clone(),
            None => self.isolate().undefined(),
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Keep the arguments alive after the call returns. They are counted by
    /// [`Context::retained_value_count`] and released when the context is
    /// closed.
    pub fn retain(&self) {
        self.retained.set(true);
    }

    pub fn is_retained(&self) -> bool {
        self.retained.get()
    }

    /// Hand the arguments to the context or release them.
    fn finish(self) {
        if self.retained.get() {
            self.ctx.retain(self.args.iter().map(Value::releasable));
        } else {
            for arg in &self.args {
                arg.release();
            }
        }
    }
}

/// Native entry point for every function created from a
/// [`FunctionTemplate`](crate::FunctionTemplate).
pub(crate) fn function_trampoline(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    if scope.is_execution_terminating() {
        return;
    }

    let token = match v8::Local::<v8::BigInt>::try_from(args.data()) {
        Ok(data) => Token::from_raw(data.u64_value().0),
        Err(_) => fatal("function data does not hold a callback token"),
    };
    let Some(isolate) = IsolateRef::from_native(scope) else {
        fatal("callback invoked on an isolate that is not registered");
    };
    let callback = match isolate.host_object(token) {
        Ok(HostObject::Function(callback)) => callback,
        Ok(_) => fatal(&format!("token {} is not a function callback", token)),
        Err(err) => fatal(&err.to_string()),
    };

    let current = scope.get_current_context();
    let Some(ctx) = isolate.context_for(scope, current) else {
        let message = v8::String::new(scope, "host function called from an unknown context");
        if let Some(message) = message {
            let exception = v8::Exception::error(scope, message);
            scope.throw_exception(exception);
        }
        return;
    };

    let this = Object::from_local(&ctx, scope, args.this());
    let values = (0..args.length())
        .map(|i| Value::from_local(&ctx, scope, args.get(i)))
        .collect();
    let info = FunctionCallbackInfo {
        ctx,
        this,
        args: values,
        retained: Cell::new(false),
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&info)));

    if !scope.is_execution_terminating() {
        match result {
            Ok(Ok(Some(value))) => {
                let value = value.local(scope);
                rv.set(value);
            }
            Ok(Ok(None)) => rv.set(v8::undefined(scope).into()),
            Ok(Err(err)) => exception::throw(scope, err),
            Err(payload) => {
                let message = format!("host function panicked: {}", panic_message(&payload));
                log::error!("{}", message);
                exception::throw(scope, CallbackError::error(message));
            }
        }
    }
    info.finish();
}

/// A token that does not resolve means the lifetime bookkeeping is broken;
/// continuing would run the wrong host code or touch freed memory.
fn fatal(reason: &str) -> ! {
    log::error!("callback bridge: {}", reason);
    std::process::abort()
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{FunctionTemplate, ObjectTemplate, PropertyAttribute};
    use crate::test_util::init_logger;
    use crate::Isolate;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn print_context(iso: &Isolate, retain: bool, seen: Rc<RefCell<Vec<String>>>) -> Context {
        let global = ObjectTemplate::new(iso);
        let print = FunctionTemplate::new(iso, move |info: &FunctionCallbackInfo| {
            if retain {
                info.retain();
            }
            seen.borrow_mut()
                .extend(info.args().iter().map(|v| v.to_string()));
            Ok(None)
        });
        global.set("print", &print, PropertyAttribute::READ_ONLY).unwrap();
        Context::with_global_template(iso, &global)
    }

    #[test]
    fn test_arguments_arrive_in_order() {
        init_logger();
        let iso = Isolate::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ctx = print_context(&iso, false, seen.clone());

        let result = ctx.run_script("print('foo', 'bar', 0, 1)", "").unwrap();
        assert!(result.is_undefined());
        assert_eq!(*seen.borrow(), vec!["foo", "bar", "0", "1"]);
    }

    #[test]
    fn test_retained_values_live_until_close() {
        let iso = Isolate::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ctx = print_context(&iso, true, seen);

        ctx.run_script("print('foo', 'bar', 0, 1)", "").unwrap();
        assert_eq!(ctx.retained_value_count(), 4);

        ctx.close();
        assert_eq!(ctx.retained_value_count(), 0);
    }

    #[test]
    fn test_unretained_values_are_released() {
        let iso = Isolate::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ctx = print_context(&iso, false, seen);

        ctx.run_script("print('foo', 'bar', 0, 1)", "").unwrap();
        assert_eq!(ctx.retained_value_count(), 0);
    }

    #[test]
    fn test_argument_kept_past_the_call_is_released() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let kept: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let slot = kept.clone();
        let keep = FunctionTemplate::new(&iso, move |info: &FunctionCallbackInfo| {
            *slot.borrow_mut() = Some(info.arg(0));
            Ok(None)
        });
        ctx.global().set("keep", keep.get_function(&ctx).unwrap()).unwrap();
        ctx.run_script("keep('short lived')", "").unwrap();

        assert!(kept.borrow().as_ref().unwrap().is_released());
    }

    #[test]
    fn test_return_values_and_missing_arguments() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let describe = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            let text = format!("{}:{}", info.len(), info.arg(3).is_undefined());
            Ok(Some(Value::new(info.isolate(), text)?))
        });
        ctx.global()
            .set("describe", describe.get_function(&ctx).unwrap())
            .unwrap();

        assert_eq!(ctx.run_script("describe(1, 2)", "").unwrap().to_string(), "2:true");
    }

    #[test]
    fn test_errors_become_exceptions() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let global = ctx.global();

        let message = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Err("plain".into()));
        let typed = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| {
            Err(CallbackError::type_error("wrong type"))
        });
        let value = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            let obj = Object::new(info.context());
            obj.set("code", 42)?;
            Err(obj.into_value().into())
        });
        global.set("plain", message.get_function(&ctx).unwrap()).unwrap();
        global.set("typed", typed.get_function(&ctx).unwrap()).unwrap();
        global.set("custom", value.get_function(&ctx).unwrap()).unwrap();

        let caught = ctx
            .run_script(
                "const out = [];\n\
                 try { plain() } catch (e) { out.push(typeof e, e) }\n\
                 try { typed() } catch (e) { out.push(e instanceof TypeError, e.message) }\n\
                 try { custom() } catch (e) { out.push(e.code) }\n\
                 out.join(',')",
                "errors.js",
            )
            .unwrap();
        assert_eq!(caught.to_string(), "string,plain,true,wrong type,42");

        let err = ctx.run_script("typed()", "uncaught.js").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: wrong type");
    }

    #[test]
    fn test_panics_become_exceptions() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let boom = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| -> CallbackResult {
            panic!("kaboom")
        });
        ctx.global().set("boom", boom.get_function(&ctx).unwrap()).unwrap();

        let result = ctx
            .run_script("try { boom(); 'no' } catch (e) { e.message }", "")
            .unwrap();
        assert_eq!(result.to_string(), "host function panicked: kaboom");
        // The isolate is still usable
        assert_eq!(ctx.run_script("1 + 1", "").unwrap().int32(), 2);
    }

    #[test]
    fn test_reentrant_callbacks() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let depth = Rc::new(Cell::new(0usize));
        let max = Rc::new(Cell::new(0usize));
        let (d, m) = (depth.clone(), max.clone());

        let recurse = FunctionTemplate::new(&iso, move |info: &FunctionCallbackInfo| {
            let n = info.arg(0).int32();
            d.set(d.get() + 1);
            m.set(m.get().max(d.get()));
            let result = if n == 0 {
                Value::new(info.isolate(), 0)?
            } else {
                // Run more script from inside the callback
                let inner = info
                    .context()
                    .run_script(&format!("recurse({})", n - 1), "inner.js")?;
                Value::new(info.isolate(), inner.int32() + n)?
            };
            d.set(d.get() - 1);
            Ok(Some(result))
        });
        ctx.global()
            .set("recurse", recurse.get_function(&ctx).unwrap())
            .unwrap();

        assert_eq!(ctx.run_script("recurse(4)", "outer.js").unwrap().int32(), 10);
        assert_eq!(max.get(), 5);
        assert_eq!(depth.get(), 0);
    }

    #[test]
    fn test_callback_sees_receiver() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let whoami = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            Ok(Some(info.this().get("name")?))
        });
        let obj = Object::new(&ctx);
        obj.set("name", "receiver").unwrap();
        obj.set("whoami", whoami.get_function(&ctx).unwrap()).unwrap();
        ctx.global().set("obj", &obj).unwrap();

        assert_eq!(ctx.run_script("obj.whoami()", "").unwrap().to_string(), "receiver");
    }
}
