//! Translation between engine exceptions and Rust errors.
//!
//! Outbound: a pending exception in a `TryCatch` becomes an
//! [`Error::Script`] carrying the message, location, stack text and the
//! engine's message details (frames included). Inbound: a
//! [`CallbackError`] returned by a host callback becomes the pending
//! exception of that call.

use std::rc::Rc;

use deno_core::v8;
use isobind_diagnostics::{ExceptionMessage, Location, ScriptError, ScriptId, SourceCache, StackFrame};

use crate::callback::{CallbackError, ErrorKind};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::isolate::{self, IsolateRef};
use crate::lifetime::TrackedHandle;

pub(crate) fn new_string<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    text: &str,
) -> Result<v8::Local<'s, v8::String>> {
    v8::String::new(scope, text).ok_or_else(|| Error::engine("string is too long for the engine"))
}

/// Take the pending exception (or termination) out of `tc`.
pub(crate) fn take(tc: &mut v8::TryCatch<v8::HandleScope>, ctx: &Context) -> Error {
    if tc.has_terminated() || tc.is_execution_terminating() {
        return isolate::termination_error(ctx.isolate());
    }
    match tc.exception() {
        Some(exception) => {
            let message = tc.message();
            Error::Script(script_error(tc, exception, message, ctx.isolate()))
        }
        None => Error::engine("operation failed without raising an exception"),
    }
}

/// Build a `ScriptError` from an exception value and its message.
///
/// Converting the exception to a string may run script, so the source cache
/// is only borrowed afterwards.
pub(crate) fn script_error(
    scope: &mut v8::HandleScope,
    exception: v8::Local<v8::Value>,
    message: Option<v8::Local<v8::Message>>,
    isolate: &IsolateRef,
) -> ScriptError {
    let text = exception
        .to_string(scope)
        .map(|s| s.to_rust_string_lossy(scope));
    let stack = stack_property(scope, exception);
    let details = message.map(|m| {
        let sources = isolate.inner.sources.borrow();
        exception_message(scope, m, &sources)
    });

    let text = text
        .or_else(|| details.as_ref().map(|d| d.text.clone()))
        .unwrap_or_default();
    let mut err = ScriptError::new(text);

    if let Some(stack) = stack {
        err = err.with_stack(stack);
    } else if exception.is_native_error() {
        let message = err.message.clone();
        err = err.with_stack(message);
    }

    if let Some(details) = details {
        if !details.script_resource_name.is_empty() || details.line_number > 0 {
            err = err.with_location(details.location());
        }
        err = err.with_details(details);
    }
    err
}

fn stack_property(scope: &mut v8::HandleScope, exception: v8::Local<v8::Value>) -> Option<String> {
    if !exception.is_object() {
        return None;
    }
    let object = exception.to_object(scope)?;
    let key = v8::String::new(scope, "stack")?;
    let stack = object.get(scope, key.into())?;
    if !stack.is_string() {
        return None;
    }
    Some(stack.to_rust_string_lossy(scope))
}

fn exception_message(
    scope: &mut v8::HandleScope,
    message: v8::Local<v8::Message>,
    sources: &SourceCache,
) -> ExceptionMessage {
    let text = message.get(scope).to_rust_string_lossy(scope);
    let script_resource_name = message
        .get_script_resource_name(scope)
        .filter(|name| !name.is_null_or_undefined())
        .map(|name| name.to_rust_string_lossy(scope))
        .unwrap_or_default();
    let source_line = message
        .get_source_line(scope)
        .map(|line| line.to_rust_string_lossy(scope))
        .unwrap_or_default();
    let frames = message
        .get_stack_trace(scope)
        .map(|trace| collect_frames(scope, trace, sources))
        .unwrap_or_default();
    let script_id = sources
        .get_by_name(&script_resource_name)
        .map(|file| file.id)
        .unwrap_or(ScriptId::UNKNOWN);

    ExceptionMessage {
        text,
        script_resource_name,
        script_id,
        line_number: message.get_line_number(scope).unwrap_or(0) as u32,
        start_column: message.get_start_column() as u32,
        end_column: message.get_end_column() as u32,
        start_position: message.get_start_position().max(0) as u32,
        end_position: message.get_end_position().max(0) as u32,
        source_line,
        wasm_function_index: message.get_wasm_function_index(),
        frames,
    }
}

pub(crate) fn collect_frames(
    scope: &mut v8::HandleScope,
    trace: v8::Local<v8::StackTrace>,
    sources: &SourceCache,
) -> Vec<StackFrame> {
    let count = trace.get_frame_count();
    let mut frames = Vec::with_capacity(count);
    for index in 0..count {
        if let Some(frame) = trace.get_frame(scope, index) {
            frames.push(stack_frame(scope, frame, sources));
        }
    }
    frames
}

fn stack_frame(
    scope: &mut v8::HandleScope,
    frame: v8::Local<v8::StackFrame>,
    sources: &SourceCache,
) -> StackFrame {
    let script_name = frame
        .get_script_name(scope)
        .map(|name| name.to_rust_string_lossy(scope))
        .unwrap_or_default();
    let function_name = frame
        .get_function_name(scope)
        .map(|name| name.to_rust_string_lossy(scope))
        .unwrap_or_default();
    let script_source = sources
        .lookup(ScriptId(frame.get_script_id() as i32), &script_name)
        .map(|file| file.source.clone())
        .unwrap_or_default();

    StackFrame {
        script_name,
        script_source,
        function_name,
        line_number: frame.get_line_number() as u32,
        column_number: frame.get_column() as u32,
        is_eval: frame.is_eval(),
        is_constructor: frame.is_constructor(),
        is_wasm: frame.is_wasm(),
        is_user_javascript: frame.is_user_javascript(),
    }
}

/// Make `err` the pending exception of the current callback.
pub(crate) fn throw(scope: &mut v8::HandleScope, err: CallbackError) {
    let exception: v8::Local<v8::Value> = match err {
        CallbackError::Message(text) => match v8::String::new(scope, &text) {
            Some(text) => text.into(),
            None => return,
        },
        CallbackError::Throw { kind, message } => {
            let Some(message) = v8::String::new(scope, &message) else {
                return;
            };
            match kind {
                ErrorKind::Error => v8::Exception::error(scope, message),
                ErrorKind::TypeError => v8::Exception::type_error(scope, message),
                ErrorKind::RangeError => v8::Exception::range_error(scope, message),
                ErrorKind::ReferenceError => v8::Exception::reference_error(scope, message),
                ErrorKind::SyntaxError => v8::Exception::syntax_error(scope, message),
            }
        }
        CallbackError::Exception(value) => value.local(scope),
    };
    scope.throw_exception(exception);
}

/// A captured script stack trace.
///
/// Holds the native trace until it is dropped or its isolate is disposed.
pub struct StackTrace {
    ctx: Context,
    handle: Option<Rc<TrackedHandle<v8::StackTrace>>>,
}

impl StackTrace {
    pub(crate) fn from_local(
        ctx: &Context,
        scope: &mut v8::HandleScope,
        trace: Option<v8::Local<v8::StackTrace>>,
    ) -> Self {
        let handle = trace.map(|trace| {
            let global = v8::Global::new(scope, trace);
            TrackedHandle::new(&ctx.isolate().inner.lifetimes, global)
        });
        StackTrace {
            ctx: ctx.clone(),
            handle,
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.handle {
            Some(handle) => self
                .ctx
                .with_scope(|scope| handle.local(scope).get_frame_count()),
            None => 0,
        }
    }

    /// Frames, innermost first.
    pub fn frames(&self) -> Vec<StackFrame> {
        let Some(handle) = &self.handle else {
            return Vec::new();
        };
        let sources = self.ctx.isolate().inner.sources.borrow();
        self.ctx.with_scope(|scope| {
            let trace = handle.local(scope);
            collect_frames(scope, trace, &sources)
        })
    }

    pub fn frame(&self, index: usize) -> Option<StackFrame> {
        let handle = self.handle.as_ref()?;
        let sources = self.ctx.isolate().inner.sources.borrow();
        self.ctx.with_scope(|scope| {
            let trace = handle.local(scope);
            let frame = trace.get_frame(scope, index)?;
            Some(stack_frame(scope, frame, &sources))
        })
    }

    /// Location of the innermost frame.
    pub fn top_location(&self) -> Option<Location> {
        self.frame(0).map(|frame| frame.location())
    }
}
