//! `console.*` routing.
//!
//! The engine's own `console` object stays in place. Each isolate that
//! installs the console gets an inspector whose client receives every
//! console message the engine reports, already formatted and located at
//! the calling frame, and hands it to the isolate's [`ConsoleListener`].
//! Contexts join the inspector's single context group when they are created
//! and leave it when they are closed.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use deno_core::v8;
use deno_core::v8::inspector::{
    StringView, V8Inspector, V8InspectorClientBase, V8InspectorClientImpl, V8StackTrace,
};
use serde::Serialize;

use crate::context::Context;
use crate::isolate::{IsolateInner, IsolateRef};

const CONTEXT_GROUP_ID: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map the inspector's message level bit. Besides the five level
    /// methods, `count` and `timeEnd` report as `Debug`, a failed `assert`
    /// as `Error`, and `table`, `trace`, `dir` and the rest as `Info`.
    fn from_inspector(level: i32) -> Self {
        match level {
            1 => ConsoleLevel::Log,
            2 => ConsoleLevel::Debug,
            8 => ConsoleLevel::Error,
            16 => ConsoleLevel::Warning,
            _ => ConsoleLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `console.*` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleApiMessage {
    pub level: ConsoleLevel,
    /// Arguments formatted and joined with spaces
    pub message: String,
    /// Script the call was made from; empty outside script
    pub url: String,
    /// 1-based, 0 when unknown
    pub line: u32,
    /// 1-based, 0 when unknown
    pub column: u32,
}

/// Receives console messages from every context of an isolate.
pub trait ConsoleListener {
    fn console_api_message(&self, message: &ConsoleApiMessage);
}

impl<F> ConsoleListener for F
where
    F: Fn(&ConsoleApiMessage),
{
    fn console_api_message(&self, message: &ConsoleApiMessage) {
        self(message)
    }
}

/// Keeps every message in memory. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct ConsoleRecorder {
    messages: Rc<RefCell<Vec<ConsoleApiMessage>>>,
}

impl ConsoleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ConsoleApiMessage> {
        self.messages.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl ConsoleListener for ConsoleRecorder {
    fn console_api_message(&self, message: &ConsoleApiMessage) {
        self.messages.borrow_mut().push(message.clone());
    }
}

/// Forwards console messages to the `log` facade under the
/// `isobind::console` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsole;

impl ConsoleListener for LogConsole {
    fn console_api_message(&self, message: &ConsoleApiMessage) {
        let level = match message.level {
            ConsoleLevel::Log | ConsoleLevel::Info => log::Level::Info,
            ConsoleLevel::Debug => log::Level::Debug,
            ConsoleLevel::Warning => log::Level::Warn,
            ConsoleLevel::Error => log::Level::Error,
        };
        if message.url.is_empty() {
            log::log!(target: "isobind::console", level, "{}", message.message);
        } else {
            log::log!(
                target: "isobind::console",
                level,
                "{} ({}:{}:{})",
                message.message,
                message.url,
                message.line,
                message.column
            );
        }
    }
}

/// Inspector client that forwards console messages to the listener.
struct ConsoleClient {
    base: V8InspectorClientBase,
    isolate: Weak<IsolateInner>,
}

impl V8InspectorClientImpl for ConsoleClient {
    fn base(&self) -> &V8InspectorClientBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut V8InspectorClientBase {
        &mut self.base
    }

    unsafe fn base_ptr(this: *const Self) -> *const V8InspectorClientBase
    where
        Self: Sized,
    {
        // SAFETY: only the field address is taken, `this` is not read.
        unsafe { std::ptr::addr_of!((*this).base) }
    }

    fn console_api_message(
        &mut self,
        context_group_id: i32,
        level: i32,
        message: &StringView,
        url: &StringView,
        line_number: u32,
        column_number: u32,
        _stack_trace: &mut V8StackTrace,
    ) {
        if context_group_id != CONTEXT_GROUP_ID {
            return;
        }
        let Some(inner) = self.isolate.upgrade() else {
            return;
        };
        let isolate = IsolateRef { inner };
        let Some(listener) = isolate.console_listener() else {
            return;
        };
        listener.console_api_message(&ConsoleApiMessage {
            level: ConsoleLevel::from_inspector(level),
            message: message.to_string(),
            url: url.to_string(),
            line: line_number,
            column: column_number,
        });
    }
}

/// An isolate's inspector and the client it reports to.
pub(crate) struct ConsoleInspector {
    // Declared first so it is dropped before the client it points to
    inspector: v8::UniqueRef<V8Inspector>,
    _client: Box<ConsoleClient>,
}

impl ConsoleInspector {
    pub(crate) fn new(scope: &mut v8::HandleScope<'_, ()>, isolate: Weak<IsolateInner>) -> Self {
        let mut client = Box::new(ConsoleClient {
            base: V8InspectorClientBase::new::<ConsoleClient>(),
            isolate,
        });
        let inspector = V8Inspector::create(scope, &mut *client);
        Self {
            inspector,
            _client: client,
        }
    }
}

/// Report a new context to the isolate's inspector so its console calls
/// reach the listener. A no-op when the isolate has no console.
pub(crate) fn attach(ctx: &Context) {
    let isolate = ctx.isolate();
    let console = &isolate.inner.console;
    if console.borrow().is_none() {
        return;
    }
    isolate.with_raw_scope(|scope| {
        let context = ctx.local(scope);
        if let Some(console) = console.borrow_mut().as_mut() {
            console.inspector.context_created(
                context,
                CONTEXT_GROUP_ID,
                StringView::empty(),
                StringView::empty(),
            );
        }
    });
}

/// Remove a closing context from the isolate's inspector.
pub(crate) fn detach(isolate: &IsolateRef, context: v8::Local<v8::Context>) {
    if let Some(console) = isolate.inner.console.borrow_mut().as_mut() {
        console.inspector.context_destroyed(context);
    }
}
