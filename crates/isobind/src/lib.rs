//! Embedding V8 isolates from Rust.
//!
//! isobind wraps the engine exposed by `deno_core` in owned handles that can
//! be stored, cloned and dropped like ordinary Rust values:
//! - [`Isolate`] owns an engine heap; [`Context`] is a global environment in it
//! - [`Value`], [`Object`], [`Function`] and [`Promise`] survive across calls
//! - [`FunctionTemplate`] turns Rust closures into JavaScript functions
//! - [`Module`] compiles ES modules and links them through a [`ModuleResolver`]
//! - `console.*` calls are routed to a [`ConsoleListener`]
//!
//! Script failures surface as [`Error::Script`] carrying a
//! [`ScriptError`] with message, location and stack.
//!
//! # Example
//!
//! ```no_run
//! use isobind::{Context, FunctionTemplate, Isolate};
//!
//! let iso = Isolate::new();
//! let ctx = Context::new(&iso);
//! let add = FunctionTemplate::new(&iso, |info| {
//!     let sum = info.arg(0).number() + info.arg(1).number();
//!     Ok(Some(isobind::Value::new(info.isolate(), sum)?))
//! });
//! ctx.global().set("add", add.get_function(&ctx)?)?;
//! assert_eq!(ctx.run_script("add(2, 3)", "add.js")?.int32(), 5);
//! # Ok::<(), isobind::Error>(())
//! ```

mod callback;
mod config;
mod console;
mod context;
mod error;
mod exception;
mod function;
mod handle_table;
mod isolate;
pub mod json;
mod lifetime;
mod module;
mod object;
mod platform;
mod promise;
mod script;
mod template;
mod value;

#[cfg(test)]
mod test_util;

pub use callback::{CallbackError, CallbackResult, ErrorKind, FunctionCallbackInfo};
pub use config::{IsolateConfig, ResourceConstraints};
pub use console::{ConsoleApiMessage, ConsoleLevel, ConsoleListener, ConsoleRecorder, LogConsole};
pub use context::Context;
pub use error::{Error, Result};
pub use exception::StackTrace;
pub use function::Function;
pub use handle_table::Token;
pub use isolate::{HeapStatistics, Isolate, IsolateRef, TerminationHandle};
pub use module::{
    FnResolver, ImportAttributes, MapResolver, Module, ModuleRequest, ModuleResolver,
    ModuleStatus, NoopResolver,
};
pub use object::Object;
pub use platform::{engine_version, init, is_initialized};
pub use promise::{
    Promise, PromiseRejectEvent, PromiseRejectKind, PromiseRejectListener, PromiseResolver,
    PromiseState,
};
pub use script::{CompileOptions, CompilerCachedData, UnboundScript};
pub use template::{FunctionTemplate, ObjectTemplate, PropertyAttribute, TemplateValue};
pub use value::{ToValue, Value};

// Error model shared with the engine-independent crate
pub use isobind_diagnostics::{ExceptionMessage, Location, ScriptError, StackFrame};
