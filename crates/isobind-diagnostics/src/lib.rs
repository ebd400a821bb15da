//! Script error reporting for isobind.
//!
//! This crate holds everything about a JavaScript failure that can be
//! expressed without the engine:
//! - Source locations and position spans
//! - A cache of script sources keyed by engine script id
//! - The structured `ScriptError` / `ExceptionMessage` / `StackFrame` model
//! - Renderers (terminal, JSON, simple text)
//!
//! # Example
//!
//! ```
//! use isobind_diagnostics::{ScriptError, Location};
//!
//! let err = ScriptError::new("SyntaxError: Unexpected token ';'")
//!     .with_stack("SyntaxError: Unexpected token ';'")
//!     .with_location(Location::new("xyz.js", 3, 15));
//!
//! assert_eq!(err.to_string(), "SyntaxError: Unexpected token ';'");
//! assert_eq!(
//!     format!("{:#}", err),
//!     "SyntaxError: Unexpected token ';' (at xyz.js:3:15)"
//! );
//! ```

pub mod emitter;
pub mod message;
pub mod source_cache;
pub mod span;

pub use emitter::{ErrorEmitter, JsonEmitter, SimpleEmitter, TerminalEmitter};
pub use message::{ExceptionMessage, ScriptError, StackFrame};
pub use source_cache::{SourceCache, SourceFile};
pub use span::{Location, ScriptId, Span};
