//! Structured JavaScript exception types.

use crate::span::{Location, ScriptId, Span};
use serde::{Deserialize, Serialize};

/// One frame of a captured JavaScript stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub script_name: String,
    /// Full source of the script the frame belongs to, when known
    pub script_source: String,
    /// Empty for top-level code and anonymous functions
    pub function_name: String,
    /// Line number (1-indexed)
    pub line_number: u32,
    /// Column number (1-indexed)
    pub column_number: u32,
    pub is_eval: bool,
    pub is_constructor: bool,
    pub is_wasm: bool,
    pub is_user_javascript: bool,
}

impl StackFrame {
    pub fn location(&self) -> Location {
        Location::new(&self.script_name, self.line_number, self.column_number)
    }
}

/// Formats the frame the way the engine prints it in `Error.prototype.stack`.
impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let new = if self.is_constructor { "new " } else { "" };
        if self.function_name.is_empty() {
            write!(f, "at {}{}", new, self.location())
        } else {
            write!(f, "at {}{} ({})", new, self.function_name, self.location())
        }
    }
}

/// The engine's message object for a thrown exception.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionMessage {
    /// Message text, e.g. `Uncaught ReferenceError: c is not defined`
    pub text: String,
    pub script_resource_name: String,
    pub script_id: ScriptId,
    /// Line number (1-indexed)
    pub line_number: u32,
    /// Column range on `line_number` (0-indexed, end exclusive)
    pub start_column: u32,
    pub end_column: u32,
    /// Position range inside the whole script
    pub start_position: u32,
    pub end_position: u32,
    /// Text of the offending line
    pub source_line: String,
    pub wasm_function_index: i32,
    /// Frames captured for uncaught exceptions, innermost first
    pub frames: Vec<StackFrame>,
}

impl ExceptionMessage {
    pub fn column_range(&self) -> (u32, u32) {
        (self.start_column, self.end_column)
    }

    pub fn position_range(&self) -> (u32, u32) {
        (self.start_position, self.end_position)
    }

    pub fn span(&self) -> Span {
        Span::new(self.script_id, self.start_position, self.end_position)
    }

    /// Location of the first offending character (1-indexed column).
    pub fn location(&self) -> Location {
        Location::new(
            &self.script_resource_name,
            self.line_number,
            self.start_column + 1,
        )
    }
}

/// A syntax or runtime error raised by script.
///
/// The default rendering is the exception's string form. The alternate
/// rendering (`{:#}`) is [`ScriptError::verbose`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    /// String form of the exception, e.g. `ReferenceError: c is not defined`
    pub message: String,
    pub location: Option<Location>,
    /// Value of the exception's `stack` property
    pub stack: Option<String>,
    pub details: Option<ExceptionMessage>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        self.stack = if stack.is_empty() { None } else { Some(stack) };
        self
    }

    pub fn with_details(mut self, details: ExceptionMessage) -> Self {
        self.details = Some(details);
        self
    }

    /// Error constructor name, e.g. `SyntaxError`.
    ///
    /// Thrown non-error values have no kind.
    pub fn kind(&self) -> Option<&str> {
        let (head, _) = self.message.split_once(':')?;
        let looks_like_kind = !head.is_empty()
            && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && head.ends_with("Error");
        looks_like_kind.then_some(head)
    }

    /// Whether the error was raised before any script frame ran.
    ///
    /// The engine reports such errors with a stack equal to the message.
    pub fn is_compile_error(&self) -> bool {
        matches!(&self.stack, Some(stack) if *stack == self.message)
    }

    pub fn frames(&self) -> &[StackFrame] {
        self.details
            .as_ref()
            .map(|d| d.frames.as_slice())
            .unwrap_or(&[])
    }

    /// Full rendering: the stack trace, plus the failing location when the
    /// stack carries no runtime frames.
    pub fn verbose(&self) -> String {
        match &self.stack {
            Some(stack) => match &self.location {
                Some(loc) if *stack == self.message => format!("{} (at {})", stack, loc),
                _ => stack.clone(),
            },
            None => self.message.clone(),
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            f.write_str(&self.verbose())
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_error() -> ScriptError {
        let frames = vec![
            StackFrame {
                script_name: "math.js".into(),
                function_name: "addMore".into(),
                line_number: 7,
                column_number: 17,
                is_user_javascript: true,
                ..Default::default()
            },
            StackFrame {
                script_name: "main.js".into(),
                line_number: 3,
                column_number: 10,
                is_user_javascript: true,
                ..Default::default()
            },
        ];
        ScriptError::new("ReferenceError: c is not defined")
            .with_location(Location::new("math.js", 7, 17))
            .with_stack(
                "ReferenceError: c is not defined\n    at addMore (math.js:7:17)\n    at main.js:3:10",
            )
            .with_details(ExceptionMessage {
                text: "Uncaught ReferenceError: c is not defined".into(),
                script_resource_name: "math.js".into(),
                line_number: 7,
                start_column: 16,
                end_column: 17,
                start_position: 85,
                end_position: 86,
                frames,
                ..Default::default()
            })
    }

    #[test]
    fn test_format_with_stack() {
        let err = ScriptError::new("msg").with_stack("stack");
        assert_eq!(format!("{}", err), "msg");
        assert_eq!(format!("{:#}", err), "stack");
    }

    #[test]
    fn test_format_without_stack() {
        let err = ScriptError::new("msg");
        assert_eq!(format!("{}", err), "msg");
        assert_eq!(format!("{:#}", err), "msg");
        assert!(!err.is_compile_error());
    }

    #[test]
    fn test_compile_error_appends_location() {
        let err = ScriptError::new("SyntaxError: Unexpected token ';'")
            .with_stack("SyntaxError: Unexpected token ';'")
            .with_location(Location::new("xyz.js", 3, 15));

        assert!(err.is_compile_error());
        assert_eq!(err.kind(), Some("SyntaxError"));
        assert_eq!(
            err.verbose(),
            "SyntaxError: Unexpected token ';' (at xyz.js:3:15)"
        );
    }

    #[test]
    fn test_runtime_error_verbose_is_stack() {
        let err = runtime_error();
        assert!(!err.is_compile_error());
        assert_eq!(err.kind(), Some("ReferenceError"));
        assert_eq!(format!("{:#}", err), err.stack.clone().unwrap());

        let details = err.details.as_ref().unwrap();
        assert_eq!(details.column_range(), (16, 17));
        assert_eq!(details.position_range(), (85, 86));
        assert_eq!(details.location().to_string(), "math.js:7:17");
    }

    #[test]
    fn test_frame_display() {
        let err = runtime_error();
        let rendered: Vec<String> = err.frames().iter().map(|f| f.to_string()).collect();
        assert_eq!(rendered, vec!["at addMore (math.js:7:17)", "at main.js:3:10"]);
    }

    #[test]
    fn test_kind_of_thrown_string() {
        assert_eq!(ScriptError::new("boom").kind(), None);
        assert_eq!(ScriptError::new("note: something").kind(), None);
        assert_eq!(ScriptError::new("Error: bad").kind(), Some("Error"));
    }

    #[test]
    fn test_empty_stack_is_none() {
        let err = ScriptError::new("x").with_stack("");
        assert!(err.stack.is_none());
    }
}
