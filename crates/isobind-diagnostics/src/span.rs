//! Script identifiers, position spans and resolved locations.

use serde::{Deserialize, Serialize};

/// Identifier the engine assigns to every compiled script or module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub i32);

impl ScriptId {
    /// Id used when the engine did not report one.
    pub const UNKNOWN: ScriptId = ScriptId(-1);

    pub fn is_unknown(&self) -> bool {
        self.0 < 0
    }
}

impl Default for ScriptId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// A range of source positions inside one script.
///
/// Positions are the offsets the engine reports for an exception
/// (start inclusive, end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub script_id: ScriptId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// A span for cases where no position is available.
    pub const DUMMY: Span = Span {
        script_id: ScriptId::UNKNOWN,
        start: 0,
        end: 0,
    };

    pub fn new(script_id: ScriptId, start: u32, end: u32) -> Self {
        Self {
            script_id,
            start,
            end,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.script_id.is_unknown()
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::DUMMY
    }
}

/// Resolved location with resource name, line, and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Script resource name (the origin passed at compile time)
    pub file: String,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
