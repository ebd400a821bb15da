//! Renderers for script errors.

use crate::message::ScriptError;
use crate::source_cache::SourceCache;
use std::io::Write;

/// Trait for emitting script errors in various formats.
pub trait ErrorEmitter {
    /// Emit a single error.
    fn emit(&mut self, error: &ScriptError, cache: &SourceCache) -> std::io::Result<()>;

    fn emit_all<'a>(
        &mut self,
        errors: impl IntoIterator<Item = &'a ScriptError>,
        cache: &SourceCache,
    ) -> std::io::Result<()>
    where
        Self: Sized,
    {
        for error in errors {
            self.emit(error, cache)?;
        }
        Ok(())
    }
}

/// Terminal output with a source snippet and an underline under the
/// failing columns.
pub struct TerminalEmitter<W: Write> {
    writer: W,
    colored: bool,
}

impl<W: Write> TerminalEmitter<W> {
    pub fn new(writer: W, colored: bool) -> Self {
        Self { writer, colored }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn red(&self) -> &'static str {
        if self.colored {
            "\x1b[31m"
        } else {
            ""
        }
    }

    fn reset(&self) -> &'static str {
        if self.colored {
            "\x1b[0m"
        } else {
            ""
        }
    }

    fn bold(&self) -> &'static str {
        if self.colored {
            "\x1b[1m"
        } else {
            ""
        }
    }

    fn cyan(&self) -> &'static str {
        if self.colored {
            "\x1b[36m"
        } else {
            ""
        }
    }
}

impl<W: Write> ErrorEmitter for TerminalEmitter<W> {
    fn emit(&mut self, error: &ScriptError, cache: &SourceCache) -> std::io::Result<()> {
        let (red, reset, bold, cyan) = (self.red(), self.reset(), self.bold(), self.cyan());

        // Header: error: ReferenceError: c is not defined
        writeln!(self.writer, "{}{}error{}: {}", bold, red, reset, error.message)?;

        if let Some(loc) = &error.location {
            writeln!(self.writer, "  {}-->{} {}", cyan, reset, loc)?;
        }

        if let Some(details) = &error.details {
            // Prefer the cached script over the engine's copy of the line
            let line_text = cache
                .lookup(details.script_id, &details.script_resource_name)
                .and_then(|f| f.line_text(details.line_number))
                .map(str::to_string)
                .unwrap_or_else(|| details.source_line.clone());

            if details.line_number > 0 && !line_text.is_empty() {
                let line_str = details.line_number.to_string();
                let padding = " ".repeat(line_str.len());

                writeln!(self.writer, "{} {}|{}", padding, cyan, reset)?;
                writeln!(self.writer, "{}{} |{} {}", cyan, line_str, reset, line_text)?;

                // Tabs are kept so the underline lines up in a terminal
                let underline_padding: String = line_text
                    .chars()
                    .take(details.start_column as usize)
                    .map(|c| if c == '\t' { '\t' } else { ' ' })
                    .collect();
                let width = details.end_column.saturating_sub(details.start_column).max(1);
                writeln!(
                    self.writer,
                    "{} {}|{} {}{}{}{}",
                    padding,
                    cyan,
                    reset,
                    underline_padding,
                    red,
                    "^".repeat(width as usize),
                    reset
                )?;
            }

            for frame in &details.frames {
                writeln!(self.writer, "  {}= {}{}", cyan, reset, frame)?;
            }
        }

        writeln!(self.writer)?;
        Ok(())
    }
}

/// JSON output, one object per line.
pub struct JsonEmitter<W: Write> {
    writer: W,
}

impl<W: Write> JsonEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ErrorEmitter for JsonEmitter<W> {
    fn emit(&mut self, error: &ScriptError, _cache: &SourceCache) -> std::io::Result<()> {
        let json = serde_json::json!({
            "kind": error.kind(),
            "message": error.message,
            "location": error.location.as_ref().map(|l| serde_json::json!({
                "file": l.file,
                "line": l.line,
                "column": l.column,
            })),
            "stack": error.stack,
            "frames": error.frames().iter().map(|f| {
                serde_json::json!({
                    "function": f.function_name,
                    "script": f.script_name,
                    "line": f.line_number,
                    "column": f.column_number,
                })
            }).collect::<Vec<_>>(),
        });

        serde_json::to_writer(&mut self.writer, &json)?;
        writeln!(self.writer)?;
        Ok(())
    }
}

/// Single-line text output.
pub struct SimpleEmitter<W: Write> {
    writer: W,
}

impl<W: Write> SimpleEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ErrorEmitter for SimpleEmitter<W> {
    fn emit(&mut self, error: &ScriptError, _cache: &SourceCache) -> std::io::Result<()> {
        match &error.location {
            Some(loc) => writeln!(self.writer, "{}: {}", loc, error.message),
            None => writeln!(self.writer, "{}", error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ExceptionMessage, StackFrame};
    use crate::span::{Location, ScriptId};

    fn sample() -> ScriptError {
        ScriptError::new("ReferenceError: c is not defined")
            .with_location(Location::new("math.js", 2, 14))
            .with_stack("ReferenceError: c is not defined\n    at add (math.js:2:14)")
            .with_details(ExceptionMessage {
                text: "Uncaught ReferenceError: c is not defined".into(),
                script_resource_name: "math.js".into(),
                script_id: ScriptId(4),
                line_number: 2,
                start_column: 13,
                end_column: 14,
                source_line: "  return a + c;".into(),
                frames: vec![StackFrame {
                    script_name: "math.js".into(),
                    function_name: "add".into(),
                    line_number: 2,
                    column_number: 14,
                    ..Default::default()
                }],
                ..Default::default()
            })
    }

    #[test]
    fn test_simple_emitter() {
        let mut emitter = SimpleEmitter::new(Vec::new());
        emitter.emit(&sample(), &SourceCache::new()).unwrap();
        emitter
            .emit(&ScriptError::new("boom"), &SourceCache::new())
            .unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(out, "math.js:2:14: ReferenceError: c is not defined\nboom\n");
    }

    #[test]
    fn test_terminal_emitter_underlines_column_range() {
        let mut emitter = TerminalEmitter::new(Vec::new(), false);
        emitter.emit(&sample(), &SourceCache::new()).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "error: ReferenceError: c is not defined");
        assert_eq!(lines[1], "  --> math.js:2:14");
        assert_eq!(lines[3], "2 |   return a + c;");
        assert_eq!(lines[4], format!("  | {}^", " ".repeat(13)));
        assert_eq!(lines[5], "  = at add (math.js:2:14)");
    }

    #[test]
    fn test_terminal_emitter_prefers_cached_source() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId(4), "math.js", "function add(a) {\n  return a + c;\n}");
        let mut err = sample();
        if let Some(details) = err.details.as_mut() {
            details.source_line.clear();
        }

        let mut emitter = TerminalEmitter::new(Vec::new(), false);
        emitter.emit(&err, &cache).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert!(out.contains("2 |   return a + c;"));
    }

    #[test]
    fn test_json_emitter() {
        let mut emitter = JsonEmitter::new(Vec::new());
        emitter.emit_all([&sample()], &SourceCache::new()).unwrap();
        let out = String::from_utf8(emitter.into_inner()).unwrap();
        let json: serde_json::Value = serde_json::from_str(out.trim()).unwrap();

        assert_eq!(json["kind"], "ReferenceError");
        assert_eq!(json["location"]["line"], 2);
        assert_eq!(json["frames"][0]["function"], "add");
    }
}
