//! Script source cache keyed by engine script id.
//!
//! The engine only hands out script ids in stack frames; the cache lets
//! frames and renderers recover the source text and its lines.

use crate::span::{Location, ScriptId, Span};
use std::collections::{HashMap, VecDeque};

/// A cached script with line information.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: ScriptId,
    /// Resource name the script was compiled with
    pub name: String,
    pub source: String,
    /// Byte offsets where each line starts
    line_starts: Vec<u32>,
}

impl SourceFile {
    fn new(id: ScriptId, name: String, source: String) -> Self {
        let line_starts = compute_line_starts(&source);
        Self {
            id,
            name,
            source,
            line_starts,
        }
    }

    /// Get the 1-based line and column for a byte offset.
    pub fn line_column(&self, offset: u32) -> (u32, u32) {
        let offset = offset.min(self.source.len() as u32);

        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };

        let line_start = self.line_starts[line_idx];
        let line = (line_idx + 1) as u32;
        let column = (offset - line_start + 1).max(1);

        (line, column)
    }

    /// Get the text of a specific line (1-indexed).
    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line == 0 {
            return None;
        }

        let idx = (line - 1) as usize;
        let start = *self.line_starts.get(idx)? as usize;
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&e| e as usize)
            .unwrap_or(self.source.len());

        let text = &self.source[start..end];
        Some(text.trim_end_matches('\n').trim_end_matches('\r'))
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn slice(&self, start: u32, end: u32) -> Option<&str> {
        let start = start as usize;
        let end = (end as usize).min(self.source.len());
        if start <= end {
            self.source.get(start..end)
        } else {
            None
        }
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    let mut starts = vec![0];
    for (i, c) in source.char_indices() {
        if c == '\n' {
            starts.push((i + 1) as u32);
        }
    }
    starts
}

/// Cache of compiled script sources.
///
/// Modules are indexed by script id. Classic scripts are only known by
/// resource name when they are compiled, so a name lookup succeeds only
/// while exactly one cached script carries that name. The cache holds at
/// most `capacity` scripts and evicts the oldest first.
#[derive(Debug)]
pub struct SourceCache {
    files: HashMap<u64, SourceFile>,
    /// Entry keys, oldest first
    order: VecDeque<u64>,
    by_id: HashMap<ScriptId, u64>,
    by_name: HashMap<String, Vec<u64>>,
    next_key: u64,
    capacity: usize,
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl SourceCache {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that keeps at most `capacity` scripts. Zero keeps none.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            files: HashMap::new(),
            order: VecDeque::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            next_key: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record the source of a compiled script.
    ///
    /// A known id is recorded once. Re-adding a source already cached under
    /// the same name is a no-op, so running one script repeatedly does not
    /// grow the cache.
    pub fn add_script(&mut self, id: ScriptId, name: impl Into<String>, source: impl Into<String>) {
        if self.capacity == 0 || (!id.is_unknown() && self.by_id.contains_key(&id)) {
            return;
        }
        let name = name.into();
        let source = source.into();

        if let Some(key) = self.find(&name, &source) {
            if !id.is_unknown() {
                if let Some(existing) = self.files.get_mut(&key) {
                    if existing.id.is_unknown() {
                        existing.id = id;
                    }
                }
                self.by_id.insert(id, key);
            }
            return;
        }

        while self.order.len() >= self.capacity {
            self.evict_oldest();
        }

        let key = self.next_key;
        self.next_key += 1;
        self.files.insert(key, SourceFile::new(id, name.clone(), source));
        self.order.push_back(key);
        self.by_name.entry(name).or_default().push(key);
        if !id.is_unknown() {
            self.by_id.insert(id, key);
        }
    }

    fn find(&self, name: &str, source: &str) -> Option<u64> {
        self.by_name
            .get(name)?
            .iter()
            .copied()
            .find(|key| self.files.get(key).is_some_and(|file| file.source == source))
    }

    fn evict_oldest(&mut self) {
        let Some(key) = self.order.pop_front() else {
            return;
        };
        let Some(file) = self.files.remove(&key) else {
            return;
        };
        self.by_id.retain(|_, k| *k != key);
        if let Some(keys) = self.by_name.get_mut(&file.name) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_name.remove(&file.name);
            }
        }
    }

    pub fn get(&self, id: ScriptId) -> Option<&SourceFile> {
        self.by_id.get(&id).and_then(|key| self.files.get(key))
    }

    /// Get the script with the given resource name, if exactly one cached
    /// script has it.
    pub fn get_by_name(&self, name: &str) -> Option<&SourceFile> {
        match self.by_name.get(name)?.as_slice() {
            [key] => self.files.get(key),
            _ => None,
        }
    }

    /// Look up by id, falling back to an unambiguous resource name.
    pub fn lookup(&self, id: ScriptId, name: &str) -> Option<&SourceFile> {
        self.get(id).or_else(|| self.get_by_name(name))
    }

    pub fn source(&self, id: ScriptId) -> Option<&str> {
        self.get(id).map(|f| f.source.as_str())
    }

    /// Resolve a span to a Location.
    pub fn location(&self, span: Span) -> Option<Location> {
        if span.is_dummy() {
            return None;
        }

        let file = self.get(span.script_id)?;
        let (line, column) = file.line_column(span.start);

        Some(Location {
            file: file.name.clone(),
            line,
            column,
        })
    }

    pub fn source_text(&self, span: Span) -> Option<&str> {
        if span.is_dummy() {
            return None;
        }
        self.get(span.script_id)?.slice(span.start, span.end)
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.order.clear();
        self.by_id.clear();
        self.by_name.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATH: &str = "\n\tfunction add(a, b) {\n\t\treturn a + b;\n\t}\n\n\tfunction addMore(a, b) {\n\t\treturn add(a, c);\n\t}";

    #[test]
    fn test_line_starts() {
        let starts = compute_line_starts("line1\nline2\nline3");
        assert_eq!(starts, vec![0, 6, 12]);
    }

    #[test]
    fn test_line_column() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId(1), "test.js", "hello\nworld\n");
        let file = cache.get(ScriptId(1)).unwrap();

        assert_eq!(file.line_column(0), (1, 1));
        assert_eq!(file.line_column(4), (1, 5));
        assert_eq!(file.line_column(6), (2, 1));
        assert_eq!(file.line_column(7), (2, 2));
    }

    #[test]
    fn test_line_text() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId(1), "test.js", "line one\nline two\r\nline three");
        let file = cache.get(ScriptId(1)).unwrap();

        assert_eq!(file.line_text(1), Some("line one"));
        assert_eq!(file.line_text(2), Some("line two"));
        assert_eq!(file.line_text(3), Some("line three"));
        assert_eq!(file.line_text(4), None);
        assert_eq!(file.line_text(0), None);
        assert_eq!(file.line_count(), 3);
    }

    #[test]
    fn test_exception_position_resolves_to_location() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId(7), "math.js", MATH);

        let span = Span::new(ScriptId(7), 85, 86);
        assert_eq!(cache.source_text(span), Some("c"));
        assert_eq!(cache.location(span), Some(Location::new("math.js", 7, 17)));
    }

    #[test]
    fn test_duplicate_ids_keep_first_source() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId(1), "a.js", "first");
        cache.add_script(ScriptId(1), "a.js", "second");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.source(ScriptId(1)), Some("first"));
        assert_eq!(cache.get_by_name("a.js").map(|f| f.id), Some(ScriptId(1)));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scripts_without_ids() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId::UNKNOWN, "main.js", "let a = 1;");
        cache.add_script(ScriptId::UNKNOWN, "main.js", "let a = 1;");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_name("main.js").unwrap().source, "let a = 1;");

        // A later id for the same source attaches to the existing entry
        cache.add_script(ScriptId(9), "main.js", "let a = 1;");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.source(ScriptId(9)), Some("let a = 1;"));
        assert!(cache.lookup(ScriptId(4), "other.js").is_none());
    }

    #[test]
    fn test_shared_name_is_ambiguous() {
        let mut cache = SourceCache::new();
        cache.add_script(ScriptId::UNKNOWN, "main.js", "let a = 1;");
        cache.add_script(ScriptId::UNKNOWN, "main.js", "let b = 2;");
        cache.add_script(ScriptId::UNKNOWN, "main.js", "let a = 1;");
        assert_eq!(cache.len(), 2);

        // Neither script can be picked by name alone
        assert!(cache.get_by_name("main.js").is_none());
        assert!(cache.lookup(ScriptId::UNKNOWN, "main.js").is_none());

        // An id still resolves exactly
        cache.add_script(ScriptId(3), "main.js", "let b = 2;");
        assert_eq!(cache.lookup(ScriptId(3), "main.js").unwrap().source, "let b = 2;");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = SourceCache::with_capacity(3);
        cache.add_script(ScriptId(1), "a.js", "a");
        cache.add_script(ScriptId::UNKNOWN, "b.js", "b");
        cache.add_script(ScriptId::UNKNOWN, "shared.js", "c");
        cache.add_script(ScriptId::UNKNOWN, "shared.js", "d");

        assert_eq!(cache.len(), 3);
        assert!(cache.get(ScriptId(1)).is_none());
        assert_eq!(cache.get_by_name("b.js").unwrap().source, "b");
        assert!(cache.get_by_name("shared.js").is_none());

        // Once the older script under the name is gone, the name is unambiguous again
        cache.add_script(ScriptId::UNKNOWN, "e.js", "e");
        cache.add_script(ScriptId::UNKNOWN, "f.js", "f");
        assert_eq!(cache.get_by_name("shared.js").unwrap().source, "d");
        assert!(cache.get_by_name("b.js").is_none());
    }

    #[test]
    fn test_many_distinct_snippets_stay_bounded() {
        let mut cache = SourceCache::new();
        for i in 0..10_000 {
            cache.add_script(ScriptId::UNKNOWN, "", format!("{} + 1", i));
        }
        assert_eq!(cache.len(), SourceCache::DEFAULT_CAPACITY);
        assert!(cache.get_by_name("").is_none());

        let mut none = SourceCache::with_capacity(0);
        none.add_script(ScriptId(1), "a.js", "a");
        assert!(none.is_empty());
    }
}
