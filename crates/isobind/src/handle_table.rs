//! Token registry for host objects referenced from the engine.
//!
//! The engine cannot hold Rust references, so callback closures, module
//! resolvers and listeners are stored here and the engine is handed an
//! integer token instead (stored in function data, looked up again by the
//! callback bridge).
//!
//! Tokens come from a single process-wide counter and are never reused, so
//! a stale token can only miss, never resolve to a different object. Each
//! isolate owns one table and clears it when it is disposed.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{Error, Result};

/// Next token (0 is reserved for invalid)
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a registered host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    /// Never handed out by a table.
    pub const INVALID: Token = Token(0);

    fn next() -> Self {
        Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rebuild a token from the raw value stored on the engine side.
    pub(crate) fn from_raw(raw: u64) -> Self {
        Token(raw)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sharded read-write map from tokens to host objects.
///
/// Lookups take a shard read lock and clone the entry out, so a callback
/// that re-enters the table (registering a new function from inside a
/// function) never waits on itself.
pub struct HandleTable<T> {
    entries: DashMap<Token, T>,
}

impl<T: Clone> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register an object and get a token for it.
    pub fn register(&self, value: T) -> Token {
        let token = Token::next();
        self.entries.insert(token, value);
        token
    }

    /// Look up a registered object.
    pub fn resolve(&self, token: Token) -> Result<T> {
        self.entries
            .get(&token)
            .map(|entry| entry.value().clone())
            .ok_or(Error::HandleNotFound(token))
    }

    /// Remove a token, returning the object it referenced.
    pub fn unregister(&self, token: Token) -> Option<T> {
        self.entries.remove(&token).map(|(_, value)| value)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning how many were removed.
    ///
    /// Entries are removed one at a time and dropped outside the shard
    /// locks, so a destructor may touch the table again.
    pub fn clear(&self) -> usize {
        let tokens: Vec<Token> = self.entries.iter().map(|entry| *entry.key()).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.unregister(token))
            .count()
    }
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
