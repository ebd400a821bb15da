//! Isolate configuration.
//!
//! Everything here is consumed when the isolate is created; changing a
//! config afterwards has no effect on the running isolate.

use std::path::Path;

use anyhow::Context as _;
use deno_core::v8;
use isobind_diagnostics::SourceCache;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Heap and stack limits for a new isolate.
///
/// Zero means "engine default" for every field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConstraints {
    initial_old_generation_size_in_bytes: u64,
    max_old_generation_size_in_bytes: u64,
    initial_young_generation_size_in_bytes: u64,
    max_young_generation_size_in_bytes: u64,
    stack_limit: usize,
    code_range_size_in_bytes: u64,
}

impl ResourceConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a total heap budget between the generations the way the
    /// engine sizes its young generation (one eighth, capped at 16 MiB per
    /// semi-space pair).
    pub fn configure_defaults_from_heap_size(&mut self, initial: u64, maximum: u64) {
        const MAX_YOUNG: u64 = 3 * 16 * 1024 * 1024;

        let young = |total: u64| (total / 8).min(MAX_YOUNG);
        self.initial_young_generation_size_in_bytes = young(initial);
        self.initial_old_generation_size_in_bytes =
            initial - self.initial_young_generation_size_in_bytes;
        self.max_young_generation_size_in_bytes = young(maximum);
        self.max_old_generation_size_in_bytes = maximum - self.max_young_generation_size_in_bytes;
    }

    pub fn set_initial_old_generation_size_in_bytes(&mut self, size: u64) -> &mut Self {
        self.initial_old_generation_size_in_bytes = size;
        self
    }

    pub fn initial_old_generation_size_in_bytes(&self) -> u64 {
        self.initial_old_generation_size_in_bytes
    }

    pub fn set_max_old_generation_size_in_bytes(&mut self, size: u64) -> &mut Self {
        self.max_old_generation_size_in_bytes = size;
        self
    }

    pub fn max_old_generation_size_in_bytes(&self) -> u64 {
        self.max_old_generation_size_in_bytes
    }

    pub fn set_initial_young_generation_size_in_bytes(&mut self, size: u64) -> &mut Self {
        self.initial_young_generation_size_in_bytes = size;
        self
    }

    pub fn initial_young_generation_size_in_bytes(&self) -> u64 {
        self.initial_young_generation_size_in_bytes
    }

    pub fn set_max_young_generation_size_in_bytes(&mut self, size: u64) -> &mut Self {
        self.max_young_generation_size_in_bytes = size;
        self
    }

    pub fn max_young_generation_size_in_bytes(&self) -> u64 {
        self.max_young_generation_size_in_bytes
    }

    /// Not supported by the engine build isobind links against. A non-zero
    /// value fails [`IsolateConfig::validate`] and is ignored with a warning
    /// by [`Isolate::with_config`](crate::Isolate::with_config).
    pub fn set_stack_limit(&mut self, limit: usize) -> &mut Self {
        self.stack_limit = limit;
        self
    }

    pub fn stack_limit(&self) -> usize {
        self.stack_limit
    }

    /// Not supported by the engine build either; see
    /// [`set_stack_limit`](Self::set_stack_limit).
    pub fn set_code_range_size_in_bytes(&mut self, size: u64) -> &mut Self {
        self.code_range_size_in_bytes = size;
        self
    }

    pub fn code_range_size_in_bytes(&self) -> u64 {
        self.code_range_size_in_bytes
    }

    /// Reject limits the engine cannot apply.
    pub fn validate(&self) -> Result<()> {
        if self.stack_limit != 0 {
            return Err(Error::Config(
                "stack_limit is not supported by this engine build".into(),
            ));
        }
        if self.code_range_size_in_bytes != 0 {
            return Err(Error::Config(
                "code_range_size_in_bytes is not supported by this engine build".into(),
            ));
        }
        Ok(())
    }

    /// Total `(initial, maximum)` heap budget, if any limit was set.
    pub fn heap_limits(&self) -> Option<(usize, usize)> {
        let initial =
            self.initial_old_generation_size_in_bytes + self.initial_young_generation_size_in_bytes;
        let maximum =
            self.max_old_generation_size_in_bytes + self.max_young_generation_size_in_bytes;
        if maximum == 0 {
            return None;
        }
        Some((initial.min(maximum) as usize, maximum as usize))
    }

    /// Build the engine's creation parameters.
    pub(crate) fn create_params(&self) -> v8::CreateParams {
        let params = v8::CreateParams::default();
        if self.stack_limit != 0 {
            log::warn!("stack limit constraint is not supported by this engine build; ignoring");
        }
        if self.code_range_size_in_bytes != 0 {
            log::warn!("code range constraint is not supported by this engine build; ignoring");
        }
        match self.heap_limits() {
            Some((initial, maximum)) => {
                log::debug!("isolate heap limits: initial={} max={}", initial, maximum);
                params.heap_limits(initial, maximum)
            }
            None => params,
        }
    }
}

/// Options for [`Isolate::with_config`](crate::Isolate::with_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolateConfig {
    pub constraints: ResourceConstraints,
    /// Frames captured for uncaught exceptions
    pub stack_trace_limit: i32,
    /// Route the engine console of every new context to the console
    /// listener
    pub install_console: bool,
    /// Keep compiled sources so stack frames can report them
    pub cache_script_sources: bool,
    /// Most sources kept at once; the oldest are dropped first
    pub source_cache_capacity: usize,
    /// Terminate execution instead of crashing when the heap limit is near
    pub terminate_on_heap_limit: bool,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            constraints: ResourceConstraints::default(),
            stack_trace_limit: 10,
            install_console: true,
            cache_script_sources: true,
            source_cache_capacity: SourceCache::DEFAULT_CAPACITY,
            terminate_on_heap_limit: true,
        }
    }
}

impl IsolateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. `.json` files are read as JSON, anything else
    /// as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read isolate config {}", path.display()))?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config = if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_toml_str(&source)
        };
        config.with_context(|| format!("failed to load isolate config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.constraints.validate()
    }

    pub fn with_constraints(mut self, constraints: ResourceConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_stack_trace_limit(mut self, limit: i32) -> Self {
        self.stack_trace_limit = limit;
        self
    }

    pub fn with_console(mut self, install: bool) -> Self {
        self.install_console = install;
        self
    }

    pub fn with_source_cache(mut self, enabled: bool) -> Self {
        self.cache_script_sources = enabled;
        self
    }

    pub fn with_source_cache_capacity(mut self, capacity: usize) -> Self {
        self.source_cache_capacity = capacity;
        self
    }

    pub fn with_heap_limit_termination(mut self, enabled: bool) -> Self {
        self.terminate_on_heap_limit = enabled;
        self
    }
}
