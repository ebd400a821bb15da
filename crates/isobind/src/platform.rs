//! Process-wide V8 platform.

use deno_core::v8;
use once_cell::sync::OnceCell;

/// V8 needs exactly one platform, initialized before the first isolate.
static PLATFORM: OnceCell<v8::SharedRef<v8::Platform>> = OnceCell::new();

/// Initialize the engine. Called implicitly by the first isolate; safe to
/// call any number of times.
pub fn init() {
    PLATFORM.get_or_init(|| {
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();
        log::debug!("V8 {} initialized", v8::V8::get_version());
        platform
    });
}

pub fn is_initialized() -> bool {
    PLATFORM.get().is_some()
}

/// Version string of the linked engine.
pub fn engine_version() -> &'static str {
    v8::V8::get_version()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        assert!(is_initialized());
        init();
        assert!(is_initialized());
        assert!(!engine_version().is_empty());
    }
}
