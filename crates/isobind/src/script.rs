//! Script origins, unbound scripts and the code cache.

use std::rc::Rc;

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::isolate::IsolateRef;
use crate::lifetime::TrackedHandle;
use crate::value::Value;

pub(crate) fn origin<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    name: &str,
    is_module: bool,
) -> Result<v8::ScriptOrigin<'s>> {
    let name = exception::new_string(scope, name)?;
    Ok(v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        0,
        None,
        false,
        false,
        is_module,
        None,
    ))
}

/// Bytes produced by [`UnboundScript::create_code_cache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerCachedData {
    pub bytes: Vec<u8>,
    /// Set when the engine refused the data while compiling
    pub rejected: bool,
}

impl CompilerCachedData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            rejected: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Consume a previously created code cache instead of compiling
    pub cached_data: Option<CompilerCachedData>,
    /// Compile every function eagerly. Ignored when `cached_data` is set.
    pub eager: bool,
}

impl CompileOptions {
    pub fn with_cached_data(cached_data: CompilerCachedData) -> Self {
        Self {
            cached_data: Some(cached_data),
            eager: false,
        }
    }

    pub fn eager() -> Self {
        Self {
            cached_data: None,
            eager: true,
        }
    }
}

/// A compiled script that is not bound to any context and can run in
/// several.
pub struct UnboundScript {
    isolate: IsolateRef,
    handle: Rc<TrackedHandle<v8::UnboundScript>>,
    origin: String,
    cache_rejected: bool,
}

impl UnboundScript {
    pub(crate) fn compile(
        isolate: &IsolateRef,
        source: &str,
        origin: &str,
        options: CompileOptions,
    ) -> Result<UnboundScript> {
        let ctx = isolate.internal_context();
        let (handle, cache_rejected) = ctx.with_scope(|scope| {
            let tc = &mut v8::TryCatch::new(scope);
            let code = exception::new_string(tc, source)?;
            let script_origin = self::origin(tc, origin, false)?;
            isolate.record_source(-1, origin, source);

            let (mut source, mode) = match &options.cached_data {
                Some(cached) => (
                    v8::script_compiler::Source::new_with_cached_data(
                        code,
                        Some(&script_origin),
                        v8::script_compiler::CachedData::new(&cached.bytes),
                    ),
                    v8::script_compiler::CompileOptions::ConsumeCodeCache,
                ),
                None => (
                    v8::script_compiler::Source::new(code, Some(&script_origin)),
                    if options.eager {
                        v8::script_compiler::CompileOptions::EagerCompile
                    } else {
                        v8::script_compiler::CompileOptions::NoCompileOptions
                    },
                ),
            };

            let script = v8::script_compiler::compile_unbound_script(
                tc,
                &mut source,
                mode,
                v8::script_compiler::NoCacheReason::NoReason,
            );
            let Some(script) = script else {
                return Err(exception::take(tc, &ctx));
            };
            let rejected = source
                .get_cached_data()
                .map(|cached| cached.rejected())
                .unwrap_or(false);
            let global = v8::Global::new(tc, script);
            Ok((TrackedHandle::new(&isolate.inner.lifetimes, global), rejected))
        })?;

        if cache_rejected {
            log::debug!("isolate {}: code cache for '{}' rejected", isolate.id(), origin);
        }
        Ok(UnboundScript {
            isolate: isolate.clone(),
            handle,
            origin: origin.to_string(),
            cache_rejected,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Whether the engine refused the code cache passed at compile time.
    pub fn cache_rejected(&self) -> bool {
        self.cache_rejected
    }

    /// Bind the script to `ctx` and run it.
    pub fn run(&self, ctx: &Context) -> Result<Value> {
        if !self.isolate.same_isolate(ctx.isolate()) {
            panic!("script and context must belong to the same isolate");
        }
        ctx.with_scope(|scope| {
            let unbound = self.handle.local(scope);
            let tc = &mut v8::TryCatch::new(scope);
            let script = unbound.bind_to_current_context(tc);
            match script.run(tc) {
                Some(result) => Ok(Value::from_local(ctx, tc, result)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }

    /// Serialize the compiled code so a later compile can skip parsing.
    pub fn create_code_cache(&self) -> Result<CompilerCachedData> {
        self.isolate.with_raw_scope(|scope| {
            let cache = self
                .handle
                .local(scope)
                .create_code_cache()
                .ok_or_else(|| Error::engine("code cache could not be created"))?;
            Ok(CompilerCachedData::new(cache.to_vec()))
        })
    }
}

impl std::fmt::Debug for UnboundScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnboundScript")
            .field("origin", &self.origin)
            .field("isolate", &self.isolate.id())
            .finish()
    }
}
