//! ES modules and import resolution.
//!
//! A module goes Uninstantiated → Instantiated → Evaluated, or ends up
//! Errored. Instantiation resolves every import through a
//! [`ModuleResolver`]: the resolver is registered in the isolate's handle
//! table for the duration of the call and pushed as a frame on the
//! context, so a resolver that compiles or instantiates other modules
//! re-enters cleanly. Memoizing modules per specifier is the resolver's
//! choice; [`MapResolver`] can do it, [`NoopResolver`] resolves nothing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use anyhow::anyhow;
use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::isolate::{HostObject, IsolateRef};
use crate::lifetime::TrackedHandle;
use crate::script;
use crate::value::Value;

/// Entries per attribute in the engine's attribute arrays: key, value and
/// source offset.
const ATTRIBUTE_STRIDE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Uninstantiated,
    Instantiating,
    Instantiated,
    Evaluating,
    Evaluated,
    Errored,
}

impl From<v8::ModuleStatus> for ModuleStatus {
    fn from(status: v8::ModuleStatus) -> Self {
        match status {
            v8::ModuleStatus::Uninstantiated => Self::Uninstantiated,
            v8::ModuleStatus::Instantiating => Self::Instantiating,
            v8::ModuleStatus::Instantiated => Self::Instantiated,
            v8::ModuleStatus::Evaluating => Self::Evaluating,
            v8::ModuleStatus::Evaluated => Self::Evaluated,
            v8::ModuleStatus::Errored => Self::Errored,
        }
    }
}

/// The `with { ... }` attributes of an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportAttributes {
    entries: Vec<(String, String)>,
}

impl ImportAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_fixed_array(scope: &mut v8::HandleScope, array: v8::Local<v8::FixedArray>) -> Self {
        let mut entries = Vec::new();
        let mut index = 0;
        while index + 1 < array.length() {
            let key = fixed_array_string(scope, array, index);
            let value = fixed_array_string(scope, array, index + 1);
            if let (Some(key), Some(value)) = (key, value) {
                entries.push((key, value));
            }
            index += ATTRIBUTE_STRIDE;
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn fixed_array_string(
    scope: &mut v8::HandleScope,
    array: v8::Local<v8::FixedArray>,
    index: usize,
) -> Option<String> {
    let data = array.get(scope, index)?;
    let value = v8::Local::<v8::Value>::try_from(data).ok()?;
    Some(value.to_rust_string_lossy(scope))
}

/// One `import` of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub specifier: String,
    pub attributes: ImportAttributes,
}

/// A failed resolution, recorded while the engine unwinds instantiation.
#[derive(Debug, Clone)]
pub(crate) struct ResolveFailure {
    pub specifier: String,
    pub referrer: String,
    pub message: String,
}

impl From<ResolveFailure> for Error {
    fn from(failure: ResolveFailure) -> Self {
        Error::Resolution {
            specifier: failure.specifier,
            referrer: failure.referrer,
            message: failure.message,
        }
    }
}

/// Supplies the module for an import specifier.
pub trait ModuleResolver {
    fn resolve_module(
        &self,
        ctx: &Context,
        specifier: &str,
        attributes: &ImportAttributes,
        referrer: &Module,
    ) -> anyhow::Result<Module>;
}

impl<T: ModuleResolver + ?Sized> ModuleResolver for Rc<T> {
    fn resolve_module(
        &self,
        ctx: &Context,
        specifier: &str,
        attributes: &ImportAttributes,
        referrer: &Module,
    ) -> anyhow::Result<Module> {
        (**self).resolve_module(ctx, specifier, attributes, referrer)
    }
}

impl<T: ModuleResolver + ?Sized> ModuleResolver for Box<T> {
    fn resolve_module(
        &self,
        ctx: &Context,
        specifier: &str,
        attributes: &ImportAttributes,
        referrer: &Module,
    ) -> anyhow::Result<Module> {
        (**self).resolve_module(ctx, specifier, attributes, referrer)
    }
}

/// Adapts a closure to [`ModuleResolver`].
pub struct FnResolver<F>(pub F);

impl<F> ModuleResolver for FnResolver<F>
where
    F: Fn(&Context, &str, &ImportAttributes, &Module) -> anyhow::Result<Module>,
{
    fn resolve_module(
        &self,
        ctx: &Context,
        specifier: &str,
        attributes: &ImportAttributes,
        referrer: &Module,
    ) -> anyhow::Result<Module> {
        (self.0)(ctx, specifier, attributes, referrer)
    }
}

/// Resolves nothing; for modules without imports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl ModuleResolver for NoopResolver {
    fn resolve_module(
        &self,
        _ctx: &Context,
        _specifier: &str,
        _attributes: &ImportAttributes,
        _referrer: &Module,
    ) -> anyhow::Result<Module> {
        Err(anyhow!("module not found"))
    }
}

/// Resolves specifiers from an in-memory map of sources.
///
/// With caching enabled every specifier compiles once and later imports
/// share the module; pass the resolver behind an `Rc` to keep the cache
/// across instantiations.
#[derive(Default)]
pub struct MapResolver {
    sources: HashMap<String, String>,
    cache: Option<RefCell<HashMap<String, Module>>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn caching() -> Self {
        Self {
            sources: HashMap::new(),
            cache: Some(RefCell::new(HashMap::new())),
        }
    }

    pub fn with_module(mut self, specifier: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(specifier, source);
        self
    }

    pub fn insert(&mut self, specifier: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(specifier.into(), source.into());
    }

    /// Modules compiled so far, when caching.
    pub fn cached_count(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.borrow().len())
    }
}

impl ModuleResolver for MapResolver {
    fn resolve_module(
        &self,
        ctx: &Context,
        specifier: &str,
        _attributes: &ImportAttributes,
        _referrer: &Module,
    ) -> anyhow::Result<Module> {
        if let Some(cache) = &self.cache {
            if let Some(module) = cache.borrow().get(specifier) {
                return Ok(module.clone());
            }
        }
        let source = self
            .sources
            .get(specifier)
            .ok_or_else(|| anyhow!("module not found"))?;
        let module = Module::compile(ctx.isolate(), source, specifier)?;
        if let Some(cache) = &self.cache {
            cache
                .borrow_mut()
                .insert(specifier.to_string(), module.clone());
        }
        Ok(module)
    }
}

struct ModuleInner {
    isolate: IsolateRef,
    handle: Rc<TrackedHandle<v8::Module>>,
    origin: String,
    /// Context of the last instantiation, used to wrap namespace and
    /// exception values
    context: RefCell<Option<Context>>,
}

/// A compiled ES module. Cloning shares the module.
#[derive(Clone)]
pub struct Module {
    inner: Rc<ModuleInner>,
}

impl Module {
    /// Compile `source` as a module named `origin`.
    pub fn compile(isolate: &IsolateRef, source: &str, origin: &str) -> Result<Module> {
        let ctx = isolate.internal_context();
        ctx.with_scope(|scope| {
            let tc = &mut v8::TryCatch::new(scope);
            let code = exception::new_string(tc, source)?;
            let script_origin = script::origin(tc, origin, true)?;
            let mut source_text = v8::script_compiler::Source::new(code, Some(&script_origin));

            let Some(module) = v8::script_compiler::compile_module(tc, &mut source_text) else {
                isolate.record_source(-1, origin, source);
                return Err(exception::take(tc, &ctx));
            };
            if let Some(id) = module.script_id() {
                isolate.record_source(id, origin, source);
                isolate.record_module_origin(id, origin);
            }
            Ok(Module::from_local(isolate, tc, module, origin))
        })
    }

    fn from_local(
        isolate: &IsolateRef,
        scope: &mut v8::HandleScope<'_, ()>,
        module: v8::Local<v8::Module>,
        origin: &str,
    ) -> Module {
        let global = v8::Global::new(scope, module);
        Module {
            inner: Rc::new(ModuleInner {
                isolate: isolate.clone(),
                handle: TrackedHandle::new(&isolate.inner.lifetimes, global),
                origin: origin.to_string(),
                context: RefCell::new(None),
            }),
        }
    }

    pub fn isolate(&self) -> &IsolateRef {
        &self.inner.isolate
    }

    /// The name the module was compiled under.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    fn with_module<R>(
        &self,
        f: impl for<'s> FnOnce(&mut v8::HandleScope<'s, ()>, v8::Local<'s, v8::Module>) -> R,
    ) -> R {
        self.inner.isolate.with_raw_scope(|scope| {
            let module = self.inner.handle.local(scope);
            f(scope, module)
        })
    }

    /// Context used to wrap values read from the module.
    fn value_context(&self) -> Context {
        match self.inner.context.borrow().as_ref() {
            Some(ctx) if !ctx.is_closed() => ctx.clone(),
            _ => self.inner.isolate.internal_context(),
        }
    }

    pub fn status(&self) -> ModuleStatus {
        self.with_module(|_, module| module.get_status().into())
    }

    /// Link the module and its imports in `ctx`.
    ///
    /// A resolver failure is reported as [`Error::Resolution`] naming the
    /// specifier and the importing module; the module stays uninstantiated.
    pub fn instantiate(&self, ctx: &Context, resolver: impl ModuleResolver + 'static) -> Result<()> {
        check_same_isolate(&self.inner.isolate, ctx.isolate());
        let isolate = ctx.isolate();
        let token = isolate.register_host_object(HostObject::Resolver(Rc::new(resolver)));
        ctx.push_resolve_frame(token);

        let result = ctx.with_scope(|scope| {
            let module = self.inner.handle.local(scope);
            let tc = &mut v8::TryCatch::new(scope);
            match module.instantiate_module(tc, resolve_callback) {
                Some(true) => Ok(()),
                Some(false) => Err(Error::engine("module instantiation failed")),
                None => Err(exception::take(tc, ctx)),
            }
        });

        let frame = ctx.pop_resolve_frame();
        isolate.unregister_host_object(token);

        match frame.and_then(|frame| frame.failure) {
            Some(failure) => Err(failure.into()),
            None => {
                if result.is_ok() {
                    *self.inner.context.borrow_mut() = Some(ctx.clone());
                }
                result
            }
        }
    }

    /// Run the module. Returns the evaluation promise: with no top-level
    /// await it has settled on return, rejected if the module threw.
    pub fn evaluate(&self, ctx: &Context) -> Result<Value> {
        check_same_isolate(&self.inner.isolate, ctx.isolate());
        if self.status() == ModuleStatus::Uninstantiated {
            return Err(Error::engine("module must be instantiated before evaluation"));
        }
        ctx.with_scope(|scope| {
            let module = self.inner.handle.local(scope);
            let tc = &mut v8::TryCatch::new(scope);
            match module.evaluate(tc) {
                Some(result) => Ok(Value::from_local(ctx, tc, result)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }

    /// The exception the module failed with, once errored.
    pub fn exception(&self) -> Option<Value> {
        if self.status() != ModuleStatus::Errored {
            return None;
        }
        let ctx = self.value_context();
        ctx.with_scope(|scope| {
            let module = self.inner.handle.local(scope);
            let exception = module.get_exception();
            Some(Value::from_local(&ctx, scope, exception))
        })
    }

    /// The module namespace object; available once instantiated.
    pub fn namespace(&self) -> Result<Value> {
        match self.status() {
            ModuleStatus::Uninstantiated | ModuleStatus::Instantiating => {
                return Err(Error::engine("module namespace requires an instantiated module"))
            }
            _ => {}
        }
        let ctx = self.value_context();
        ctx.with_scope(|scope| {
            let module = self.inner.handle.local(scope);
            let namespace = module.get_module_namespace();
            Ok(Value::from_local(&ctx, scope, namespace))
        })
    }

    pub fn identity_hash(&self) -> i32 {
        self.with_module(|_, module| module.get_identity_hash().get())
    }

    pub fn script_id(&self) -> Option<i32> {
        self.with_module(|_, module| module.script_id())
    }

    /// Whether both handles refer to the same engine module.
    pub fn same_module(&self, other: &Module) -> bool {
        self.with_module(|scope, module| module == other.inner.handle.local(scope))
    }

    /// The module's imports, in source order.
    pub fn requests(&self) -> Vec<ModuleRequest> {
        let ctx = self.inner.isolate.internal_context();
        ctx.with_scope(|scope| {
            let module = self.inner.handle.local(scope);
            let requests = module.get_module_requests();
            let mut out = Vec::with_capacity(requests.length());
            for index in 0..requests.length() {
                let Some(data) = requests.get(scope, index) else {
                    continue;
                };
                let Ok(request) = v8::Local::<v8::ModuleRequest>::try_from(data) else {
                    continue;
                };
                let specifier = request.get_specifier().to_rust_string_lossy(scope);
                let attributes = ImportAttributes::from_fixed_array(scope, request.get_import_attributes());
                out.push(ModuleRequest {
                    specifier,
                    attributes,
                });
            }
            out
        })
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("origin", &self.inner.origin)
            .field("isolate", &self.inner.isolate.id())
            .finish()
    }
}

fn check_same_isolate(a: &IsolateRef, b: &IsolateRef) {
    if !a.same_isolate(b) {
        panic!("module and context must belong to the same isolate");
    }
}

fn resolve_callback<'s>(
    context: v8::Local<'s, v8::Context>,
    specifier: v8::Local<'s, v8::String>,
    import_attributes: v8::Local<'s, v8::FixedArray>,
    referrer: v8::Local<'s, v8::Module>,
) -> Option<v8::Local<'s, v8::Module>> {
    // SAFETY: called by the engine during instantiation with `context`
    // entered.
    let scope = &mut unsafe { v8::CallbackScope::new(context) };
    let isolate = IsolateRef::from_native(scope)?;
    let ctx = isolate.context_for(scope, context)?;
    let specifier = specifier.to_rust_string_lossy(scope);

    let referrer_origin = referrer
        .script_id()
        .and_then(|id| isolate.module_origin(id))
        .unwrap_or_default();

    let resolver = match ctx.current_resolver().map(|token| isolate.host_object(token)) {
        Some(Ok(HostObject::Resolver(resolver))) => resolver,
        _ => {
            log::error!(
                "context {}: import '{}' resolved without an active resolver",
                ctx.id(),
                specifier
            );
            std::process::abort();
        }
    };

    let attributes = ImportAttributes::from_fixed_array(scope, import_attributes);
    let referrer = Module::from_local(&isolate, scope, referrer, &referrer_origin);

    let resolved = panic::catch_unwind(AssertUnwindSafe(|| {
        resolver.resolve_module(&ctx, &specifier, &attributes, &referrer)
    }));
    let failure = match resolved {
        Ok(Ok(module)) if module.isolate().same_isolate(&isolate) => {
            return Some(module.inner.handle.local(scope));
        }
        Ok(Ok(_)) => "resolver returned a module from another isolate".to_string(),
        Ok(Err(err)) => format!("{:#}", err),
        Err(_) => "resolver panicked".to_string(),
    };

    log::debug!(
        "context {}: cannot resolve '{}' from '{}': {}",
        ctx.id(),
        specifier,
        referrer_origin,
        failure
    );
    let text = format!("cannot resolve module '{}': {}", specifier, failure);
    if let Some(text) = v8::String::new(scope, &text) {
        let exception = v8::Exception::error(scope, text);
        scope.throw_exception(exception);
    }
    ctx.record_resolve_failure(ResolveFailure {
        specifier,
        referrer: referrer_origin,
        message: failure,
    });
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::FunctionCallbackInfo;
    use crate::promise::PromiseState;
    use crate::template::{FunctionTemplate, ObjectTemplate, PropertyAttribute};
    use crate::Isolate;

    fn print_context(iso: &Isolate) -> (Context, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = lines.clone();
        let print = FunctionTemplate::new(iso, move |info: &FunctionCallbackInfo| {
            sink.borrow_mut().push(info.arg(0).to_string());
            Ok(None)
        });
        let global = ObjectTemplate::new(iso);
        global.set("print", &print, PropertyAttribute::NONE).unwrap();
        (Context::with_global_template(iso, &global), lines)
    }

    #[test]
    fn test_default_export() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let module = Module::compile(&iso, "export default 1 + 1;", "default.mjs").unwrap();
        assert_eq!(module.status(), ModuleStatus::Uninstantiated);

        module.instantiate(&ctx, NoopResolver).unwrap();
        assert_eq!(module.status(), ModuleStatus::Instantiated);

        let result = module.evaluate(&ctx).unwrap();
        let promise = result.as_promise().unwrap();
        assert_eq!(promise.state(), PromiseState::Fulfilled);
        assert_eq!(module.status(), ModuleStatus::Evaluated);

        let namespace = module.namespace().unwrap();
        assert!(namespace.is_module_namespace_object());
        assert_eq!(namespace.as_object().unwrap().get("default").unwrap().int32(), 2);
        assert!(module.script_id().is_some());
    }

    #[test]
    fn test_missing_module() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let module = Module::compile(
            &iso,
            "import foo from 'non-existing-module';",
            "main.mjs",
        )
        .unwrap();
        let callbacks = iso.registered_callback_count();

        let err = module.instantiate(&ctx, NoopResolver).unwrap_err();
        match &err {
            Error::Resolution {
                specifier,
                referrer,
                ..
            } => {
                assert_eq!(specifier, "non-existing-module");
                assert_eq!(referrer, "main.mjs");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "cannot resolve module 'non-existing-module' imported from 'main.mjs': module not found"
        );
        assert_ne!(module.status(), ModuleStatus::Instantiated);
        assert!(module.evaluate(&ctx).is_err());
        // The resolver is unregistered once instantiation returns
        assert_eq!(iso.registered_callback_count(), callbacks);
    }

    #[test]
    fn test_nested_imports() {
        let iso = Isolate::new();
        let (ctx, lines) = print_context(&iso);
        let module = Module::compile(
            &iso,
            "import foo from 'a';\nprint(1 + foo.a + foo.b);",
            "main.mjs",
        )
        .unwrap();
        let resolver = MapResolver::new()
            .with_module("a", "import b from 'b'; export default { a: 2, b };")
            .with_module("b", "export default 3");

        module.instantiate(&ctx, resolver).unwrap();
        let result = module.evaluate(&ctx).unwrap();
        assert_eq!(result.as_promise().unwrap().state(), PromiseState::Fulfilled);
        assert_eq!(*lines.borrow(), vec!["6"]);
    }

    #[test]
    fn test_caching_resolver_shares_modules() {
        let iso = Isolate::new();
        let (ctx, lines) = print_context(&iso);
        let resolver = Rc::new(
            MapResolver::caching()
                .with_module(
                    "./c.js",
                    "let val = 0; export const inc = () => { val++; return val; };",
                )
                .with_module(
                    "./a.js",
                    "import { inc } from './c.js' with { key: 'data' }; export default inc();",
                )
                .with_module("./b.js", "import { inc } from './c.js'; export default inc();"),
        );
        let module = Module::compile(
            &iso,
            "import a from './a.js';\nimport b from './b.js';\nexport const result = a + b;\nprint(a + b);",
            "https://example.com/root.js",
        )
        .unwrap();

        module.instantiate(&ctx, resolver.clone()).unwrap();
        module.evaluate(&ctx).unwrap();
        assert_eq!(*lines.borrow(), vec!["3"]);
        assert_eq!(resolver.cached_count(), 3);

        let namespace = module.namespace().unwrap().as_object().unwrap();
        assert_eq!(namespace.get("result").unwrap().int32(), 3);
    }

    #[test]
    fn test_fresh_modules_per_import() {
        let iso = Isolate::new();
        let (ctx, lines) = print_context(&iso);
        let resolver = MapResolver::new()
            .with_module(
                "./c.js",
                "let val = 0; export const inc = () => { val++; return val; };",
            )
            .with_module("./a.js", "import { inc } from './c.js'; export default inc();")
            .with_module("./b.js", "import { inc } from './c.js'; export default inc();");
        let module = Module::compile(
            &iso,
            "import a from './a.js';\nimport b from './b.js';\nprint(a + b);",
            "root.js",
        )
        .unwrap();

        module.instantiate(&ctx, resolver).unwrap();
        module.evaluate(&ctx).unwrap();
        // Each import got its own counter
        assert_eq!(*lines.borrow(), vec!["2"]);
    }

    #[test]
    fn test_resolver_sees_attributes_and_referrer() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let resolver = FnResolver(
            move |ctx: &Context, specifier: &str, attributes: &ImportAttributes, referrer: &Module| {
                sink.borrow_mut().push((
                    specifier.to_string(),
                    attributes.get("type").map(str::to_string),
                    referrer.origin().to_string(),
                ));
                Module::compile(ctx.isolate(), "export default 'leaf';", specifier)
                    .map_err(anyhow::Error::from)
            },
        );
        let module = Module::compile(
            &iso,
            "import a from './a.js' with { type: 'text' };\nimport b from './b.js';\nexport default a + b;",
            "root.js",
        )
        .unwrap();

        let requests = module.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].specifier, "./a.js");
        assert_eq!(requests[0].attributes.get("type"), Some("text"));
        assert!(requests[1].attributes.is_empty());

        module.instantiate(&ctx, resolver).unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&("./a.js".into(), Some("text".into()), "root.js".into())));
        assert!(seen.contains(&("./b.js".into(), None, "root.js".into())));
    }

    #[test]
    fn test_evaluation_failure_rejects() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let module = Module::compile(&iso, "throw new Error('eval failed');", "throws.mjs").unwrap();
        module.instantiate(&ctx, NoopResolver).unwrap();

        let result = module.evaluate(&ctx).unwrap();
        let promise = result.as_promise().unwrap();
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert_eq!(module.status(), ModuleStatus::Errored);
        assert_eq!(
            module.exception().unwrap().to_string(),
            "Error: eval failed"
        );
    }

    #[test]
    fn test_compile_error() {
        let iso = Isolate::new();
        let err = Module::compile(&iso, "export default ;", "bad.mjs").unwrap_err();
        let script_err = err.as_script_error().unwrap();
        assert_eq!(script_err.kind(), Some("SyntaxError"));
        assert_eq!(script_err.location.as_ref().unwrap().file, "bad.mjs");
    }

    #[test]
    fn test_identity() {
        let iso = Isolate::new();
        let module = Module::compile(&iso, "export const x = 1;", "x.mjs").unwrap();
        let clone = module.clone();
        let other = Module::compile(&iso, "export const x = 1;", "x.mjs").unwrap();

        assert!(module.same_module(&clone));
        assert!(!module.same_module(&other));
        assert_eq!(module.identity_hash(), clone.identity_hash());
        assert!(module.namespace().is_err());
    }

    #[test]
    fn test_attribute_lookup() {
        let attributes = ImportAttributes {
            entries: vec![("type".into(), "json".into())],
        };
        assert_eq!(attributes.get("type"), Some("json"));
        assert_eq!(attributes.get("mode"), None);
        assert_eq!(attributes.iter().count(), 1);
        assert!(ImportAttributes::new().is_empty());
    }
}
