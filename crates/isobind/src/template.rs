//! Function and object templates.
//!
//! A [`FunctionTemplate`] registers its closure in the isolate's handle
//! table and stores only the token in the native template. The closure
//! stays registered until the isolate is disposed, because functions
//! created from the template can outlive the template itself.

use std::cell::Cell;
use std::ops::BitOr;
use std::rc::Rc;

use deno_core::v8;

use crate::callback::{self, CallbackResult, FunctionCallbackInfo};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::function::Function;
use crate::handle_table::Token;
use crate::isolate::{HostObject, IsolateRef};
use crate::lifetime::TrackedHandle;
use crate::object::Object;

/// Attributes of a property set on a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyAttribute(u32);

impl PropertyAttribute {
    pub const NONE: Self = Self(0);
    pub const READ_ONLY: Self = Self(1);
    pub const DONT_ENUM: Self = Self(1 << 1);
    pub const DONT_DELETE: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn to_native(self) -> v8::PropertyAttribute {
        let mut attr = v8::PropertyAttribute::NONE;
        if self.contains(Self::READ_ONLY) {
            attr = attr | v8::PropertyAttribute::READ_ONLY;
        }
        if self.contains(Self::DONT_ENUM) {
            attr = attr | v8::PropertyAttribute::DONT_ENUM;
        }
        if self.contains(Self::DONT_DELETE) {
            attr = attr | v8::PropertyAttribute::DONT_DELETE;
        }
        attr
    }
}

impl BitOr for PropertyAttribute {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What a template property can hold: a primitive or another template.
#[derive(Clone)]
pub enum TemplateValue {
    Undefined,
    Null,
    Bool(bool),
    Integer(i32),
    Number(f64),
    BigInt(i64),
    String(String),
    Function(FunctionTemplate),
    Object(ObjectTemplate),
}

impl TemplateValue {
    fn local<'s>(&self, scope: &mut v8::HandleScope<'s, ()>) -> Result<v8::Local<'s, v8::Data>> {
        let data: v8::Local<v8::Data> = match self {
            TemplateValue::Undefined => v8::undefined(scope).into(),
            TemplateValue::Null => v8::null(scope).into(),
            TemplateValue::Bool(b) => v8::Boolean::new(scope, *b).into(),
            TemplateValue::Integer(n) => v8::Integer::new(scope, *n).into(),
            TemplateValue::Number(n) => v8::Number::new(scope, *n).into(),
            TemplateValue::BigInt(n) => v8::BigInt::new_from_i64(scope, *n).into(),
            TemplateValue::String(s) => exception::new_string(scope, s)?.into(),
            TemplateValue::Function(t) => t.inner.handle.local(scope).into(),
            TemplateValue::Object(t) => t.handle.local(scope).into(),
        };
        Ok(data)
    }

    fn isolate(&self) -> Option<&IsolateRef> {
        match self {
            TemplateValue::Function(t) => Some(&t.inner.isolate),
            TemplateValue::Object(t) => Some(&t.isolate),
            _ => None,
        }
    }
}

macro_rules! template_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TemplateValue {
                fn from(value: $ty) -> Self {
                    TemplateValue::$variant(value.into())
                }
            }
        )*
    };
}

template_value_from! {
    bool => Bool,
    i32 => Integer,
    f64 => Number,
    u32 => Number,
    i64 => BigInt,
    &str => String,
    String => String,
    FunctionTemplate => Function,
    ObjectTemplate => Object,
}

impl From<&FunctionTemplate> for TemplateValue {
    fn from(template: &FunctionTemplate) -> Self {
        TemplateValue::Function(template.clone())
    }
}

impl From<&ObjectTemplate> for TemplateValue {
    fn from(template: &ObjectTemplate) -> Self {
        TemplateValue::Object(template.clone())
    }
}

struct FunctionTemplateInner {
    isolate: IsolateRef,
    handle: Rc<TrackedHandle<v8::FunctionTemplate>>,
    token: Token,
    instantiated: Cell<bool>,
}

/// A blueprint for host functions.
///
/// Cloning shares the template.
#[derive(Clone)]
pub struct FunctionTemplate {
    inner: Rc<FunctionTemplateInner>,
}

impl FunctionTemplate {
    /// Create a template whose functions call `callback`.
    pub fn new<F>(isolate: &IsolateRef, callback: F) -> Self
    where
        F: Fn(&FunctionCallbackInfo) -> CallbackResult + 'static,
    {
        let token = isolate.register_host_object(HostObject::Function(Rc::new(callback)));
        let handle = isolate.with_raw_scope(|scope| {
            let data = v8::BigInt::new_from_u64(scope, token.as_u64());
            let template = v8::FunctionTemplate::builder(callback::function_trampoline)
                .data(data.into())
                .build(scope);
            let global = v8::Global::new(scope, template);
            TrackedHandle::new(&isolate.inner.lifetimes, global)
        });

        FunctionTemplate {
            inner: Rc::new(FunctionTemplateInner {
                isolate: isolate.clone(),
                handle,
                token,
                instantiated: Cell::new(false),
            }),
        }
    }

    pub fn isolate(&self) -> &IsolateRef {
        &self.inner.isolate
    }

    /// Token of the registered callback.
    pub fn token(&self) -> Token {
        self.inner.token
    }

    /// The function for this template in `ctx`. The engine returns the same
    /// function for repeated calls in one context.
    ///
    /// The template can no longer be modified afterwards.
    pub fn get_function(&self, ctx: &Context) -> Result<Function> {
        check_same_isolate(&self.inner.isolate, ctx.isolate());
        self.inner.instantiated.set(true);
        ctx.with_scope(|scope| {
            let template = self.inner.handle.local(scope);
            let function = template
                .get_function(scope)
                .ok_or_else(|| Error::engine("function could not be instantiated"))?;
            Ok(Function::from_local(ctx, scope, function))
        })
    }

    /// Template for objects created by calling the function with `new`.
    pub fn instance_template(&self) -> ObjectTemplate {
        let isolate = &self.inner.isolate;
        isolate.with_raw_scope(|scope| {
            let template = self.inner.handle.local(scope).instance_template(scope);
            ObjectTemplate::from_local(isolate, scope, template)
        })
    }

    /// Template for the function's `prototype` object.
    pub fn prototype_template(&self) -> ObjectTemplate {
        let isolate = &self.inner.isolate;
        isolate.with_raw_scope(|scope| {
            let template = self.inner.handle.local(scope).prototype_template(scope);
            ObjectTemplate::from_local(isolate, scope, template)
        })
    }

    /// Make instances inherit from `parent`'s prototype.
    pub fn inherit(&self, parent: &FunctionTemplate) {
        self.assert_mutable();
        check_same_isolate(&self.inner.isolate, &parent.inner.isolate);
        self.inner.isolate.with_raw_scope(|scope| {
            let template = self.inner.handle.local(scope);
            let parent = parent.inner.handle.local(scope);
            template.inherit(parent);
        });
    }

    pub fn set_class_name(&self, name: &str) -> Result<()> {
        self.assert_mutable();
        self.inner.isolate.with_raw_scope(|scope| {
            let name = exception::new_string(scope, name)?;
            self.inner.handle.local(scope).set_class_name(name);
            Ok(())
        })
    }

    /// Set a property on every function created from this template.
    pub fn set(
        &self,
        name: &str,
        value: impl Into<TemplateValue>,
        attributes: PropertyAttribute,
    ) -> Result<()> {
        self.assert_mutable();
        let value = value.into();
        let isolate = &self.inner.isolate;
        isolate.with_raw_scope(|scope| {
            let template = self.inner.handle.local(scope);
            set_property(isolate, scope, &template, name, &value, attributes)
        })
    }

    fn assert_mutable(&self) {
        if self.inner.instantiated.get() {
            panic!("function template cannot be modified after get_function");
        }
    }
}

impl std::fmt::Debug for FunctionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTemplate")
            .field("token", &self.inner.token)
            .field("isolate", &self.inner.isolate.id())
            .finish()
    }
}

/// A blueprint for objects, also used for the global object of a context.
#[derive(Clone)]
pub struct ObjectTemplate {
    isolate: IsolateRef,
    handle: Rc<TrackedHandle<v8::ObjectTemplate>>,
}

impl ObjectTemplate {
    pub fn new(isolate: &IsolateRef) -> Self {
        isolate.with_raw_scope(|scope| {
            let template = v8::ObjectTemplate::new(scope);
            ObjectTemplate::from_local(isolate, scope, template)
        })
    }

    fn from_local(
        isolate: &IsolateRef,
        scope: &mut v8::HandleScope<'_, ()>,
        template: v8::Local<v8::ObjectTemplate>,
    ) -> Self {
        let global = v8::Global::new(scope, template);
        ObjectTemplate {
            isolate: isolate.clone(),
            handle: TrackedHandle::new(&isolate.inner.lifetimes, global),
        }
    }

    pub(crate) fn local<'s>(
        &self,
        scope: &mut v8::HandleScope<'s, ()>,
    ) -> v8::Local<'s, v8::ObjectTemplate> {
        self.handle.local(scope)
    }

    pub fn isolate(&self) -> &IsolateRef {
        &self.isolate
    }

    /// Set a property on every object created from this template.
    pub fn set(
        &self,
        name: &str,
        value: impl Into<TemplateValue>,
        attributes: PropertyAttribute,
    ) -> Result<()> {
        let value = value.into();
        self.isolate.with_raw_scope(|scope| {
            let template = self.handle.local(scope);
            set_property(&self.isolate, scope, &template, name, &value, attributes)
        })
    }

    /// Define an accessor property backed by function templates.
    pub fn set_accessor_property(
        &self,
        name: &str,
        getter: Option<&FunctionTemplate>,
        setter: Option<&FunctionTemplate>,
        attributes: PropertyAttribute,
    ) -> Result<()> {
        for template in getter.iter().chain(setter.iter()) {
            check_same_isolate(&self.isolate, &template.inner.isolate);
        }
        self.isolate.with_raw_scope(|scope| {
            let key = exception::new_string(scope, name)?;
            let getter = getter.map(|t| t.inner.handle.local(scope));
            let setter = setter.map(|t| t.inner.handle.local(scope));
            self.handle
                .local(scope)
                .set_accessor_property(key.into(), getter, setter, attributes.to_native());
            Ok(())
        })
    }

    /// Reserve internal fields on every instance.
    pub fn set_internal_field_count(&self, count: usize) {
        self.isolate.with_raw_scope(|scope| {
            self.handle.local(scope).set_internal_field_count(count);
        });
    }

    /// Create an object from this template in `ctx`.
    pub fn new_instance(&self, ctx: &Context) -> Result<Object> {
        check_same_isolate(&self.isolate, ctx.isolate());
        ctx.with_scope(|scope| {
            let template = self.handle.local(scope);
            let tc = &mut v8::TryCatch::new(scope);
            match template.new_instance(tc) {
                Some(object) => Ok(Object::from_local(ctx, tc, object)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }
}

impl std::fmt::Debug for ObjectTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTemplate")
            .field("isolate", &self.isolate.id())
            .finish()
    }
}

fn set_property(
    isolate: &IsolateRef,
    scope: &mut v8::HandleScope<'_, ()>,
    template: &v8::Template,
    name: &str,
    value: &TemplateValue,
    attributes: PropertyAttribute,
) -> Result<()> {
    if let Some(owner) = value.isolate() {
        check_same_isolate(isolate, owner);
    }
    let key = exception::new_string(scope, name)?;
    let value = value.local(scope)?;
    template.set_with_attr(key.into(), value, attributes.to_native());
    Ok(())
}

fn check_same_isolate(a: &IsolateRef, b: &IsolateRef) {
    if !a.same_isolate(b) {
        panic!("templates and contexts must belong to the same isolate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Isolate;
    use crate::value::Value;

    #[test]
    fn test_global_template() {
        let iso = Isolate::new();
        let global = ObjectTemplate::new(&iso);
        let add = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            let sum = info.arg(0).number() + info.arg(1).number();
            Ok(Some(Value::new(info.isolate(), sum)?))
        });
        global.set("add", &add, PropertyAttribute::NONE).unwrap();
        global.set("version", "1.0", PropertyAttribute::READ_ONLY).unwrap();
        global.set("limit", 10, PropertyAttribute::DONT_ENUM).unwrap();

        let ctx = Context::with_global_template(&iso, &global);
        assert_eq!(ctx.run_script("add(2, 3)", "").unwrap().int32(), 5);
        assert_eq!(
            ctx.run_script("version = '2.0'; version", "").unwrap().to_string(),
            "1.0"
        );
        assert!(!ctx.run_script("Object.keys(globalThis).includes('limit')", "")
            .unwrap()
            .is_true());
        assert_eq!(ctx.run_script("limit", "").unwrap().int32(), 10);
    }

    #[test]
    fn test_object_template_instances() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let point = ObjectTemplate::new(&iso);
        point.set("x", 1, PropertyAttribute::NONE).unwrap();
        point.set("y", 2.5, PropertyAttribute::NONE).unwrap();

        let a = point.new_instance(&ctx).unwrap();
        let b = point.new_instance(&ctx).unwrap();
        assert_eq!(a.get("x").unwrap().int32(), 1);
        assert_eq!(b.get("y").unwrap().number(), 2.5);
        assert!(!a.value().same_identity(b.value()));
    }

    #[test]
    fn test_nested_object_template() {
        let iso = Isolate::new();
        let inner = ObjectTemplate::new(&iso);
        inner.set("flag", true, PropertyAttribute::NONE).unwrap();
        let global = ObjectTemplate::new(&iso);
        global.set("config", &inner, PropertyAttribute::NONE).unwrap();

        let ctx = Context::with_global_template(&iso, &global);
        assert!(ctx.run_script("config.flag", "").unwrap().is_true());
    }

    #[test]
    fn test_inheritance_and_prototype() {
        let iso = Isolate::new();
        let animal = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Ok(None));
        animal.set_class_name("Animal").unwrap();
        animal
            .prototype_template()
            .set("legs", 4, PropertyAttribute::NONE)
            .unwrap();

        let dog = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Ok(None));
        dog.inherit(&animal);
        dog.instance_template()
            .set("name", "rex", PropertyAttribute::NONE)
            .unwrap();

        let ctx = Context::new(&iso);
        ctx.global().set("Dog", dog.get_function(&ctx).unwrap()).unwrap();
        let result = ctx
            .run_script("const d = new Dog(); `${d.name}:${d.legs}`", "dog.js")
            .unwrap();
        assert_eq!(result.to_string(), "rex:4");
    }

    #[test]
    fn test_accessor_property() {
        let iso = Isolate::new();
        let getter = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            let base = info.this().get("base")?.int32();
            Ok(Some(Value::new(info.isolate(), base * 2)?))
        });
        let template = ObjectTemplate::new(&iso);
        template.set("base", 21, PropertyAttribute::NONE).unwrap();
        template
            .set_accessor_property("double", Some(&getter), None, PropertyAttribute::NONE)
            .unwrap();

        let ctx = Context::new(&iso);
        let obj = template.new_instance(&ctx).unwrap();
        assert_eq!(obj.get("double").unwrap().int32(), 42);
    }

    #[test]
    fn test_get_function_returns_same_function_per_context() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let before = iso.registered_callback_count();
        let template = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Ok(None));
        let a = template.get_function(&ctx).unwrap();
        let b = template.get_function(&ctx).unwrap();
        assert!(a.value().same_identity(b.value()));
        assert_eq!(iso.registered_callback_count(), before + 1);
    }

    #[test]
    fn test_functions_outlive_their_template() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let template = FunctionTemplate::new(&iso, |info: &FunctionCallbackInfo| {
            Ok(Some(Value::new(info.isolate(), "still here")?))
        });
        ctx.global()
            .set("f", template.get_function(&ctx).unwrap())
            .unwrap();
        drop(template);

        assert_eq!(ctx.run_script("f()", "").unwrap().to_string(), "still here");
    }

    #[test]
    #[should_panic(expected = "cannot be modified after get_function")]
    fn test_modify_after_instantiation_panics() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let template = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Ok(None));
        template.get_function(&ctx).unwrap();
        let _ = template.set("late", 1, PropertyAttribute::NONE);
    }

    #[test]
    #[should_panic(expected = "isolate has been disposed")]
    fn test_template_after_dispose_panics() {
        let iso = Isolate::new();
        let template = ObjectTemplate::new(&iso);
        iso.dispose();
        let _ = template.set("x", 1, PropertyAttribute::NONE);
    }

    #[test]
    fn test_template_drop_after_dispose() {
        let iso = Isolate::new();
        let object = ObjectTemplate::new(&iso);
        let function = FunctionTemplate::new(&iso, |_: &FunctionCallbackInfo| Ok(None));
        iso.dispose();
        drop(object);
        drop(function);
    }

    #[test]
    fn test_property_attribute_flags() {
        let attr = PropertyAttribute::READ_ONLY | PropertyAttribute::DONT_DELETE;
        assert!(attr.contains(PropertyAttribute::READ_ONLY));
        assert!(!attr.contains(PropertyAttribute::DONT_ENUM));
        assert!(PropertyAttribute::default() == PropertyAttribute::NONE);
    }
}
