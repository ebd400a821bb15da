//! Handles to JavaScript values.

use std::rc::Rc;

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::function::Function;
use crate::isolate::IsolateRef;
use crate::lifetime::{Releasable, TrackedHandle};
use crate::object::Object;
use crate::promise::Promise;

/// A handle to any JavaScript value.
///
/// Every value remembers the context it was produced in; values created
/// outside a user context belong to the isolate's internal context.
/// Cloning shares the handle. Identity is the engine's identity: compare
/// with [`Value::same_identity`], not by Rust address.
#[derive(Clone)]
pub struct Value {
    ctx: Context,
    handle: Rc<TrackedHandle<v8::Value>>,
}

macro_rules! predicates {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> bool {
                self.with_local(|_, value| value.$name())
            }
        )*
    };
}

impl Value {
    /// Create a value from a Rust primitive in the isolate's internal
    /// context.
    pub fn new(isolate: &IsolateRef, value: impl ToValue) -> Result<Value> {
        value.to_value(&isolate.internal_context())
    }

    pub(crate) fn from_local(
        ctx: &Context,
        scope: &mut v8::HandleScope<'_, ()>,
        local: v8::Local<v8::Value>,
    ) -> Value {
        let global = v8::Global::new(scope, local);
        Value {
            ctx: ctx.clone(),
            handle: TrackedHandle::new(&ctx.isolate().inner.lifetimes, global),
        }
    }

    pub(crate) fn null_in(ctx: &Context) -> Value {
        ctx.with_scope(|scope| {
            let null = v8::null(scope).into();
            Value::from_local(ctx, scope, null)
        })
    }

    pub(crate) fn undefined_in(ctx: &Context) -> Value {
        ctx.with_scope(|scope| {
            let undefined = v8::undefined(scope).into();
            Value::from_local(ctx, scope, undefined)
        })
    }

    pub(crate) fn local<'s>(&self, scope: &mut v8::HandleScope<'s, ()>) -> v8::Local<'s, v8::Value> {
        self.handle.local(scope)
    }

    pub(crate) fn releasable(&self) -> Rc<dyn Releasable> {
        self.handle.clone()
    }

    /// Run `f` on the native value inside this value's context. Exceptions
    /// thrown by conversions in `f` are swallowed.
    pub(crate) fn with_local<R>(
        &self,
        f: impl for<'s> FnOnce(&mut v8::HandleScope<'s>, v8::Local<'s, v8::Value>) -> R,
    ) -> R {
        self.ctx.with_scope(|scope| {
            let tc = &mut v8::TryCatch::new(scope);
            let value = self.handle.local(tc);
            f(tc, value)
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn isolate(&self) -> &IsolateRef {
        self.ctx.isolate()
    }

    /// Free the native handle now instead of when the last clone drops.
    /// Any later use of this value (or its clones) panics.
    pub fn release(&self) {
        self.handle.release();
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    predicates! {
        is_undefined,
        is_null,
        is_null_or_undefined,
        is_true,
        is_false,
        is_name,
        is_string,
        is_symbol,
        is_function,
        is_array,
        is_object,
        is_big_int,
        is_boolean,
        is_number,
        is_external,
        is_int32,
        is_uint32,
        is_date,
        is_arguments_object,
        is_big_int_object,
        is_boolean_object,
        is_number_object,
        is_string_object,
        is_symbol_object,
        is_native_error,
        is_reg_exp,
        is_async_function,
        is_generator_function,
        is_generator_object,
        is_promise,
        is_map,
        is_set,
        is_map_iterator,
        is_set_iterator,
        is_weak_map,
        is_weak_set,
        is_array_buffer,
        is_array_buffer_view,
        is_typed_array,
        is_uint8_array,
        is_int32_array,
        is_float64_array,
        is_data_view,
        is_shared_array_buffer,
        is_proxy,
        /// Whether this is the namespace object of an evaluated module.
        is_module_namespace_object,
    }

    /// Engine identity (`Object.is` semantics).
    pub fn same_identity(&self, other: &Value) -> bool {
        self.with_local(|scope, value| {
            let other = other.handle.local(scope);
            value.same_value(other)
        })
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        self.with_local(|scope, value| {
            let other = other.handle.local(scope);
            value.strict_equals(other)
        })
    }

    /// JavaScript truthiness.
    pub fn boolean(&self) -> bool {
        self.with_local(|scope, value| value.boolean_value(scope))
    }

    /// `Number(value)`; NaN when the conversion throws.
    pub fn number(&self) -> f64 {
        self.with_local(|scope, value| value.number_value(scope).unwrap_or(f64::NAN))
    }

    /// ToInt32; 0 when the conversion throws.
    pub fn int32(&self) -> i32 {
        self.with_local(|scope, value| value.int32_value(scope).unwrap_or(0))
    }

    pub fn uint32(&self) -> u32 {
        self.with_local(|scope, value| value.uint32_value(scope).unwrap_or(0))
    }

    pub fn integer(&self) -> i64 {
        self.with_local(|scope, value| value.integer_value(scope).unwrap_or(0))
    }

    /// The value of a BigInt, if it is one and fits in an `i64`.
    pub fn big_int(&self) -> Option<i64> {
        self.with_local(|_, value| {
            let big = v8::Local::<v8::BigInt>::try_from(value).ok()?;
            match big.i64_value() {
                (n, true) => Some(n),
                _ => None,
            }
        })
    }

    /// String conversion as done by `String(value)`.
    pub fn to_rust_string(&self) -> String {
        self.with_local(|scope, value| value.to_rust_string_lossy(scope))
    }

    /// Detail string as printed by the engine's console: never invokes
    /// user `toString` and works on symbols.
    pub fn to_detail_string(&self) -> String {
        self.with_local(|scope, value| {
            value
                .to_detail_string(scope)
                .map(|s| s.to_rust_string_lossy(scope))
                .unwrap_or_default()
        })
    }

    /// The value's `typeof`.
    pub fn type_of(&self) -> String {
        self.with_local(|scope, value| value.type_of(scope).to_rust_string_lossy(scope))
    }

    pub fn as_object(&self) -> Result<Object> {
        if !self.is_object() {
            return Err(Error::Type { expected: "an object" });
        }
        Ok(Object::from_value(self.clone()))
    }

    pub fn as_function(&self) -> Result<Function> {
        if !self.is_function() {
            return Err(Error::Type { expected: "a function" });
        }
        Ok(Function::from_value(self.clone()))
    }

    pub fn as_promise(&self) -> Result<Promise> {
        if !self.is_promise() {
            return Err(Error::Type { expected: "a promise" });
        }
        Ok(Promise::from_value(self.clone()))
    }

    /// Serialize with `JSON.stringify`.
    pub fn marshal_json(&self) -> Result<String> {
        crate::json::stringify(self)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rust_string())
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_released() || self.isolate().is_disposed() || self.ctx.is_closed() {
            return f.write_str("Value(<released>)");
        }
        write!(f, "Value({})", self.to_detail_string())
    }
}

mod private {
    pub trait Sealed {}
}

/// Rust values that can become JavaScript values.
pub trait ToValue: private::Sealed {
    fn to_value(self, ctx: &Context) -> Result<Value>;
}

macro_rules! primitive_to_value {
    ($($ty:ty => |$scope:ident, $v:ident| $make:expr;)*) => {
        $(
            impl private::Sealed for $ty {}

            impl ToValue for $ty {
                fn to_value(self, ctx: &Context) -> Result<Value> {
                    ctx.with_scope(|$scope| {
                        let $v = self;
                        let local: v8::Local<v8::Value> = $make;
                        Ok(Value::from_local(ctx, $scope, local))
                    })
                }
            }
        )*
    };
}

primitive_to_value! {
    bool => |scope, v| v8::Boolean::new(scope, v).into();
    i32 => |scope, v| v8::Integer::new(scope, v).into();
    u32 => |scope, v| v8::Integer::new_from_unsigned(scope, v).into();
    f64 => |scope, v| v8::Number::new(scope, v).into();
    i64 => |scope, v| v8::BigInt::new_from_i64(scope, v).into();
    u64 => |scope, v| v8::BigInt::new_from_u64(scope, v).into();
}

impl private::Sealed for &str {}

impl ToValue for &str {
    fn to_value(self, ctx: &Context) -> Result<Value> {
        ctx.with_scope(|scope| {
            let string = exception::new_string(scope, self)?;
            Ok(Value::from_local(ctx, scope, string.into()))
        })
    }
}

impl private::Sealed for String {}

impl ToValue for String {
    fn to_value(self, ctx: &Context) -> Result<Value> {
        self.as_str().to_value(ctx)
    }
}

impl private::Sealed for &String {}

impl ToValue for &String {
    fn to_value(self, ctx: &Context) -> Result<Value> {
        self.as_str().to_value(ctx)
    }
}

impl private::Sealed for Value {}

impl ToValue for Value {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self)
    }
}

impl private::Sealed for &Value {}

impl ToValue for &Value {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self.clone())
    }
}

impl private::Sealed for Object {}

impl ToValue for Object {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self.into_value())
    }
}

impl private::Sealed for &Object {}

impl ToValue for &Object {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self.value().clone())
    }
}

impl private::Sealed for Function {}

impl ToValue for Function {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self.into_value())
    }
}

impl private::Sealed for &Function {}

impl ToValue for &Function {
    fn to_value(self, _ctx: &Context) -> Result<Value> {
        Ok(self.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Isolate};

    #[test]
    fn test_primitives() {
        let iso = Isolate::new();

        let s = Value::new(&iso, "hello").unwrap();
        assert!(s.is_string());
        assert_eq!(s.to_string(), "hello");
        assert_eq!(s.type_of(), "string");

        let n = Value::new(&iso, 1.5f64).unwrap();
        assert!(n.is_number());
        assert!(!n.is_int32());
        assert_eq!(n.number(), 1.5);

        let i = Value::new(&iso, -7i32).unwrap();
        assert!(i.is_int32());
        assert_eq!(i.int32(), -7);
        assert_eq!(i.integer(), -7);

        let u = Value::new(&iso, u32::MAX).unwrap();
        assert!(u.is_uint32());
        assert_eq!(u.uint32(), u32::MAX);

        let b = Value::new(&iso, true).unwrap();
        assert!(b.is_boolean() && b.is_true());

        let big = Value::new(&iso, i64::MIN).unwrap();
        assert!(big.is_big_int());
        assert_eq!(big.big_int(), Some(i64::MIN));
        assert_eq!(Value::new(&iso, u64::MAX).unwrap().big_int(), None);
    }

    #[test]
    fn test_multibyte_strings_round_trip() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let text = "héllo wörld 🌍 你好";
        let v = Value::new(&iso, text).unwrap();
        assert_eq!(v.to_string(), text);

        let len = ctx.run_script("'🌍'.length", "").unwrap();
        assert_eq!(len.int32(), 2);
    }

    #[test]
    fn test_identity() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let obj = ctx.run_script("globalThis.o = {}; o", "").unwrap();
        let same = ctx.run_script("o", "").unwrap();
        let other = ctx.run_script("({})", "").unwrap();

        assert!(obj.same_identity(&same));
        assert!(obj.strict_equals(&same));
        assert!(!obj.same_identity(&other));

        let nan = ctx.run_script("NaN", "").unwrap();
        assert!(nan.same_identity(&nan.clone()));
        assert!(!nan.strict_equals(&nan));
    }

    #[test]
    fn test_conversions() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);

        let v = ctx.run_script("'42'", "").unwrap();
        assert_eq!(v.int32(), 42);
        assert!(v.boolean());
        assert!(v.as_object().is_err());
        assert!(matches!(v.as_function(), Err(Error::Type { .. })));

        let sym = ctx.run_script("Symbol('tag')", "").unwrap();
        assert!(sym.is_symbol());
        assert_eq!(sym.to_detail_string(), "Symbol(tag)");

        let f = ctx.run_script("(function named() {})", "").unwrap();
        assert!(f.is_function() && f.is_object());
        assert!(f.as_function().is_ok());
    }

    #[test]
    #[should_panic(expected = "handle has been released")]
    fn test_released_value_panics() {
        let iso = Isolate::new();
        let v = Value::new(&iso, "gone").unwrap();
        let copy = v.clone();
        v.release();
        assert!(copy.is_released());
        copy.to_string();
    }
}
