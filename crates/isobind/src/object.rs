//! JavaScript objects.

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::function::Function;
use crate::value::{ToValue, Value};

/// A value known to be an object.
#[derive(Clone)]
pub struct Object {
    value: Value,
}

impl Object {
    pub(crate) fn from_value(value: Value) -> Self {
        Object { value }
    }

    pub(crate) fn from_local(
        ctx: &Context,
        scope: &mut v8::HandleScope<'_, ()>,
        local: v8::Local<v8::Object>,
    ) -> Self {
        Object {
            value: Value::from_local(ctx, scope, local.into()),
        }
    }

    /// Create an empty object in `ctx`.
    pub fn new(ctx: &Context) -> Self {
        ctx.with_scope(|scope| {
            let object = v8::Object::new(scope);
            Object::from_local(ctx, scope, object)
        })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn context(&self) -> &Context {
        self.value.context()
    }

    /// Run `f` on the native object, translating a thrown exception.
    fn try_with_object<R>(
        &self,
        f: impl for<'s> FnOnce(
            &mut v8::TryCatch<'_, v8::HandleScope<'s>>,
            v8::Local<'s, v8::Object>,
        ) -> Option<R>,
    ) -> Result<R> {
        let ctx = self.context();
        ctx.with_scope(|scope| {
            let object = object_local(scope, &self.value)?;
            let tc = &mut v8::TryCatch::new(scope);
            match f(tc, object) {
                Some(result) => Ok(result),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }

    pub fn get(&self, key: &str) -> Result<Value> {
        let ctx = self.context();
        self.try_with_object(|tc, object| {
            let key = v8::String::new(tc, key)?;
            let value = object.get(tc, key.into())?;
            Some(Value::from_local(ctx, tc, value))
        })
    }

    pub fn get_index(&self, index: u32) -> Result<Value> {
        let ctx = self.context();
        self.try_with_object(|tc, object| {
            let value = object.get_index(tc, index)?;
            Some(Value::from_local(ctx, tc, value))
        })
    }

    pub fn set(&self, key: &str, value: impl ToValue) -> Result<()> {
        let value = value.to_value(self.context())?;
        self.try_with_object(|tc, object| {
            let key = v8::String::new(tc, key)?;
            let value = value.local(tc);
            object.set(tc, key.into(), value).map(|_| ())
        })
    }

    pub fn set_index(&self, index: u32, value: impl ToValue) -> Result<()> {
        let value = value.to_value(self.context())?;
        self.try_with_object(|tc, object| {
            let value = value.local(tc);
            object.set_index(tc, index, value).map(|_| ())
        })
    }

    /// Whether the object or its prototype chain has `key`.
    pub fn has(&self, key: &str) -> Result<bool> {
        self.try_with_object(|tc, object| {
            let key = v8::String::new(tc, key)?;
            object.has(tc, key.into())
        })
    }

    pub fn has_index(&self, index: u32) -> Result<bool> {
        self.try_with_object(|tc, object| object.has_index(tc, index))
    }

    /// Delete an own property. Returns false for non-configurable ones.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.try_with_object(|tc, object| {
            let key = v8::String::new(tc, key)?;
            object.delete(tc, key.into())
        })
    }

    pub fn delete_index(&self, index: u32) -> Result<bool> {
        self.try_with_object(|tc, object| object.delete_index(tc, index))
    }

    /// Call the method stored under `name` with this object as receiver.
    pub fn method_call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let method = self.get(name)?;
        let method = method
            .as_function()
            .map_err(|_| Error::Type { expected: "a callable method" })?;
        method.call(&self.value, args)
    }

    /// Own enumerable string keys, in property order.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.try_with_object(|tc, object| {
            let names = object.get_own_property_names(tc, v8::GetPropertyNamesArgs::default())?;
            let mut keys = Vec::with_capacity(names.length() as usize);
            for i in 0..names.length() {
                let key = names.get_index(tc, i)?;
                keys.push(key.to_rust_string_lossy(tc));
            }
            Some(keys)
        })
    }

    pub fn internal_field_count(&self) -> usize {
        self.context().with_scope(|scope| match object_local(scope, &self.value) {
            Ok(object) => object.internal_field_count(),
            Err(_) => 0,
        })
    }

    pub fn get_internal_field(&self, index: usize) -> Result<Value> {
        let ctx = self.context();
        ctx.with_scope(|scope| {
            let object = object_local(scope, &self.value)?;
            check_field(index, object.internal_field_count())?;
            let data = object
                .get_internal_field(scope, index)
                .ok_or_else(|| Error::engine("internal field is empty"))?;
            let value = v8::Local::<v8::Value>::try_from(data)
                .map_err(|_| Error::engine("internal field does not hold a value"))?;
            Ok(Value::from_local(ctx, scope, value))
        })
    }

    pub fn set_internal_field(&self, index: usize, value: impl ToValue) -> Result<()> {
        let ctx = self.context();
        let value = value.to_value(ctx)?;
        ctx.with_scope(|scope| {
            let object = object_local(scope, &self.value)?;
            check_field(index, object.internal_field_count())?;
            let value = value.local(scope);
            if object.set_internal_field(index, value.into()) {
                Ok(())
            } else {
                Err(Error::engine("internal field could not be set"))
            }
        })
    }

    /// View the object as a function, if it is callable.
    pub fn as_function(&self) -> Result<Function> {
        self.value.as_function()
    }
}

fn check_field(index: usize, count: usize) -> Result<()> {
    if index < count {
        Ok(())
    } else {
        Err(Error::engine(format!(
            "internal field {} out of range (object has {})",
            index, count
        )))
    }
}

pub(crate) fn object_local<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    value: &Value,
) -> Result<v8::Local<'s, v8::Object>> {
    v8::Local::<v8::Object>::try_from(value.local(scope)).map_err(|_| Error::Type {
        expected: "an object",
    })
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Object({:?})", self.value)
    }
}
