//! Callable values.

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::object::Object;
use crate::value::Value;

/// A value known to be a function.
#[derive(Clone)]
pub struct Function {
    value: Value,
}

impl Function {
    pub(crate) fn from_value(value: Value) -> Self {
        Function { value }
    }

    pub(crate) fn from_local(
        ctx: &Context,
        scope: &mut v8::HandleScope<'_, ()>,
        local: v8::Local<v8::Function>,
    ) -> Self {
        Function {
            value: Value::from_local(ctx, scope, local.into()),
        }
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

    /// Call the function with `this` as receiver.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        let ctx = self.context();
        ctx.with_scope(|scope| {
            let function = function_local(scope, &self.value)?;
            let recv = this.local(scope);
            let args: Vec<v8::Local<v8::Value>> = args.iter().map(|a| a.local(scope)).collect();

            let tc = &mut v8::TryCatch::new(scope);
            match function.call(tc, recv, &args) {
                Some(result) => Ok(Value::from_local(ctx, tc, result)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }

    /// Call the function as a constructor (`new f(...args)`).
    pub fn new_instance(&self, args: &[Value]) -> Result<Object> {
        let ctx = self.context();
        ctx.with_scope(|scope| {
            let function = function_local(scope, &self.value)?;
            let args: Vec<v8::Local<v8::Value>> = args.iter().map(|a| a.local(scope)).collect();

            let tc = &mut v8::TryCatch::new(scope);
            match function.new_instance(tc, &args) {
                Some(object) => Ok(Object::from_local(ctx, tc, object)),
                None => Err(exception::take(tc, ctx)),
            }
        })
    }

    /// The function's `name`.
    pub fn name(&self) -> String {
        self.context().with_scope(|scope| match function_local(scope, &self.value) {
            Ok(function) => function.get_name(scope).to_rust_string_lossy(scope),
            Err(_) => String::new(),
        })
    }
}

pub(crate) fn function_local<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    value: &Value,
) -> Result<v8::Local<'s, v8::Function>> {
    v8::Local::<v8::Function>::try_from(value.local(scope)).map_err(|_| Error::Type {
        expected: "a function",
    })
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({:?})", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Isolate;

    #[test]
    fn test_call() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let add = ctx
            .run_script("(function add(a, b) { return a + b; })", "add.js")
            .unwrap()
            .as_function()
            .unwrap();

        let a = Value::new(&iso, 2).unwrap();
        let b = Value::new(&iso, 3).unwrap();
        let sum = add.call(&iso.undefined(), &[a, b]).unwrap();
        assert_eq!(sum.int32(), 5);
        assert_eq!(add.name(), "add");
    }

    #[test]
    fn test_call_uses_receiver() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let get_x = ctx
            .run_script("(function () { return this.x; })", "")
            .unwrap()
            .as_function()
            .unwrap();
        let recv = ctx.run_script("({ x: 'from receiver' })", "").unwrap();

        assert_eq!(get_x.call(&recv, &[]).unwrap().to_string(), "from receiver");
    }

    #[test]
    fn test_call_reports_exceptions() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let fail = ctx
            .run_script("(function fail() { throw new Error('failed'); })", "fail.js")
            .unwrap()
            .as_function()
            .unwrap();

        let err = fail.call(&iso.undefined(), &[]).unwrap_err();
        let script_err = err.as_script_error().unwrap();
        assert_eq!(script_err.message, "Error: failed");
        assert_eq!(script_err.frames()[0].function_name, "fail");
    }

    #[test]
    fn test_new_instance() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let point = ctx
            .run_script("(class Point { constructor(x) { this.x = x; } })", "")
            .unwrap()
            .as_function()
            .unwrap();

        let p = point.new_instance(&[Value::new(&iso, 9).unwrap()]).unwrap();
        assert_eq!(p.get("x").unwrap().int32(), 9);
        assert!(point.call(&iso.undefined(), &[]).is_err());
    }
}
