//! `JSON.parse` / `JSON.stringify` through the engine.

use deno_core::v8;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::exception;
use crate::value::Value;

/// Parse `text` into a value of `ctx`. Invalid JSON is reported as a
/// `SyntaxError` script error.
pub fn parse(ctx: &Context, text: &str) -> Result<Value> {
    ctx.with_scope(|scope| {
        let tc = &mut v8::TryCatch::new(scope);
        let text = exception::new_string(tc, text)?;
        match v8::json::parse(tc, text) {
            Some(value) => Ok(Value::from_local(ctx, tc, value)),
            None => Err(exception::take(tc, ctx)),
        }
    })
}

/// Serialize `value` with `JSON.stringify`.
///
/// Values JSON cannot represent (`undefined`, functions, symbols) are an
/// [`Error::Type`]; a throwing `toJSON` or a cycle is a script error.
pub fn stringify(value: &Value) -> Result<String> {
    let ctx = value.context();
    ctx.with_scope(|scope| {
        let local = value.local(scope);
        // The engine renders these as the string "undefined"
        if local.is_undefined() || local.is_function() || local.is_symbol() {
            return Err(Error::Type {
                expected: "JSON serializable",
            });
        }
        let tc = &mut v8::TryCatch::new(scope);
        match v8::json::stringify(tc, local) {
            Some(json) => Ok(json.to_rust_string_lossy(tc)),
            None => Err(exception::take(tc, ctx)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Isolate;

    #[test]
    fn test_parse() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let value = parse(&ctx, r#"{"name": "isobind", "tags": ["a", "b"], "n": 3}"#).unwrap();
        let obj = value.as_object().unwrap();

        assert_eq!(obj.get("name").unwrap().to_string(), "isobind");
        assert_eq!(obj.get("n").unwrap().int32(), 3);
        assert_eq!(obj.get("tags").unwrap().to_string(), "a,b");
        assert!(value.context().same_context(&ctx));
    }

    #[test]
    fn test_parse_error() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let err = parse(&ctx, "{not json").unwrap_err();
        assert_eq!(err.as_script_error().unwrap().kind(), Some("SyntaxError"));
    }

    #[test]
    fn test_stringify() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);
        let value = ctx
            .run_script("({ a: 1, b: [true, null], c: 'x' })", "")
            .unwrap();

        assert_eq!(stringify(&value).unwrap(), r#"{"a":1,"b":[true,null],"c":"x"}"#);
        assert_eq!(value.marshal_json().unwrap(), stringify(&value).unwrap());
        assert_eq!(stringify(&Value::new(&iso, "quoted").unwrap()).unwrap(), "\"quoted\"");

        let parsed: serde_json::Value = serde_json::from_str(&stringify(&value).unwrap()).unwrap();
        assert_eq!(parsed["b"][0], true);
    }

    #[test]
    fn test_stringify_failures() {
        let iso = Isolate::new();
        let ctx = Context::new(&iso);

        assert!(matches!(
            stringify(&iso.undefined()),
            Err(Error::Type { .. })
        ));

        let cyclic = ctx.run_script("const o = {}; o.self = o; o", "").unwrap();
        let err = stringify(&cyclic).unwrap_err();
        assert_eq!(err.as_script_error().unwrap().kind(), Some("TypeError"));
    }
}
