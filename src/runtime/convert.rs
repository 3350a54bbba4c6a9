//! JavaScript value to JSON conversion for captured output and results.
//!
//! Conversion is total: every engine value maps to some JSON value. Nesting
//! is cut off at [`MAX_DEPTH`], functions and symbols become descriptive
//! strings, non-finite numbers become their JavaScript spelling, and objects
//! exposing `toJSON` (for example `Date`) are converted through it.
//! Containers longer than [`MAX_ENTRIES`] end with an `"… N more"` marker
//! (an `"…"` key for objects).

use rquickjs::convert::Coerced;
use rquickjs::function::This;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde_json::{Map, Number, Value as JsonValue};

pub const MAX_DEPTH: usize = 8;
/// Array items / object properties converted per container
pub const MAX_ENTRIES: usize = 1_000;
/// Key of the marker entry on cut objects
pub const ELIDED_KEY: &str = "…";

/// Largest integer a double represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub fn to_json(value: &Value<'_>) -> JsonValue {
    convert(value, 0)
}

/// Completion values: `undefined` means "no result"
pub fn to_result(value: &Value<'_>) -> Option<JsonValue> {
    if value.is_undefined() {
        None
    } else {
        Some(to_json(value))
    }
}

/// Human-readable message for a thrown or rejected value
pub fn error_message(value: &Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        return exception_message(exception);
    }
    if value.is_undefined() {
        return "undefined".to_string();
    }
    if let Some(text) = value.as_string() {
        return text.to_string().unwrap_or_default();
    }
    match to_json(value) {
        JsonValue::String(text) => text,
        other => other.to_string(),
    }
}

pub fn exception_message(exception: &Exception<'_>) -> String {
    exception
        .message()
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| describe_exception(exception))
}

fn convert(value: &Value<'_>, depth: usize) -> JsonValue {
    if value.is_undefined() || value.is_null() {
        return JsonValue::Null;
    }
    if let Some(flag) = value.as_bool() {
        return JsonValue::Bool(flag);
    }
    if let Some(int) = value.as_int() {
        return JsonValue::from(int);
    }
    if let Some(float) = value.as_float() {
        return number(float);
    }
    if let Some(text) = value.as_string() {
        return text
            .to_string()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null);
    }
    if value.is_symbol() {
        return JsonValue::String("[Symbol]".to_string());
    }
    if let Some(function) = value.as_function() {
        return JsonValue::String(describe_function(function));
    }
    if let Some(exception) = value.as_exception() {
        return JsonValue::String(describe_exception(exception));
    }
    if let Some(object) = value.as_object() {
        if depth >= MAX_DEPTH {
            let placeholder = if value.is_array() { "[Array]" } else { "[Object]" };
            return JsonValue::String(placeholder.to_string());
        }
        if let Some(replaced) = to_json_hook(object) {
            return convert(&replaced, depth + 1);
        }
        if let Some(array) = value.as_array() {
            let mut items = Vec::with_capacity(array.len().min(MAX_ENTRIES));
            for item in array.iter::<Value>().take(MAX_ENTRIES) {
                match item {
                    Ok(item) => items.push(convert(&item, depth + 1)),
                    Err(_) => {
                        discard_exception(object.ctx());
                        items.push(JsonValue::Null);
                    }
                }
            }
            let elided = array.len().saturating_sub(MAX_ENTRIES);
            if elided > 0 {
                items.push(JsonValue::String(format!("{} {} more", ELIDED_KEY, elided)));
            }
            return JsonValue::Array(items);
        }
        let mut map = Map::new();
        for prop in object.props::<String, Value>().take(MAX_ENTRIES) {
            match prop {
                Ok((key, item)) => {
                    if !item.is_undefined() && !item.is_function() {
                        map.insert(key, convert(&item, depth + 1));
                    }
                }
                Err(_) => discard_exception(object.ctx()),
            }
        }
        let elided = object.keys::<String>().count().saturating_sub(MAX_ENTRIES);
        if elided > 0 {
            map.insert(
                ELIDED_KEY.to_string(),
                JsonValue::String(format!("{} more", elided)),
            );
        }
        return JsonValue::Object(map);
    }

    match value.get::<Coerced<String>>() {
        Ok(text) => JsonValue::String(text.0),
        Err(_) => {
            discard_exception(value.ctx());
            JsonValue::Null
        }
    }
}

fn number(float: f64) -> JsonValue {
    if float.is_nan() {
        return JsonValue::String("NaN".to_string());
    }
    if float.is_infinite() {
        let spelled = if float > 0.0 { "Infinity" } else { "-Infinity" };
        return JsonValue::String(spelled.to_string());
    }
    if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::from(float as i64);
    }
    Number::from_f64(float)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn to_json_hook<'js>(object: &Object<'js>) -> Option<Value<'js>> {
    let hook: Value<'js> = object.get("toJSON").ok()?;
    let hook: Function<'js> = hook.into_function()?;
    match hook.call::<_, Value<'js>>((This(object.clone()),)) {
        Ok(replaced) => Some(replaced),
        Err(_) => {
            discard_exception(object.ctx());
            None
        }
    }
}

fn describe_function(function: &Function<'_>) -> String {
    match function.get::<_, String>("name") {
        Ok(name) if !name.is_empty() => format!("[Function: {}]", name),
        _ => "[Function]".to_string(),
    }
}

fn describe_exception(exception: &Exception<'_>) -> String {
    let name = exception
        .get::<_, String>("name")
        .unwrap_or_else(|_| "Error".to_string());
    match exception.message() {
        Some(message) if !message.is_empty() => format!("{}: {}", name, message),
        _ => name,
    }
}

/// Clear an exception left pending by a failed engine call
fn discard_exception(ctx: &Ctx<'_>) {
    let _ = ctx.catch();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn eval_json(source: &str) -> JsonValue {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let value: Value = ctx.eval(source).unwrap();
            to_json(&value)
        })
    }

    #[test]
    fn test_primitives() {
        assert_eq!(eval_json("42"), json!(42));
        assert_eq!(eval_json("1.5"), json!(1.5));
        assert_eq!(eval_json("3.0 * 2"), json!(6));
        assert_eq!(eval_json("'hi'"), json!("hi"));
        assert_eq!(eval_json("true"), json!(true));
        assert_eq!(eval_json("null"), JsonValue::Null);
        assert_eq!(eval_json("0/0"), json!("NaN"));
        assert_eq!(eval_json("-1/0"), json!("-Infinity"));
    }

    #[test]
    fn test_containers() {
        assert_eq!(
            eval_json("({ a: 1, b: [1, 'x', null], c: undefined })"),
            json!({ "a": 1, "b": [1, "x", null] })
        );
    }

    #[test]
    fn test_long_containers_are_marked() {
        let array = eval_json("Array.from({ length: 1005 }, (_, i) => i)");
        let items = array.as_array().unwrap();
        assert_eq!(items.len(), MAX_ENTRIES + 1);
        assert_eq!(items[MAX_ENTRIES - 1], json!(999));
        assert_eq!(items[MAX_ENTRIES], json!("… 5 more"));

        let object = eval_json(
            "const o = {}; for (let i = 0; i < 1002; i++) o['k' + i] = i; o",
        );
        let map = object.as_object().unwrap();
        assert_eq!(map.len(), MAX_ENTRIES + 1);
        assert_eq!(map[ELIDED_KEY], json!("2 more"));

        assert_eq!(
            eval_json("Array.from({ length: 1000 }, () => 0)").as_array().unwrap().len(),
            MAX_ENTRIES
        );
    }

    #[test]
    fn test_functions_and_symbols_described() {
        assert_eq!(eval_json("(function named() {})"), json!("[Function: named]"));
        assert_eq!(eval_json("Symbol('s')"), json!("[Symbol]"));
    }

    #[test]
    fn test_errors_described() {
        assert_eq!(eval_json("new TypeError('bad')"), json!("TypeError: bad"));
    }

    #[test]
    fn test_to_json_hook_used_for_dates() {
        assert_eq!(
            eval_json("new Date(0)"),
            json!("1970-01-01T00:00:00.000Z")
        );
    }

    #[test]
    fn test_cycles_are_cut_at_depth() {
        let value = eval_json("const o = {}; o.self = o; o");
        let mut cursor = &value;
        for _ in 0..MAX_DEPTH {
            cursor = &cursor["self"];
        }
        assert_eq!(cursor, &json!("[Object]"));
    }

    #[test]
    fn test_error_message_variants() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let thrown: Value = ctx.eval("new Error('Test error')").unwrap();
            assert_eq!(error_message(&thrown), "Test error");
            let text: Value = ctx.eval("'plain'").unwrap();
            assert_eq!(error_message(&text), "plain");
            let object: Value = ctx.eval("({ code: 7 })").unwrap();
            assert_eq!(error_message(&object), r#"{"code":7}"#);
        });
    }
}
