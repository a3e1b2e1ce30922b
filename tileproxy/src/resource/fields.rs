//! Field accessors for definition documents.
//!
//! Every accessor names the field it failed on, so a bad document is
//! reported as `Error::Parse { field, .. }` pointing at the culprit. Unknown
//! fields are never looked at and therefore ignored.

use std::fmt::Display;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub(crate) type Object = Map<String, Value>;

fn type_error(field: &str, expected: &str) -> Error {
    Error::parse(field, format!("expected {}", expected))
}

/// Interprets `value` as an object.
pub(crate) fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Object> {
    value.as_object().ok_or_else(|| type_error(field, "an object"))
}

pub(crate) fn required<'a>(obj: &'a Object, field: &str) -> Result<&'a Value> {
    obj.get(field)
        .ok_or_else(|| Error::parse(field, "missing required field"))
}

/// Member that is absent or `null` maps to `None`.
fn optional<'a>(obj: &'a Object, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|v| !v.is_null())
}

pub(crate) fn object<'a>(obj: &'a Object, field: &str) -> Result<&'a Object> {
    as_object(required(obj, field)?, field)
}

pub(crate) fn string(obj: &Object, field: &str) -> Result<String> {
    required(obj, field)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| type_error(field, "a string"))
}

pub(crate) fn opt_string(obj: &Object, field: &str) -> Result<Option<String>> {
    optional(obj, field)
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| type_error(field, "a string"))
        })
        .transpose()
}

pub(crate) fn boolean(obj: &Object, field: &str, default: bool) -> Result<bool> {
    optional(obj, field)
        .map(|v| v.as_bool().ok_or_else(|| type_error(field, "a boolean")))
        .transpose()
        .map(|v| v.unwrap_or(default))
}

fn to_u32(value: &Value, field: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| type_error(field, "an unsigned integer"))
}

pub(crate) fn opt_u32(obj: &Object, field: &str) -> Result<Option<u32>> {
    optional(obj, field).map(|v| to_u32(v, field)).transpose()
}

pub(crate) fn u32_or(obj: &Object, field: &str, default: u32) -> Result<u32> {
    Ok(opt_u32(obj, field)?.unwrap_or(default))
}

/// String member parsed through `FromStr`; an unknown value fails naming the field.
pub(crate) fn parsed<T>(obj: &Object, field: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let s = string(obj, field)?;
    s.parse::<T>()
        .map_err(|e| Error::parse(field, format!("<{}>: {}", s, e)))
}

pub(crate) fn opt_parsed<T>(obj: &Object, field: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match optional(obj, field) {
        Some(_) => parsed(obj, field).map(Some),
        None => Ok(None),
    }
}

/// Fixed-size array of unsigned integers.
pub(crate) fn u32_array<const N: usize>(obj: &Object, field: &str) -> Result<[u32; N]> {
    let items = required(obj, field)?
        .as_array()
        .filter(|a| a.len() == N)
        .ok_or_else(|| type_error(field, &format!("an array of {} integers", N)))?;
    let mut out = [0u32; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = to_u32(item, field)?;
    }
    Ok(out)
}

/// Fixed-size array of numbers.
pub(crate) fn f64_array<const N: usize>(obj: &Object, field: &str) -> Result<[f64; N]> {
    let items = required(obj, field)?
        .as_array()
        .filter(|a| a.len() == N)
        .ok_or_else(|| type_error(field, &format!("an array of {} numbers", N)))?;
    let mut out = [0f64; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_f64().ok_or_else(|| type_error(field, "numbers"))?;
    }
    Ok(out)
}

pub(crate) fn has(obj: &Object, field: &str) -> bool {
    optional(obj, field).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Object {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_missing_field_names_it() {
        let obj = doc(json!({}));
        match string(&obj, "dataset").unwrap_err() {
            Error::Parse { field, .. } => assert_eq!(field, "dataset"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_optional_accessors() {
        let obj = doc(json!({"a": null, "b": "x", "c": true, "d": 7}));
        assert_eq!(opt_string(&obj, "a").unwrap(), None);
        assert_eq!(opt_string(&obj, "b").unwrap(), Some("x".to_string()));
        assert!(boolean(&obj, "c", false).unwrap());
        assert!(boolean(&obj, "missing", true).unwrap());
        assert_eq!(u32_or(&obj, "d", 1).unwrap(), 7);
        assert!(opt_u32(&obj, "b").is_err());
    }

    #[test]
    fn test_arrays() {
        let obj = doc(json!({"r": [1, 2], "p": [1.5, 2, -3]}));
        assert_eq!(u32_array::<2>(&obj, "r").unwrap(), [1, 2]);
        assert_eq!(f64_array::<3>(&obj, "p").unwrap(), [1.5, 2.0, -3.0]);
        assert!(u32_array::<3>(&obj, "r").is_err());
    }
}
