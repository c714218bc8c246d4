//! Custom Jinja2 filters for Home Assistant templates
//!
//! These filters extend minijinja with the conversions value templates
//! usually need: numbers out of strings, rounding, JSON in and out, slugs.

use minijinja::value::{Kwargs, Value};
use minijinja::{Error, ErrorKind};
use std::convert::TryFrom;

/// Helper to convert Value to f64
pub(crate) fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

fn parse_f64(value: &Value) -> Option<f64> {
    value_to_f64(value).or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn no_default(filter: &str, value: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("{} got invalid input '{}' and no default was specified", filter, value),
    )
}

// ==================== String Filters ====================

/// Convert a string to a slug
pub fn slugify(value: &str, kwargs: Kwargs) -> Result<String, Error> {
    let separator: String = kwargs
        .get::<Option<String>>("separator")?
        .unwrap_or_else(|| "_".to_string());
    kwargs.assert_all_used()?;
    Ok(slug::slugify(value).replace('-', &separator))
}

// ==================== Type Conversion ====================

/// Convert to float, falling back to `default` when the input is not numeric
pub fn to_float(value: Value, default: Option<Value>) -> Result<Value, Error> {
    match parse_f64(&value) {
        Some(f) => Ok(Value::from(f)),
        None => default.ok_or_else(|| no_default("float", &value)),
    }
}

/// Convert to integer, truncating floats
pub fn to_int(value: Value, default: Option<Value>) -> Result<Value, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(Value::from(i));
    }
    if let Some(i) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
        return Ok(Value::from(i));
    }
    match parse_f64(&value) {
        Some(f) => Ok(Value::from(f.trunc() as i64)),
        None => default.ok_or_else(|| no_default("int", &value)),
    }
}

/// Convert to boolean using the usual truthy strings
pub fn to_bool(value: Value, default: Option<bool>) -> Result<bool, Error> {
    if let Ok(b) = bool::try_from(value.clone()) {
        return Ok(b);
    }
    if let Some(s) = value.as_str() {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "enable" | "1" => return Ok(true),
            "false" | "no" | "off" | "disable" | "0" => return Ok(false),
            _ => {}
        }
    }
    if let Some(n) = value_to_f64(&value) {
        return Ok(n != 0.0);
    }
    default.ok_or_else(|| no_default("bool", &value))
}

/// Test whether a value is a number or a numeric string
pub fn is_number(value: Value) -> bool {
    parse_f64(&value).is_some_and(f64::is_finite)
}

// ==================== Math ====================

/// Round a number to `precision` places
///
/// `method` may be `common` (default), `ceil`, `floor` or `half`.
pub fn round_filter(value: Value, precision: Option<i32>, kwargs: Kwargs) -> Result<Value, Error> {
    let method: String = kwargs
        .get::<Option<String>>("method")?
        .unwrap_or_else(|| "common".to_string());
    kwargs.assert_all_used()?;

    let Some(value) = parse_f64(&value) else {
        return Err(no_default("round", &value));
    };
    let precision = precision.unwrap_or(0);
    let multiplier = 10_f64.powi(precision);
    let scaled = value * multiplier;

    let rounded = match method.as_str() {
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        "half" => return Ok(Value::from((value * 2.0).round() / 2.0)),
        _ => scaled.round(),
    };

    Ok(Value::from(rounded / multiplier))
}

// ==================== JSON ====================

/// Serialize a value to a JSON string
pub fn to_json(value: Value, kwargs: Kwargs) -> Result<String, Error> {
    let pretty: bool = kwargs.get::<Option<bool>>("pretty")?.unwrap_or(false);
    kwargs.assert_all_used()?;

    if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("JSON error: {}", e)))
}

/// Parse JSON string to value
pub fn from_json(value: &str) -> Result<Value, Error> {
    let json: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid JSON: {}", e)))?;

    Ok(Value::from_serialize(&json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_float() {
        assert_eq!(to_float(Value::from(" 21.5 "), None).unwrap(), Value::from(21.5));
        assert_eq!(to_float(Value::from(3), None).unwrap(), Value::from(3.0));
        assert_eq!(
            to_float(Value::from("abc"), Some(Value::from(0))).unwrap(),
            Value::from(0)
        );
        assert!(to_float(Value::from("abc"), None).is_err());
    }

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(Value::from("42"), None).unwrap(), Value::from(42));
        assert_eq!(to_int(Value::from(4.9), None).unwrap(), Value::from(4));
        assert!(to_int(Value::from("n/a"), None).is_err());
    }

    #[test]
    fn test_to_bool() {
        assert!(to_bool(Value::from("on"), None).unwrap());
        assert!(!to_bool(Value::from("0"), None).unwrap());
        assert!(to_bool(Value::from("maybe"), Some(true)).unwrap());
        assert!(to_bool(Value::from("maybe"), None).is_err());
    }

    #[test]
    fn test_from_json() {
        let result = from_json(r#"{"level": 80}"#).unwrap();
        assert_eq!(result.get_attr("level").unwrap(), Value::from(80));
        assert!(from_json("{not json").is_err());
    }

    #[test]
    fn test_is_number() {
        assert!(is_number(Value::from(42)));
        assert!(is_number(Value::from("3.5")));
        assert!(!is_number(Value::from("hello")));
    }
}
