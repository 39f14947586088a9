//! Declared-intent normalization helpers.
//!
//! Declared intent arrives as a flat JSON object. Entity modules pull typed
//! fields out of it with the getters below; everything here works on a
//! borrowed map and never mutates it.

use std::net::IpAddr;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Raw declared-intent record.
pub type RawParams = Map<String, Value>;

/// Immutable wire-name to internal-name translation table.
pub type FieldMap = &'static [(&'static str, &'static str)];

/// Translate wire names to internal names. Keys without an entry are kept.
pub fn translate(raw: &RawParams, map: FieldMap) -> RawParams {
    raw.iter()
        .map(|(k, v)| {
            let key = map
                .iter()
                .find(|(wire, _)| *wire == k)
                .map(|(_, internal)| (*internal).to_string())
                .unwrap_or_else(|| k.clone());
            (key, v.clone())
        })
        .collect()
}

/// Internal name to wire name.
pub fn wire_name(map: FieldMap, internal: &'static str) -> &'static str {
    map.iter()
        .find(|(_, i)| *i == internal)
        .map(|(wire, _)| *wire)
        .unwrap_or(internal)
}

/// Reject any field outside the entity's fixed set.
pub fn reject_unknown(raw: &RawParams, allowed: &[&str], entity: &str) -> Result<()> {
    let mut unknown: Vec<&str> = raw
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(Error::validation(format!(
        "Unsupported parameters for {}: {}",
        entity,
        unknown.join(", ")
    )))
}

/// A single-element list holding `""` or `"none"` means "clear this list".
pub fn is_empty_list(seq: &[Value]) -> bool {
    match seq {
        [Value::String(s)] => s.is_empty() || s == "none",
        _ => false,
    }
}

pub fn get_str(raw: &RawParams, key: &str) -> Result<Option<String>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(Error::validation(format!(
            "Parameter '{}' must be a string, got {}",
            key, other
        ))),
    }
}

pub fn require_str(raw: &RawParams, key: &str) -> Result<String> {
    match get_str(raw, key)? {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(Error::validation(format!(
            "missing required argument: {}",
            key
        ))),
    }
}

fn value_as_int(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| {
            Error::validation(format!("Parameter '{}' must be an integer, got {}", key, n))
        }),
        Value::String(s) => s.trim().parse().map_err(|_| {
            Error::validation(format!("Parameter '{}' must be an integer, got '{}'", key, s))
        }),
        other => Err(Error::validation(format!(
            "Parameter '{}' must be an integer, got {}",
            key, other
        ))),
    }
}

pub fn get_int(raw: &RawParams, key: &str) -> Result<Option<i64>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => value_as_int(key, v).map(Some),
    }
}

/// Integer in `min..=max`.
pub fn get_int_in(raw: &RawParams, key: &str, min: i64, max: i64) -> Result<Option<i64>> {
    match get_int(raw, key)? {
        Some(v) if v < min || v > max => Err(Error::validation(format!(
            "Parameter '{}' must be between {} and {}, got {}",
            key, min, max, v
        ))),
        other => Ok(other),
    }
}

fn get_list<'a>(raw: &'a RawParams, key: &str) -> Result<Option<&'a Vec<Value>>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(Error::validation(format!(
            "Parameter '{}' must be a list, got {}",
            key, other
        ))),
    }
}

/// List of integers. The clear sentinel yields an empty list.
pub fn get_int_list(raw: &RawParams, key: &str) -> Result<Option<Vec<i64>>> {
    let Some(items) = get_list(raw, key)? else {
        return Ok(None);
    };
    if is_empty_list(items) {
        return Ok(Some(Vec::new()));
    }
    items
        .iter()
        .map(|v| value_as_int(key, v))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// List of strings. The clear sentinel yields an empty list.
pub fn get_str_list(raw: &RawParams, key: &str) -> Result<Option<Vec<String>>> {
    let Some(items) = get_list(raw, key)? else {
        return Ok(None);
    };
    if is_empty_list(items) {
        return Ok(Some(Vec::new()));
    }
    items
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::validation(format!(
                "Parameter '{}' must be a list of strings, got {}",
                key, other
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Case-insensitive choice among `choices`; returns the index of the match.
pub fn get_choice(raw: &RawParams, key: &str, choices: &[&str]) -> Result<Option<usize>> {
    let Some(value) = get_str(raw, key)? else {
        return Ok(None);
    };
    choices
        .iter()
        .position(|c| c.eq_ignore_ascii_case(&value))
        .map(Some)
        .ok_or_else(|| {
            Error::validation(format!(
                "value of {} must be one of: {}, got: {}",
                key,
                choices.join(", "),
                value
            ))
        })
}

fn label_ok(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// LDH-rule host name check (RFC 1123).
pub fn is_valid_hostname(host: &str) -> bool {
    if host.len() > 255 {
        return false;
    }
    let host = host.trim_end_matches('.');
    host.split('.').all(label_ok)
}

/// Like [`is_valid_hostname`] but requires at least two labels.
pub fn is_valid_fqdn(host: &str) -> bool {
    is_valid_hostname(host) && host.trim_end_matches('.').split('.').count() > 1
}

/// IP literal or valid host name.
pub fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || is_valid_hostname(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawParams {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_translate_keeps_unmapped_and_leaves_input() {
        const MAP: FieldMap = &[("lag-type", "lag_type")];
        let input = raw(json!({"lag-type": "LACP", "name": "Arista"}));
        let out = translate(&input, MAP);
        assert_eq!(out.get("lag_type"), Some(&json!("LACP")));
        assert_eq!(out.get("name"), Some(&json!("Arista")));
        assert!(input.contains_key("lag-type"));
        assert_eq!(wire_name(MAP, "lag_type"), "lag-type");
        assert_eq!(wire_name(MAP, "name"), "name");
    }

    #[test]
    fn test_clear_sentinel() {
        assert!(is_empty_list(&[json!("")]));
        assert!(is_empty_list(&[json!("none")]));
        assert!(!is_empty_list(&[json!("none"), json!("")]));
        assert!(!is_empty_list(&[json!(444)]));

        let p = raw(json!({"trunk_vlans": ["none"], "config_members": [""]}));
        assert_eq!(get_int_list(&p, "trunk_vlans").unwrap(), Some(vec![]));
        assert_eq!(get_str_list(&p, "config_members").unwrap(), Some(vec![]));
    }

    #[test]
    fn test_int_coercion() {
        let p = raw(json!({"a": "42", "b": 7, "c": "x", "d": null}));
        assert_eq!(get_int(&p, "a").unwrap(), Some(42));
        assert_eq!(get_int(&p, "b").unwrap(), Some(7));
        assert!(get_int(&p, "c").is_err());
        assert_eq!(get_int(&p, "d").unwrap(), None);
        assert!(get_int_in(&p, "a", 1, 10).is_err());
    }

    #[test]
    fn test_reject_unknown() {
        let p = raw(json!({"name": "x", "bogus": 1}));
        let err = reject_unknown(&p, &["name"], "lag").unwrap_err();
        assert!(err.to_string().contains("bogus"));
        assert!(reject_unknown(&p, &["name", "bogus"], "lag").is_ok());
    }

    #[test]
    fn test_choice() {
        let p = raw(json!({"lag_type": "lacp"}));
        assert_eq!(get_choice(&p, "lag_type", &["LACP", "STATIC"]).unwrap(), Some(0));
        let p = raw(json!({"lag_type": "dynamic"}));
        assert!(get_choice(&p, "lag_type", &["LACP", "STATIC"]).is_err());
    }

    #[test]
    fn test_hostnames() {
        assert!(is_valid_hostname("fake.imageserver.foo.bar.com"));
        assert!(is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("under_score.com"));
        assert!(is_valid_fqdn("foo.bar."));
        assert!(!is_valid_fqdn("localhost"));
        assert!(is_valid_host("1.2.3.4"));
        assert!(is_valid_host("fd00::1"));
    }
}
