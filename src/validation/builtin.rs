//! Built-in validators
//!
//! All of them except `required` accept empty values; emptiness is
//! `required`'s business.

use super::ValidationError;
use crate::expression::functions::is_empty;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

fn email_regex() -> Option<&'static Regex> {
    EMAIL
        .get_or_init(|| {
            Regex::new(
                r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+)*@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
            )
            .ok()
        })
        .as_ref()
}

pub fn required(value: &Value) -> Option<ValidationError> {
    is_empty(value).then(|| ValidationError::new("required"))
}

pub fn email(value: &Value) -> Option<ValidationError> {
    let Value::String(text) = value else {
        return if is_empty(value) {
            None
        } else {
            Some(ValidationError::new("email"))
        };
    };
    if text.is_empty() {
        return None;
    }
    let local_len = text.split('@').next().map_or(0, str::len);
    let valid = text.len() <= 254
        && local_len <= 64
        && email_regex().is_some_and(|re| re.is_match(text));
    (!valid).then(|| ValidationError::new("email"))
}

pub fn min(value: &Value, min: f64) -> Option<ValidationError> {
    let actual = value.as_f64()?;
    (actual < min).then(|| {
        ValidationError::new("min")
            .with_param("min", json!(min))
            .with_param("actual", value.clone())
    })
}

pub fn max(value: &Value, max: f64) -> Option<ValidationError> {
    let actual = value.as_f64()?;
    (actual > max).then(|| {
        ValidationError::new("max")
            .with_param("max", json!(max))
            .with_param("actual", value.clone())
    })
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.chars().count()),
        Value::Array(items) if !items.is_empty() => Some(items.len()),
        _ => None,
    }
}

pub fn min_length(value: &Value, required: usize) -> Option<ValidationError> {
    let actual = length(value)?;
    (actual < required).then(|| {
        ValidationError::new("minLength")
            .with_param("requiredLength", json!(required))
            .with_param("actualLength", json!(actual))
    })
}

pub fn max_length(value: &Value, allowed: usize) -> Option<ValidationError> {
    let actual = length(value)?;
    (actual > allowed).then(|| {
        ValidationError::new("maxLength")
            .with_param("requiredLength", json!(allowed))
            .with_param("actualLength", json!(actual))
    })
}

/// Compile a `pattern` value. A plain pattern must match the whole value,
/// like an HTML `pattern` attribute; `/.../` delimiters match anywhere.
pub fn compile_pattern(source: &str) -> Result<(Regex, String), regex::Error> {
    if let Some(inner) = source
        .strip_prefix('/')
        .and_then(|s| s.strip_suffix('/'))
        .filter(|s| !s.is_empty())
    {
        return Ok((Regex::new(inner)?, source.to_string()));
    }
    let anchored = format!(
        "{}{}{}",
        if source.starts_with('^') { "" } else { "^" },
        source,
        if source.ends_with('$') { "" } else { "$" }
    );
    let regex = Regex::new(&anchored)?;
    Ok((regex, anchored))
}

pub fn pattern(value: &Value, regex: &Regex, shown: &str) -> Option<ValidationError> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!regex.is_match(&text)).then(|| {
        ValidationError::new("pattern")
            .with_param("requiredPattern", json!(shown))
            .with_param("actualValue", json!(text))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(json!(null), true)]
    #[case(json!(""), true)]
    #[case(json!("  "), true)]
    #[case(json!([]), true)]
    #[case(json!("x"), false)]
    #[case(json!(0), false)]
    #[case(json!(false), false)]
    fn test_required(#[case] value: Value, #[case] fails: bool) {
        assert_eq!(required(&value).is_some(), fails);
    }

    #[rstest]
    #[case("ada@example.com", true)]
    #[case("first.last+tag@sub.example.org", true)]
    #[case("no-at-sign", false)]
    #[case("a@b", true)]
    #[case("a@-b.com", false)]
    #[case("two@@example.com", false)]
    fn test_email(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(email(&json!(input)).is_none(), ok);
    }

    #[test]
    fn test_empty_passes_everything_but_required() {
        let empty = json!("");
        assert!(email(&empty).is_none());
        assert!(min(&Value::Null, 3.0).is_none());
        assert!(min_length(&empty, 3).is_none());
        let (re, shown) = compile_pattern("[0-9]+").unwrap();
        assert!(pattern(&empty, &re, &shown).is_none());
    }

    #[test]
    fn test_min_max_params() {
        let err = min(&json!(2), 5.0).unwrap();
        assert_eq!(err.kind, "min");
        assert_eq!(err.params["min"], json!(5.0));
        assert_eq!(err.params["actual"], json!(2));
        assert!(max(&json!(5), 5.0).is_none());
        assert!(max(&json!(6), 5.0).is_some());
    }

    #[test]
    fn test_length_params() {
        let err = min_length(&json!("ab"), 3).unwrap();
        assert_eq!(err.params["requiredLength"], json!(3));
        assert_eq!(err.params["actualLength"], json!(2));
        assert!(max_length(&json!(["a", "b"]), 1).is_some());
    }

    #[test]
    fn test_pattern_anchoring() {
        let (re, shown) = compile_pattern("[0-9]+").unwrap();
        assert_eq!(shown, "^[0-9]+$");
        assert!(pattern(&json!("123"), &re, &shown).is_none());
        let err = pattern(&json!("12a"), &re, &shown).unwrap();
        assert_eq!(err.params["actualValue"], json!("12a"));

        let (re, shown) = compile_pattern("/foo/").unwrap();
        assert!(pattern(&json!("a foo b"), &re, &shown).is_none());
        assert!(compile_pattern("(").is_err());
    }
}
