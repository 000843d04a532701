//! The predicate expression language used to express "singleton" uniqueness
//! constraints and arbitrary item filters.
//!
//! Lives in `vaultkit-common` (no crypto/network/runtime deps) so a host UI
//! can filter an item list client-side without depending on `vaultkit-core`.
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredicateError {
    #[error("invalid regex in matches predicate: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("`and`/`or` predicate value must be a non-empty array of sub-predicates")]
    EmptyCompound,
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
}

/// A single comparison or a compound `and`/`or` of sub-predicates.
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        keypath: String,
        operator: Operator,
        value: Value,
    },
    /// `matches` pre-compiles its regex at construction time so repeated
    /// evaluation (e.g. scanning a whole collection for a singleton) never
    /// re-parses the pattern.
    Matches { keypath: String, regex: Regex },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    StartsWith,
    In,
    Includes,
}

impl Predicate {
    pub fn compare(keypath: impl Into<String>, operator: Operator, value: Value) -> Self {
        Predicate::Compare {
            keypath: keypath.into(),
            operator,
            value,
        }
    }

    pub fn matches(keypath: impl Into<String>, pattern: &str) -> Result<Self, PredicateError> {
        Ok(Predicate::Matches {
            keypath: keypath.into(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn and(subs: Vec<Predicate>) -> Result<Self, PredicateError> {
        if subs.is_empty() {
            return Err(PredicateError::EmptyCompound);
        }
        Ok(Predicate::And(subs))
    }

    pub fn or(subs: Vec<Predicate>) -> Result<Self, PredicateError> {
        if subs.is_empty() {
            return Err(PredicateError::EmptyCompound);
        }
        Ok(Predicate::Or(subs))
    }

    /// Evaluate the predicate against a JSON object, treating a missing
    /// keypath as falsy per spec: `!=` against an absent path is true iff the
    /// compared value is not itself a falsy sentinel.
    pub fn evaluate(&self, root: &Value) -> bool {
        match self {
            Predicate::Compare {
                keypath,
                operator,
                value,
            } => {
                let found = resolve_keypath(root, keypath);
                evaluate_compare(found, *operator, value)
            }
            Predicate::Matches { keypath, regex } => {
                let found = resolve_keypath(root, keypath);
                match found.and_then(Value::as_str) {
                    Some(s) => regex.is_match(s),
                    None => false,
                }
            }
            Predicate::And(subs) => subs.iter().all(|p| p.evaluate(root)),
            Predicate::Or(subs) => subs.iter().any(|p| p.evaluate(root)),
        }
    }
}

fn is_falsy_sentinel(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64().map(f64::is_nan).unwrap_or(false),
        _ => false,
    }
}

fn evaluate_compare(found: Option<&Value>, operator: Operator, value: &Value) -> bool {
    // A `".ago"`-suffixed string value is a relative-date literal; resolve it
    // to a concrete RFC 3339 instant before comparing.
    let resolved_value = resolve_relative_date(value);
    let value = resolved_value.as_ref().unwrap_or(value);

    match operator {
        Operator::Ne => match found {
            Some(found) => !values_equal(found, value),
            None => !is_falsy_sentinel(value),
        },
        Operator::Eq => match found {
            Some(found) => values_equal(found, value),
            None => false,
        },
        Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
            match (found.and_then(comparable_f64), comparable_f64(value)) {
                (Some(a), Some(b)) => match operator {
                    Operator::Lt => a < b,
                    Operator::Lte => a <= b,
                    Operator::Gt => a > b,
                    Operator::Gte => a >= b,
                    _ => unreachable!(),
                },
                _ => match (found.and_then(Value::as_str), value.as_str()) {
                    (Some(a), Some(b)) => match operator {
                        Operator::Lt => a < b,
                        Operator::Lte => a <= b,
                        Operator::Gt => a > b,
                        Operator::Gte => a >= b,
                        _ => unreachable!(),
                    },
                    _ => false,
                },
            }
        }
        Operator::StartsWith => match (found.and_then(Value::as_str), value.as_str()) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        Operator::In => match (found, value.as_array()) {
            (Some(found), Some(list)) => list.iter().any(|v| values_equal(v, found)),
            _ => false,
        },
        Operator::Includes => match found.and_then(Value::as_array) {
            Some(list) => list.iter().any(|v| values_equal(v, value)),
            None => false,
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(a), Some(b)) = (comparable_f64(a), comparable_f64(b)) {
        return a == b;
    }
    a == b
}

fn comparable_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Parse `"N.unit.ago"` (e.g. `"7.days.ago"`, `"1.hours.ago"`) into a
/// concrete RFC 3339 timestamp `Value::String`, relative to now. Returns
/// `None` for values that are not of this shape.
fn resolve_relative_date(value: &Value) -> Option<Value> {
    let s = value.as_str()?;
    if !s.ends_with(".ago") {
        return None;
    }
    let mut parts = s.splitn(3, '.');
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next()? != "ago" {
        return None;
    }

    let delta = match unit {
        "seconds" | "second" => Duration::seconds(amount),
        "minutes" | "minute" => Duration::minutes(amount),
        "hours" | "hour" => Duration::hours(amount),
        "days" | "day" => Duration::days(amount),
        "weeks" | "week" => Duration::weeks(amount),
        _ => return None,
    };

    let when: DateTime<Utc> = Utc::now() - delta;
    Some(Value::String(when.to_rfc3339()))
}

/// Resolve a dot-separated keypath against a JSON object. Any missing
/// intermediate segment yields `None` rather than panicking.
fn resolve_keypath<'a>(root: &'a Value, keypath: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in keypath.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
