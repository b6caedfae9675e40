//! Row filters attached to a table query.
//!
//! A filter is either locally evaluable ([`Filter::Simple`], a single
//! `column op value` comparison) or [`Filter::Opaque`], an expression the
//! client passes to the remote store verbatim but cannot evaluate itself.
//! The cache merges change events incrementally into views with a simple
//! filter and falls back to a full re-prime for opaque ones.
//!
//! Wire form follows the `column=op.value` query-string convention:
//!
//! ```text
//! status=eq.available      → Simple { column: "status", op: Eq, value: "available" }
//! price=gte.250000         → Simple { column: "price",  op: Gte, value: 250000 }
//! or=(status.eq.a,price.lt.5) → Opaque("or=(status.eq.a,price.lt.5)")
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

use super::record::{compare_values, value_key, Record};
use crate::error::{LinkError, Result};

/// Comparison operator of a simple filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row filter of a table query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    /// Every row of the table.
    #[default]
    All,
    /// Single-column comparison, evaluable against incoming records.
    Simple {
        column: String,
        op: FilterOp,
        value: JsonValue,
    },
    /// Expression understood only by the remote store.
    Opaque { expr: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Filter::Simple {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn compare(column: impl Into<String>, op: FilterOp, value: impl Into<JsonValue>) -> Self {
        Filter::Simple {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn opaque(expr: impl Into<String>) -> Self {
        Filter::Opaque { expr: expr.into() }
    }

    /// Parse a `column=op.value` expression.
    ///
    /// Single clauses with a known operator become [`Filter::Simple`]; an
    /// empty expression is [`Filter::All`]; everything else is kept verbatim
    /// as [`Filter::Opaque`].
    pub fn parse(expr: &str) -> Self {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Filter::All;
        }
        if trimmed.contains('&') {
            return Filter::opaque(trimmed);
        }

        let Some((column, rhs)) = trimmed.split_once('=') else {
            return Filter::opaque(trimmed);
        };
        let Some((op, raw_value)) = rhs.split_once('.') else {
            return Filter::opaque(trimmed);
        };
        let column = column.trim();
        let reserved = matches!(column, "or" | "and" | "not" | "select" | "order" | "limit");
        if column.is_empty() || reserved || !is_identifier(column) {
            return Filter::opaque(trimmed);
        }
        match FilterOp::parse(op) {
            Some(op) => Filter::Simple {
                column: column.to_string(),
                op,
                value: parse_literal(raw_value),
            },
            None => Filter::opaque(trimmed),
        }
    }

    /// Check that the filter can be sent to the remote store.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::All => Ok(()),
            Filter::Simple { column, value, .. } => {
                if column.is_empty() || !is_identifier(column) {
                    return Err(LinkError::validation(format!(
                        "Invalid filter column '{}'",
                        column
                    )));
                }
                if value.is_array() || value.is_object() {
                    return Err(LinkError::validation(format!(
                        "Filter on '{}' must compare against a scalar value",
                        column
                    )));
                }
                Ok(())
            },
            Filter::Opaque { expr } => {
                if expr.trim().is_empty() {
                    Err(LinkError::validation("Opaque filter expression is empty"))
                } else {
                    Ok(())
                }
            },
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Filter::Opaque { .. })
    }

    /// Evaluate the filter against a record.
    ///
    /// Returns `None` when the filter is opaque and the answer is unknown.
    pub fn matches(&self, record: &Record) -> Option<bool> {
        match self {
            Filter::All => Some(true),
            Filter::Opaque { .. } => None,
            Filter::Simple { column, op, value } => {
                let actual = record.get(column);
                Some(evaluate(actual, *op, value))
            },
        }
    }

    /// Serialized form sent to the remote store and used in cache keys.
    pub fn to_expr(&self) -> String {
        match self {
            Filter::All => String::new(),
            Filter::Simple { column, op, value } => {
                format!("{}={}.{}", column, op, render_literal(value))
            },
            Filter::Opaque { expr } => expr.clone(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("*"),
            other => f.write_str(&other.to_expr()),
        }
    }
}

fn evaluate(actual: Option<&JsonValue>, op: FilterOp, expected: &JsonValue) -> bool {
    let actual = actual.filter(|v| !v.is_null());
    match op {
        FilterOp::Eq => loosely_equal(actual, expected),
        // `NULL <> x` is not true in SQL either.
        FilterOp::Neq => actual.is_some() && !expected.is_null() && !loosely_equal(actual, expected),
        _ => {
            // Ordered comparisons against a missing value are false, as in SQL.
            let Some(actual) = actual else {
                return false;
            };
            let ordering = match (actual, expected) {
                (JsonValue::Number(_), JsonValue::Number(_))
                | (JsonValue::String(_), JsonValue::String(_)) => {
                    compare_values(Some(actual), Some(expected))
                },
                (JsonValue::String(s), JsonValue::Number(n)) => match s.parse::<f64>() {
                    Ok(parsed) => parsed
                        .partial_cmp(&n.as_f64().unwrap_or(f64::NAN))
                        .unwrap_or(Ordering::Equal),
                    Err(_) => return false,
                },
                _ => return false,
            };
            match op {
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Gte => ordering != Ordering::Less,
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Lte => ordering != Ordering::Greater,
                FilterOp::Eq | FilterOp::Neq => false,
            }
        },
    }
}

fn loosely_equal(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match (actual, expected) {
        (None, JsonValue::Null) => true,
        (None, _) => false,
        (Some(JsonValue::Number(a)), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => match (value_key(a), value_key(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
    }
}

fn parse_literal(raw: &str) -> JsonValue {
    match raw {
        "null" => JsonValue::Null,
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        _ => match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Number(n)) => JsonValue::Number(n),
            _ => JsonValue::String(raw.to_string()),
        },
    }
}

fn render_literal(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && name.chars().next().map_or(false, |c| !c.is_ascii_digit())
}
