//! Evaluation of expression trees against JSON documents.

use rust_decimal::Decimal;
use serde_json::Value;

use super::TenantData;
use crate::expression::{
    DateRangeExpression, Expression, HasExpression, QuantityExpression, ReferenceExpression,
    StringExpression, TokenExpression, parse_date_bounds, parse_decimal,
};
use crate::index::SearchPath;

/// Evaluates expressions over one tenant's records at a revision ceiling.
pub(super) struct Matcher<'a> {
    pub(super) tenant: &'a TenantData,
    pub(super) ceiling: i64,
}

impl Matcher<'_> {
    /// Returns true if the record `resource_type/id` with content `doc`
    /// satisfies `expression`.
    pub(super) fn matches(
        &self,
        expression: &Expression,
        resource_type: &str,
        id: &str,
        doc: &Value,
    ) -> bool {
        match expression {
            Expression::And(children) => children
                .iter()
                .all(|c| self.matches(c, resource_type, id, doc)),
            Expression::Or(children) => children
                .iter()
                .any(|c| self.matches(c, resource_type, id, doc)),
            Expression::String(e) => values_at(doc, e.path()).any(|v| string_matches(e, v)),
            Expression::Token(e) => values_at(doc, e.path()).any(|v| token_matches(e, v)),
            Expression::Quantity(e) => values_at(doc, e.path()).any(|v| quantity_matches(e, v)),
            Expression::DateRange(e) => values_at(doc, e.path()).any(|v| date_matches(e, v)),
            Expression::Reference(e) => {
                values_at(doc, e.path()).any(|v| reference_matches(e, v))
            }
            Expression::Include(_) => true,
            Expression::Has(e) => self.has_matches(e, resource_type, id),
        }
    }

    /// A record matches when some visible record of the anchor type links to
    /// it and satisfies at least one of the sub-expressions.
    fn has_matches(&self, has: &HasExpression, resource_type: &str, id: &str) -> bool {
        let anchor = has.anchor_path();
        let target = format!("{}/{}", resource_type, id);
        self.tenant
            .visible(anchor.resource(), self.ceiling)
            .any(|(child_id, child)| {
                values_at(child, anchor).any(|v| reference_literal(v).is_some_and(|r| r == target))
                    && has
                        .sub_expressions()
                        .iter()
                        .any(|sub| self.matches(sub, anchor.resource(), child_id, child))
            })
    }
}

/// Returns every value at a dotted path, flattening arrays along the way.
pub(super) fn values_at<'v>(doc: &'v Value, path: &SearchPath) -> impl Iterator<Item = &'v Value> {
    let mut current: Vec<&Value> = vec![doc];
    for segment in path.segments() {
        current = current
            .into_iter()
            .flat_map(|value| flatten(value.get(segment)))
            .collect();
    }
    current.into_iter().flat_map(|v| flatten(Some(v)))
}

fn flatten(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn string_matches(e: &StringExpression, value: &Value) -> bool {
    let Some(s) = value.as_str() else {
        return false;
    };
    if e.exact() {
        s == e.value()
    } else {
        s.to_lowercase().starts_with(&e.value().to_lowercase())
    }
}

fn token_matches(e: &TokenExpression, value: &Value) -> bool {
    match value {
        Value::String(code) => e.system().is_none() && code == e.value(),
        Value::Bool(b) => e.system().is_none() && b.to_string() == e.value(),
        Value::Object(obj) => {
            if let Some(Value::Array(codings)) = obj.get("coding") {
                return codings.iter().any(|c| token_matches(e, c));
            }
            let code = obj
                .get("code")
                .or_else(|| obj.get("value"))
                .and_then(Value::as_str);
            let system = obj.get("system").and_then(Value::as_str);
            code == Some(e.value()) && e.system().is_none_or(|s| system == Some(s))
        }
        _ => false,
    }
}

fn quantity_matches(e: &QuantityExpression, value: &Value) -> bool {
    let number = match value {
        Value::Object(obj) => obj.get("value"),
        other => Some(other),
    };
    number
        .and_then(decimal_of)
        .is_some_and(|stored| e.operator().accepts(stored.cmp(&e.value())))
}

fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()).ok(),
        Value::String(s) => parse_decimal(s).ok(),
        _ => None,
    }
}

fn date_matches(e: &DateRangeExpression, value: &Value) -> bool {
    value
        .as_str()
        .and_then(|s| parse_date_bounds(s).ok())
        .is_some_and(|(start, _)| e.contains(start))
}

fn reference_matches(e: &ReferenceExpression, value: &Value) -> bool {
    reference_literal(value).is_some_and(|r| r == e.literal())
}

/// Extracts the `Type/id` part of a stored reference, dropping any base URL.
pub(super) fn reference_literal(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("reference")?.as_str()?,
        _ => return None,
    };
    let mut parts = raw.trim_end_matches('/').rsplit('/');
    let id = parts.next()?;
    let resource_type = parts.next()?;
    (!id.is_empty() && !resource_type.is_empty()).then(|| format!("{}/{}", resource_type, id))
}
