//! Construction of validated expression nodes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::codec::MAX_DEPTH;
use super::value::{date_range_for, parse_decimal, split_prefix};
use super::{
    DateRangeExpression, Expression, HasExpression, IncludeExpression, QuantityExpression,
    QuantityOperator, ReferenceExpression, SelectExpression, StringExpression, TokenExpression,
    TotalMode,
};
use crate::error::ConfigurationError;
use crate::index::{IndexConfig, IndexType, SearchPath};

/// Builds expression nodes from raw query primitives.
///
/// Every leaf path is checked against the index configuration: the resource
/// type must be configured and the path must be indexed with a type the leaf
/// kind accepts. Failures are [`ConfigurationError`]s, which the boundary layer
/// reports as client errors.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionFactory<'a> {
    config: &'a IndexConfig,
}

impl<'a> ExpressionFactory<'a> {
    /// Creates a factory over a tenant's index configuration.
    pub fn new(config: &'a IndexConfig) -> Self {
        Self { config }
    }

    /// Returns the index configuration.
    pub fn config(&self) -> &'a IndexConfig {
        self.config
    }

    /// Creates a string match. Never fails on the value itself.
    pub fn new_string_expression(
        &self,
        path: SearchPath,
        value: &str,
        exact: bool,
    ) -> Result<StringExpression, ConfigurationError> {
        self.config.require(&path, &[IndexType::String])?;
        Ok(StringExpression::new(path, value, exact))
    }

    /// Creates a token match from `value` or `system|value`.
    ///
    /// The raw value is split on the first `|`; an empty system is stored as
    /// no system at all.
    pub fn new_token_expression(
        &self,
        path: SearchPath,
        raw: &str,
    ) -> Result<TokenExpression, ConfigurationError> {
        self.config.require(&path, &[IndexType::Token])?;
        let (system, value) = match raw.split_once('|') {
            Some((system, value)) => {
                let system = (!system.is_empty()).then(|| system.to_string());
                (system, value)
            }
            None => (None, raw),
        };
        Ok(TokenExpression::new(path, system, value))
    }

    /// Creates a reference match from a `Type/id` literal.
    ///
    /// The literal must contain exactly one `/` with non-empty text on both
    /// sides; anything else is rejected with the offending literal.
    pub fn new_reference_expression(
        &self,
        path: SearchPath,
        raw: &str,
    ) -> Result<ReferenceExpression, ConfigurationError> {
        self.config.require(&path, &[IndexType::Reference])?;
        let (resource_type, id) = parse_reference(raw)?;
        Ok(ReferenceExpression::new(path, resource_type, id))
    }

    /// Creates a numeric comparison. No unit conversion is applied.
    pub fn new_quantity_expression(
        &self,
        path: SearchPath,
        value: Decimal,
        operator: QuantityOperator,
    ) -> Result<QuantityExpression, ConfigurationError> {
        self.config
            .require(&path, &[IndexType::Quantity, IndexType::Number])?;
        Ok(QuantityExpression::new(path, value, operator))
    }

    /// Creates a date range match over `[from, to)`.
    pub fn new_date_range_expression(
        &self,
        path: SearchPath,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<DateRangeExpression, ConfigurationError> {
        self.config.require(&path, &[IndexType::Date])?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ConfigurationError::InvalidValue {
                    value: format!("{}..{}", from, to),
                    param_type: "date".to_string(),
                    message: "range start is after its end".to_string(),
                });
            }
        }
        Ok(DateRangeExpression::new(path, from, to))
    }

    /// Marks the targets of a reference path for inclusion.
    pub fn new_include_expression(
        &self,
        path: SearchPath,
    ) -> Result<IncludeExpression, ConfigurationError> {
        self.config.require(&path, &[IndexType::Reference])?;
        Ok(IncludeExpression::new(path))
    }

    /// Creates a reverse-link filter.
    ///
    /// One leaf is built per value, its kind inferred from the index type at
    /// `target`; the leaves are combined into a single `Or` in input order.
    /// `anchor` is the reference path on the linked type pointing back at the
    /// searched record, and must belong to the same resource type as `target`.
    pub fn new_has_expression<S: AsRef<str>>(
        &self,
        anchor: SearchPath,
        target: SearchPath,
        values: &[S],
    ) -> Result<HasExpression, ConfigurationError> {
        self.config.require(&anchor, &[IndexType::Reference])?;
        if anchor.resource() != target.resource() {
            return Err(ConfigurationError::InvalidValue {
                value: target.to_string(),
                param_type: "_has".to_string(),
                message: format!("target must be on {}", anchor.resource()),
            });
        }
        if values.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                value: String::new(),
                param_type: "_has".to_string(),
                message: "at least one value is required".to_string(),
            });
        }

        let leaves = values
            .iter()
            .map(|value| self.new_leaf_expression(target.clone(), value.as_ref(), false))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HasExpression::new(anchor, vec![Expression::or(leaves)]))
    }

    /// Creates a leaf whose kind follows the index type configured at `path`.
    ///
    /// Quantity, number and date values may carry a comparison prefix.
    pub fn new_leaf_expression(
        &self,
        path: SearchPath,
        raw: &str,
        exact: bool,
    ) -> Result<Expression, ConfigurationError> {
        let index_type = self.config.require(
            &path,
            &[
                IndexType::String,
                IndexType::Token,
                IndexType::Reference,
                IndexType::Quantity,
                IndexType::Number,
                IndexType::Date,
            ],
        )?;

        match index_type {
            IndexType::String => self.new_string_expression(path, raw, exact).map(Into::into),
            IndexType::Token => self.new_token_expression(path, raw).map(Into::into),
            IndexType::Reference => self.new_reference_expression(path, raw).map(Into::into),
            IndexType::Quantity | IndexType::Number => {
                let (prefix, number) = split_prefix(raw);
                let operator = match prefix {
                    None => QuantityOperator::Eq,
                    Some(prefix) => prefix.parse::<QuantityOperator>().map_err(|_| {
                        ConfigurationError::UnsupportedOperator {
                            operator: prefix.to_string(),
                            param_type: index_type.to_string(),
                        }
                    })?,
                };
                self.new_quantity_expression(path, parse_decimal(number)?, operator)
                    .map(Into::into)
            }
            IndexType::Date => {
                let (from, to) = date_range_for(raw)?;
                self.new_date_range_expression(path, from, to)
                    .map(Into::into)
            }
        }
    }

    /// Creates the query root.
    ///
    /// Trees nested deeper than a continuation cursor can carry are rejected.
    pub fn new_select_expression(
        &self,
        resource_type: &str,
        root: Expression,
        total_mode: TotalMode,
    ) -> Result<SelectExpression, ConfigurationError> {
        self.config.require_resource_type(resource_type)?;
        let depth = root.depth();
        if depth > MAX_DEPTH {
            return Err(ConfigurationError::ExpressionTooDeep {
                depth,
                max: MAX_DEPTH,
            });
        }
        Ok(SelectExpression::new(resource_type, root, total_mode))
    }
}

/// Splits a `Type/id` literal.
pub(crate) fn parse_reference(raw: &str) -> Result<(&str, &str), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidReference {
        reference: raw.to_string(),
    };
    let (resource_type, id) = raw.split_once('/').ok_or_else(invalid)?;
    if resource_type.is_empty() || id.is_empty() || id.contains('/') {
        return Err(invalid());
    }
    Ok((resource_type, id))
}
