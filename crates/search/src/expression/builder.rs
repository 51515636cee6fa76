//! Translation of URL query parameters into a [`SelectExpression`].
//!
//! Supported forms:
//!
//! - `name=v1,v2` and `name:exact=v` on configured parameters. Commas separate
//!   alternatives; `\,` is a literal comma.
//! - Comparison prefixes on quantity, number and date values (`ge5.4`, `lt2020`).
//! - `_include=Type:param`
//! - `_has:Type:refParam:param=v1,v2`
//! - `_total=none|estimate|accurate`
//! - `_count=n`, read by [`page_size_from`].
//!
//! Repeated or distinct parameters are ANDed.

use super::{Expression, ExpressionFactory, SelectExpression, TotalMode};
use crate::config::PagingConfig;
use crate::error::{ConfigurationError, EngineResult};
use crate::index::{IndexConfig, IndexType};
use crate::tenant::{Operation, TenantContext};

/// Decoded query parameters in request order.
pub type QueryParameters = Vec<(String, String)>;

const COUNT: &str = "_count";
const TOTAL: &str = "_total";
const INCLUDE: &str = "_include";
const HAS: &str = "_has";
const EXACT: &str = "exact";

/// Builds the query for `resource_type` from its parameters.
///
/// The tenant must be allowed to search the resource type; every parameter is
/// resolved through `config`.
pub fn build_expression(
    tenant: &TenantContext,
    resource_type: &str,
    params: &[(String, String)],
    config: &IndexConfig,
) -> EngineResult<SelectExpression> {
    tenant.check_permission(Operation::Search, resource_type)?;
    config.require_resource_type(resource_type)?;

    let factory = ExpressionFactory::new(config);
    let mut children = Vec::with_capacity(params.len());
    let mut total_mode = TotalMode::None;

    for (name, value) in params {
        match name.as_str() {
            COUNT => {}
            TOTAL => {
                total_mode =
                    TotalMode::parse(value).ok_or_else(|| ConfigurationError::InvalidValue {
                        value: value.clone(),
                        param_type: TOTAL.to_string(),
                        message: "expected none, estimate or accurate".to_string(),
                    })?;
            }
            INCLUDE => children.push(build_include(&factory, resource_type, value)?),
            _ if name.starts_with("_has:") => {
                children.push(build_has(&factory, &name[HAS.len() + 1..], value)?);
            }
            _ => children.push(build_parameter(&factory, resource_type, name, value)?),
        }
    }

    tracing::debug!(
        tenant = %tenant.tenant_id(),
        resource_type = %resource_type,
        parameters = children.len(),
        "Built search expression"
    );

    Ok(factory.new_select_expression(resource_type, Expression::and(children), total_mode)?)
}

/// Reads `_count`, falling back to the configured default and capping at the
/// configured maximum.
pub fn page_size_from(
    params: &[(String, String)],
    config: &PagingConfig,
) -> Result<u32, ConfigurationError> {
    let Some((_, raw)) = params.iter().rev().find(|(name, _)| name == COUNT) else {
        return Ok(config.default_page_size);
    };

    let requested: u32 = raw.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        value: raw.clone(),
        param_type: COUNT.to_string(),
        message: "expected a non-negative integer".to_string(),
    })?;

    if requested > config.max_page_size {
        tracing::debug!(
            requested,
            max = config.max_page_size,
            "Capping requested page size"
        );
    }
    Ok(requested.clamp(1, config.max_page_size.max(1)))
}

fn build_parameter(
    factory: &ExpressionFactory<'_>,
    resource_type: &str,
    name: &str,
    value: &str,
) -> Result<Expression, ConfigurationError> {
    let (code, modifier) = match name.split_once(':') {
        Some((code, modifier)) => (code, Some(modifier)),
        None => (name, None),
    };

    let (path, index_type) = factory.config().resolve(resource_type, code)?;
    let exact = match modifier {
        None => false,
        Some(EXACT) if index_type == IndexType::String => true,
        Some(modifier) => {
            return Err(ConfigurationError::UnsupportedModifier {
                parameter: code.to_string(),
                modifier: modifier.to_string(),
            });
        }
    };

    let mut leaves = split_values(value, name)?
        .iter()
        .map(|v| factory.new_leaf_expression(path.clone(), v, exact))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if leaves.len() == 1 {
        leaves.remove(0)
    } else {
        Expression::or(leaves)
    })
}

fn build_include(
    factory: &ExpressionFactory<'_>,
    resource_type: &str,
    value: &str,
) -> Result<Expression, ConfigurationError> {
    let invalid = |message: &str| ConfigurationError::InvalidValue {
        value: value.to_string(),
        param_type: INCLUDE.to_string(),
        message: message.to_string(),
    };

    let (source, param) = value
        .split_once(':')
        .ok_or_else(|| invalid("expected Type:parameter"))?;
    if source != resource_type {
        return Err(invalid("source type must be the searched type"));
    }

    let (path, _) = factory.config().resolve(source, param)?;
    Ok(factory.new_include_expression(path)?.into())
}

/// Builds a reverse-link filter from the part of the name after `_has:`.
fn build_has(
    factory: &ExpressionFactory<'_>,
    chain: &str,
    value: &str,
) -> Result<Expression, ConfigurationError> {
    let mut parts = chain.splitn(3, ':');
    let (Some(child), Some(reference), Some(param)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ConfigurationError::InvalidValue {
            value: chain.to_string(),
            param_type: HAS.to_string(),
            message: "expected _has:Type:reference:parameter".to_string(),
        });
    };
    if param.contains(':') {
        return Err(ConfigurationError::UnsupportedModifier {
            parameter: HAS.to_string(),
            modifier: param.to_string(),
        });
    }

    let (anchor, _) = factory.config().resolve(child, reference)?;
    let (target, _) = factory.config().resolve(child, param)?;
    let values = split_values(value, HAS)?;
    Ok(factory.new_has_expression(anchor, target, values.as_slice())?.into())
}

/// Splits a parameter value on unescaped commas; `\x` stands for `x`.
fn split_values(raw: &str, name: &str) -> Result<Vec<String>, ConfigurationError> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            ',' => values.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    values.push(current);

    if values.iter().any(String::is_empty) {
        return Err(ConfigurationError::InvalidValue {
            value: raw.to_string(),
            param_type: name.to_string(),
            message: "empty value".to_string(),
        });
    }
    Ok(values)
}
