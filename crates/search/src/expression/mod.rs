//! Search expression tree.
//!
//! A decoded search query is a [`SelectExpression`] whose root is a tree of
//! [`Expression`] nodes. The set of node kinds is closed: every consumer (the
//! codec, storage translators) matches exhaustively, so adding a kind is a
//! compile error everywhere it has to be handled.
//!
//! Leaves are built through the [`ExpressionFactory`], which validates input
//! against the tenant's [`IndexConfig`](crate::index::IndexConfig).
//!
//! # Example
//!
//! ```
//! use helios_search::expression::{Expression, ExpressionFactory, SelectExpression, TotalMode};
//! use helios_search::index::{IndexConfig, SearchPath};
//! use serde_json::json;
//!
//! let config = IndexConfig::from_value(json!({
//!     "resources": { "Patient": { "gender": { "path": "gender", "type": "token" } } }
//! })).unwrap();
//! let factory = ExpressionFactory::new(&config);
//!
//! let gender = factory
//!     .new_token_expression(SearchPath::new("Patient", "gender"), "female")
//!     .unwrap();
//! let select = factory
//!     .new_select_expression("Patient", Expression::and(vec![gender.into()]), TotalMode::None)
//!     .unwrap();
//! assert_eq!(select.resource_type(), "Patient");
//! ```

mod builder;
mod codec;
mod factory;
mod value;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::index::SearchPath;

pub use builder::{QueryParameters, build_expression, page_size_from};
pub use codec::{deserialize, deserialize_select, serialize, serialize_select};
pub(crate) use codec::{Reader, Writer};
pub use factory::ExpressionFactory;
pub(crate) use factory::parse_reference;
pub(crate) use value::{parse_date_bounds, parse_decimal};

/// A node of the search expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// All children must match. An empty `And` matches everything.
    And(Vec<Expression>),
    /// At least one child must match.
    Or(Vec<Expression>),
    /// String comparison.
    String(StringExpression),
    /// Code comparison, optionally qualified by a system.
    Token(TokenExpression),
    /// Numeric comparison.
    Quantity(QuantityExpression),
    /// Instant falls within a half-open range.
    DateRange(DateRangeExpression),
    /// Reference to a specific resource.
    Reference(ReferenceExpression),
    /// Linked resources to return alongside the matches. Never filters.
    Include(IncludeExpression),
    /// Reverse-link filter on linked child records.
    Has(HasExpression),
}

impl Expression {
    /// Creates an `And` node.
    pub fn and(children: Vec<Expression>) -> Self {
        Expression::And(children)
    }

    /// Creates an `Or` node.
    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Or(children)
    }

    /// Returns the child nodes of a composite node, or an empty slice for leaves.
    pub fn children(&self) -> &[Expression] {
        match self {
            Expression::And(children) | Expression::Or(children) => children,
            Expression::Has(has) => has.sub_expressions(),
            Expression::String(_)
            | Expression::Token(_)
            | Expression::Quantity(_)
            | Expression::DateRange(_)
            | Expression::Reference(_)
            | Expression::Include(_) => &[],
        }
    }

    /// Returns the number of nested levels, counting this node; a leaf is 1.
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(Expression::depth)
            .max()
            .unwrap_or(0)
    }

    /// Returns the search path of a leaf, or the anchor of a `Has` node.
    pub fn path(&self) -> Option<&SearchPath> {
        match self {
            Expression::And(_) | Expression::Or(_) => None,
            Expression::String(e) => Some(&e.path),
            Expression::Token(e) => Some(&e.path),
            Expression::Quantity(e) => Some(&e.path),
            Expression::DateRange(e) => Some(&e.path),
            Expression::Reference(e) => Some(&e.path),
            Expression::Include(e) => Some(&e.path),
            Expression::Has(e) => Some(&e.anchor_path),
        }
    }

    /// Collects the include directives reachable without crossing a `Has` node.
    pub fn includes(&self) -> Vec<&IncludeExpression> {
        let mut out = Vec::new();
        self.collect_includes(&mut out);
        out
    }

    fn collect_includes<'a>(&'a self, out: &mut Vec<&'a IncludeExpression>) {
        match self {
            Expression::Include(include) => out.push(include),
            Expression::And(children) | Expression::Or(children) => {
                for child in children {
                    child.collect_includes(out);
                }
            }
            _ => {}
        }
    }
}

macro_rules! impl_from_leaf {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expression {
                fn from(node: $ty) -> Self {
                    Expression::$variant(node)
                }
            }
        )*
    };
}

impl_from_leaf! {
    String => StringExpression,
    Token => TokenExpression,
    Quantity => QuantityExpression,
    DateRange => DateRangeExpression,
    Reference => ReferenceExpression,
    Include => IncludeExpression,
    Has => HasExpression,
}

/// String match at a path. Non-exact matches are case-insensitive prefix matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringExpression {
    path: SearchPath,
    value: String,
    exact: bool,
}

impl StringExpression {
    pub(crate) fn new(path: SearchPath, value: impl Into<String>, exact: bool) -> Self {
        Self {
            path,
            value: value.into(),
            exact,
        }
    }

    /// Returns the search path.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Returns the value to match.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true for exact (case-sensitive, whole value) matching.
    pub fn exact(&self) -> bool {
        self.exact
    }
}

/// Token match at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExpression {
    path: SearchPath,
    system: Option<String>,
    value: String,
}

impl TokenExpression {
    pub(crate) fn new(path: SearchPath, system: Option<String>, value: impl Into<String>) -> Self {
        Self {
            path,
            system,
            value: value.into(),
        }
    }

    /// Returns the search path.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Returns the code system, if the token was qualified.
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Returns the code.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Comparison operator of a [`QuantityExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantityOperator {
    /// Equal (default).
    #[default]
    Eq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Not equal.
    Ne,
}

impl QuantityOperator {
    /// Returns the two-letter prefix form.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityOperator::Eq => "eq",
            QuantityOperator::Lt => "lt",
            QuantityOperator::Le => "le",
            QuantityOperator::Gt => "gt",
            QuantityOperator::Ge => "ge",
            QuantityOperator::Ne => "ne",
        }
    }

    /// Returns true if `stored.cmp(&searched)` satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            QuantityOperator::Eq => ordering == Ordering::Equal,
            QuantityOperator::Lt => ordering == Ordering::Less,
            QuantityOperator::Le => ordering != Ordering::Greater,
            QuantityOperator::Gt => ordering == Ordering::Greater,
            QuantityOperator::Ge => ordering != Ordering::Less,
            QuantityOperator::Ne => ordering != Ordering::Equal,
        }
    }
}

impl fmt::Display for QuantityOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantityOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(QuantityOperator::Eq),
            "lt" => Ok(QuantityOperator::Lt),
            "le" => Ok(QuantityOperator::Le),
            "gt" => Ok(QuantityOperator::Gt),
            "ge" => Ok(QuantityOperator::Ge),
            "ne" => Ok(QuantityOperator::Ne),
            _ => Err(format!("unknown quantity operator: {}", s)),
        }
    }
}

/// Numeric comparison at a path. Units are not converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityExpression {
    path: SearchPath,
    value: Decimal,
    operator: QuantityOperator,
}

impl QuantityExpression {
    pub(crate) fn new(path: SearchPath, value: Decimal, operator: QuantityOperator) -> Self {
        Self {
            path,
            value,
            operator,
        }
    }

    /// Returns the search path.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Returns the value compared against.
    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Returns the comparison operator.
    pub fn operator(&self) -> QuantityOperator {
        self.operator
    }
}

/// Matches instants in `[from, to)`. A missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeExpression {
    path: SearchPath,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl DateRangeExpression {
    pub(crate) fn new(
        path: SearchPath,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        Self { path, from, to }
    }

    /// Returns the search path.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Returns the inclusive lower bound.
    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    /// Returns the exclusive upper bound.
    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.to
    }

    /// Returns true if the instant falls within the range.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| instant >= from) && self.to.is_none_or(|to| instant < to)
    }
}

/// Reference to `type/id` at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceExpression {
    path: SearchPath,
    resource_type: String,
    id: String,
}

impl ReferenceExpression {
    pub(crate) fn new(
        path: SearchPath,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            path,
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Returns the search path.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Returns the referenced resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the referenced id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the `Type/id` literal.
    pub fn literal(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Marks a reference path whose targets are returned with the matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeExpression {
    path: SearchPath,
}

impl IncludeExpression {
    pub(crate) fn new(path: SearchPath) -> Self {
        Self { path }
    }

    /// Returns the reference path to follow.
    pub fn path(&self) -> &SearchPath {
        &self.path
    }
}

/// Reverse-link filter.
///
/// A record of type `T` matches when some record of type
/// `anchor_path.resource()` references it through `anchor_path` and satisfies
/// one of the sub-expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct HasExpression {
    anchor_path: SearchPath,
    sub_expressions: Vec<Expression>,
}

impl HasExpression {
    pub(crate) fn new(anchor_path: SearchPath, sub_expressions: Vec<Expression>) -> Self {
        Self {
            anchor_path,
            sub_expressions,
        }
    }

    /// Returns the reference path on the linked record type.
    pub fn anchor_path(&self) -> &SearchPath {
        &self.anchor_path
    }

    /// Returns the filters applied to linked records.
    pub fn sub_expressions(&self) -> &[Expression] {
        &self.sub_expressions
    }
}

/// How the total number of matches is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TotalMode {
    /// No total is reported.
    #[default]
    None,
    /// Report a total only when it is known without an extra count query.
    BestEffort,
    /// Always run a count query.
    Always,
}

impl TotalMode {
    /// Parses the `_total` parameter value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(TotalMode::None),
            "estimate" => Some(TotalMode::BestEffort),
            "accurate" => Some(TotalMode::Always),
            _ => None,
        }
    }
}

/// The root of a search query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpression {
    resource_type: String,
    root: Expression,
    total_mode: TotalMode,
}

impl SelectExpression {
    pub(crate) fn new(
        resource_type: impl Into<String>,
        root: Expression,
        total_mode: TotalMode,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            root,
            total_mode,
        }
    }

    /// Returns the resource type searched.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the filter tree.
    pub fn root(&self) -> &Expression {
        &self.root
    }

    /// Returns the total mode.
    pub fn total_mode(&self) -> TotalMode {
        self.total_mode
    }
}
