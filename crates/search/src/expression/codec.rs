//! Compact textual form of expression trees.
//!
//! The encoding is length-prefixed, so leaf values never need escaping:
//!
//! | Element  | Form                                   |
//! |----------|----------------------------------------|
//! | string   | `<byte length>:<bytes>`                |
//! | count    | `<n>#`                                 |
//! | integer  | `<n>;` (may be negative)               |
//! | optional | `-` when absent, `+<value>` when set   |
//! | path     | string resource, then string path      |
//!
//! Every node starts with a one-character tag:
//!
//! | Tag | Node      | Fields                                        |
//! |-----|-----------|-----------------------------------------------|
//! | `A` | And       | count, children                               |
//! | `O` | Or        | count, children                               |
//! | `s` | String    | path, value, `1`/`0` exact flag               |
//! | `t` | Token     | path, optional system, value                  |
//! | `q` | Quantity  | path, operator, decimal value                 |
//! | `d` | DateRange | path, optional from, optional to              |
//! | `r` | Reference | path, resource type, id                       |
//! | `i` | Include   | path                                          |
//! | `h` | Has       | anchor path, count, sub-expressions           |
//! | `S` | Select    | resource type, total mode (`n`/`b`/`a`), root |
//!
//! Instants are written as two integers, seconds since the Unix epoch then
//! nanoseconds, so every year the factory accepts survives a round trip.
//!
//! A complete token is prefixed with the format version `x1.`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{
    DateRangeExpression, Expression, HasExpression, IncludeExpression, QuantityExpression,
    QuantityOperator, ReferenceExpression, SelectExpression, StringExpression, TokenExpression,
    TotalMode,
};
use crate::error::{CursorError, CursorResult};
use crate::index::SearchPath;

const VERSION_PREFIX: &str = "x1.";

/// Nesting limit of an expression tree. The decoder enforces it so hostile
/// input cannot exhaust the stack, and the factory refuses deeper queries.
pub(crate) const MAX_DEPTH: usize = 64;

/// Longest decimal number accepted for a length, count or integer.
const MAX_DIGITS: usize = 19;

/// Serializes an expression subtree.
pub fn serialize(expression: &Expression) -> String {
    let mut writer = Writer::with_prefix(VERSION_PREFIX);
    writer.expression(expression);
    writer.finish()
}

/// Reconstructs an expression subtree produced by [`serialize`].
pub fn deserialize(input: &str) -> CursorResult<Expression> {
    let mut reader = Reader::new(input);
    reader.expect(VERSION_PREFIX)?;
    let expression = reader.expression()?;
    reader.finish()?;
    Ok(expression)
}

/// Serializes a whole query.
pub fn serialize_select(select: &SelectExpression) -> String {
    let mut writer = Writer::with_prefix(VERSION_PREFIX);
    writer.select(select);
    writer.finish()
}

/// Reconstructs a query produced by [`serialize_select`].
pub fn deserialize_select(input: &str) -> CursorResult<SelectExpression> {
    let mut reader = Reader::new(input);
    reader.expect(VERSION_PREFIX)?;
    let select = reader.select()?;
    reader.finish()?;
    Ok(select)
}

/// Appends encoded elements to a buffer.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: String,
}

impl Writer {
    pub(crate) fn with_prefix(prefix: &str) -> Self {
        Self {
            buf: prefix.to_string(),
        }
    }

    pub(crate) fn tag(&mut self, tag: char) {
        self.buf.push(tag);
    }

    pub(crate) fn str(&mut self, value: &str) {
        self.buf.push_str(&value.len().to_string());
        self.buf.push(':');
        self.buf.push_str(value);
    }

    pub(crate) fn opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.buf.push('+');
                self.str(value);
            }
            None => self.buf.push('-'),
        }
    }

    pub(crate) fn count(&mut self, n: usize) {
        self.buf.push_str(&n.to_string());
        self.buf.push('#');
    }

    pub(crate) fn int(&mut self, n: i64) {
        self.buf.push_str(&n.to_string());
        self.buf.push(';');
    }

    pub(crate) fn opt_int(&mut self, n: Option<i64>) {
        match n {
            Some(n) => {
                self.buf.push('+');
                self.int(n);
            }
            None => self.buf.push('-'),
        }
    }

    fn path(&mut self, path: &SearchPath) {
        self.str(path.resource());
        self.str(path.path());
    }

    fn instant(&mut self, instant: Option<DateTime<Utc>>) {
        match instant {
            Some(instant) => {
                self.buf.push('+');
                self.int(instant.timestamp());
                self.int(i64::from(instant.timestamp_subsec_nanos()));
            }
            None => self.buf.push('-'),
        }
    }

    fn expressions(&mut self, children: &[Expression]) {
        self.count(children.len());
        for child in children {
            self.expression(child);
        }
    }

    pub(crate) fn expression(&mut self, expression: &Expression) {
        match expression {
            Expression::And(children) => {
                self.tag('A');
                self.expressions(children);
            }
            Expression::Or(children) => {
                self.tag('O');
                self.expressions(children);
            }
            Expression::String(e) => {
                self.tag('s');
                self.path(e.path());
                self.str(e.value());
                self.tag(if e.exact() { '1' } else { '0' });
            }
            Expression::Token(e) => {
                self.tag('t');
                self.path(e.path());
                self.opt_str(e.system());
                self.str(e.value());
            }
            Expression::Quantity(e) => {
                self.tag('q');
                self.path(e.path());
                self.str(e.operator().as_str());
                self.str(&e.value().to_string());
            }
            Expression::DateRange(e) => {
                self.tag('d');
                self.path(e.path());
                self.instant(e.from());
                self.instant(e.to());
            }
            Expression::Reference(e) => {
                self.tag('r');
                self.path(e.path());
                self.str(e.resource_type());
                self.str(e.id());
            }
            Expression::Include(e) => {
                self.tag('i');
                self.path(e.path());
            }
            Expression::Has(e) => {
                self.tag('h');
                self.path(e.anchor_path());
                self.expressions(e.sub_expressions());
            }
        }
    }

    pub(crate) fn select(&mut self, select: &SelectExpression) {
        self.tag('S');
        self.str(select.resource_type());
        self.tag(match select.total_mode() {
            TotalMode::None => 'n',
            TotalMode::BestEffort => 'b',
            TotalMode::Always => 'a',
        });
        self.expression(select.root());
    }

    pub(crate) fn finish(self) -> String {
        self.buf
    }
}

/// Consumes encoded elements, tracking the byte offset for error reporting.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> CursorError {
        CursorError::Unreadable {
            offset: self.pos,
            message: message.into(),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub(crate) fn expect(&mut self, literal: &str) -> CursorResult<()> {
        if self.input[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", literal)))
        }
    }

    pub(crate) fn tag(&mut self) -> CursorResult<char> {
        let c = self.input[self.pos..]
            .chars()
            .next()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn number(&mut self, terminator: char) -> CursorResult<&'a str> {
        let rest = &self.input[self.pos..];
        let end = rest
            .find(terminator)
            .ok_or_else(|| self.error(format!("missing {:?}", terminator)))?;
        let digits = &rest[..end];
        let body = digits.strip_prefix('-').unwrap_or(digits);
        if body.is_empty() || body.len() > MAX_DIGITS || !body.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(self.error(format!("malformed number {:?}", digits)));
        }
        self.pos += end + terminator.len_utf8();
        Ok(digits)
    }

    fn length(&mut self, terminator: char) -> CursorResult<usize> {
        let start = self.pos;
        let digits = self.number(terminator)?;
        digits.parse::<usize>().map_err(|_| CursorError::Unreadable {
            offset: start,
            message: format!("invalid length {:?}", digits),
        })
    }

    pub(crate) fn str(&mut self) -> CursorResult<&'a str> {
        let len = self.length(':')?;
        if len > self.remaining() {
            return Err(self.error("string runs past end of input"));
        }
        let end = self.pos + len;
        if !self.input.is_char_boundary(end) {
            return Err(self.error("string splits a character"));
        }
        let value = &self.input[self.pos..end];
        self.pos = end;
        Ok(value)
    }

    pub(crate) fn opt_str(&mut self) -> CursorResult<Option<&'a str>> {
        match self.tag()? {
            '+' => self.str().map(Some),
            '-' => Ok(None),
            other => Err(self.error(format!("invalid optional marker {:?}", other))),
        }
    }

    pub(crate) fn count(&mut self) -> CursorResult<usize> {
        let n = self.length('#')?;
        // Every element takes at least one byte.
        if n > self.remaining() {
            return Err(self.error(format!("count {} exceeds input", n)));
        }
        Ok(n)
    }

    pub(crate) fn int(&mut self) -> CursorResult<i64> {
        let start = self.pos;
        let digits = self.number(';')?;
        digits.parse::<i64>().map_err(|_| CursorError::Unreadable {
            offset: start,
            message: format!("invalid integer {:?}", digits),
        })
    }

    pub(crate) fn opt_int(&mut self) -> CursorResult<Option<i64>> {
        match self.tag()? {
            '+' => self.int().map(Some),
            '-' => Ok(None),
            other => Err(self.error(format!("invalid optional marker {:?}", other))),
        }
    }

    fn path(&mut self) -> CursorResult<SearchPath> {
        let resource = self.str()?;
        let path = self.str()?;
        if resource.is_empty() || path.is_empty() {
            return Err(self.error("empty search path"));
        }
        Ok(SearchPath::new(resource, path))
    }

    fn instant(&mut self) -> CursorResult<Option<DateTime<Utc>>> {
        let start = self.pos;
        let Some(secs) = self.opt_int()? else {
            return Ok(None);
        };
        let nanos = self.int()?;
        u32::try_from(nanos)
            .ok()
            .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
            .map(Some)
            .ok_or_else(|| CursorError::Unreadable {
                offset: start,
                message: format!("instant out of range: {}s {}ns", secs, nanos),
            })
    }

    fn expressions(&mut self) -> CursorResult<Vec<Expression>> {
        let n = self.count()?;
        let mut children = Vec::with_capacity(n);
        for _ in 0..n {
            children.push(self.expression()?);
        }
        Ok(children)
    }

    pub(crate) fn expression(&mut self) -> CursorResult<Expression> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = self.node();
        self.depth -= 1;
        result
    }

    fn node(&mut self) -> CursorResult<Expression> {
        let tag_offset = self.pos;
        let expression: Expression = match self.tag()? {
            'A' => Expression::And(self.expressions()?),
            'O' => Expression::Or(self.expressions()?),
            's' => {
                let path = self.path()?;
                let value = self.str()?;
                let exact = match self.tag()? {
                    '1' => true,
                    '0' => false,
                    other => return Err(self.error(format!("invalid exact flag {:?}", other))),
                };
                StringExpression::new(path, value, exact).into()
            }
            't' => {
                let path = self.path()?;
                let system = self.opt_str()?.map(str::to_string);
                let value = self.str()?;
                TokenExpression::new(path, system, value).into()
            }
            'q' => {
                let path = self.path()?;
                let operator = self.str()?;
                let operator = QuantityOperator::from_str(operator).map_err(|e| self.error(e))?;
                let value = self.str()?;
                let value = Decimal::from_str(value).map_err(|e| self.error(e.to_string()))?;
                QuantityExpression::new(path, value, operator).into()
            }
            'd' => {
                let path = self.path()?;
                let from = self.instant()?;
                let to = self.instant()?;
                if let (Some(from), Some(to)) = (from, to) {
                    if from > to {
                        return Err(self.error("date range start is after its end"));
                    }
                }
                DateRangeExpression::new(path, from, to).into()
            }
            'r' => {
                let path = self.path()?;
                let resource_type = self.str()?;
                let id = self.str()?;
                if resource_type.is_empty() || id.is_empty() {
                    return Err(self.error("empty reference"));
                }
                ReferenceExpression::new(path, resource_type, id).into()
            }
            'i' => IncludeExpression::new(self.path()?).into(),
            'h' => {
                let anchor = self.path()?;
                HasExpression::new(anchor, self.expressions()?).into()
            }
            other => {
                return Err(CursorError::Unreadable {
                    offset: tag_offset,
                    message: format!("unknown node tag {:?}", other),
                });
            }
        };
        Ok(expression)
    }

    pub(crate) fn select(&mut self) -> CursorResult<SelectExpression> {
        if self.tag()? != 'S' {
            return Err(self.error("expected select node"));
        }
        let resource_type = self.str()?;
        if resource_type.is_empty() {
            return Err(self.error("empty resource type"));
        }
        let total_mode = match self.tag()? {
            'n' => TotalMode::None,
            'b' => TotalMode::BestEffort,
            'a' => TotalMode::Always,
            other => return Err(self.error(format!("invalid total mode {:?}", other))),
        };
        let root = self.expression()?;
        Ok(SelectExpression::new(resource_type, root, total_mode))
    }

    pub(crate) fn finish(&self) -> CursorResult<()> {
        if self.pos == self.input.len() {
            Ok(())
        } else {
            Err(self.error("trailing data"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionFactory;
    use crate::index::IndexConfig;
    use chrono::TimeZone;
    use serde_json::json;

    fn path(resource: &str, p: &str) -> SearchPath {
        SearchPath::new(resource, p)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn sample() -> SelectExpression {
        let root = Expression::and(vec![
            Expression::or(vec![
                StringExpression::new(path("Patient", "name.family"), "Müller", false).into(),
                StringExpression::new(path("Patient", "name.family"), "", true).into(),
            ]),
            TokenExpression::new(
                path("Patient", "identifier"),
                Some("urn:sys|x".to_string()),
                "12:34#;",
            )
            .into(),
            TokenExpression::new(path("Patient", "gender"), None, "female").into(),
            QuantityExpression::new(
                path("Patient", "weight"),
                Decimal::new(-7250, 2),
                QuantityOperator::Ne,
            )
            .into(),
            DateRangeExpression::new(
                path("Patient", "birthDate"),
                Some(utc("2020-01-01T00:00:00Z")),
                Some(utc("2020-01-01T00:00:00.125Z")),
            )
            .into(),
            DateRangeExpression::new(path("Patient", "birthDate"), None, None).into(),
            ReferenceExpression::new(path("Patient", "managingOrganization"), "Organization", "1")
                .into(),
            IncludeExpression::new(path("Patient", "managingOrganization")).into(),
            HasExpression::new(
                path("Observation", "subject"),
                vec![Expression::or(vec![
                    TokenExpression::new(path("Observation", "code"), None, "8867-4").into(),
                ])],
            )
            .into(),
            Expression::and(vec![]),
        ]);
        SelectExpression::new("Patient", root, TotalMode::BestEffort)
    }

    #[test]
    fn test_select_round_trip() {
        let select = sample();
        let text = serialize_select(&select);
        assert!(text.starts_with(VERSION_PREFIX));
        assert_eq!(deserialize_select(&text).unwrap(), select);
    }

    #[test]
    fn test_subtree_round_trip() {
        let select = sample();
        for child in select.root().children() {
            assert_eq!(&deserialize(&serialize(child)).unwrap(), child);
        }
    }

    #[test]
    fn test_decimal_scale_is_preserved() {
        let e: Expression =
            QuantityExpression::new(path("Obs", "value"), Decimal::new(540, 2), QuantityOperator::Ge)
                .into();
        let Expression::Quantity(q) = deserialize(&serialize(&e)).unwrap() else {
            panic!("expected quantity");
        };
        assert_eq!(q.value().to_string(), "5.40");
    }

    #[test]
    fn test_every_truncation_fails() {
        let text = serialize_select(&sample());
        for end in 0..text.len() {
            if !text.is_char_boundary(end) {
                continue;
            }
            let err = deserialize_select(&text[..end]).unwrap_err();
            assert!(
                matches!(err, CursorError::Unreadable { .. }),
                "truncation at {} gave {:?}",
                end,
                err
            );
        }
    }

    #[test]
    fn test_trailing_data_rejected() {
        let mut text = serialize(&Expression::and(vec![]));
        text.push('A');
        assert!(matches!(
            deserialize(&text),
            Err(CursorError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        for garbage in [
            "",
            "x1.",
            "x2.A0#",
            "x1.Z",
            "x1.A99999999999999999999#",
            "x1.A5#",
            "x1.s7:Patient4:name3:abc2",
            "x1.s7:Patient4:name99:abc0",
            "x1.q7:Patient6:weight2:zz1:5",
            "x1.r7:Patient3:org0:1:1",
            "x1.d7:Patient4:date+4:soon-",
        ] {
            assert!(
                matches!(deserialize(garbage), Err(CursorError::Unreadable { .. })),
                "{:?} was accepted",
                garbage
            );
        }
    }

    #[test]
    fn test_split_character_rejected() {
        // "é" is two bytes; a length of 1 would split it.
        let text = "x1.s7:Patient4:name1:é0";
        assert!(deserialize(text).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut text = String::from(VERSION_PREFIX);
        for _ in 0..=MAX_DEPTH {
            text.push_str("A1#");
        }
        text.push_str("A0#");
        let err = deserialize(&text).unwrap_err();
        assert!(matches!(err, CursorError::Unreadable { .. }));
    }

    #[test]
    fn test_error_reports_offset() {
        let err = deserialize("x1.A1#Q").unwrap_err();
        assert_eq!(
            err,
            CursorError::Unreadable {
                offset: 6,
                message: "unknown node tag 'Q'".to_string()
            }
        );
    }

    #[test]
    fn test_ints_round_trip() {
        let mut writer = Writer::default();
        writer.int(-42);
        writer.opt_int(None);
        writer.opt_int(Some(i64::MAX));
        let text = writer.finish();

        let mut reader = Reader::new(&text);
        assert_eq!(reader.int().unwrap(), -42);
        assert_eq!(reader.opt_int().unwrap(), None);
        assert_eq!(reader.opt_int().unwrap(), Some(i64::MAX));
        reader.finish().unwrap();
    }

    fn edge_config() -> IndexConfig {
        IndexConfig::from_value(json!({
            "resources": {
                "Patient": {
                    "name": { "path": "name.family", "type": "string" },
                    "identifier": { "path": "identifier", "type": "token" },
                    "birthdate": { "path": "birthDate", "type": "date" },
                    "weight": { "path": "weight", "type": "quantity" },
                    "organization": { "path": "managingOrganization", "type": "reference" }
                }
            }
        }))
        .unwrap()
    }

    fn assert_round_trip(leaf: &Expression) {
        let text = serialize(leaf);
        match deserialize(&text) {
            Ok(decoded) => assert_eq!(&decoded, leaf, "{:?} decoded differently", text),
            Err(e) => panic!("{:?} from {:?} did not decode: {}", text, leaf, e),
        }
    }

    #[test]
    fn test_edge_values_round_trip() {
        let config = edge_config();
        let factory = ExpressionFactory::new(&config);
        let at = |p: &str| SearchPath::new("Patient", p);

        let dates = [
            "0000", "0001", "9999", "-999", "0001-01", "9999-12", "0001-01-01",
            "9999-12-31", "2024-02-29", "0001-01-01T00:00:00Z", "9999-12-31T23:59:59Z",
            "9999-12-31T23:59:59.999Z", "2020-06-15T10:30:00.123456789+14:00",
            "1969-12-31T23:59:59.5-12:00",
        ];
        let prefixes = ["", "eq", "lt", "le", "gt", "ge", "sa", "eb"];
        let quantities = [
            "0", "-0.5", "79228162514264337593543950335", "-79228162514264337593543950335",
            "0.0000000000000000000000000001", "-0.0000000000000000000000000001",
            "5.4000", "1e-5", "ne-3", "ge7.25",
        ];
        let strings = [
            "", "Müller", "日本語", "🚀", "12:34", "a#b;c", "+-", "x1.", "\\,", " ",
        ];
        let tokens = ["code", "sys|", "|code", "a|b|c", "urn:x|12:3#", "ü|🚀"];
        let references = ["Patient/1", "Organization/😀", "A/1:2#;", "x1./-"];

        let mut leaves: Vec<Expression> = Vec::new();
        for date in dates {
            for prefix in prefixes {
                let raw = format!("{}{}", prefix, date);
                leaves.push(factory.new_leaf_expression(at("birthDate"), &raw, false).unwrap());
            }
        }
        for raw in quantities {
            leaves.push(factory.new_leaf_expression(at("weight"), raw, false).unwrap());
        }
        for raw in strings {
            for exact in [true, false] {
                leaves.push(factory.new_leaf_expression(at("name.family"), raw, exact).unwrap());
            }
        }
        for raw in tokens {
            leaves.push(factory.new_leaf_expression(at("identifier"), raw, false).unwrap());
        }
        for raw in references {
            leaves.push(
                factory
                    .new_leaf_expression(at("managingOrganization"), raw, false)
                    .unwrap(),
            );
        }

        for leaf in &leaves {
            assert_round_trip(leaf);
        }

        let select = factory
            .new_select_expression("Patient", Expression::or(leaves), TotalMode::Always)
            .unwrap();
        assert_eq!(deserialize_select(&serialize_select(&select)).unwrap(), select);
    }

    #[test]
    fn test_extreme_years_round_trip() {
        let config = edge_config();
        let factory = ExpressionFactory::new(&config);
        let birth_date = SearchPath::new("Patient", "birthDate");

        for raw in ["9999", "9999-12-31", "le9999", "-999", "ge-999"] {
            let leaf = factory
                .new_leaf_expression(birth_date.clone(), raw, false)
                .unwrap();
            assert_round_trip(&leaf);
        }

        let Expression::DateRange(range) = factory
            .new_leaf_expression(birth_date, "9999", false)
            .unwrap()
        else {
            panic!("expected a date range");
        };
        assert_eq!(range.to(), Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).single());
    }

    #[test]
    fn test_instant_out_of_range_rejected() {
        let text = format!("x1.d7:Patient4:date+{};0;-", i64::MAX);
        assert!(matches!(
            deserialize(&text),
            Err(CursorError::Unreadable { .. })
        ));
        assert!(deserialize("x1.d7:Patient4:date+0;-1;-").is_err());
    }

    #[test]
    fn test_depth_limit_matches_encoder() {
        let mut deepest: Expression = IncludeExpression::new(path("Patient", "link")).into();
        for _ in 1..MAX_DEPTH {
            deepest = Expression::and(vec![deepest]);
        }
        assert_eq!(deepest.depth(), MAX_DEPTH);
        assert_eq!(deserialize(&serialize(&deepest)).unwrap(), deepest);

        let too_deep = Expression::and(vec![deepest]);
        assert!(deserialize(&serialize(&too_deep)).is_err());
    }
}
