//! Search context and the plaintext cursor payload.

use serde::{Deserialize, Serialize};

use crate::error::{CursorError, CursorResult};
use crate::expression::{Reader, SelectExpression, Writer};
use crate::tenant::TenantId;

const PAYLOAD_PREFIX: &str = "c1.";

/// Position of a client within a paged result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContext {
    /// Revision snapshot; records written later are never returned.
    pub revision: i64,

    /// The page starts after this id. Empty on the first page.
    pub first_id: String,

    /// Total match count, when known.
    pub total: Option<i64>,
}

impl SearchContext {
    /// Creates the context of a first page.
    pub fn new(revision: i64) -> Self {
        Self {
            revision,
            first_id: String::new(),
            total: None,
        }
    }

    /// Returns the context of the page following `last_id`.
    pub fn after(&self, last_id: impl Into<String>) -> Self {
        Self {
            revision: self.revision,
            first_id: last_id.into(),
            total: self.total,
        }
    }

    /// Sets the total.
    pub fn with_total(mut self, total: Option<i64>) -> Self {
        self.total = total;
        self
    }
}

/// Everything a cursor carries, before encryption.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPayload {
    /// Id of the paging state this cursor continues.
    pub uuid: String,
    /// Tenant the cursor was issued to.
    pub tenant_id: TenantId,
    /// Where the next page starts.
    pub context: SearchContext,
    /// Page size of the paging run.
    pub page_size: u32,
    /// The query being paged.
    pub select: SelectExpression,
}

impl CursorPayload {
    /// Encodes the payload as text.
    ///
    /// Layout after the `c1.` prefix: uuid, tenant, revision, first id,
    /// optional total, page size, then the serialized select node.
    pub fn encode(&self) -> String {
        let mut writer = Writer::with_prefix(PAYLOAD_PREFIX);
        writer.str(&self.uuid);
        writer.str(self.tenant_id.as_str());
        writer.int(self.context.revision);
        writer.str(&self.context.first_id);
        writer.opt_int(self.context.total);
        writer.int(i64::from(self.page_size));
        writer.select(&self.select);
        writer.finish()
    }

    /// Decodes a payload produced by [`encode`](Self::encode).
    pub fn decode(input: &str) -> CursorResult<Self> {
        let mut reader = Reader::new(input);
        reader.expect(PAYLOAD_PREFIX)?;
        let uuid = reader.str()?.to_string();
        if uuid.is_empty() {
            return Err(CursorError::Unreadable {
                offset: PAYLOAD_PREFIX.len(),
                message: "missing paging id".to_string(),
            });
        }
        let tenant_id = TenantId::new(reader.str()?);
        let revision = reader.int()?;
        let first_id = reader.str()?.to_string();
        let total = reader.opt_int()?;
        let offset = reader.offset();
        let page_size = reader.int()?;
        let page_size = u32::try_from(page_size)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| CursorError::Unreadable {
                offset,
                message: format!("invalid page size {}", page_size),
            })?;
        let select = reader.select()?;
        reader.finish()?;

        Ok(Self {
            uuid,
            tenant_id,
            context: SearchContext {
                revision,
                first_id,
                total,
            },
            page_size,
            select,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, ExpressionFactory, TotalMode};
    use crate::index::{IndexConfig, SearchPath};
    use serde_json::json;

    fn payload() -> CursorPayload {
        let config = IndexConfig::from_value(json!({
            "resources": { "Patient": { "name": { "path": "name", "type": "string" } } }
        }))
        .unwrap();
        let factory = ExpressionFactory::new(&config);
        let name = factory
            .new_string_expression(SearchPath::new("Patient", "name"), "Zoë", false)
            .unwrap();
        let select = factory
            .new_select_expression("Patient", Expression::and(vec![name.into()]), TotalMode::Always)
            .unwrap();

        CursorPayload {
            uuid: "9b2f".to_string(),
            tenant_id: TenantId::new("acme/research"),
            context: SearchContext::new(42).after("p-7").with_total(Some(120)),
            page_size: 10,
            select,
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = payload();
        let text = payload.encode();
        assert!(text.starts_with(PAYLOAD_PREFIX));
        assert_eq!(CursorPayload::decode(&text).unwrap(), payload);
    }

    #[test]
    fn test_first_page_context() {
        let context = SearchContext::new(5);
        assert!(context.first_id.is_empty());
        assert_eq!(context.after("x").revision, 5);
    }

    #[test]
    fn test_corrupt_payload_is_unreadable() {
        let text = payload().encode();
        for input in [&text[..text.len() - 1], "c1.", "x1.A0#", "c1.0:"] {
            assert!(matches!(
                CursorPayload::decode(input),
                Err(CursorError::Unreadable { .. })
            ));
        }
    }
}
