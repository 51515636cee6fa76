//! Storage of paging state.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::paging::PagingData;
use crate::error::EngineResult;

/// Persistence for [`PagingData`] records, keyed by uuid and indexed by
/// timestamp for the expiry sweep.
///
/// Every method is atomic with respect to the others: a concurrent reader sees
/// a record either before or after an [`advance`](Self::advance), and never
/// one that [`remove_expired`](Self::remove_expired) has already taken.
#[async_trait]
pub trait PagingStore: Send + Sync {
    /// Stores a new record.
    async fn insert(&self, data: PagingData) -> EngineResult<()>;

    /// Returns a copy of a record.
    async fn get(&self, uuid: &str) -> EngineResult<Option<PagingData>>;

    /// Replaces `last_id`, `seen_ids` and `timestamp` of a record in one step.
    ///
    /// Returns false if the record no longer exists.
    async fn advance(
        &self,
        uuid: &str,
        last_id: String,
        seen_ids: HashSet<String>,
        timestamp: i64,
    ) -> EngineResult<bool>;

    /// Removes a record.
    async fn remove(&self, uuid: &str) -> EngineResult<Option<PagingData>>;

    /// Removes every record whose timestamp is before `cutoff` and returns
    /// their uuids.
    async fn remove_expired(&self, cutoff: i64) -> EngineResult<Vec<String>>;

    /// Returns the number of stored records.
    async fn len(&self) -> EngineResult<usize>;
}

#[derive(Debug, Default)]
struct Records {
    by_uuid: HashMap<String, PagingData>,
    by_timestamp: BTreeSet<(i64, String)>,
}

impl Records {
    fn take(&mut self, uuid: &str) -> Option<PagingData> {
        let data = self.by_uuid.remove(uuid)?;
        self.by_timestamp.remove(&(data.timestamp, data.uuid.clone()));
        Some(data)
    }
}

/// Process-local [`PagingStore`].
#[derive(Debug, Default)]
pub struct InMemoryPagingStore {
    records: RwLock<Records>,
}

impl InMemoryPagingStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PagingStore for InMemoryPagingStore {
    async fn insert(&self, data: PagingData) -> EngineResult<()> {
        let mut records = self.records.write();
        records.take(&data.uuid);
        records
            .by_timestamp
            .insert((data.timestamp, data.uuid.clone()));
        records.by_uuid.insert(data.uuid.clone(), data);
        Ok(())
    }

    async fn get(&self, uuid: &str) -> EngineResult<Option<PagingData>> {
        Ok(self.records.read().by_uuid.get(uuid).cloned())
    }

    async fn advance(
        &self,
        uuid: &str,
        last_id: String,
        seen_ids: HashSet<String>,
        timestamp: i64,
    ) -> EngineResult<bool> {
        let mut records = self.records.write();
        let Records {
            by_uuid,
            by_timestamp,
        } = &mut *records;

        let Some(data) = by_uuid.get_mut(uuid) else {
            return Ok(false);
        };
        by_timestamp.remove(&(data.timestamp, data.uuid.clone()));
        data.advance(last_id, seen_ids, timestamp);
        by_timestamp.insert((data.timestamp, data.uuid.clone()));
        Ok(true)
    }

    async fn remove(&self, uuid: &str) -> EngineResult<Option<PagingData>> {
        Ok(self.records.write().take(uuid))
    }

    async fn remove_expired(&self, cutoff: i64) -> EngineResult<Vec<String>> {
        let mut records = self.records.write();
        let expired: Vec<String> = records
            .by_timestamp
            .iter()
            .take_while(|(timestamp, _)| *timestamp < cutoff)
            .map(|(_, uuid)| uuid.clone())
            .collect();
        for uuid in &expired {
            records.take(uuid);
        }
        Ok(expired)
    }

    async fn len(&self) -> EngineResult<usize> {
        Ok(self.records.read().by_uuid.len())
    }
}
