/// Per-conversation ordered store
///
/// Records are kept ascending by `created_at`. Inserts binary-search the
/// position and shift; buckets are size-bounded so the shift stays cheap.
use crate::record::SharedMessage;

#[derive(Debug, Clone, Default)]
pub struct ConversationBucket {
    records: Vec<SharedMessage>,
}

impl ConversationBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedMessage> {
        self.records.iter()
    }

    pub fn oldest(&self) -> Option<&SharedMessage> {
        self.records.first()
    }

    /// Whether this exact record is already stored
    pub fn contains(&self, record: &SharedMessage) -> bool {
        let created_at = record.created_at();
        let start = self.records.partition_point(|m| m.created_at() < created_at);
        self.records[start..]
            .iter()
            .take_while(|m| m.created_at() == created_at)
            .any(|m| m.ptr_eq(record))
    }

    /// Insert after every record with an equal or earlier `created_at`.
    /// Returns false when the record is already present.
    pub fn insert_chronologically(&mut self, record: SharedMessage) -> bool {
        if self.contains(&record) {
            return false;
        }
        let created_at = record.created_at();
        let idx = self.records.partition_point(|m| m.created_at() <= created_at);
        self.records.insert(idx, record);
        true
    }

    /// Add many records at once.
    ///
    /// With `should_sort` the batch is appended and the whole bucket stably
    /// sorted once, which beats repeated shifting for first-load history.
    /// Returns the number of records actually added.
    pub fn bulk_insert(&mut self, records: Vec<SharedMessage>, should_sort: bool) -> usize {
        if !should_sort {
            return records
                .into_iter()
                .filter(|r| self.insert_chronologically(r.clone()))
                .count();
        }

        let before = self.records.len();
        for record in records {
            let duplicate = self.records.iter().any(|m| m.ptr_eq(&record));
            if !duplicate {
                self.records.push(record);
            }
        }
        self.records.sort_by_key(|m| m.created_at());
        self.records.len() - before
    }

    /// Newest-first page: skip `offset` from the newest end, take `limit`
    pub fn get_slice(&self, limit: usize, offset: usize) -> Vec<SharedMessage> {
        self.records
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop the oldest records until at most `max` remain; returns what was dropped
    pub fn trim_to(&mut self, max: usize) -> Vec<SharedMessage> {
        if self.records.len() <= max {
            return Vec::new();
        }
        let excess = self.records.len() - max;
        self.records.drain(..excess).collect()
    }

    pub fn pop_oldest(&mut self) -> Option<SharedMessage> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.records.remove(0))
        }
    }

    /// Remove a specific record
    pub fn remove(&mut self, record: &SharedMessage) -> bool {
        match self.records.iter().position(|m| m.ptr_eq(record)) {
            Some(idx) => {
                self.records.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Keep records matching `keep`; returns the removed ones in order
    pub fn retain_or_collect(
        &mut self,
        mut keep: impl FnMut(&SharedMessage) -> bool,
    ) -> Vec<SharedMessage> {
        let mut removed = Vec::new();
        self.records.retain(|m| {
            if keep(m) {
                true
            } else {
                removed.push(m.clone());
                false
            }
        });
        removed
    }

    pub fn drain_all(&mut self) -> Vec<SharedMessage> {
        std::mem::take(&mut self.records)
    }

    /// Ascending `created_at` check
    pub fn is_ordered(&self) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].created_at() <= w[1].created_at())
    }
}
