use crate::{
    Allocation, IdStore, Step, StoreError, TagRecord,
    lock::{Mutex, lock},
    store::record::TagTable,
};

/// An in-process [`IdStore`].
///
/// Tag rows live in a mutex-protected table, so bumps are atomic within the
/// process. Ranges do not survive a restart; use it for tests, single-node
/// deployments that persist elsewhere, or as a model for a database-backed
/// store.
///
/// # Example
///
/// ```
/// use segid::{IdStore, MemoryIdStore, Step};
///
/// let store = MemoryIdStore::new().with_tag("bookmark", 1000);
/// let range = store.bump_max_id("bookmark", Step::Configured).unwrap().unwrap();
/// assert_eq!((range.start, range.end), (0, 1000));
/// assert_eq!(store.max_id("bookmark").unwrap(), Some(1000));
/// ```
#[derive(Debug, Default)]
pub struct MemoryIdStore {
    table: Mutex<TagTable>,
}

impl MemoryIdStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStep`] if a record has a step of zero.
    pub fn from_records(records: impl IntoIterator<Item = TagRecord>) -> Result<Self, StoreError> {
        Ok(Self {
            table: Mutex::new(TagTable::from_records(records)?),
        })
    }

    /// Adds (or replaces) a tag starting at ID 0.
    #[must_use]
    pub fn with_tag(self, tag: impl Into<String>, step: u64) -> Self {
        self.with_record(TagRecord::new(tag, step))
    }

    /// Adds (or replaces) a tag row.
    #[must_use]
    pub fn with_record(self, record: TagRecord) -> Self {
        lock(&self.table).put(record);
        self
    }

    /// Adds a tag unless it already exists. Returns whether it was added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStep`] if the step is zero.
    pub fn insert_tag(&self, record: TagRecord) -> Result<bool, StoreError> {
        lock(&self.table).insert(record)
    }

    /// Deletes a tag and returns its last row.
    pub fn remove_tag(&self, tag: &str) -> Option<TagRecord> {
        lock(&self.table).remove(tag)
    }

    /// Changes a tag's configured step. Returns `false` for unknown tags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStep`] if the step is zero.
    pub fn set_step(&self, tag: &str, step: u64) -> Result<bool, StoreError> {
        lock(&self.table).set_step(tag, step)
    }

    /// All tag rows, sorted by tag.
    pub fn records(&self) -> Vec<TagRecord> {
        lock(&self.table).records()
    }
}

impl IdStore for MemoryIdStore {
    type Error = StoreError;

    fn bump_max_id(&self, tag: &str, step: Step) -> Result<Option<Allocation>, Self::Error> {
        lock(&self.table).bump(tag, step)
    }

    fn tags(&self) -> Result<Vec<String>, Self::Error> {
        Ok(lock(&self.table).tags())
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, Self::Error> {
        Ok(lock(&self.table).max_id(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread::scope;

    #[test]
    fn concurrent_bumps_never_overlap() {
        let store = MemoryIdStore::new().with_tag("bookmark", 10);
        let ranges: Vec<Allocation> = scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..50)
                            .map(|_| store.bump_max_id("bookmark", Step::Configured).unwrap().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let starts: HashSet<u64> = ranges.iter().map(|r| r.start).collect();
        assert_eq!(starts.len(), 400);
        assert!(ranges.iter().all(|r| r.end - r.start == 10 && r.start % 10 == 0));
        assert_eq!(store.max_id("bookmark").unwrap(), Some(4000));
    }

    #[test]
    fn tag_lifecycle() {
        let store = MemoryIdStore::new();
        assert!(store.tags().unwrap().is_empty());
        assert!(store.insert_tag(TagRecord::new("comment", 100).with_description("comments")).unwrap());
        assert!(!store.insert_tag(TagRecord::new("comment", 5)).unwrap());
        assert_eq!(store.tags().unwrap(), vec!["comment"]);

        assert!(store.set_step("comment", 200).unwrap());
        let range = store.bump_max_id("comment", Step::Configured).unwrap().unwrap();
        assert_eq!(range.range().len(), 200);

        let removed = store.remove_tag("comment").unwrap();
        assert_eq!(removed.max_id, 200);
        assert_eq!(removed.description.as_deref(), Some("comments"));
        assert!(store.bump_max_id("comment", Step::Configured).unwrap().is_none());
        assert_eq!(store.max_id("comment").unwrap(), None);
    }

    #[test]
    fn zero_step_fails_at_bump() {
        let store = MemoryIdStore::new().with_tag("broken", 0);
        assert!(matches!(
            store.bump_max_id("broken", Step::Configured),
            Err(StoreError::InvalidStep { .. })
        ));
        assert!(MemoryIdStore::from_records([TagRecord::new("broken", 0)]).is_err());
    }
}
