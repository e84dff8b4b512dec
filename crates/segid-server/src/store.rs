use segid::{Allocation, IdStore, JsonFileIdStore, MemoryIdStore, Step, StoreError, TagRecord};
use std::path::Path;

/// The ID store selected at startup.
#[derive(Debug)]
pub enum ServerStore {
    Memory(MemoryIdStore),
    Json(JsonFileIdStore),
}

impl ServerStore {
    /// Opens the JSON file at `path`, or an empty in-memory store without
    /// one.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        match path {
            Some(path) => JsonFileIdStore::open(path).map(Self::Json),
            None => Ok(Self::Memory(MemoryIdStore::new())),
        }
    }

    /// Creates the tag unless the store already knows it. Returns `true` if
    /// the record was inserted.
    pub fn ensure_tag(&self, record: TagRecord) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.insert_tag(record),
            Self::Json(store) => store.insert_tag(record),
        }
    }

    pub fn records(&self) -> Vec<TagRecord> {
        match self {
            Self::Memory(store) => store.records(),
            Self::Json(store) => store.records(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Json(_) => "json",
        }
    }
}

impl IdStore for ServerStore {
    type Error = StoreError;

    fn bump_max_id(&self, tag: &str, step: Step) -> Result<Option<Allocation>, Self::Error> {
        match self {
            Self::Memory(store) => store.bump_max_id(tag, step),
            Self::Json(store) => store.bump_max_id(tag, step),
        }
    }

    fn tags(&self) -> Result<Vec<String>, Self::Error> {
        match self {
            Self::Memory(store) => store.tags(),
            Self::Json(store) => store.tags(),
        }
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, Self::Error> {
        match self {
            Self::Memory(store) => store.max_id(tag),
            Self::Json(store) => store.max_id(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_keeps_existing_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let store = ServerStore::open(Some(&path)).unwrap();
        assert_eq!(store.kind(), "json");
        assert!(store.ensure_tag(TagRecord::new("bookmark", 10)).unwrap());
        store.bump_max_id("bookmark", Step::Configured).unwrap();
        drop(store);

        let store = ServerStore::open(Some(&path)).unwrap();
        assert!(!store.ensure_tag(TagRecord::new("bookmark", 99)).unwrap());
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].max_id, 10);
        assert_eq!(records[0].step, 10);
    }

    #[test]
    fn memory_store_without_path() {
        let store = ServerStore::open(None).unwrap();
        assert_eq!(store.kind(), "memory");
        assert!(store.tags().unwrap().is_empty());
    }
}
