use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{
    Allocation, IdStore, Step, StoreError, TagRecord,
    lock::{Mutex, lock},
    store::record::TagTable,
};

/// An [`IdStore`] persisted to a JSON file.
///
/// The file holds an array of [`TagRecord`]s. Every mutation rewrites the
/// whole table to a sibling `.tmp` file, syncs it to disk and renames it over
/// the target, so a crash or power loss leaves either the old or the new table
/// on disk. A mutation whose write fails is rolled back in memory and
/// reported as an error; the range is not handed out.
///
/// Bumps are atomic within the process only. Do not point two processes at the
/// same file.
#[derive(Debug)]
pub struct JsonFileIdStore {
    path: PathBuf,
    table: Mutex<TagTable>,
}

impl JsonFileIdStore {
    /// Opens the store at `path`. A missing file yields an empty store; the
    /// file is created on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read and
    /// [`StoreError::Format`] if it is not a valid tag table.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records: Vec<TagRecord> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path.display(), tags = records.len(), "opened json id store");
        Ok(Self {
            path,
            table: Mutex::new(TagTable::from_records(records)?),
        })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds a tag unless it already exists. Returns whether it was added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStep`] for a zero step, or the write error.
    pub fn insert_tag(&self, record: TagRecord) -> Result<bool, StoreError> {
        self.mutate(|table| table.insert(record))
    }

    /// Deletes a tag and returns its last row.
    ///
    /// # Errors
    ///
    /// Returns the write error; the tag is kept in that case.
    pub fn remove_tag(&self, tag: &str) -> Result<Option<TagRecord>, StoreError> {
        self.mutate(|table| Ok(table.remove(tag)))
    }

    /// Changes a tag's configured step. Returns `false` for unknown tags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStep`] for a zero step, or the write error.
    pub fn set_step(&self, tag: &str, step: u64) -> Result<bool, StoreError> {
        self.mutate(|table| table.set_step(tag, step))
    }

    /// All tag rows, sorted by tag.
    pub fn records(&self) -> Vec<TagRecord> {
        lock(&self.table).records()
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TagTable) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut table = lock(&self.table);
        let before = table.clone();
        let result = f(&mut *table)?;
        if let Err(e) = self.persist(&table) {
            *table = before;
            return Err(e);
        }
        Ok(result)
    }

    fn persist(&self, table: &TagTable) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&table.records())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;

        // Make the rename itself durable.
        #[cfg(unix)]
        {
            let dir = match self.path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            fs::File::open(dir)?.sync_all()?;
        }
        Ok(())
    }
}

impl IdStore for JsonFileIdStore {
    type Error = StoreError;

    fn bump_max_id(&self, tag: &str, step: Step) -> Result<Option<Allocation>, Self::Error> {
        self.mutate(|table| table.bump(tag, step))
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

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileIdStore::open(dir.path().join("ids.json")).unwrap();
        assert!(store.tags().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn ranges_survive_reopen_without_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");

        let first = {
            let store = JsonFileIdStore::open(&path).unwrap();
            assert!(store.insert_tag(TagRecord::new("bookmark", 100)).unwrap());
            store.bump_max_id("bookmark", Step::Configured).unwrap().unwrap()
        };
        assert_eq!((first.start, first.end), (0, 100));

        let store = JsonFileIdStore::open(&path).unwrap();
        assert_eq!(store.max_id("bookmark").unwrap(), Some(100));
        let second = store.bump_max_id("bookmark", Step::Custom(50)).unwrap().unwrap();
        assert_eq!((second.start, second.end), (100, 150));
        assert_eq!(store.records()[0].step, 100);
    }

    #[test]
    fn every_bump_is_on_disk_without_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let store = JsonFileIdStore::open(&path).unwrap();
        store.insert_tag(TagRecord::new("bookmark", 10)).unwrap();
        store.bump_max_id("bookmark", Step::Configured).unwrap();

        let on_disk: Vec<TagRecord> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk[0].max_id, 10);
        assert!(!dir.path().join("ids.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            JsonFileIdStore::open(&path),
            Err(StoreError::Format(_))
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        let store = JsonFileIdStore::open(&path).unwrap();
        store.insert_tag(TagRecord::new("bookmark", 10)).unwrap();

        // Renaming a file over a directory fails.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(store.bump_max_id("bookmark", Step::Configured).is_err());
        assert_eq!(store.max_id("bookmark").unwrap(), Some(0));
    }

    #[test]
    fn removed_tags_stay_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        {
            let store = JsonFileIdStore::open(&path).unwrap();
            store.insert_tag(TagRecord::new("bookmark", 10)).unwrap();
            store.insert_tag(TagRecord::new("comment", 10)).unwrap();
            assert!(store.remove_tag("comment").unwrap().is_some());
        }
        let store = JsonFileIdStore::open(&path).unwrap();
        assert_eq!(store.tags().unwrap(), vec!["bookmark"]);
    }
}
