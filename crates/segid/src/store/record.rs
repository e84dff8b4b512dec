use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{Allocation, Step, StoreError};

/// The store-side row of one business tag.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagRecord {
    /// The business tag.
    pub tag: String,
    /// Last issued upper bound. The next range starts here.
    pub max_id: u64,
    /// Range size leased by a [`Step::Configured`] bump.
    pub step: u64,
    /// Free-form note for operators.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
    /// Wall-clock milliseconds of the last change.
    pub updated_at: u64,
}

impl TagRecord {
    /// A fresh tag starting at ID 0.
    pub fn new(tag: impl Into<String>, step: u64) -> Self {
        Self {
            tag: tag.into(),
            max_id: 0,
            step,
            description: None,
            updated_at: now_millis(),
        }
    }

    /// Starts the tag at `max_id` instead of 0.
    #[must_use]
    pub fn with_max_id(mut self, max_id: u64) -> Self {
        self.max_id = max_id;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tag rows keyed by tag, shared by the bundled stores.
#[derive(Debug, Clone, Default)]
pub(crate) struct TagTable {
    rows: BTreeMap<String, TagRecord>,
}

impl TagTable {
    pub(crate) fn from_records(records: impl IntoIterator<Item = TagRecord>) -> Result<Self, StoreError> {
        let mut table = Self::default();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    /// Inserts `record` unless the tag exists. Returns whether it was
    /// inserted.
    pub(crate) fn insert(&mut self, record: TagRecord) -> Result<bool, StoreError> {
        check_step(&record.tag, record.step)?;
        if self.rows.contains_key(&record.tag) {
            return Ok(false);
        }
        self.rows.insert(record.tag.clone(), record);
        Ok(true)
    }

    /// Inserts or replaces `record` without validation. Invalid steps are
    /// reported when the tag is bumped.
    pub(crate) fn put(&mut self, record: TagRecord) {
        self.rows.insert(record.tag.clone(), record);
    }

    pub(crate) fn remove(&mut self, tag: &str) -> Option<TagRecord> {
        self.rows.remove(tag)
    }

    /// Changes the configured step. Returns `false` if the tag is unknown.
    pub(crate) fn set_step(&mut self, tag: &str, step: u64) -> Result<bool, StoreError> {
        check_step(tag, step)?;
        Ok(self
            .rows
            .get_mut(tag)
            .map(|row| {
                row.step = step;
                row.updated_at = now_millis();
            })
            .is_some())
    }

    pub(crate) fn bump(&mut self, tag: &str, step: Step) -> Result<Option<Allocation>, StoreError> {
        let Some(row) = self.rows.get_mut(tag) else {
            return Ok(None);
        };
        let by = match step {
            Step::Configured => row.step,
            Step::Custom(n) => n,
        };
        check_step(tag, by)?;
        let start = row.max_id;
        let end = start.checked_add(by).ok_or_else(|| StoreError::Overflow {
            tag: tag.to_owned(),
        })?;
        row.max_id = end;
        row.updated_at = now_millis();
        Ok(Some(Allocation {
            start,
            end,
            configured_step: row.step,
        }))
    }

    pub(crate) fn max_id(&self, tag: &str) -> Option<u64> {
        self.rows.get(tag).map(|row| row.max_id)
    }

    pub(crate) fn tags(&self) -> Vec<String> {
        self.rows.keys().cloned().collect()
    }

    pub(crate) fn records(&self) -> Vec<TagRecord> {
        self.rows.values().cloned().collect()
    }
}

fn check_step(tag: &str, step: u64) -> Result<(), StoreError> {
    if step == 0 {
        return Err(StoreError::InvalidStep {
            tag: tag.to_owned(),
            step,
        });
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_leases_consecutive_ranges() {
        let mut table = TagTable::from_records([TagRecord::new("bookmark", 5)]).unwrap();
        let first = table.bump("bookmark", Step::Configured).unwrap().unwrap();
        assert_eq!((first.start, first.end, first.configured_step), (0, 5, 5));

        let second = table.bump("bookmark", Step::Custom(20)).unwrap().unwrap();
        assert_eq!((second.start, second.end, second.configured_step), (5, 25, 5));
        assert_eq!(table.max_id("bookmark"), Some(25));
    }

    #[test]
    fn bump_unknown_tag_is_none() {
        let mut table = TagTable::default();
        assert!(table.bump("missing", Step::Configured).unwrap().is_none());
    }

    #[test]
    fn rejects_zero_step_and_overflow() {
        assert!(matches!(
            TagTable::from_records([TagRecord::new("bad", 0)]),
            Err(StoreError::InvalidStep { .. })
        ));

        let mut table =
            TagTable::from_records([TagRecord::new("full", 10).with_max_id(u64::MAX - 5)]).unwrap();
        assert!(matches!(
            table.bump("full", Step::Configured),
            Err(StoreError::Overflow { .. })
        ));
        // A failed bump consumes nothing.
        assert_eq!(table.max_id("full"), Some(u64::MAX - 5));
    }

    #[test]
    fn insert_keeps_existing_row() {
        let mut table = TagTable::default();
        assert!(table.insert(TagRecord::new("bookmark", 10).with_max_id(50)).unwrap());
        assert!(!table.insert(TagRecord::new("bookmark", 99)).unwrap());
        assert_eq!(table.max_id("bookmark"), Some(50));
        assert!(table.set_step("bookmark", 20).unwrap());
        assert!(!table.set_step("missing", 20).unwrap());
        assert_eq!(table.records()[0].step, 20);
    }
}
