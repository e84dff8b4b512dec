use std::sync::Arc;

use dashmap::DashMap;

use crate::SegmentBuffer;

/// Concurrent map from business tag to its [`SegmentBuffer`].
///
/// Owned by a [`SegmentIdGenerator`](crate::SegmentIdGenerator). Buffers are
/// handed out as `Arc`s so a caller keeps serving from a buffer even if the
/// tag is dropped by a concurrent [`TagRegistry::sync`].
#[derive(Debug, Default)]
pub struct TagRegistry {
    buffers: DashMap<String, Arc<SegmentBuffer>>,
}

/// Outcome of mirroring the store's tag list into a [`TagRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagSync {
    /// Tags that got a new, uninitialized buffer.
    pub added: Vec<String>,
    /// Tags whose buffer was dropped.
    pub removed: Vec<String>,
}

impl TagSync {
    /// Returns `true` if the registry did not change.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl TagRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer registered for `tag`, if any.
    pub fn get(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.buffers.get(tag).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the buffer for `tag`, creating an uninitialized one if absent.
    ///
    /// Insert-if-absent: concurrent callers racing on a new tag all receive
    /// the same buffer.
    pub fn get_or_register(&self, tag: &str) -> Arc<SegmentBuffer> {
        if let Some(buffer) = self.get(tag) {
            return buffer;
        }
        let entry = self
            .buffers
            .entry(tag.to_owned())
            .or_insert_with(|| Arc::new(SegmentBuffer::new(tag)));
        Arc::clone(entry.value())
    }

    /// Drops the buffer for `tag`. Unused IDs of its segments are lost.
    pub fn remove(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.buffers.remove(tag).map(|(_, buffer)| buffer)
    }

    /// Returns `true` if `tag` has a buffer.
    pub fn contains(&self, tag: &str) -> bool {
        self.buffers.contains_key(tag)
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        tags.sort_unstable();
        tags
    }

    /// All registered buffers, sorted by tag.
    pub fn buffers(&self) -> Vec<Arc<SegmentBuffer>> {
        let mut buffers: Vec<_> = self
            .buffers
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        buffers.sort_unstable_by(|a, b| a.tag().cmp(b.tag()));
        buffers
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns `true` if no tag is registered.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Mirrors `tags` into the registry: registers missing tags and drops
    /// unlisted ones.
    ///
    /// Only buffers in `registered`, taken before `tags` was listed, may be
    /// dropped. A tag registered while the list was being read keeps its
    /// buffer even though the list does not name it.
    pub fn sync<I, S>(&self, registered: &[Arc<SegmentBuffer>], tags: I) -> TagSync
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: std::collections::HashSet<String> =
            tags.into_iter().map(|t| t.as_ref().to_owned()).collect();

        let mut added = Vec::new();
        for tag in &wanted {
            if !self.contains(tag) {
                self.get_or_register(tag);
                added.push(tag.clone());
            }
        }

        let mut removed = Vec::new();
        for buffer in registered {
            if wanted.contains(buffer.tag()) {
                continue;
            }
            let dropped = self
                .buffers
                .remove_if(buffer.tag(), |_, current| Arc::ptr_eq(current, buffer));
            if dropped.is_some() {
                removed.push(buffer.tag().to_owned());
            }
        }

        added.sort_unstable();
        removed.sort_unstable();
        TagSync { added, removed }
    }
}
