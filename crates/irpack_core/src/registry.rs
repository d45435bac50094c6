//! Tag registry.
//!
//! Maps each tag to the state of its current stream. The map itself is
//! guarded by a read-write lock that is only held long enough to look up,
//! insert or remove an entry; each entry carries its own mutex, so
//! buffering for one tag never blocks another.

use crate::buffer::StreamBuffer;
use crate::error::CoreResult;
use crate::upload::{epoch_millis, object_key, UploadMetadata};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// A registry entry shared between the registry and its users.
pub type SharedEntry = Arc<Mutex<TagEntry>>;

/// State of one tag's current stream.
#[derive(Debug)]
pub struct TagEntry {
    name: String,
    index: u64,
    start_time: SystemTime,
    last_modified: SystemTime,
    /// The stream buffer.
    pub buffer: StreamBuffer,
}

impl TagEntry {
    /// Creates an entry for a stream starting now.
    #[must_use]
    pub fn new(name: impl Into<String>, index: u64, buffer: StreamBuffer) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.into(),
            index,
            start_time: now,
            last_modified: now,
            buffer,
        }
    }

    /// Overrides the stream start time, for streams found on disk.
    #[must_use]
    pub fn started_at(mut self, start_time: SystemTime) -> Self {
        self.start_time = start_time;
        self.last_modified = self.last_modified.max(start_time);
        self
    }

    /// The tag.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation index of the current stream.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// When the current stream started.
    #[must_use]
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When the current stream was last written.
    #[must_use]
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// Records a write.
    pub fn touch(&mut self) {
        self.last_modified = SystemTime::now();
    }

    /// Begins a new stream after an upload.
    pub fn restart(&mut self, index: u64) {
        let now = SystemTime::now();
        self.index = index;
        self.start_time = now;
        self.last_modified = now;
    }

    /// Metadata describing the current stream.
    #[must_use]
    pub fn upload_metadata(&self, source_id: &str) -> UploadMetadata {
        UploadMetadata {
            tag: self.name.clone(),
            index: self.index,
            start_time_ms: epoch_millis(self.start_time),
            end_time_ms: epoch_millis(self.last_modified),
            source_id: source_id.to_string(),
        }
    }

    /// Object key for the current stream.
    #[must_use]
    pub fn object_key(&self, prefix: &str, source_id: &str) -> String {
        object_key(prefix, &self.upload_metadata(source_id))
    }
}

/// Concurrent map from tag to [`TagEntry`].
#[derive(Debug, Default)]
pub struct TagRegistry {
    entries: RwLock<HashMap<String, SharedEntry>>,
    /// One slot per tag being built, so a tag's files are restored once
    /// while other tags are built alongside.
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_index: AtomicU64,
}

impl TagRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next creation index. Indices are unique within the process.
    pub fn next_index(&self) -> u64 {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Looks up a tag.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<SharedEntry> {
        self.entries.read().get(tag).cloned()
    }

    /// Looks up a tag, creating its entry with `make` if absent.
    ///
    /// `make` runs without the map lock held, under a lock private to `tag`.
    /// Concurrent callers for the same tag wait for it and share its entry,
    /// so `make` never runs for a tag that is already registered. Other tags
    /// are looked up and created meanwhile.
    ///
    /// # Errors
    ///
    /// Returns any error from `make`.
    pub fn get_or_create<F>(&self, tag: &str, make: F) -> CoreResult<SharedEntry>
    where
        F: FnOnce() -> CoreResult<StreamBuffer>,
    {
        if let Some(entry) = self.get(tag) {
            return Ok(entry);
        }

        let slot = Arc::clone(self.creating.lock().entry(tag.to_string()).or_default());
        let result = {
            let _building = slot.lock();
            match self.get(tag) {
                Some(entry) => Ok(entry),
                None => make()
                    .map(|buffer| self.insert(TagEntry::new(tag, self.next_index(), buffer))),
            }
        };

        let mut creating = self.creating.lock();
        // The map and this call hold the only references: nobody else waits.
        if Arc::strong_count(&slot) == 2 {
            creating.remove(tag);
        }
        result
    }

    /// Registers an entry, replacing any previous one for the same tag.
    pub fn insert(&self, entry: TagEntry) -> SharedEntry {
        let name = entry.name.clone();
        let shared = Arc::new(Mutex::new(entry));
        self.entries.write().insert(name, Arc::clone(&shared));
        shared
    }

    /// Removes a tag, returning its entry.
    pub fn remove(&self, tag: &str) -> Option<SharedEntry> {
        self.entries.write().remove(tag)
    }

    /// Returns `true` if `tag` still maps to `entry`.
    #[must_use]
    pub fn is_current(&self, tag: &str, entry: &SharedEntry) -> bool {
        self.entries
            .read()
            .get(tag)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Removes a tag only if it still maps to `entry`.
    ///
    /// May be called with `entry` locked; the map lock is always taken
    /// after an entry lock, never before.
    pub fn remove_entry(&self, tag: &str, entry: &SharedEntry) -> bool {
        let mut entries = self.entries.write();
        match entries.get(tag) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(tag);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of all entries, sorted by tag.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, SharedEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(tag, entry)| (tag.clone(), Arc::clone(entry)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of registered tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no tag is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DEFAULT_SIZE_HINT;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn memory_buffer() -> CoreResult<StreamBuffer> {
        StreamBuffer::in_memory("UTC", DEFAULT_SIZE_HINT)
    }

    #[test]
    fn get_or_create_reuses_entry() {
        let registry = TagRegistry::new();
        let first = registry.get_or_create("a", memory_buffer).unwrap();
        let second = registry
            .get_or_create("a", || panic!("must not build a second buffer"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn indices_are_unique() {
        let registry = TagRegistry::new();
        let a = registry.get_or_create("a", memory_buffer).unwrap();
        let b = registry.get_or_create("b", memory_buffer).unwrap();
        assert_ne!(a.lock().index(), b.lock().index());
        assert!(registry.next_index() > b.lock().index());
    }

    #[test]
    fn failed_creation_registers_nothing() {
        let registry = TagRegistry::new();
        let result = registry.get_or_create("bad", || StreamBuffer::in_memory("", 64));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_and_snapshot() {
        let registry = TagRegistry::new();
        for tag in ["c", "a", "b"] {
            registry.get_or_create(tag, memory_buffer).unwrap();
        }
        let tags: Vec<_> = registry.entries().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, ["a", "b", "c"]);

        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());
        assert_eq!(registry.len(), 2);

        let stale = registry.get("a").unwrap();
        registry.insert(TagEntry::new("a", 99, memory_buffer().unwrap()));
        assert!(!registry.remove_entry("a", &stale));
        let current = registry.get("a").unwrap();
        assert!(registry.remove_entry("a", &current));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_creation_yields_one_entry() {
        let registry = Arc::new(TagRegistry::new());
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let built = Arc::clone(&built);
                thread::spawn(move || {
                    registry
                        .get_or_create("shared", || {
                            built.fetch_add(1, Ordering::SeqCst);
                            memory_buffer()
                        })
                        .unwrap()
                })
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for entry in &entries[1..] {
            assert!(Arc::ptr_eq(&entries[0], entry));
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(registry.creating.lock().is_empty());
    }

    #[test]
    fn slow_creation_does_not_block_other_tags() {
        let registry = Arc::new(TagRegistry::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let slow = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry
                    .get_or_create("slow", || {
                        started_tx.send(()).unwrap();
                        release_rx
                            .recv_timeout(Duration::from_secs(10))
                            .expect("other tag was blocked behind this one");
                        memory_buffer()
                    })
                    .unwrap()
            })
        };

        started_rx.recv().unwrap();
        registry.get_or_create("fast", memory_buffer).unwrap();
        assert!(registry.get("slow").is_none());
        release_tx.send(()).unwrap();

        let slow = slow.join().unwrap();
        assert!(Arc::ptr_eq(&slow, &registry.get("slow").unwrap()));
        assert_eq!(registry.len(), 2);
        assert!(registry.creating.lock().is_empty());
    }

    #[test]
    fn failed_creation_lets_the_next_caller_retry() {
        let registry = TagRegistry::new();
        assert!(registry.get_or_create("a", || StreamBuffer::in_memory("", 64)).is_err());
        assert!(registry.get_or_create("a", memory_buffer).is_ok());
        assert!(registry.creating.lock().is_empty());
    }

    #[test]
    fn key_uses_stream_identity() {
        let entry = TagEntry::new("app", 7, memory_buffer().unwrap()).started_at(
            std::time::UNIX_EPOCH + std::time::Duration::from_millis(1_234),
        );
        assert_eq!(entry.object_key("p/", "id"), "p/app_7_1234_id.clp.zst");
    }
}
