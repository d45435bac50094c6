//! In-memory object store.

use irpack_core::{decompress_frames, IrReader, LogEvent, UploadError, UploadMetadata, Uploader};
use parking_lot::Mutex;
use std::io::Read;

/// An object captured by [`MemoryUploader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key.
    pub key: String,
    /// Compressed stream as uploaded.
    pub body: Vec<u8>,
    /// Metadata sent with the object.
    pub metadata: UploadMetadata,
}

impl StoredObject {
    /// Decompresses and decodes the object.
    ///
    /// # Panics
    ///
    /// Panics if the object is not a terminated IR stream.
    pub fn events(&self) -> Vec<LogEvent> {
        let ir = decompress_frames(&self.body).expect("object is not valid zstd");
        let decoded = IrReader::decode_all(&ir).expect("object is not valid IR");
        assert!(decoded.terminated, "object {} is not terminated", self.key);
        decoded.events
    }

    /// Messages of every event in the object.
    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

/// Uploader that keeps objects in memory and can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryUploader {
    objects: Mutex<Vec<StoredObject>>,
    failure: Mutex<Option<UploadError>>,
    attempts: Mutex<usize>,
}

impl MemoryUploader {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following upload fail with `error`, or succeed again
    /// with `None`.
    pub fn fail_with(&self, error: Option<UploadError>) {
        *self.failure.lock() = error;
    }

    /// Uploads attempted, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    /// Objects stored so far, in upload order.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().clone()
    }

    /// Number of objects stored.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns `true` if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Objects uploaded for `tag`, in upload order.
    pub fn objects_for(&self, tag: &str) -> Vec<StoredObject> {
        self.objects
            .lock()
            .iter()
            .filter(|o| o.metadata.tag == tag)
            .cloned()
            .collect()
    }

    /// All messages uploaded for `tag`, across objects.
    pub fn messages_for(&self, tag: &str) -> Vec<String> {
        self.objects_for(tag)
            .iter()
            .flat_map(StoredObject::messages)
            .collect()
    }
}

impl Uploader for MemoryUploader {
    fn upload(
        &self,
        key: &str,
        body: &mut dyn Read,
        metadata: &UploadMetadata,
    ) -> Result<(), UploadError> {
        *self.attempts.lock() += 1;
        if let Some(e) = self.failure.lock().clone() {
            return Err(e);
        }

        let mut data = Vec::new();
        body.read_to_end(&mut data)?;
        self.objects.lock().push(StoredObject {
            key: key.to_string(),
            body: data,
            metadata: metadata.clone(),
        });
        Ok(())
    }
}
