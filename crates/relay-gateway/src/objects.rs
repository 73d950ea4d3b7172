//! In-memory object storage.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{
    ObjectStore,
    traits::{Object, ObjectError, StoredObject},
};
use uuid::Uuid;

/// Path prefix under which stored objects are served.
pub const OBJECTS_PATH: &str = "/objects";

/// Default total size of retained objects (64 MiB).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Object>,
    order: VecDeque<String>,
    total: usize,
}

/// In-memory object store.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart, like the message history. Retained bytes are
/// bounded: the oldest objects are evicted to make room for new ones.
pub struct MemoryObjectStore {
    inner: RwLock<Inner>,
    max_bytes: usize,
}

impl MemoryObjectStore {
    /// Create an empty store with the default size bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    /// Create an empty store retaining at most `max_bytes` of object data.
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_bytes,
        }
    }

    /// Total bytes currently retained.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.inner.read().map_or(0, |inner| inner.total)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, data: Bytes, mime: &str) -> Result<StoredObject, ObjectError> {
        if data.len() > self.max_bytes {
            return Err(ObjectError::TooLarge {
                size: data.len(),
                limit: self.max_bytes,
            });
        }
        let id = Uuid::new_v4().simple().to_string();

        let mut inner = self
            .inner
            .write()
            .map_err(|e| ObjectError::Internal(e.to_string()))?;
        while inner.total + data.len() > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.objects.remove(&oldest) {
                inner.total -= evicted.data.len();
                tracing::debug!(id = %oldest, size = evicted.data.len(), "evicted object");
            }
        }
        inner.total += data.len();
        inner.order.push_back(id.clone());
        inner.objects.insert(
            id.clone(),
            Object {
                data,
                mime: mime.to_owned(),
            },
        );

        Ok(StoredObject {
            locator: format!("{OBJECTS_PATH}/{id}"),
            id,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Object>, ObjectError> {
        Ok(self
            .inner
            .read()
            .map_err(|e| ObjectError::Internal(e.to_string()))?
            .objects
            .get(id)
            .cloned())
    }
}
