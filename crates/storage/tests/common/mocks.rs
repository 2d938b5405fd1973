use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sitehist_storage::error::{StorageError, StorageResult};
use sitehist_storage::traits::{ObjectAttributes, ObjectMeta, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory backend that counts operations, records serving attributes
/// and can be told to fail puts for keys containing a marker.
#[derive(Default)]
pub struct InstrumentedBackend {
    objects: Mutex<BTreeMap<String, (Bytes, ObjectAttributes)>>,
    fail_puts_containing: Mutex<Option<String>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub exists_calls: AtomicUsize,
}

#[allow(dead_code)]
impl InstrumentedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_puts_containing(&self, marker: &str) {
        *self.fail_puts_containing.lock() = Some(marker.to_string());
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn attributes(&self, key: &str) -> Option<ObjectAttributes> {
        self.objects.lock().get(key).map(|(_, attrs)| attrs.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Overwrite an object behind the store's back.
    pub fn corrupt(&self, key: &str, data: &'static [u8]) {
        let mut objects = self.objects.lock();
        if let Some(entry) = objects.get_mut(key) {
            entry.0 = Bytes::from_static(data);
        }
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().remove(key);
    }
}

#[async_trait]
impl ObjectStore for InstrumentedBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock();
        let (data, attrs) = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: attrs.content_type.clone(),
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.put_with_attributes(key, data, &ObjectAttributes::default())
            .await
    }

    async fn put_with_attributes(
        &self,
        key: &str,
        data: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_puts_containing.lock().as_deref()
            && key.contains(marker)
        {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected failure for {key}"
            ))));
        }
        self.objects
            .lock()
            .insert(key.to_string(), (data, attributes.clone()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}
