//! Typed key/value attachments carried by a channel.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Entry = Arc<dyn Any + Send + Sync>;

/// Per-channel attachments keyed by name.
#[derive(Default)]
pub struct Datastores {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Datastores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attachment and downcast it to `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).cloned().and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Store an attachment, replacing any previous one under `key`.
    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    /// Return the attachment under `key`, creating it first if missing.
    ///
    /// Lookup and creation happen under one lock, so concurrent callers
    /// agree on a single value.
    pub fn get_or_insert_with<T, F>(&self, key: &str, create: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(create()) as Entry)
            .clone();
        entry.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup() {
        let stores = Datastores::new();
        stores.insert("answer", Arc::new(42u32));
        assert_eq!(stores.get::<u32>("answer").as_deref(), Some(&42));
        assert!(stores.get::<String>("answer").is_none());
        assert!(stores.remove("answer"));
        assert!(!stores.contains("answer"));
    }

    #[test]
    fn get_or_insert_creates_once() {
        let stores = Datastores::new();
        let first = stores.get_or_insert_with("count", || 1u8).unwrap();
        let second = stores.get_or_insert_with("count", || 2u8).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
    }
}
