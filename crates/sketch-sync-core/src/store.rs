//! Element store: the canonical id → element mapping.
//!
//! Stores know nothing about the network or about binding integrity; callers
//! run the binding checker over the right candidate set before committing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::element::Element;
use crate::error::{Result, SyncError};

/// Synchronous key-value store of elements.
pub trait ElementStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Element>;

    /// Insert or fully replace by id. Returns the stored record.
    fn put(&mut self, element: Element) -> Result<Element>;

    /// Commit several elements in one write.
    fn put_batch(&mut self, elements: Vec<Element>) -> Result<Vec<Element>>;

    /// Remove by id. Absent ids are not an error.
    fn delete(&mut self, id: &str) -> Result<Option<Element>>;

    /// All current records. Ordering carries no meaning.
    fn list(&self) -> Vec<Element>;

    /// Replace the whole collection.
    fn replace_all(&mut self, elements: Vec<Element>) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn require_id(element: &Element) -> Result<()> {
    if element.id.trim().is_empty() {
        return Err(SyncError::Validation("element id must not be empty".into()));
    }
    Ok(())
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    elements: HashMap<String, Element>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Element>) -> Result<Self> {
        let mut store = Self::new();
        store.replace_all(elements)?;
        Ok(store)
    }
}

impl ElementStore for MemoryStore {
    fn get(&self, id: &str) -> Option<Element> {
        self.elements.get(id).cloned()
    }

    fn put(&mut self, element: Element) -> Result<Element> {
        require_id(&element)?;
        self.elements.insert(element.id.clone(), element.clone());
        Ok(element)
    }

    fn put_batch(&mut self, elements: Vec<Element>) -> Result<Vec<Element>> {
        for element in &elements {
            require_id(element)?;
        }
        for element in &elements {
            self.elements.insert(element.id.clone(), element.clone());
        }
        Ok(elements)
    }

    fn delete(&mut self, id: &str) -> Result<Option<Element>> {
        Ok(self.elements.remove(id))
    }

    fn list(&self) -> Vec<Element> {
        self.elements.values().cloned().collect()
    }

    fn replace_all(&mut self, elements: Vec<Element>) -> Result<()> {
        for element in &elements {
            require_id(element)?;
        }
        self.elements = elements.into_iter().map(|e| (e.id.clone(), e)).collect();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.elements.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.elements.len()
    }
}

/// Memory store with write-through persistence to a single JSON file.
///
/// Layout: `<path>` holds a JSON array of elements. Every mutation rewrites
/// the file through a temp file + rename.
///
/// Writes are synchronous `std::fs` calls and run on the caller's thread,
/// inside whatever lock guards the store. Fine for canvas-sized files; a
/// larger store should move `persist` onto `spawn_blocking`.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open the store, loading existing elements if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let elements: Vec<Element> = if data.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&data)
                    .map_err(|e| SyncError::Store(format!("corrupt element file: {e}")))?
            };
            debug!(path = %path.display(), count = elements.len(), "Loaded element store");
            MemoryStore::from_elements(elements)?
        } else {
            MemoryStore::new()
        };
        Ok(Self { path, inner })
    }

    /// Default store location: `~/.sketch_sync/elements.json`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("elements.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking write of the full element list.
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.inner.list())?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ElementStore for JsonFileStore {
    fn get(&self, id: &str) -> Option<Element> {
        self.inner.get(id)
    }

    fn put(&mut self, element: Element) -> Result<Element> {
        let stored = self.inner.put(element)?;
        self.persist()?;
        Ok(stored)
    }

    fn put_batch(&mut self, elements: Vec<Element>) -> Result<Vec<Element>> {
        let stored = self.inner.put_batch(elements)?;
        self.persist()?;
        Ok(stored)
    }

    fn delete(&mut self, id: &str) -> Result<Option<Element>> {
        let removed = self.inner.delete(id)?;
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn list(&self) -> Vec<Element> {
        self.inner.list()
    }

    fn replace_all(&mut self, elements: Vec<Element>) -> Result<()> {
        self.inner.replace_all(elements)?;
        self.persist()
    }

    fn clear(&mut self) -> Result<()> {
        self.inner.clear()?;
        self.persist()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementType;

    fn rect(id: &str, x: f64) -> Element {
        Element::new(id, ElementType::Rectangle, x, 0.0).with_size(10.0, 10.0)
    }

    #[test]
    fn test_put_replaces_by_id() {
        let mut store = MemoryStore::new();
        store.put(rect("r1", 0.0)).unwrap();
        store.put(rect("r1", 42.0)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap().x, 42.0);
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut store = MemoryStore::new();
        assert!(store.delete("nope").unwrap().is_none());
        store.put(rect("r1", 0.0)).unwrap();
        assert!(store.delete("r1").unwrap().is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_put_rejects_empty_id() {
        let mut store = MemoryStore::new();
        let err = store.put(rect("  ", 0.0)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_put_batch_is_all_or_nothing_on_bad_id() {
        let mut store = MemoryStore::new();
        assert!(store.put_batch(vec![rect("r1", 0.0), rect("", 0.0)]).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("elements.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.put_batch(vec![rect("r1", 1.0), rect("r2", 2.0)]).unwrap();
            store.delete("r1").unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r2").unwrap().x, 2.0);
    }

    #[test]
    fn test_file_store_replace_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.put(rect("old", 0.0)).unwrap();
        store.replace_all(vec![rect("new", 0.0)]).unwrap();
        assert!(store.get("old").is_none());

        store.clear().unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}
