use crate::settings::{get_path, remove_path, set_path, SettingsStore};
use crate::CoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Settings document held in memory only. Used by tests and dry runs.
pub struct MemorySettings {
    doc: RwLock<Value>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            doc: RwLock::new(Value::Object(Map::new())),
        }
    }
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: Value) -> Self {
        Self {
            doc: RwLock::new(doc),
        }
    }

    pub fn snapshot(&self) -> Value {
        self.doc.read().clone()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError> {
        Ok(get_path(&self.doc.read(), path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError> {
        let mut doc = self.doc.write();
        set_path(&mut doc, path, value)
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        remove_path(&mut self.doc.write(), path);
        Ok(())
    }
}
