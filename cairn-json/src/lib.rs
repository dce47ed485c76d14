use async_trait::async_trait;
use cairn_core::settings::{get_path, remove_path, set_path};
use cairn_core::{CoreError, SettingsStore};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, warn};

pub mod archive;
pub mod paths;

pub use archive::ZipArchiver;

/// Settings document persisted as one JSON file. Every mutation rewrites
/// the file atomically (temp file in the same directory, then rename).
pub struct JsonSettingsStore {
    path: PathBuf,
    doc: RwLock<Value>,
    // Serializes snapshot + write so an older snapshot never lands last.
    save_lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub async fn open_default() -> Result<Self, CoreError> {
        Self::open(paths::default_settings_file()).await
    }

    pub async fn open(path: PathBuf) -> Result<Self, CoreError> {
        let p = path.clone();
        let doc = task::spawn_blocking(move || load_or_init(&p))
            .await
            .map_err(|e| CoreError::Storage(format!("settings load task: {e}")))??;
        Ok(Self {
            path,
            doc: RwLock::new(doc),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Value {
        self.doc.read().clone()
    }

    async fn save(&self) -> Result<(), CoreError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.doc.read().clone();
        let path = self.path.clone();
        task::spawn_blocking(move || write_atomic(&path, &snapshot))
            .await
            .map_err(|e| CoreError::Storage(format!("settings save task: {e}")))?
            .map_err(|e| CoreError::io(format!("write {}", self.path.display()), e))
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError> {
        Ok(get_path(&self.doc.read(), path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError> {
        {
            let mut doc = self.doc.write();
            set_path(&mut doc, path, value)?;
        }
        self.save().await
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        let removed = remove_path(&mut self.doc.write(), path);
        if removed {
            self.save().await
        } else {
            Ok(())
        }
    }
}

fn load_or_init(path: &Path) -> Result<Value, CoreError> {
    match fs::read_to_string(path) {
        Ok(buf) => match serde_json::from_str::<Value>(&buf) {
            Ok(v @ Value::Object(_)) => {
                debug!(path = %path.display(), "loaded settings");
                Ok(v)
            }
            Ok(_) => recover_corrupt(path, "top level is not an object"),
            Err(e) => recover_corrupt(path, &e.to_string()),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let doc = Value::Object(Map::new());
            write_atomic(path, &doc).map_err(|e| CoreError::io(format!("create {}", path.display()), e))?;
            Ok(doc)
        }
        Err(e) => Err(CoreError::io(format!("read {}", path.display()), e)),
    }
}

/// Moves an unreadable settings file aside and starts from an empty document.
fn recover_corrupt(path: &Path, reason: &str) -> Result<Value, CoreError> {
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "settings.json".to_string());
    let aside = path.with_file_name(format!("{name}.corrupt-{ts}"));
    warn!(path = %path.display(), aside = %aside.display(), %reason, "settings file is corrupt, starting fresh");
    fs::rename(path, &aside).map_err(|e| CoreError::io(format!("move aside {}", path.display()), e))?;
    let doc = Value::Object(Map::new());
    write_atomic(path, &doc).map_err(|e| CoreError::io(format!("create {}", path.display()), e))?;
    Ok(doc)
}

fn write_atomic(path: &Path, doc: &Value) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(doc)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
