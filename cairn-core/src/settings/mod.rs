use crate::CoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod memory;

pub const ACTIVE_PROFILES: &str = "/profiles/activeProfiles";
pub const LOGGED_IN_PROFILE: &str = "/profiles/loggedInProfile";
pub const DELETE_PROFILE: &str = "/profiles/deleteProfile";
pub const PROFILES: &str = "/profiles";
pub const LAST_BACKUP_DATE: &str = "/backups/lastBackupDate";
pub const JUST_UPDATED: &str = "/settings/justUpdated";

/// Key-path addressable settings document.
///
/// Paths are slash separated (`/profiles/activeProfiles`). `set` creates
/// missing intermediate objects, `delete` of a missing path is a no-op.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, CoreError>;
    async fn set(&self, path: &str, value: Value) -> Result<(), CoreError>;
    async fn delete(&self, path: &str) -> Result<(), CoreError>;
}

/// Reads `path` and deserializes it. A value of the wrong shape is a
/// configuration error, a missing one is `None`.
pub async fn read_typed<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    path: &str,
) -> Result<Option<T>, CoreError> {
    match store.get(path).await? {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| CoreError::Configuration(format!("{path}: {e}"))),
    }
}

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in segments(path) {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), CoreError> {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        *doc = value;
        return Ok(());
    };
    let mut cur = doc;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = cur
            .as_object_mut()
            .map(|m| m.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new())))
            .ok_or_else(|| CoreError::Storage(format!("cannot descend into {path}")))?;
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Some(m) = cur.as_object_mut() {
        m.insert(last.to_string(), value);
    }
    Ok(())
}

/// Returns whether something was removed.
pub fn remove_path(doc: &mut Value, path: &str) -> bool {
    let segs = segments(path);
    let Some((last, parents)) = segs.split_last() else {
        let had = !doc.is_null();
        *doc = Value::Object(Map::new());
        return had;
    };
    let mut cur = doc;
    for seg in parents {
        match cur.as_object_mut().and_then(|m| m.get_mut(*seg)) {
            Some(next) => cur = next,
            None => return false,
        }
    }
    cur.as_object_mut()
        .map(|m| m.remove(*last).is_some())
        .unwrap_or(false)
}
