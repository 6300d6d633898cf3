use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Key/value store standing in for the window's session storage.
///
/// Backed by a JSON object on disk when a path is given; writes merge only
/// the keys this instance touched so two stores sharing a file do not clobber
/// each other. Without a path the store lives in memory for the session.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    path: Option<PathBuf>,
    payload: Map<String, Value>,
    dirty_keys: Vec<String>,
}

impl SessionStorage {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let payload = read_json_object(&path).unwrap_or_default();
        Self {
            path: Some(path),
            payload,
            dirty_keys: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            payload: Map::new(),
            dirty_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.refresh();
        self.payload.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.refresh();
        if self.payload.get(key) == Some(&value) {
            return Ok(());
        }
        self.payload.insert(key.to_string(), value);
        self.mark_dirty(key);
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.refresh();
        if self.payload.remove(key).is_none() {
            return Ok(());
        }
        self.mark_dirty(key);
        self.flush()
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.path.as_deref() else {
            self.dirty_keys.clear();
            return Ok(());
        };
        if self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(path).unwrap_or_default();
        for key in &self.dirty_keys {
            match self.payload.get(key) {
                Some(value) => {
                    on_disk.insert(key.clone(), value.clone());
                }
                None => {
                    on_disk.remove(key);
                }
            }
        }
        write_json_object(path, &on_disk)?;
        self.payload = on_disk;
        self.dirty_keys.clear();
        Ok(())
    }

    fn refresh(&mut self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if !self.dirty_keys.is_empty() {
            return;
        }
        if let Some(on_disk) = read_json_object(path) {
            self.payload = on_disk;
        }
    }

    fn mark_dirty(&mut self, key: &str) {
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SessionStorage;

    #[test]
    fn in_memory_storage_round_trips_values() -> anyhow::Result<()> {
        let mut storage = SessionStorage::in_memory();
        storage.set("conversationHistory", json!([{"role": "user"}]))?;
        assert_eq!(
            storage.get("conversationHistory"),
            Some(json!([{"role": "user"}]))
        );
        storage.remove("conversationHistory")?;
        assert_eq!(storage.get("conversationHistory"), None);
        assert!(storage.path().is_none());
        Ok(())
    }

    #[test]
    fn file_storage_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("session").join("storage.json");
        let mut storage = SessionStorage::open(&path);
        storage.set("key", json!({"value": 1}))?;

        let mut reopened = SessionStorage::open(&path);
        assert_eq!(reopened.get("key"), Some(json!({"value": 1})));
        Ok(())
    }

    #[test]
    fn writers_sharing_a_file_merge_their_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut first = SessionStorage::open(&path);
        let mut second = SessionStorage::open(&path);

        first.set("a", json!(1))?;
        second.set("b", json!(2))?;
        first.remove("a")?;

        let mut reloaded = SessionStorage::open(&path);
        assert_eq!(reloaded.get("a"), None);
        assert_eq!(reloaded.get("b"), Some(json!(2)));
        Ok(())
    }

    #[test]
    fn corrupt_file_starts_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        std::fs::write(&path, "not json")?;
        let mut storage = SessionStorage::open(&path);
        assert_eq!(storage.get("anything"), None);
        storage.set("anything", json!("ok"))?;
        assert_eq!(SessionStorage::open(&path).get("anything"), Some(json!("ok")));
        Ok(())
    }
}
