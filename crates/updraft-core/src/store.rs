//! `KeyValueStore` implementations: an in-memory map and a single JSON
//! document on disk. Both also serve as a host `VersionRecord`.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use log::debug;
use updraft_host::{HostError, KeyValueStore, VersionRecord};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), HostError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HostError> {
        self.lock().remove(key);
        Ok(())
    }
}

impl VersionRecord for MemoryStore {
    fn version_of(&self, identifier: &str) -> Option<String> {
        KeyValueStore::get(self, identifier)
    }

    fn record(&self, identifier: &str, version: &str) -> Result<(), HostError> {
        KeyValueStore::set(self, identifier, version)
    }
}

/// A string map persisted as one JSON object.
///
/// Every mutation re-reads the file under an exclusive advisory lock on a
/// sibling `.lock` file, applies the change and atomically replaces the
/// document, so several processes sharing the file see last-writer-wins
/// semantics per key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        let Ok(data) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&data).unwrap_or_else(|error| {
            debug!(
                "Ignoring unreadable store {}: {error}",
                self.path.display()
            );
            BTreeMap::new()
        })
    }

    fn update<F>(&self, apply: F) -> Result<(), HostError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let parent = self.path.parent().ok_or_else(|| {
            HostError::store("json store", "store path has no parent directory")
        })?;
        std::fs::create_dir_all(parent)?;

        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file.lock_exclusive()?;

        let mut entries = self.load();
        apply(&mut entries);
        let data =
            serde_json::to_vec_pretty(&entries).map_err(|e| HostError::store("json store", e))?;
        let result = write_atomic(&self.path, &data).map_err(HostError::from);

        let _ = FileExt::unlock(&lock_file);
        result
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), HostError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), HostError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

impl VersionRecord for JsonFileStore {
    fn version_of(&self, identifier: &str) -> Option<String> {
        KeyValueStore::get(self, identifier)
    }

    fn record(&self, identifier: &str, version: &str) -> Result<(), HostError> {
        KeyValueStore::set(self, identifier, version)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "store path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("store");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique store temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use updraft_host::{KeyValueStore, VersionRecord};

    use super::{JsonFileStore, MemoryStore};

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").expect("set succeeds");
        assert_eq!(KeyValueStore::get(&store, "a").as_deref(), Some("1"));

        store.remove("a").expect("remove succeeds");
        store.remove("a").expect("removing a missing key succeeds");
        assert!(store.is_empty());
    }

    #[test]
    fn json_store_persists_across_instances() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("nested").join("cache.json");

        JsonFileStore::new(&path)
            .set("latest-release-response", "{\"v\":1}")
            .expect("write should succeed");

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            KeyValueStore::get(&reopened, "latest-release-response").as_deref(),
            Some("{\"v\":1}")
        );
    }

    #[test]
    fn json_store_remove_keeps_other_keys() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let store = JsonFileStore::new(temp_dir.path().join("cache.json"));
        store.set("one", "1").expect("write one");
        store.set("two", "2").expect("write two");

        store.remove("one").expect("remove one");

        assert!(KeyValueStore::get(&store, "one").is_none());
        assert_eq!(KeyValueStore::get(&store, "two").as_deref(), Some("2"));
    }

    #[test]
    fn json_store_recovers_from_corrupt_document() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("cache.json");
        std::fs::write(&path, "{not-valid-json").expect("corrupt file should be written");

        let store = JsonFileStore::new(&path);
        assert!(KeyValueStore::get(&store, "anything").is_none());
        store.set("fresh", "yes").expect("write over corrupt file");
        assert_eq!(KeyValueStore::get(&store, "fresh").as_deref(), Some("yes"));

        let leftovers = std::fs::read_dir(temp_dir.path())
            .expect("read temp dir entries")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn version_record_shares_key_space() {
        let store = MemoryStore::new();
        store
            .record("clothing-form/clothing-form.php", "2.5.9")
            .expect("record succeeds");
        assert_eq!(
            store.version_of("clothing-form/clothing-form.php").as_deref(),
            Some("2.5.9")
        );
    }
}
