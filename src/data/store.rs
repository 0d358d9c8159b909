//! Persisted-reading sinks.
//!
//! After a reading is accepted the manager hands it to a [`ReadingStore`]
//! on a detached task. Store failures are logged and otherwise ignored.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::TemperatureReading;
use crate::error::Result;

/// Preference key under which the latest reading is stored.
pub const LATEST_READING_KEY: &str = "temp";

/// Key-value preference store for the latest reading.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist `reading` as the latest value.
    async fn save_latest(&self, reading: TemperatureReading) -> Result<()>;
}

/// Format a reading the way it is stored: plain decimal text in °C.
pub fn format_reading(reading: &TemperatureReading) -> String {
    format!("{}", reading.celsius())
}

/// Spawn the delayed hand-off of `reading` to `store`. Aborting the handle cancels it.
pub(crate) fn spawn_persist(
    store: Arc<dyn ReadingStore>,
    reading: TemperatureReading,
    delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match store.save_latest(reading).await {
            Ok(()) => debug!("Persisted latest reading {:.2}°C", reading.celsius()),
            Err(e) => warn!("Failed to persist latest reading: {}", e),
        }
    })
}

/// In-memory store, mainly for tests and hosts that poll the value.
#[derive(Debug, Clone, Default)]
pub struct MemoryReadingStore {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryReadingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn save_latest(&self, reading: TemperatureReading) -> Result<()> {
        self.values
            .lock()
            .insert(LATEST_READING_KEY.to_string(), format_reading(&reading));
        Ok(())
    }
}

/// File-backed store holding `key=value` lines.
///
/// Clones share one write lock, so saves never interleave on the temp file.
#[derive(Debug, Clone)]
pub struct FileReadingStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileReadingStore {
    /// Store preferences in the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a value by key. A missing file reads as empty.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect())
    }
}

#[async_trait]
impl ReadingStore for FileReadingStore {
    async fn save_latest(&self, reading: TemperatureReading) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.load().await?;
        values.insert(LATEST_READING_KEY.to_string(), format_reading(&reading));

        let contents: String = values
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();

        // Replace the file atomically.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryReadingStore::new();
        assert_eq!(store.get(LATEST_READING_KEY), None);

        let reading = TemperatureReading::new(36.5).unwrap();
        assert_ok!(store.save_latest(reading).await);
        assert_eq!(store.get(LATEST_READING_KEY).as_deref(), Some("36.5"));
    }

    #[tokio::test]
    async fn test_file_store_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.prefs");
        tokio::fs::write(&path, "unit=celsius\n").await.unwrap();

        let store = FileReadingStore::new(&path);
        assert_eq!(store.get(LATEST_READING_KEY).await.unwrap(), None);

        assert_ok!(store.save_latest(TemperatureReading::new(21.25).unwrap()).await);
        assert_ok!(store.save_latest(TemperatureReading::new(22.5).unwrap()).await);

        assert_eq!(
            store.get(LATEST_READING_KEY).await.unwrap().as_deref(),
            Some("22.5")
        );
        assert_eq!(store.get("unit").await.unwrap().as_deref(), Some("celsius"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReadingStore::new(dir.path().join("settings.prefs"));

        let saves: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save_latest(TemperatureReading::new(20.0 + i as f32).unwrap())
                        .await
                })
            })
            .collect();
        for save in saves {
            assert_ok!(save.await.unwrap());
        }

        let stored = store.get(LATEST_READING_KEY).await.unwrap().unwrap();
        let celsius: f32 = stored.parse().unwrap();
        assert!((20.0..36.0).contains(&celsius));
    }

    #[tokio::test]
    async fn test_file_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReadingStore::new(dir.path().join("absent.prefs"));
        assert_eq!(store.get(LATEST_READING_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_persist_waits_for_delay() {
        let store = MemoryReadingStore::new();
        let reading = TemperatureReading::new(30.0).unwrap();
        let handle = spawn_persist(Arc::new(store.clone()), reading, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get(LATEST_READING_KEY), None);

        handle.await.unwrap();
        assert_eq!(store.get(LATEST_READING_KEY).as_deref(), Some("30"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_persist_swallows_store_errors() {
        let mut store = MockReadingStore::new();
        store.expect_save_latest().times(1).returning(|_| {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        });

        let reading = TemperatureReading::new(30.0).unwrap();
        let handle = spawn_persist(Arc::new(store), reading, Duration::from_millis(10));
        assert!(handle.await.is_ok());
    }
}
