//! JSON documents under `<config>/.storage/`
//!
//! Every document is wrapped in an envelope naming its key and the schema
//! version that wrote it. A document from another major version is refused;
//! a newer minor version only gets a warning.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key} was written with version {found}, this build reads version {expected}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// A document with a fixed key and schema version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Storage {
            dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    async fn read(&self, key: &str) -> StorageResult<Option<StorageFile<Value>>> {
        match fs::read(self.path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Load the document for `T`; `None` when it was never saved
    pub async fn load_data<T: Storable>(&self) -> StorageResult<Option<T>> {
        let Some(file) = self.read(T::KEY).await? else {
            debug!("No stored {}", T::KEY);
            return Ok(None);
        };

        if file.version != T::VERSION {
            return Err(StorageError::VersionMismatch {
                key: T::KEY.to_owned(),
                expected: T::VERSION,
                found: file.version,
            });
        }
        if file.minor_version > T::MINOR_VERSION {
            warn!(
                "{} has minor version {}, newer than {}",
                T::KEY,
                file.minor_version,
                T::MINOR_VERSION
            );
        }

        debug!("Loaded {} v{}.{}", T::KEY, file.version, file.minor_version);
        Ok(Some(serde_json::from_value(file.data)?))
    }

    /// Replace the document for `T`; the new content is written next to the
    /// old one and renamed over it
    pub async fn save_data<T: Storable>(&self, data: &T) -> StorageResult<()> {
        let file = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_owned(),
            data,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        fs::create_dir_all(&self.dir).await?;
        let staging = self.path(&format!("{}.tmp", T::KEY));
        fs::write(&staging, bytes).await?;
        fs::rename(&staging, self.path(T::KEY)).await?;

        debug!("Saved {}", T::KEY);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sensors {
        names: Vec<String>,
    }

    impl Storable for Sensors {
        const KEY: &'static str = "test.sensors";
        const VERSION: u32 = 2;
        const MINOR_VERSION: u32 = 3;
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        assert_eq!(storage.load_data::<Sensors>().await.unwrap(), None);

        let sensors = Sensors {
            names: vec!["sensor.phone_battery".to_string()],
        };
        storage.save_data(&sensors).await.unwrap();
        assert_eq!(storage.load_data::<Sensors>().await.unwrap(), Some(sensors));

        let raw: Value =
            serde_json::from_slice(&std::fs::read(storage.path("test.sensors")).unwrap()).unwrap();
        assert_eq!(raw["key"], "test.sensors");
        assert_eq!(raw["version"], 2);
        assert_eq!(raw["minor_version"], 3);
        assert!(!storage.path("test.sensors.tmp").exists());
    }

    fn write_raw(storage: &Storage, document: Value) {
        std::fs::create_dir_all(storage.path("")).unwrap();
        std::fs::write(storage.path("test.sensors"), document.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_other_major_version_is_refused() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        write_raw(
            &storage,
            json!({"version": 1, "minor_version": 1, "key": "test.sensors", "data": {"names": []}}),
        );

        assert!(matches!(
            storage.load_data::<Sensors>().await,
            Err(StorageError::VersionMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_newer_minor_version_still_loads() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        write_raw(
            &storage,
            json!({"version": 2, "minor_version": 9, "key": "test.sensors", "data": {"names": ["a"]}}),
        );

        let loaded = storage.load_data::<Sensors>().await.unwrap().unwrap();
        assert_eq!(loaded.names, vec!["a".to_string()]);
    }
}
