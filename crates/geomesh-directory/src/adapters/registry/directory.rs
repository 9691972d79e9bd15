use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::fs;
use tracing::debug;

use crate::domain::RegistryError;
use crate::ports::{RegistryScan, RegistryStore};

/// Registry stored as one file per key in a shared directory.
///
/// File names are the lowercase hex encoding of the key, so a prefix scan is
/// a file name prefix match. Writes land in a dot-prefixed temp file first
/// and are renamed into place; readers never observe a partial value.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    /// Use `root` as the registry, creating it if needed.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(|e| {
            RegistryError::unavailable(format!("cannot create {}: {e}", root.display()))
        })?;
        debug!(root = %root.display(), "Opened directory registry");
        Ok(Self { root })
    }

    /// Directory backing this registry.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        self.root.join(hex::encode(key))
    }
}

fn unavailable(err: std::io::Error) -> RegistryError {
    RegistryError::unavailable(err.to_string())
}

#[async_trait]
impl RegistryStore for DirectoryRegistry {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), RegistryError> {
        let target = self.path_for(key);
        let temp = self
            .root
            .join(format!(".{}.{:016x}.tmp", hex::encode(key), rand::random::<u64>()));

        fs::write(&temp, &value).await.map_err(unavailable)?;
        if let Err(err) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(unavailable(err));
        }
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, RegistryError> {
        match fs::read(self.path_for(key)).await {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(RegistryError::not_found(key)),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn scan(&self, prefix: &[u8]) -> Result<RegistryScan, RegistryError> {
        let entries = fs::read_dir(&self.root).await.map_err(unavailable)?;
        let hex_prefix = hex::encode(prefix);

        let scan = stream::unfold(Some(entries), move |state| {
            let hex_prefix = hex_prefix.clone();
            async move {
                let mut entries = state?;
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => return None,
                        // Yield the error once, then end the scan.
                        Err(err) => return Some((Err(unavailable(err)), None)),
                    };

                    let file_name = entry.file_name();
                    let Some(name) = file_name.to_str() else {
                        continue;
                    };
                    if !name.starts_with(&hex_prefix) {
                        continue;
                    }
                    let Ok(key) = hex::decode(name) else {
                        continue;
                    };

                    match fs::read(entry.path()).await {
                        Ok(value) => return Some((Ok((key, value)), Some(entries))),
                        // Removed between listing and reading.
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Some((Err(unavailable(err)), None)),
                    }
                }
            }
        });

        Ok(scan.boxed())
    }
}
