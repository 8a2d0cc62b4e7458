use crate::tuya::protocol::LocalKey;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("could not access key file '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed key file '{path}': {source}")]
    Malformed { path: PathBuf, source: serde_json::Error },
}

/// Where a refreshed local key is kept between runs.
pub trait KeyStore: Debug + Send + Sync {
    fn load(&self) -> Result<Option<LocalKey>, KeyStoreError>;

    fn store(&self, key: &LocalKey) -> Result<(), KeyStoreError>;
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    device: StoredDevice,
}

#[derive(Serialize, Deserialize)]
struct StoredDevice {
    local_key: String,
}

/// JSON file `{"device": {"local_key": "..."}}`, replaced atomically on every store.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileKeyStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> KeyStoreError {
        KeyStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<LocalKey>, KeyStoreError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "🔑 No stored key");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let file: KeyFile = serde_json::from_slice(&contents).map_err(|source| KeyStoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        let key = file.device.local_key.parse().map_err(|e| KeyStoreError::Malformed {
            path: self.path.clone(),
            source: serde::de::Error::custom(e),
        })?;
        Ok(Some(key))
    }

    fn store(&self, key: &LocalKey) -> Result<(), KeyStoreError> {
        let file = KeyFile {
            device: StoredDevice {
                local_key: key.as_str().to_string(),
            },
        };
        let contents = serde_json::to_vec_pretty(&file).map_err(|source| KeyStoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        atomic_write(&self.path, &contents).map_err(|e| self.io_error(e))?;
        info!(path = %self.path.display(), "🔑 Stored refreshed local key");
        Ok(())
    }
}

/// Writes to a temporary sibling, syncs it and renames it over `path`, so readers never see a partial file.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = Builder::new();
    builder.prefix(path.file_name().and_then(|name| name.to_str()).unwrap_or("device_key"));
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
