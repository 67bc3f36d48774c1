//! Repository backed by a JSON file.
//!
//! Layout:
//!
//! ```json
//! {
//!   "bind_digest": "5e88...",
//!   "records": {
//!     "ou=certificateRepository,ou=ca,o=pki": { "nextRange": "30000001" }
//!   }
//! }
//! ```
//!
//! Writers serialize on an exclusive `fs2` lock of a sibling `.lock` file,
//! then replace the document with a fully written temporary file, so a
//! reader never sees a half-written store. Several processes on one host
//! can share the file; the lock is what makes `atomic_replace` atomic.
//!
//! `bind_digest` is the hex SHA-256 of the bind credential. Opening a store
//! that has one with a different (or no) credential fails, like a rejected
//! directory bind.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{RangeRepository, ReplaceOutcome};
use crate::error::RepositoryError;
use crate::range::RecordDn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bind_digest: Option<String>,
    #[serde(default)]
    records: BTreeMap<String, BTreeMap<String, String>>,
}

/// File-backed range store.
#[derive(Debug, Clone)]
pub struct FileRangeRepository {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileRangeRepository {
    /// Initialise a new store at `path`, optionally bound to `credential`.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists or cannot be written.
    pub fn create(
        path: impl AsRef<Path>,
        credential: Option<&SecretString>,
    ) -> Result<Self, RepositoryError> {
        let repo = Self::at(path.as_ref());
        if repo.path.exists() {
            return Err(RepositoryError::Storage(format!(
                "{} already exists",
                repo.path.display()
            )));
        }
        let document = StoreDocument {
            bind_digest: credential.map(credential_digest),
            records: BTreeMap::new(),
        };
        let _lock = repo.lock(true)?;
        repo.write_document(&document)?;
        tracing::info!(path = %repo.path.display(), "created range store");
        Ok(repo)
    }

    /// Open and bind to an existing store.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Unavailable`] if the file is missing or unreadable
    /// - [`RepositoryError::AuthenticationFailed`] if the store is bound and
    ///   `credential` is missing or does not match
    pub fn open(
        path: impl AsRef<Path>,
        credential: Option<&SecretString>,
    ) -> Result<Self, RepositoryError> {
        let repo = Self::at(path.as_ref());
        let document = {
            let _lock = repo.lock(false)?;
            repo.read_document()?
        };

        if let Some(expected) = &document.bind_digest {
            let Some(credential) = credential else {
                return Err(RepositoryError::AuthenticationFailed(
                    "store requires a credential".to_string(),
                ));
            };
            if credential_digest(credential) != *expected {
                return Err(RepositoryError::AuthenticationFailed(
                    "credential rejected".to_string(),
                ));
            }
        }
        tracing::debug!(path = %repo.path.display(), "bound to range store");
        Ok(repo)
    }

    /// Location of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn at(path: &Path) -> Self {
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
        }
    }

    fn lock(&self, exclusive: bool) -> Result<File, RepositoryError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        if exclusive {
            file.lock_exclusive()?;
        } else {
            file.lock_shared()?;
        }
        Ok(file)
    }

    fn read_document(&self) -> Result<StoreDocument, RepositoryError> {
        let file = File::open(&self.path)?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            RepositoryError::Storage(format!("{} is corrupt: {e}", self.path.display()))
        })
    }

    fn write_document(&self, document: &StoreDocument) -> Result<(), RepositoryError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, document)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    fn read_blocking(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let _lock = self.lock(false)?;
        let document = self.read_document()?;
        Ok(document
            .records
            .get(record.as_str())
            .and_then(|attrs| attrs.get(attribute))
            .cloned())
    }

    fn replace_blocking(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        let _lock = self.lock(true)?;
        let mut document = self.read_document()?;

        let attrs = document
            .records
            .entry(record.as_str().to_string())
            .or_default();
        let current = attrs.get(attribute).cloned();
        if current.as_deref() != expected {
            return Ok(ReplaceOutcome::Conflict { current });
        }
        attrs.insert(attribute.to_string(), new_value.to_string());
        self.write_document(&document)?;
        Ok(ReplaceOutcome::Replaced)
    }
}

fn credential_digest(credential: &SecretString) -> String {
    hex::encode(Sha256::digest(credential.expose_secret().as_bytes()))
}

async fn blocking<T, F>(task: F) -> Result<T, RepositoryError>
where
    F: FnOnce() -> Result<T, RepositoryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RepositoryError::Storage(format!("store task failed: {e}")))?
}

#[async_trait]
impl RangeRepository for FileRangeRepository {
    async fn read(
        &self,
        record: &RecordDn,
        attribute: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let repo = self.clone();
        let record = record.clone();
        let attribute = attribute.to_string();
        blocking(move || repo.read_blocking(&record, &attribute)).await
    }

    async fn atomic_replace(
        &self,
        record: &RecordDn,
        attribute: &str,
        expected: Option<&str>,
        new_value: &str,
    ) -> Result<ReplaceOutcome, RepositoryError> {
        let repo = self.clone();
        let record = record.clone();
        let attribute = attribute.to_string();
        let expected = expected.map(str::to_string);
        let new_value = new_value.to_string();
        blocking(move || {
            repo.replace_blocking(&record, &attribute, expected.as_deref(), &new_value)
        })
        .await
    }
}
