use crate::profile::VendorProfile;
use crate::store::{VendorStore, DEFAULT_RESULT_CAP};
use dvmscan_core::PublicKey;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("{} is not a valid vendor file: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("{} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode vendor data: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The vendor file on disk: a JSON object mapping hex public keys to
/// profiles.
#[derive(Debug, Clone)]
pub struct VendorFile {
    path: PathBuf,
    result_cap: usize,
}

impl VendorFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        VendorFile { path: path.into(), result_cap: DEFAULT_RESULT_CAP }
    }

    pub fn with_result_cap(mut self, result_cap: usize) -> Self {
        self.result_cap = result_cap;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored profiles. A missing or empty file is an empty store;
    /// anything unreadable is an error and the file is left untouched.
    pub fn load(&self) -> Result<VendorStore, PersistenceError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no vendor file yet");
                return Ok(VendorStore::new(self.result_cap));
            }
            Err(source) => return Err(PersistenceError::Read { path: self.path.clone(), source }),
        };
        if text.trim().is_empty() {
            return Ok(VendorStore::new(self.result_cap));
        }
        let raw: BTreeMap<String, VendorProfile> = serde_json::from_str(&text)
            .map_err(|source| PersistenceError::Parse { path: self.path.clone(), source })?;
        for (key, profile) in &raw {
            let matches = PublicKey::from_hex(key).map(|k| k == profile.pubkey).unwrap_or(false);
            if !matches {
                return Err(PersistenceError::Corrupt {
                    path: self.path.clone(),
                    reason: format!("entry {key} holds profile for {}", profile.pubkey),
                });
            }
        }
        let store = VendorStore::from_profiles(raw.into_values(), self.result_cap);
        info!(path = %self.path.display(), vendors = store.len(), "loaded vendor file");
        Ok(store)
    }

    /// Replace the file atomically: write a sibling temp file, sync, rename.
    pub fn save(&self, store: &VendorStore) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| PersistenceError::Write { path: parent.to_path_buf(), source })?;
        }
        let tmp = tmp_path(&self.path);
        let result = write_snapshot(&tmp, store).and_then(|()| {
            fs::rename(&tmp, &self.path)
                .map_err(|source| PersistenceError::Write { path: self.path.clone(), source })
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;
        info!(path = %self.path.display(), vendors = store.len(), "saved vendor file");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_snapshot(path: &Path, store: &VendorStore) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, store.profiles())?;
    out.write_all(b"\n").map_err(write_err)?;
    let file = out.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)
}
