// File-backed stores shared by the pipeline stages.
//
// Every mutation goes through `update`, which holds an async mutex for the
// whole load-mutate-save sequence, and every save writes a temp file and
// renames it over the target. One process owning the store handle is the
// single writer.

use crate::error::CoreError;
use crate::models::{AddressRecord, CapitalSnapshot};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!("File does not exist: {:?}", path);
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::Io(format!("Failed to read {:?}: {}", path, e)))?;
    let data = serde_json::from_str(&json)?;
    Ok(Some(data))
}

async fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::Io(format!("Failed to create directory: {}", e)))?;
    }
    let json = serde_json::to_string_pretty(data)?;

    // Write-then-rename keeps readers from ever seeing a torn file.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| CoreError::Io(format!("Failed to write {:?}: {}", tmp, e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CoreError::Io(format!("Failed to replace {:?}: {}", path, e)))?;
    debug!("Saved {:?}", path);
    Ok(())
}

/// The shared collection of address records (`addresses.json`).
pub struct AddressStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AddressStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records; a missing file is an empty store.
    pub async fn load(&self) -> Result<Vec<AddressRecord>, CoreError> {
        Ok(load_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, records: &[AddressRecord]) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        save_json(&self.path, &records).await
    }

    /// Run one load-mutate-save transaction. The closure's return value is
    /// passed through.
    pub async fn update<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Vec<AddressRecord>) -> T,
    {
        let _guard = self.lock.lock().await;
        let mut records: Vec<AddressRecord> =
            load_json(&self.path).await?.unwrap_or_default();
        let out = f(&mut records);
        save_json(&self.path, &records).await?;
        Ok(out)
    }

    /// Mutate the record with the given address, if present. Returns
    /// whether a record was found.
    pub async fn update_record<F>(&self, address: &str, f: F) -> Result<bool, CoreError>
    where
        F: FnOnce(&mut AddressRecord),
    {
        self.update(|records| {
            match records.iter_mut().find(|r| r.address == address) {
                Some(rec) => {
                    f(rec);
                    true
                }
                None => false,
            }
        })
        .await
    }
}

/// `current_capital.json`: lamports available to the buy stage.
pub struct CapitalStore {
    path: PathBuf,
}

impl CapitalStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<Option<CapitalSnapshot>, CoreError> {
        load_json(&self.path).await
    }

    pub async fn save(&self, snapshot: CapitalSnapshot) -> Result<(), CoreError> {
        save_json(&self.path, &snapshot).await
    }
}

/// A scanner/security hand-off list of `[address, decimals]` pairs.
pub struct HandoffList {
    path: PathBuf,
}

impl HandoffList {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<Vec<(String, u8)>, CoreError> {
        Ok(load_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, entries: &[(String, u8)]) -> Result<(), CoreError> {
        save_json(&self.path, &entries).await
    }

    /// Append entries whose address is not already present. Returns how
    /// many were added.
    pub async fn merge(&self, incoming: &[(String, u8)]) -> Result<usize, CoreError> {
        let mut entries = self.load().await?;
        let mut added = 0;
        for (address, decimals) in incoming {
            if !entries.iter().any(|(a, _)| a == address) {
                entries.push((address.clone(), *decimals));
                added += 1;
            }
        }
        if added > 0 {
            self.save(&entries).await?;
        }
        Ok(added)
    }
}
