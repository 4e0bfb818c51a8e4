//! Graph-store snapshots: gzip-compressed tar archives of the data
//! directory, tracked in a JSON manifest.
//!
//! Failure semantics: any pause/resume or archive failure leaves the store
//! running and the data directory unchanged; partial archives are deleted.
//! A restore swaps directories via a staging path and atomic renames, so a
//! failed unpack never touches the live directory.

use crate::domain::{BackupRecord, StoreAdmin};
use crate::error::{Result, StorageError};
use crate::lock::store_lock;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    /// The graph store's on-disk data directory.
    pub data_dir: PathBuf,
    /// Logical store name; archiving holds this store's loader mutex.
    pub store_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStatistics {
    pub total_backups: usize,
    pub total_bytes: u64,
    pub oldest: Option<chrono::DateTime<Utc>>,
    pub newest: Option<chrono::DateTime<Utc>>,
}

pub struct BackupService {
    config: BackupConfig,
    admin: Arc<dyn StoreAdmin>,
}

impl BackupService {
    pub fn new(config: BackupConfig, admin: Arc<dyn StoreAdmin>) -> Self {
        Self { config, admin }
    }

    fn manifest_path(&self) -> PathBuf {
        self.config.backup_dir.join("manifest.json")
    }

    fn archive_path(&self, job_id: &str) -> PathBuf {
        self.config.backup_dir.join(format!("backup_{job_id}.tar.gz"))
    }

    fn load_manifest(&self) -> Result<Vec<BackupRecord>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_manifest(&self, records: &[BackupRecord]) -> Result<()> {
        fs::create_dir_all(&self.config.backup_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.config.backup_dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(records)?)?;
        tmp.flush()?;
        tmp.persist(self.manifest_path())
            .map_err(|e| StorageError::Backup(format!("manifest write: {e}")))?;
        Ok(())
    }

    /// Snapshot the data directory into `backup_<job_id>.tar.gz`.
    pub async fn create_backup(
        &self,
        job_id: &str,
        description: Option<String>,
    ) -> Result<BackupRecord> {
        if !self.config.data_dir.exists() {
            return Err(StorageError::Backup(format!(
                "data directory does not exist: {}",
                self.config.data_dir.display()
            )));
        }
        fs::create_dir_all(&self.config.backup_dir)?;

        // Loaders wait while the store is paused for archiving.
        let lock = store_lock(&self.config.store_name);
        let _guard = lock.lock().await;

        self.admin.pause().await?;

        let data_dir = self.config.data_dir.clone();
        let final_path = self.archive_path(job_id);
        let tmp_path = final_path.with_extension("gz.tmp");
        let tmp_for_task = tmp_path.clone();

        let archive_result = tokio::task::spawn_blocking(move || -> Result<()> {
            let file = fs::File::create(&tmp_for_task)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let dir_name = data_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "data".to_string());
            builder.append_dir_all(&dir_name, &data_dir)?;
            let encoder = builder
                .into_inner()
                .map_err(|e| StorageError::Backup(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| StorageError::Backup(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Backup(format!("archive task panicked: {e}")))
        .and_then(|inner| inner);

        let resume_result = self.admin.resume().await;

        if let Err(e) = archive_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        resume_result?;

        fs::rename(&tmp_path, &final_path)?;
        let size_bytes = fs::metadata(&final_path)?.len();

        let record = BackupRecord {
            job_id: job_id.to_string(),
            created_at: Utc::now(),
            archive_path: final_path,
            size_bytes,
            description,
        };

        let mut manifest = self.load_manifest()?;
        manifest.retain(|r| r.job_id != job_id);
        manifest.push(record.clone());
        self.save_manifest(&manifest)?;

        info!(job_id, size_bytes, "backup created");
        Ok(record)
    }

    /// Replace the data directory with a backup's contents. The swap is
    /// staged: unpack first, then two renames.
    pub async fn restore_backup(&self, job_id: &str) -> Result<BackupRecord> {
        let record = self
            .find_backup(job_id)?
            .ok_or_else(|| StorageError::BackupNotFound(job_id.to_string()))?;
        if !record.exists() {
            return Err(StorageError::Backup(format!(
                "archive missing on disk: {}",
                record.archive_path.display()
            )));
        }

        let lock = store_lock(&self.config.store_name);
        let _guard = lock.lock().await;

        self.admin.stop().await?;

        let dir_name = self
            .config
            .data_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "data".to_string());
        // Staged as a sibling of the data directory so the swap renames
        // never cross a filesystem boundary.
        let staging = self
            .config
            .data_dir
            .with_file_name(format!("{dir_name}.staging.{job_id}"));
        let unpack_result = unpack_archive(&record.archive_path, &staging);

        match unpack_result {
            Ok(()) => {}
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                let _ = self.admin.start().await;
                return Err(e);
            }
        }

        let staged_data = staging.join(&dir_name);
        if !staged_data.exists() {
            let _ = fs::remove_dir_all(&staging);
            let _ = self.admin.start().await;
            return Err(StorageError::Backup(format!(
                "archive does not contain {dir_name:?}"
            )));
        }

        // Sibling of the data directory so the swap renames never cross a
        // filesystem boundary.
        let displaced = self
            .config
            .data_dir
            .with_file_name(format!("{dir_name}.displaced.{job_id}"));
        if self.config.data_dir.exists() {
            fs::rename(&self.config.data_dir, &displaced)?;
        }
        if let Err(e) = fs::rename(&staged_data, &self.config.data_dir) {
            // Roll the original directory back before surfacing the error.
            if displaced.exists() {
                let _ = fs::rename(&displaced, &self.config.data_dir);
            }
            let _ = fs::remove_dir_all(&staging);
            let _ = self.admin.start().await;
            return Err(e.into());
        }

        let _ = fs::remove_dir_all(&displaced);
        let _ = fs::remove_dir_all(&staging);

        self.admin.start().await?;
        info!(job_id, "backup restored");
        Ok(record)
    }

    pub fn find_backup(&self, job_id: &str) -> Result<Option<BackupRecord>> {
        Ok(self
            .load_manifest()?
            .into_iter()
            .find(|r| r.job_id == job_id))
    }

    /// All recorded backups, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let mut records = self.load_manifest()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub fn delete_backup(&self, job_id: &str) -> Result<bool> {
        let mut manifest = self.load_manifest()?;
        let Some(position) = manifest.iter().position(|r| r.job_id == job_id) else {
            return Ok(false);
        };
        let record = manifest.remove(position);
        if record.archive_path.exists() {
            fs::remove_file(&record.archive_path)?;
        }
        self.save_manifest(&manifest)?;
        Ok(true)
    }

    /// Remove backups older than `max_age`, always keeping the newest
    /// `keep_minimum`. Returns the number removed.
    pub fn cleanup(&self, max_age: Duration, keep_minimum: usize) -> Result<usize> {
        let records = self.list_backups()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        let mut removed = 0;
        for record in records.iter().skip(keep_minimum) {
            if record.created_at < cutoff && self.delete_backup(&record.job_id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "backup cleanup complete");
        }
        Ok(removed)
    }

    pub fn storage_statistics(&self) -> Result<BackupStatistics> {
        let records = self.load_manifest()?;
        Ok(BackupStatistics {
            total_backups: records.len(),
            total_bytes: records.iter().map(|r| r.size_bytes).sum(),
            oldest: records.iter().map(|r| r.created_at).min(),
            newest: records.iter().map(|r| r.created_at).max(),
        })
    }
}

fn unpack_archive(archive_path: &Path, staging: &Path) -> Result<()> {
    fs::create_dir_all(staging)?;
    let file = fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(staging)
        .map_err(|e| StorageError::Backup(format!("unpack failed: {e}")))
}
