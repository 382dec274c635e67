//! The media library facade.
//!
//! [`MediaLibrary`] owns the configured storage, record store, imaging
//! backend and access gate, and exposes the operations a host application
//! (or the CLI) needs: upload, process, inspect, edit, delete and sweep.
//! Every operation that touches a record asks the [`Gate`] first.
//!
//! ## Deletion
//!
//! A soft delete only stamps `deletedAt`; blobs stay where they are and the
//! record keeps referencing them. A hard delete (`force`) removes the
//! primary blob and every derivative named in `metadata` before the record
//! itself, so a crash half-way leaves a record pointing at missing blobs
//! rather than blobs no record knows about.
//!
//! ## Orphan sweep
//!
//! A blob is an orphan when no record on its disk references it, neither as
//! `filePath` nor as a derivative. Upload already compensates a failed
//! record write; the sweep catches what a crash left behind.
//!
//! Uploads and processing runs write their blobs before the record that
//! references them, so a fresh unreferenced blob is usually still in
//! flight. The sweep only deletes orphans older than
//! `storage.orphan_grace_secs`, and checks the records once more right
//! before deleting. A zero grace window is only safe while nothing else
//! writes to the library.

use crate::access::{Ability, AllowAll, Gate};
use crate::config::{ConfigError, LibraryConfig};
use crate::imaging::{ImageBackend, RustBackend};
use crate::metadata::resolve;
use crate::process::{Pipeline, ProcessConfig, ProcessError, ProcessReport};
use crate::records::{JsonRecordStore, RecordError, RecordStore};
use crate::storage::{StorageAdapter, StorageError};
use crate::types::{MediaRecord, UploadOptions, UploadedFile};
use crate::upload::{UploadError, Uploader};
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("Processing failed: {0}")]
    Process(#[from] ProcessError),
    #[error("{actor} is not allowed to {ability}")]
    Forbidden { actor: String, ability: Ability },
}

/// Descriptive fields to change on a record.
///
/// `None` leaves a field alone. `Some` sets it; a blank string clears it.
#[derive(Debug, Clone, Default)]
pub struct DetailsUpdate {
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub description: Option<String>,
    pub folder_id: Option<String>,
    /// Replaces the whole tag set.
    pub tag_ids: Option<BTreeSet<String>>,
}

impl DetailsUpdate {
    fn apply(&self, record: &mut MediaRecord) {
        let fields = [
            (&self.title, &mut record.title),
            (&self.alt_text, &mut record.alt_text),
            (&self.caption, &mut record.caption),
            (&self.description, &mut record.description),
            (&self.folder_id, &mut record.folder_id),
        ];
        for (update, field) in fields {
            if let Some(value) = update {
                *field = resolve(&[Some(value.as_str())]);
            }
        }
        if let Some(tags) = &self.tag_ids {
            record.tag_ids = tags
                .iter()
                .filter_map(|t| resolve(&[Some(t.as_str())]))
                .collect();
        }
    }
}

/// Result of [`MediaLibrary::upload`].
#[derive(Debug, Clone)]
pub struct Uploaded {
    /// The record, including derivative keys when processing ran.
    pub record: MediaRecord,
    /// `None` when processing was not requested or could not run.
    pub processing: Option<ProcessReport>,
}

/// Result of [`MediaLibrary::delete`].
#[derive(Debug, Clone)]
pub enum Deleted {
    /// `deletedAt` is set; blobs are kept.
    Soft(MediaRecord),
    /// Record and blobs are gone. `blobs` lists the keys actually removed.
    Hard {
        record: MediaRecord,
        blobs: Vec<String>,
    },
}

/// Result of [`MediaLibrary::sweep_orphans`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub disk: String,
    /// Keys no record references that are older than the grace window,
    /// sorted.
    pub orphans: Vec<String>,
    /// Unreferenced keys still inside the grace window, left alone.
    pub recent: Vec<String>,
    /// Orphans actually deleted. Empty on a dry run.
    pub removed: Vec<String>,
    pub dry_run: bool,
}

/// Everything wired together.
pub struct MediaLibrary<B: ImageBackend + 'static = RustBackend> {
    storage: Arc<StorageAdapter>,
    records: Arc<dyn RecordStore>,
    gate: Arc<dyn Gate>,
    uploader: Uploader<B>,
    pipeline: Pipeline<B>,
    orphan_grace: Duration,
}

impl MediaLibrary<RustBackend> {
    /// Build a library from validated config: disks from `[storage]`, the
    /// JSON record store at `records.path`, the pure-Rust backend and an
    /// allow-all gate.
    pub fn open(config: &LibraryConfig) -> Result<Self, LibraryError> {
        config.validate()?;
        let storage = Arc::new(StorageAdapter::from_config(&config.storage)?);
        let records = Arc::new(JsonRecordStore::open(&config.records.path)?);
        Ok(Self::from_parts(
            config,
            storage,
            records,
            Arc::new(RustBackend::new()),
            Arc::new(AllowAll),
        ))
    }
}

impl<B: ImageBackend + 'static> MediaLibrary<B> {
    pub fn from_parts(
        config: &LibraryConfig,
        storage: Arc<StorageAdapter>,
        records: Arc<dyn RecordStore>,
        backend: Arc<B>,
        gate: Arc<dyn Gate>,
    ) -> Self {
        let uploader = Uploader::new(
            &config.upload,
            Arc::clone(&storage),
            Arc::clone(&records),
            Arc::clone(&backend),
            Arc::clone(&gate),
        );
        let pipeline = Pipeline::new(
            ProcessConfig::from_library_config(config),
            Arc::clone(&storage),
            Arc::clone(&records),
            backend,
        );
        Self {
            storage,
            records,
            gate,
            uploader,
            pipeline,
            orphan_grace: Duration::from_secs(config.storage.orphan_grace_secs),
        }
    }

    pub fn storage(&self) -> &StorageAdapter {
        &self.storage
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    fn check(
        &self,
        actor: &str,
        ability: Ability,
        record: Option<&MediaRecord>,
    ) -> Result<(), LibraryError> {
        if self.gate.allows(actor, ability, record) {
            Ok(())
        } else {
            tracing::debug!(actor, %ability, "denied");
            Err(LibraryError::Forbidden {
                actor: actor.to_string(),
                ability,
            })
        }
    }

    /// Upload `file`, then run the pipeline on it when `process` is set.
    ///
    /// Processing problems never fail an upload: they are logged and the
    /// stored record is returned without derivatives.
    pub fn upload(
        &self,
        file: &UploadedFile,
        options: &UploadOptions,
        actor: &str,
        process: bool,
    ) -> Result<Uploaded, LibraryError> {
        let record = self.uploader.upload(file, options, actor)?;
        if !process {
            return Ok(Uploaded {
                record,
                processing: None,
            });
        }
        match self.pipeline.process_image(&record) {
            Ok(report) => Ok(Uploaded {
                record: report.record.clone(),
                processing: Some(report),
            }),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "processing after upload failed");
                Ok(Uploaded {
                    record,
                    processing: None,
                })
            }
        }
    }

    /// Run the pipeline on record `id`.
    pub fn process(&self, id: Uuid, actor: &str) -> Result<ProcessReport, LibraryError> {
        let record = self.records.load(id)?;
        self.check(actor, Ability::Process, Some(&record))?;
        Ok(self.pipeline.process_image(&record)?)
    }

    pub fn show(&self, id: Uuid, actor: &str) -> Result<MediaRecord, LibraryError> {
        let record = self.records.load(id)?;
        self.check(actor, Ability::View, Some(&record))?;
        Ok(record)
    }

    /// Records `actor` may view, oldest first. Soft-deleted records are
    /// included only when asked for.
    pub fn list(
        &self,
        actor: &str,
        include_deleted: bool,
    ) -> Result<Vec<MediaRecord>, LibraryError> {
        Ok(self
            .records
            .list()?
            .into_iter()
            .filter(|r| include_deleted || !r.is_deleted())
            .filter(|r| self.gate.allows(actor, Ability::View, Some(r)))
            .collect())
    }

    /// Change descriptive fields, folder or tags of record `id`.
    pub fn update_details(
        &self,
        id: Uuid,
        update: &DetailsUpdate,
        actor: &str,
    ) -> Result<MediaRecord, LibraryError> {
        let record = self.records.load(id)?;
        self.check(actor, Ability::Update, Some(&record))?;
        let record = self.records.update(id, &mut |r| {
            update.apply(r);
            r.updated_at = Utc::now();
        })?;
        tracing::info!(%id, "details updated");
        Ok(record)
    }

    /// Soft delete record `id`, or remove it and its blobs when `force`.
    pub fn delete(&self, id: Uuid, force: bool, actor: &str) -> Result<Deleted, LibraryError> {
        let record = self.records.load(id)?;
        self.check(actor, Ability::Delete, Some(&record))?;

        if !force {
            if record.is_deleted() {
                return Ok(Deleted::Soft(record));
            }
            let record = self.records.update(id, &mut |r| {
                let now = Utc::now();
                r.deleted_at = Some(now);
                r.updated_at = now;
            })?;
            tracing::info!(%id, "soft deleted");
            return Ok(Deleted::Soft(record));
        }

        let mut keys = record.derived_keys();
        keys.retain(|k| *k != record.file_path);
        keys.sort();
        keys.dedup();
        keys.push(record.file_path.clone());
        let blobs: Vec<String> = keys
            .into_iter()
            .filter(|k| self.storage.delete(k, Some(&record.disk)))
            .collect();
        let record = self.records.remove(id)?;
        tracing::info!(%id, blobs = blobs.len(), "deleted");
        Ok(Deleted::Hard { record, blobs })
    }

    /// Find, and unless `dry_run` delete, blobs on `disk` that no record
    /// references and that are older than `storage.orphan_grace_secs`.
    pub fn sweep_orphans(
        &self,
        disk: Option<&str>,
        dry_run: bool,
    ) -> Result<SweepReport, LibraryError> {
        self.sweep_orphans_older_than(disk, dry_run, self.orphan_grace)
    }

    /// [`sweep_orphans`](Self::sweep_orphans) with an explicit grace window.
    pub fn sweep_orphans_older_than(
        &self,
        disk: Option<&str>,
        dry_run: bool,
        grace: Duration,
    ) -> Result<SweepReport, LibraryError> {
        let disk = self.storage.resolve_name(disk).to_string();
        let referenced = self.referenced_keys(&disk)?;

        let mut orphans = Vec::new();
        let mut recent = Vec::new();
        for key in self.storage.keys(Some(&disk))? {
            if referenced.contains(&key) {
                continue;
            }
            // Gone since listing: nothing to sweep.
            let Some(modified) = self.storage.modified(&key, Some(&disk))? else {
                continue;
            };
            let age = modified.elapsed().unwrap_or_default();
            if age < grace {
                recent.push(key);
            } else {
                orphans.push(key);
            }
        }

        let removed = if dry_run || orphans.is_empty() {
            Vec::new()
        } else {
            // A record may have claimed a key since the first look.
            let referenced = self.referenced_keys(&disk)?;
            orphans.retain(|k| !referenced.contains(k));
            orphans
                .iter()
                .filter(|k| self.storage.delete(k, Some(&disk)))
                .cloned()
                .collect()
        };
        tracing::info!(
            %disk,
            orphans = orphans.len(),
            recent = recent.len(),
            removed = removed.len(),
            dry_run,
            "swept"
        );
        Ok(SweepReport {
            disk,
            orphans,
            recent,
            removed,
            dry_run,
        })
    }

    /// Every key a record on `disk` points at.
    fn referenced_keys(&self, disk: &str) -> Result<HashSet<String>, LibraryError> {
        Ok(self
            .records
            .list()?
            .into_iter()
            .filter(|r| r.disk == disk)
            .flat_map(|r| {
                let mut keys = r.derived_keys();
                keys.push(r.file_path);
                keys
            })
            .collect())
    }
}
