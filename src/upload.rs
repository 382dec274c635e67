//! Upload orchestration.
//!
//! ```text
//! gate → validate → name + path → store blob → dimensions → record → persist
//! ```
//!
//! A blob is durable before its record is written. If the record write
//! fails, the blob is deleted again (compensating delete) and the record
//! error is returned, so a failed upload leaves nothing behind. Blobs
//! orphaned anyway (a crash between the two writes) are found by
//! [`MediaLibrary::sweep_orphans`](crate::library::MediaLibrary::sweep_orphans).
//!
//! Processing is not part of upload: callers run the pipeline inline or
//! defer it, and a failed thumbnail can never fail an upload.

use crate::access::{Ability, Gate};
use crate::config::UploadConfig;
use crate::imaging::ImageBackend;
use crate::metadata::{MetadataExtractor, resolve};
use crate::naming::{NameGenerator, PathContext, storage_key, upload_path};
use crate::records::{RecordError, RecordStore};
use crate::storage::{StorageAdapter, StorageError};
use crate::types::{MediaRecord, UploadOptions, UploadedFile, is_processable_image};
use crate::validation::{ValidationError, Validator};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// How many fresh names to try when a generated key is already taken.
const MAX_KEY_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{actor} is not allowed to upload")]
    Forbidden { actor: String },
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Turns incoming files into stored blobs and persisted records.
pub struct Uploader<B: ImageBackend> {
    storage: Arc<StorageAdapter>,
    records: Arc<dyn RecordStore>,
    backend: Arc<B>,
    gate: Arc<dyn Gate>,
    validator: Validator,
    names: NameGenerator,
    path_format: String,
}

impl<B: ImageBackend> Uploader<B> {
    pub fn new(
        config: &UploadConfig,
        storage: Arc<StorageAdapter>,
        records: Arc<dyn RecordStore>,
        backend: Arc<B>,
        gate: Arc<dyn Gate>,
    ) -> Self {
        Self {
            storage,
            records,
            backend,
            gate,
            validator: Validator::new(config),
            names: NameGenerator::new(&config.sanitize),
            path_format: config.path_format.clone(),
        }
    }

    /// Validate, store and record `file` on behalf of `actor`.
    pub fn upload(
        &self,
        file: &UploadedFile,
        options: &UploadOptions,
        actor: &str,
    ) -> Result<MediaRecord, UploadError> {
        if !self.gate.allows(actor, Ability::Upload, None) {
            return Err(UploadError::Forbidden {
                actor: actor.to_string(),
            });
        }

        let mime_type = self.validator.validate(file)?;
        let uploaded_by = resolve(&[options.uploaded_by.as_deref(), Some(actor)])
            .unwrap_or_else(|| "guest".to_string());
        let disk = self
            .storage
            .resolve_name(options.disk.as_deref())
            .to_string();

        let dir = upload_path(&self.path_format, &PathContext::new(Some(uploaded_by.clone())));
        let (file_name, key) = self.store_unique(file, &dir, &disk)?;

        let dims = if is_processable_image(&mime_type) {
            MetadataExtractor::new(self.backend.as_ref()).dimensions_of(&file.bytes, &file_name)
        } else {
            None
        };

        let now = Utc::now();
        let record = MediaRecord {
            id: Uuid::new_v4(),
            file_name,
            original_file_name: file.name.clone(),
            file_path: key,
            disk,
            mime_type,
            file_size_bytes: file.size(),
            checksum: checksum(&file.bytes),
            width: dims.map(|d| d.width),
            height: dims.map(|d| d.height),
            title: resolve(&[options.title.as_deref()]),
            alt_text: resolve(&[options.alt_text.as_deref()]),
            caption: resolve(&[options.caption.as_deref()]),
            description: resolve(&[options.description.as_deref()]),
            folder_id: resolve(&[options.folder_id.as_deref()]),
            tag_ids: options
                .tag_ids
                .iter()
                .filter_map(|t| resolve(&[Some(t.as_str())]))
                .collect(),
            metadata: Default::default(),
            uploaded_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        if let Err(e) = self.records.insert(&record) {
            let removed = self.storage.delete(&record.file_path, Some(&record.disk));
            tracing::warn!(
                key = %record.file_path,
                disk = %record.disk,
                removed,
                error = %e,
                "record write failed, deleted stored blob"
            );
            return Err(e.into());
        }

        tracing::info!(
            id = %record.id,
            key = %record.file_path,
            mime = %record.mime_type,
            bytes = record.file_size_bytes,
            "uploaded"
        );
        Ok(record)
    }

    /// Store the bytes under a freshly generated name, retrying with a new
    /// name if the key is taken. Returns `(file_name, key)`.
    fn store_unique(
        &self,
        file: &UploadedFile,
        dir: &str,
        disk: &str,
    ) -> Result<(String, String), UploadError> {
        let mut attempt = 1;
        loop {
            let file_name = self.names.generate_file_name(&file.name);
            let key = storage_key(dir, &file_name);
            match self.storage.store(&file.bytes, &key, Some(disk)) {
                Ok(key) => return Ok((file_name, key)),
                Err(StorageError::AlreadyExists { .. }) if attempt < MAX_KEY_ATTEMPTS => {
                    tracing::debug!(%key, attempt, "storage key taken, generating another");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
