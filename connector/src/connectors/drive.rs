//! Folder walker shared by the drive-like connectors.
//!
//! A `DriveSource` lists folders; the walker decides which folders and files
//! fall under the configured restriction, compares hashes against the known
//! documents and emits events. Team-chat attachments reuse `process_file`
//! without walking anything.

use async_trait::async_trait;
use tracing::{debug, error, info};
use uuid::Uuid;

use ingest_models::{parse_blob_url, FileType, FileTypeRecognizer};

use super::error::ConnectorError;
use super::types::{ChangeItem, ConnectorBase, Content, ContentSource, EventSink, sanitize_file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// A drive item normalized across providers
#[derive(Debug, Clone)]
pub struct DriveEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub hash: Option<String>,
    pub mime_type: Option<String>,
    pub download_url: String,
    pub web_url: Option<String>,
    /// Authorization header needed to download, if the URL is not pre-signed
    pub download_auth: Option<String>,
    pub kind: EntryKind,
}

impl DriveEntry {
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

#[async_trait]
pub trait DriveSource: Send + Sync {
    async fn list_root(&self) -> Result<Vec<DriveEntry>, ConnectorError>;

    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveEntry>, ConnectorError>;
}

#[derive(Debug, Clone, Default)]
pub struct DriveOptions {
    /// `/`-separated path restriction, empty for none
    pub folder: String,
    pub recursive: bool,
    /// Files above this many bytes are skipped
    pub file_size_limit: u64,
}

pub struct DriveWalker {
    options: DriveOptions,
    base: ConnectorBase,
    recognizer: FileTypeRecognizer,
}

impl DriveWalker {
    pub fn new(options: DriveOptions, base: ConnectorBase) -> Self {
        Self {
            options,
            base,
            recognizer: FileTypeRecognizer::new(),
        }
    }

    /// Walks the drive from its root. Folders are listed one at a time.
    pub async fn walk(&mut self, source: &dyn DriveSource, sink: &EventSink) -> Result<(), ConnectorError> {
        let root = source.list_root().await?;
        let mut pending: Vec<(String, Vec<DriveEntry>)> = vec![(String::new(), root)];
        let mut unreadable = 0usize;

        while let Some((current, entries)) = pending.pop() {
            if !self.is_folder_analysing(&current) {
                continue;
            }
            let mut subfolders = Vec::new();

            for entry in entries {
                if sink.is_cancelled() {
                    return Err(ConnectorError::Cancelled);
                }
                match entry.kind {
                    EntryKind::File => {
                        if self.is_files_analysing(&current) {
                            self.process_file(&entry, sink).await?;
                        }
                    }
                    EntryKind::Folder => {
                        if !self.options.folder.is_empty()
                            && current.contains(self.options.folder.as_str())
                            && !self.options.recursive
                        {
                            continue;
                        }
                        let path = if current.is_empty() {
                            entry.name.clone()
                        } else {
                            format!("{}/{}", current, entry.name)
                        };
                        subfolders.push((path, entry.id));
                    }
                }
            }

            // reversed so folders are visited in listing order
            for (path, id) in subfolders.into_iter().rev() {
                if !self.is_folder_analysing(&path) {
                    continue;
                }
                match source.list_folder(&id).await {
                    Ok(entries) => pending.push((path, entries)),
                    Err(e) => {
                        error!("❌ Failed to list folder {} ({}): {}", path, id, e);
                        unreadable += 1;
                    }
                }
            }
        }

        if unreadable > 0 {
            return Err(ConnectorError::SyncFailed(format!(
                "{} folder(s) could not be listed",
                unreadable
            )));
        }
        Ok(())
    }

    /// Whether items inside `current` may be looked at at all
    pub fn is_folder_analysing(&self, current: &str) -> bool {
        let folder = self.options.folder.as_str();
        if folder.is_empty() {
            return current.is_empty() || self.options.recursive;
        }
        let mask = if current.len() < folder.len() {
            folder.get(..current.len()).unwrap_or(folder)
        } else {
            folder
        };
        let under_mask = format!("{}/", current).starts_with(&format!("{}/", mask));
        if self.options.recursive {
            under_mask || current == folder
        } else {
            under_mask && current.len() <= folder.len()
        }
    }

    /// Whether files directly inside `current` are processed
    pub fn is_files_analysing(&self, current: &str) -> bool {
        let folder = self.options.folder.as_str();
        if folder.is_empty() {
            return current.is_empty() || self.options.recursive;
        }
        if self.options.recursive {
            format!("{}/", current).starts_with(&format!("{}/", folder)) || current == folder
        } else {
            current == folder
        }
    }

    /// Compares one file against the known documents and emits the outcome
    pub async fn process_file(&mut self, entry: &DriveEntry, sink: &EventSink) -> Result<(), ConnectorError> {
        if entry.size > self.options.file_size_limit {
            debug!("Skipping {} ({} bytes over limit)", entry.name, entry.size);
            return Ok(());
        }

        let known = self.base.known(&entry.id);
        let reused_name = known
            .and_then(|doc| parse_blob_url(&doc.url))
            .map(|(_, file)| file.to_string());
        let file_name = match reused_name {
            Some(name) => name,
            None => sanitize_file_name(&format!("{}-{}", Uuid::new_v4(), entry.name)),
        };

        if let (Some(hash), Some(doc)) = (entry.hash.as_deref(), known) {
            if !hash.is_empty() && doc.signature == hash {
                return sink.seen(entry.id.as_str()).await;
            }
        }

        let (mime_type, file_type) = self.recognizer.recognize(&entry.name, entry.mime_type.as_deref());
        if file_type == FileType::Unknown {
            info!("⏭️  Unsupported file {} ({})", entry.name, entry.mime_type.as_deref().unwrap_or("-"));
            return sink.seen(entry.id.as_str()).await;
        }

        sink.changed(ChangeItem {
            source_id: entry.id.clone(),
            url: entry.download_url.clone(),
            original_url: entry.web_url.clone(),
            name: file_name,
            mime_type,
            file_type,
            signature: entry.hash.clone().unwrap_or_default(),
            content: Some(Content {
                bucket: self.base.bucket.clone(),
                source: ContentSource::Remote {
                    url: entry.download_url.clone(),
                    authorization: entry.download_auth.clone(),
                },
                append: false,
            }),
            checkpoint: None,
        })
        .await
    }
}
