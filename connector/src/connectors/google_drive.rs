use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ingest_models::file_type::{google_export_mime, GOOGLE_MIME_FOLDER, GOOGLE_MIME_SHORTCUT};
use ingest_models::messaging::PARAM_SESSION_ID;
use ingest_models::sync_state::ResolvedFolder;
use ingest_models::{Connector as ConnectorModel, ConnectorRequest, DriveSyncState, OAuthToken, SourceType, SyncState};

use super::drive::{DriveEntry, DriveOptions, DriveSource, DriveWalker, EntryKind};
use super::error::ConnectorError;
use super::factory::ConnectorContext;
use super::traits::{Connector, TaskSink};
use super::types::{parse_config, ConnectorBase, ConnectorEvent, EventSink, RunParams};

const LIST_FIELDS: &str = "nextPageToken, files(id,name,size,mimeType,md5Checksum,version,webViewLink)";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleDriveConfig {
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    /// Byte count, sent as a decimal string
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "md5Checksum", default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "webViewLink", default)]
    web_view_link: Option<String>,
}

/// Minimal Drive v3 REST client
#[derive(Clone)]
struct DriveApi {
    http: Client,
    base_url: String,
    authorization: String,
}

impl DriveApi {
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);
        let response = self
            .http
            .get(&url)
            .query(query)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::AuthenticationFailed(format!("Google Drive API: {}", status)));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::NotFound(format!("Google Drive API: {}", body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::HttpError(format!("Google Drive API error {}: {}", status, body)));
        }
        Ok(response.json::<T>().await?)
    }

    /// Every file matching `q`, across all result pages
    async fn search(&self, q: &str) -> Result<Vec<DriveFile>, ConnectorError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("q", q), ("fields", LIST_FIELDS)];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: FileList = self.get("/files", &query).await?;
            files.extend(page.files);
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                return Ok(files);
            }
        }
    }

    async fn children(&self, folder_id: &str) -> Result<Vec<DriveEntry>, ConnectorError> {
        let q = format!("'{}' in parents and trashed=false", quote(folder_id));
        let files = self.search(&q).await?;
        Ok(files.into_iter().filter_map(|file| self.entry(file)).collect())
    }

    /// Resolves a `/`-separated folder path to its id, one segment at a time
    async fn resolve_folder(&self, folder: &str) -> Result<String, ConnectorError> {
        let mut parent: Option<String> = None;
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            let scope = match parent.as_deref() {
                None => "(sharedWithMe or 'root' in parents)".to_string(),
                Some(id) => format!("'{}' in parents", quote(id)),
            };
            let q = format!(
                "name='{}' and mimeType='{}' and {}",
                quote(segment),
                GOOGLE_MIME_FOLDER,
                scope
            );
            let found = self.search(&q).await?;
            let Some(next) = found.into_iter().next() else {
                return Err(ConnectorError::NotFound(format!("folder '{}' in '{}'", segment, folder)));
            };
            parent = Some(next.id);
        }
        Ok(parent.unwrap_or_else(|| "root".to_string()))
    }

    fn entry(&self, file: DriveFile) -> Option<DriveEntry> {
        if file.mime_type == GOOGLE_MIME_SHORTCUT {
            return None;
        }
        let kind = if file.mime_type == GOOGLE_MIME_FOLDER {
            EntryKind::Folder
        } else {
            EntryKind::File
        };

        let (mime_type, download_url) = match google_export_mime(&file.mime_type) {
            Some(export) => (
                export.to_string(),
                format!(
                    "{}/files/{}/export?mimeType={}",
                    self.base_url,
                    file.id,
                    urlencoding::encode(export)
                ),
            ),
            None => (file.mime_type.clone(), format!("{}/files/{}?alt=media", self.base_url, file.id)),
        };
        let hash = file
            .md5_checksum
            .filter(|h| !h.is_empty())
            .or_else(|| file.version.filter(|v| !v.is_empty()));

        Some(DriveEntry {
            size: file.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            id: file.id,
            name: file.name,
            hash,
            mime_type: Some(mime_type),
            download_url,
            web_url: file.web_view_link,
            download_auth: Some(self.authorization.clone()),
            kind,
        })
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

struct GoogleSource {
    api: DriveApi,
    root_id: String,
}

#[async_trait]
impl DriveSource for GoogleSource {
    async fn list_root(&self) -> Result<Vec<DriveEntry>, ConnectorError> {
        self.api.children(&self.root_id).await
    }

    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveEntry>, ConnectorError> {
        self.api.children(folder_id).await
    }
}

pub struct GoogleDriveConnector {
    base: ConnectorBase,
    config: GoogleDriveConfig,
    token: Option<OAuthToken>,
    state: DriveSyncState,
    context: ConnectorContext,
}

impl GoogleDriveConnector {
    pub fn new(model: &ConnectorModel, context: &ConnectorContext) -> Result<Self, ConnectorError> {
        let config: GoogleDriveConfig = parse_config(model)?;
        let state = match SyncState::decode(&model.source, &model.state)? {
            SyncState::Drive(state) => state,
            _ => DriveSyncState::default(),
        };
        Ok(Self {
            base: ConnectorBase::from_model(model),
            config,
            token: model.oauth_token(),
            state,
            context: context.clone(),
        })
    }

    fn api(&self) -> DriveApi {
        DriveApi {
            http: self.context.http.clone(),
            base_url: self.context.endpoints.google_drive_url.trim_end_matches('/').to_string(),
            authorization: self.token.as_ref().map(|t| t.authorization()).unwrap_or_default(),
        }
    }

    async fn resolve_root(
        &self,
        api: &DriveApi,
        folder: &str,
        state: &mut DriveSyncState,
    ) -> Result<String, ConnectorError> {
        state.root_folder = None;
        let id = api.resolve_folder(folder).await?;
        info!("📂 Resolved Google Drive folder '{}' to {}", folder, id);
        state.root_folder = Some(ResolvedFolder {
            path: folder.to_string(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn scan(&self, sink: &EventSink, options: DriveOptions, state: &mut DriveSyncState) -> Result<(), ConnectorError> {
        let api = self.api();
        let folder = self.config.folder.trim_matches('/').to_string();

        let cached = state.root_folder.as_ref().filter(|root| root.path == folder).map(|root| root.id.clone());
        let root_id = match cached.clone() {
            Some(id) => id,
            None => self.resolve_root(&api, &folder, state).await?,
        };

        let source = GoogleSource { api: api.clone(), root_id };
        let mut walker = DriveWalker::new(options.clone(), self.base.clone());
        match walker.walk(&source, sink).await {
            // the root listing is the only request whose failure surfaces as is
            Err(ConnectorError::NotFound(reason)) if cached.is_some() => {
                warn!("⚠️ Cached folder '{}' is gone ({}), resolving it again", folder, reason);
                let root_id = self.resolve_root(&api, &folder, state).await?;
                let source = GoogleSource { api, root_id };
                let mut walker = DriveWalker::new(options, self.base.clone());
                walker.walk(&source, sink).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Connector for GoogleDriveConnector {
    fn source_type(&self) -> SourceType {
        SourceType::GoogleDrive
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        match &self.token {
            Some(token) if token.is_complete() => Ok(()),
            Some(_) => Err(ConnectorError::InvalidConfiguration("wrong token".to_string())),
            None => Err(ConnectorError::InvalidConfiguration("missing token".to_string())),
        }
    }

    fn execute(self: Box<Self>, cancel: CancellationToken, params: RunParams) -> mpsc::Receiver<ConnectorEvent> {
        let (sink, rx) = EventSink::channel(cancel);
        // the resolved folder is the walk root, so no further path restriction
        let options = DriveOptions {
            folder: String::new(),
            recursive: self.config.recursive,
            file_size_limit: params.file_limit(self.context.default_file_limit),
        };

        tokio::spawn(async move {
            let mut state = self.state.clone();
            match self.scan(&sink, options, &mut state).await {
                Ok(()) => {
                    state.last_scan_at = Some(Utc::now());
                    info!("📁 Google Drive scan finished for connector {}", self.base.connector_id);
                }
                Err(ConnectorError::Cancelled) => return,
                Err(e) => {
                    error!("❌ Google Drive scan failed for connector {}: {}", self.base.connector_id, e);
                    let _ = sink.failed(e).await;
                }
            }
            let _ = sink.emit(ConnectorEvent::State(SyncState::Drive(state))).await;
        });
        rx
    }

    async fn prepare_task(&self, session_id: Uuid, sink: &dyn TaskSink) -> Result<(), ConnectorError> {
        let request =
            ConnectorRequest::new(self.base.connector_id).with_param(PARAM_SESSION_ID, session_id.to_string());
        sink.run_connector(request).await
    }
}
