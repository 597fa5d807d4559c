//! Microsoft Graph client and payload models shared by OneDrive and Teams.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::drive::{DriveEntry, EntryKind};
use super::error::ConnectorError;

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    authorization: String,
}

impl GraphClient {
    pub fn new(http: Client, base_url: &str, authorization: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization,
        }
    }

    /// Absolute URL for a Graph path; links returned by Graph pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConnectorError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::AuthenticationFailed(format!("{} for {}", status, url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::HttpError(format!("HTTP {} for {}: {}", status, url, body)));
        }
        Ok(response.json::<T>().await?)
    }

    /// Follows `@odata.nextLink` until exhausted and returns every value
    pub async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ConnectorError> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path));
        while let Some(url) = next.take() {
            let page: Page<T> = self.get(&url).await?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(items)
    }
}

// ============================================================================
// Payload models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "webUrl", default)]
    pub web_url: Option<String>,
    #[serde(rename = "@microsoft.graph.downloadUrl", default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file: Option<DriveFile>,
    #[serde(default)]
    pub folder: Option<DriveFolder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveFile {
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub hashes: Option<DriveHashes>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveHashes {
    #[serde(rename = "quickXorHash", default)]
    pub quick_xor_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveFolder {
    #[serde(rename = "childCount", default)]
    pub child_count: i64,
}

impl DriveItem {
    /// Normalizes the item; entries that are neither file nor folder yield `None`
    pub fn into_entry(self) -> Option<DriveEntry> {
        let kind = if self.folder.is_some() {
            EntryKind::Folder
        } else if self.file.is_some() {
            EntryKind::File
        } else {
            return None;
        };
        let (mime_type, hash) = match self.file {
            Some(file) => (file.mime_type, file.hashes.and_then(|h| h.quick_xor_hash)),
            None => (None, None),
        };
        Some(DriveEntry {
            id: self.id,
            name: self.name,
            size: self.size,
            hash,
            mime_type,
            download_url: self.download_url.unwrap_or_default(),
            web_url: self.web_url,
            download_auth: None,
            kind,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(rename = "webUrl", default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "messageType", default)]
    pub message_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(rename = "createdDateTime")]
    pub created_date_time: DateTime<Utc>,
    #[serde(rename = "deletedDateTime", default)]
    pub deleted_date_time: Option<DateTime<Utc>>,
    #[serde(rename = "webUrl", default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub from: Option<MessageFrom>,
    #[serde(default)]
    pub body: Option<MessageBody>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn is_user_message(&self) -> bool {
        self.message_type == "message" && self.deleted_date_time.is_none()
    }

    pub fn author(&self) -> &str {
        self.from
            .as_ref()
            .and_then(|from| from.user.as_ref())
            .map(|user| user.display_name.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageFrom {
    #[serde(default)]
    pub user: Option<MessageUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageUser {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "contentType", default)]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "contentType", default)]
    pub content_type: String,
    #[serde(rename = "contentUrl", default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_item_normalization() {
        let item: DriveItem = serde_json::from_value(serde_json::json!({
            "id": "01ABC",
            "name": "plan.docx",
            "size": 2048,
            "webUrl": "https://contoso-my.sharepoint.com/plan.docx",
            "@microsoft.graph.downloadUrl": "https://download/plan",
            "file": {"mimeType": "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                     "hashes": {"quickXorHash": "aGFzaA=="}}
        }))
        .unwrap();

        let entry = item.into_entry().unwrap();
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.hash.as_deref(), Some("aGFzaA=="));
        assert_eq!(entry.download_url, "https://download/plan");
    }

    #[test]
    fn test_package_items_are_dropped() {
        let item: DriveItem = serde_json::from_value(serde_json::json!({"id": "p", "name": "notebook"})).unwrap();
        assert!(item.into_entry().is_none());
    }

    #[test]
    fn test_system_messages_are_not_user_messages() {
        let message: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": "1",
            "messageType": "systemEventMessage",
            "createdDateTime": "2024-06-10T10:45:10.413Z"
        }))
        .unwrap();
        assert!(!message.is_user_message());
        assert_eq!(message.author(), "unknown");
    }

    #[test]
    fn test_absolute_links_pass_through() {
        let client = GraphClient::new(Client::new(), "https://graph.microsoft.com/v1.0/", "Bearer t".into());
        assert_eq!(client.url("/me/drive"), "https://graph.microsoft.com/v1.0/me/drive");
        assert_eq!(client.url("https://graph.microsoft.com/next?x=1"), "https://graph.microsoft.com/next?x=1");
    }
}
