use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential::OAuthProvider;

/// Kind of external system a connector pulls from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Web,
    File,
    OneDrive,
    GoogleDrive,
    MsTeams,
    Youtube,
    /// Source types that are stored but have no fetcher in this engine
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Web => "web",
            SourceType::File => "file",
            SourceType::OneDrive => "one-drive",
            SourceType::GoogleDrive => "google_drive",
            SourceType::MsTeams => "msteams",
            SourceType::Youtube => "youtube",
            SourceType::Other(name) => name.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "web" => SourceType::Web,
            "file" => SourceType::File,
            "one-drive" | "onedrive" => SourceType::OneDrive,
            "google_drive" => SourceType::GoogleDrive,
            "msteams" => SourceType::MsTeams,
            "youtube" => SourceType::Youtube,
            other => SourceType::Other(other.to_string()),
        }
    }

    /// OAuth provider whose tokens this source type needs refreshed
    pub fn oauth_provider(&self) -> Option<OAuthProvider> {
        match self {
            SourceType::OneDrive | SourceType::MsTeams => Some(OAuthProvider::Microsoft),
            SourceType::GoogleDrive => Some(OAuthProvider::Google),
            _ => None,
        }
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        SourceType::parse(&value)
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
