//! Incremental sync state persisted in the connector's state blob.
//!
//! The blob is stored as plain JSON; which shape it has is decided by the
//! connector's source type, never by the content of the blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ModelError;
use crate::source_type::SourceType;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Drive(DriveSyncState),
    Chat(ChatSyncState),
    None,
}

/// State of drive-like sources
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriveSyncState {
    /// Configured folder path together with the id it resolved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<ResolvedFolder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedFolder {
    pub path: String,
    pub id: String,
}

/// State of team-chat sources
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatSyncState {
    /// Delta link per channel id
    #[serde(default)]
    pub channels: HashMap<String, ChannelCursor>,
    /// Last processed message per topic or chat id
    #[serde(default)]
    pub topics: HashMap<String, TopicCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelCursor {
    #[serde(default)]
    pub delta_link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicCursor {
    pub last_created_date_time: Option<DateTime<Utc>>,
}

impl ChatSyncState {
    pub fn last_seen(&self, topic_id: &str) -> Option<DateTime<Utc>> {
        self.topics.get(topic_id).and_then(|cursor| cursor.last_created_date_time)
    }

    /// Moves a topic cursor forward; older timestamps are ignored
    pub fn advance(&mut self, topic_id: &str, seen: DateTime<Utc>) {
        let cursor = self.topics.entry(topic_id.to_string()).or_default();
        match cursor.last_created_date_time {
            Some(current) if current >= seen => {}
            _ => cursor.last_created_date_time = Some(seen),
        }
    }

    pub fn delta_link(&self, channel_id: &str) -> Option<&str> {
        self.channels
            .get(channel_id)
            .map(|cursor| cursor.delta_link.as_str())
            .filter(|link| !link.is_empty())
    }

    pub fn set_delta_link(&mut self, channel_id: &str, link: impl Into<String>) {
        self.channels.insert(
            channel_id.to_string(),
            ChannelCursor {
                delta_link: link.into(),
            },
        );
    }

    /// Makes the next run read the channel from the start again
    pub fn forget_delta_link(&mut self, channel_id: &str) {
        self.channels.remove(channel_id);
    }
}

impl SyncState {
    /// Empty state for a source type
    pub fn empty_for(source: &SourceType) -> Self {
        match source {
            SourceType::OneDrive | SourceType::GoogleDrive => SyncState::Drive(DriveSyncState::default()),
            SourceType::MsTeams => SyncState::Chat(ChatSyncState::default()),
            _ => SyncState::None,
        }
    }

    /// Decodes the stored blob through the variant matching `source`
    pub fn decode(source: &SourceType, raw: &serde_json::Value) -> Result<Self, ModelError> {
        if raw.is_null() || raw.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            return Ok(Self::empty_for(source));
        }
        let state = match Self::empty_for(source) {
            SyncState::Drive(_) => SyncState::Drive(serde_json::from_value(raw.clone())?),
            SyncState::Chat(_) => SyncState::Chat(serde_json::from_value(raw.clone())?),
            SyncState::None => SyncState::None,
        };
        Ok(state)
    }

    pub fn encode(&self) -> Result<serde_json::Value, ModelError> {
        let value = match self {
            SyncState::Drive(state) => serde_json::to_value(state)?,
            SyncState::Chat(state) => serde_json::to_value(state)?,
            SyncState::None => serde_json::Value::Null,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_picks_variant_from_source() {
        let raw = serde_json::json!({
            "channels": {"c1": {"delta_link": "https://graph/delta?token=1"}},
            "topics": {"t1": {"last_created_date_time": "2024-06-10T10:45:10Z"}}
        });
        let state = SyncState::decode(&SourceType::MsTeams, &raw).unwrap();
        match state {
            SyncState::Chat(chat) => {
                assert_eq!(chat.delta_link("c1"), Some("https://graph/delta?token=1"));
                assert!(chat.last_seen("t1").is_some());
            }
            other => panic!("unexpected state {:?}", other),
        }

        let web = SyncState::decode(&SourceType::Web, &raw).unwrap();
        assert_eq!(web, SyncState::None);
    }

    #[test]
    fn test_null_blob_yields_empty_state() {
        let state = SyncState::decode(&SourceType::OneDrive, &serde_json::Value::Null).unwrap();
        assert_eq!(state, SyncState::Drive(DriveSyncState::default()));
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let raw = serde_json::json!({"channels": "not-a-map"});
        assert!(SyncState::decode(&SourceType::MsTeams, &raw).is_err());
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let mut chat = ChatSyncState::default();
        let newer = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap();
        chat.advance("t1", newer);
        chat.advance("t1", older);
        assert_eq!(chat.last_seen("t1"), Some(newer));
    }

    #[test]
    fn test_forgotten_delta_link_restarts_the_channel() {
        let mut chat = ChatSyncState::default();
        chat.set_delta_link("c1", "https://graph/delta?token=1");
        chat.set_delta_link("c2", "https://graph/delta?token=2");
        chat.forget_delta_link("c1");
        assert_eq!(chat.delta_link("c1"), None);
        assert_eq!(chat.delta_link("c2"), Some("https://graph/delta?token=2"));
    }
}
