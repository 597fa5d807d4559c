use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity provider that issued a credential
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OAuthProvider {
    Custom,
    Microsoft,
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Custom => "custom",
            OAuthProvider::Microsoft => "microsoft",
            OAuthProvider::Google => "google",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "custom" => Some(OAuthProvider::Custom),
            "microsoft" => Some(OAuthProvider::Microsoft),
            "google" => Some(OAuthProvider::Google),
            _ => None,
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth2 token as exchanged with the OAuth gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OAuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// A token is usable once access, refresh and type are all present
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && !self.token_type.is_empty()
    }

    /// Value for the `Authorization` header
    pub fn authorization(&self) -> String {
        let token_type = if self.token_type.is_empty() { "Bearer" } else { self.token_type.as_str() };
        format!("{} {}", token_type, self.access_token)
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.map(|expiry| expiry <= Utc::now()).unwrap_or(true)
    }
}

/// Secret material attached to a connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub source: String,
    pub provider: OAuthProvider,
    pub token: Option<OAuthToken>,
    #[serde(default)]
    pub custom: serde_json::Value,
    pub created_date: DateTime<Utc>,
    pub updated_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_completeness() {
        let mut token = OAuthToken {
            access_token: "a".into(),
            token_type: "Bearer".into(),
            refresh_token: "r".into(),
            expiry: None,
        };
        assert!(token.is_complete());
        token.refresh_token.clear();
        assert!(!token.is_complete());
    }

    #[test]
    fn test_authorization_header_defaults_to_bearer() {
        let token = OAuthToken {
            access_token: "abc".into(),
            ..Default::default()
        };
        assert_eq!(token.authorization(), "Bearer abc");
        assert!(token.is_expired());
    }
}
