//! Wire and domain types shared by the client crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-authoritative authorization level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Public,
    Employee,
    Admin,
}

/// Areas of the application gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Chat,
    Analytics,
    UserAdmin,
    KnowledgeAdmin,
}

impl Role {
    /// Whether this role may use `feature`.
    ///
    /// ```
    /// use agenthub_backend::{Feature, Role};
    ///
    /// assert!(Role::Employee.permits(Feature::Analytics));
    /// assert!(!Role::Employee.permits(Feature::UserAdmin));
    /// assert!(!Role::Public.permits(Feature::Analytics));
    /// ```
    pub fn permits(self, feature: Feature) -> bool {
        match feature {
            Feature::Chat => true,
            Feature::Analytics => matches!(self, Role::Employee | Role::Admin),
            Feature::UserAdmin | Feature::KnowledgeAdmin => self == Role::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Public => "PUBLIC",
            Role::Employee => "EMPLOYEE",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub uid: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub role: Role,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Chat,
    Analytics,
}

/// History list entry. Carries no message bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: SessionKind,
    #[serde(default)]
    pub date: Option<serde_json::Value>,
}

fn default_title() -> String {
    "New Chat".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A full conversation as returned by the session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSession {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: SessionKind,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Public export settings served by `/api/config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}
