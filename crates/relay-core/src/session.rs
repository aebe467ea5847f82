use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of conversation a session key addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Dm,
    Group,
}

impl ConversationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
        }
    }
}

/// Hierarchical key identifying a conversation's execution lane.
///
/// Form: `[scope:]provider:kind:peer`, e.g. `main:telegram:dm:12345`.
/// Two inbound messages with the same key must never produce two
/// concurrently mutating runs against the same transcript. The key is
/// derived per inbound message and persisted only as a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for a direct-message lane.
    pub fn direct(provider: &str, peer: &str) -> Self {
        Self(format!("{provider}:{}:{peer}", ConversationKind::Dm.as_str()))
    }

    /// Key for a group-conversation lane.
    pub fn group(provider: &str, group_id: &str) -> Self {
        Self(format!("{provider}:{}:{group_id}", ConversationKind::Group.as_str()))
    }

    /// Prefix an existing key with an agent scope, e.g. `main:` or `work:`.
    pub fn scoped(self, scope: &str) -> Self {
        Self(format!("{scope}:{}", self.0))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Conversation kind segment, if the key carries one.
    pub fn kind(&self) -> Option<ConversationKind> {
        self.0.split(':').find_map(|seg| match seg {
            "dm" => Some(ConversationKind::Dm),
            "group" => Some(ConversationKind::Group),
            _ => None,
        })
    }

    /// Whether this key addresses a direct-message lane.
    pub fn is_direct(&self) -> bool {
        self.kind() == Some(ConversationKind::Dm)
    }

    /// Filesystem-safe slug for the transcript filename.
    ///
    /// Path separators, `..`, and control characters must never reach the
    /// filesystem; anything outside `[A-Za-z0-9_.-]` maps to `-`.
    pub fn storage_slug(&self) -> String {
        let mut slug: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        while slug.contains("..") {
            slug = slug.replace("..", "-");
        }
        slug
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
