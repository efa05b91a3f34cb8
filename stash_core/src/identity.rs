//! Caller-supplied identity of an attachment.
//!
//! An [`ObjectIdentity`] is never stored. Every read and write re-derives the
//! object name and the encryption material from it, so two equal identities
//! always address the same object.

use serde::{Deserialize, Serialize};

/// Service tier flag that becomes part of the object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierFlag {
    #[default]
    Standard,
    Premium,
}

impl TierFlag {
    pub fn from_premium(premium: bool) -> Self {
        if premium {
            TierFlag::Premium
        } else {
            TierFlag::Standard
        }
    }

    /// Digit used in the object name.
    pub fn as_digit(self) -> char {
        match self {
            TierFlag::Standard => '0',
            TierFlag::Premium => '1',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub guild_id: String,
    pub channel_id: String,
    pub attachment_id: String,
    /// Size of the plaintext attachment as reported by the caller.
    pub file_size: u64,
    #[serde(default)]
    pub tier: TierFlag,
    /// Optional key prefixed to the object name.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ObjectIdentity {
    pub fn new(
        guild_id: impl Into<String>,
        channel_id: impl Into<String>,
        attachment_id: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            attachment_id: attachment_id.into(),
            file_size,
            tier: TierFlag::Standard,
            namespace: None,
        }
    }

    pub fn with_tier(mut self, tier: TierFlag) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}
