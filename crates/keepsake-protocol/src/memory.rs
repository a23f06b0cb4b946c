//! Memory records and the payloads used to create or patch them.

use crate::connection::Role;
use crate::{ConnectionId, MemoryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Prefix for ids assigned locally before the backend confirms a create.
pub const PROVISIONAL_ID_PREFIX: &str = "tmp-";

/// Content type of a memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Text,
    Photo,
    Voice,
    Video,
    Document,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Text => "text",
            MemoryKind::Photo => "photo",
            MemoryKind::Voice => "voice",
            MemoryKind::Video => "video",
            MemoryKind::Document => "document",
        }
    }

    /// Text and voice records feed the conversation preview.
    pub fn is_conversational(self) -> bool {
        matches!(self, MemoryKind::Text | MemoryKind::Voice)
    }
}

/// Media references attached to a memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryMedia {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl MemoryMedia {
    /// Primary media reference required by the given kind, if any.
    pub fn primary_for(&self, kind: MemoryKind) -> Option<&str> {
        match kind {
            MemoryKind::Text => None,
            MemoryKind::Photo => self.image_url.as_deref(),
            MemoryKind::Voice => self.audio_url.as_deref(),
            MemoryKind::Video => self.video_url.as_deref(),
            MemoryKind::Document => self.document_url.as_deref(),
        }
    }
}

/// Type-specific metadata carried by a memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    /// Question the memory answers when it was recorded from a prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// A single shared content unit belonging to one connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Memory {
    pub id: MemoryId,
    pub connection_id: ConnectionId,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub sender: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    #[serde(default)]
    pub media: MemoryMedia,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl Memory {
    /// True while the record still carries a locally assigned id.
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_ID_PREFIX)
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read_by.contains(user_id)
    }

    /// Merge the fields present in `patch` into this record.
    pub fn apply_patch(&mut self, patch: &MemoryPatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(media) = &patch.media {
            self.media = media.clone();
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = metadata.clone();
        }
    }
}

/// Payload for creating a memory; the backend assigns id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMemory {
    pub connection_id: ConnectionId,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    pub sender: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: MemoryMedia,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

/// Reasons a create payload is rejected before it reaches the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("memory is missing a connection id")]
    MissingConnection,
    #[error("{0} memory requires content")]
    EmptyContent(&'static str),
    #[error("{0} memory requires a media reference")]
    MissingMedia(&'static str),
}

impl NewMemory {
    /// Build a plain text memory.
    pub fn text(
        connection_id: impl Into<ConnectionId>,
        sender: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            kind: MemoryKind::Text,
            sender,
            content: content.into(),
            tags: Vec::new(),
            media: MemoryMedia::default(),
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Check required fields for the memory kind.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connection_id.trim().is_empty() {
            return Err(ValidationError::MissingConnection);
        }
        match self.kind {
            MemoryKind::Text => {
                if self.content.trim().is_empty() {
                    return Err(ValidationError::EmptyContent(self.kind.as_str()));
                }
            }
            kind => {
                if self.media.primary_for(kind).is_none_or(str::is_empty) {
                    return Err(ValidationError::MissingMedia(kind.as_str()));
                }
            }
        }
        Ok(())
    }

    /// Materialize the payload as a record with the given id and timestamp.
    pub fn into_memory(self, id: MemoryId, timestamp: DateTime<Utc>) -> Memory {
        Memory {
            id,
            connection_id: self.connection_id,
            kind: self.kind,
            sender: self.sender,
            content: self.content,
            timestamp,
            tags: normalize_tags(&self.tags),
            read_by: BTreeSet::new(),
            media: self.media,
            metadata: self.metadata,
        }
    }
}

/// Partial update for an existing memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MemoryMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MemoryMetadata>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.media.is_none()
            && self.metadata.is_none()
    }
}

/// Trim tags and drop blanks and repeats, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_string()))
        .map(str::to_string)
        .collect()
}
