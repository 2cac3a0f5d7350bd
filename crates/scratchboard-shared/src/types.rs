use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// One execution context (a browser tab, a window, a worker) sharing an origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Gif,
    Video,
}

/// One admin-editable entry of the positions catalog.
///
/// Serialized with camelCase field names so the persisted array and the
/// envelope payload keep the `{ id, title, mediaRef, mediaKind,
/// isSystemDefault }` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    /// URL or embedded data URI.
    pub media_ref: String,
    #[serde(default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub is_system_default: bool,
}

impl CatalogItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        media_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            media_ref: media_ref.into(),
            media_kind: MediaKind::Image,
            is_system_default: false,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = kind;
        self
    }

    pub fn system_default(mut self) -> Self {
        self.is_system_default = true;
        self
    }

    /// Check the fields an upsert requires. Whitespace-only counts as blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::BlankId);
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::BlankTitle {
                id: self.id.clone(),
            });
        }
        if self.media_ref.trim().is_empty() {
            return Err(ValidationError::MissingMedia {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}
