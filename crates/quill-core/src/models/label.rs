//! Label model

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

use super::{OwnerId, SyncStatus};
use crate::error::{Error, Result};

/// Color given to labels created without one
pub const DEFAULT_LABEL_COLOR: &str = "#808080";

static COLOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("Invalid regex"));

/// A unique identifier for a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(Uuid);

impl LabelId {
    /// Create a new unique label ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LabelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LabelId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A label for organizing notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Unique identifier
    pub id: LabelId,
    pub owner: OwnerId,
    /// Display name, unique per owner among live labels
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    pub is_deleted: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    pub push_error: Option<String>,
}

impl Label {
    /// Create a new, never-pushed label after validating the draft.
    pub fn new(owner: OwnerId, draft: LabelDraft) -> Result<Self> {
        let name = validate_label_name(&draft.name)?;
        let color = draft
            .color
            .as_deref()
            .map_or_else(|| Ok(DEFAULT_LABEL_COLOR.to_string()), validate_label_color)?;
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Self {
            id: LabelId::new(),
            owner,
            name,
            color,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::PendingCreate,
            push_error: None,
        })
    }
}

/// User input for a new label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDraft {
    pub name: String,
    pub color: Option<String>,
}

/// Rename and/or recolor a label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPatch {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Trim a label name and reject blank names.
pub fn validate_label_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Label name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Accept `#RRGGBB` colors only.
pub fn validate_label_color(color: &str) -> Result<String> {
    let color = color.trim();
    if COLOR_PATTERN.is_match(color) {
        Ok(color.to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "Label color must look like #RRGGBB, got '{color}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_new_defaults_color() {
        let label = Label::new(
            OwnerId::new("user-1"),
            LabelDraft {
                name: " Work ".to_string(),
                color: None,
            },
        )
        .unwrap();
        assert_eq!(label.name, "Work");
        assert_eq!(label.color, DEFAULT_LABEL_COLOR);
        assert_eq!(label.sync_status, SyncStatus::PendingCreate);
    }

    #[test]
    fn test_label_rejects_blank_name() {
        assert!(validate_label_name("   ").is_err());
    }

    #[test]
    fn test_label_color_validation() {
        assert_eq!(validate_label_color("#a0B1c2").unwrap(), "#a0B1c2");
        assert!(validate_label_color("red").is_err());
        assert!(validate_label_color("#12345").is_err());
    }
}
