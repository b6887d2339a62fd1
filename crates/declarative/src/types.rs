//! Core types shared by resources

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    pub fn present(details: impl Into<String>) -> Self {
        Self::Present {
            details: Some(details.into()),
        }
    }

    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of applying a resource or delivering a notification to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyResult {
    /// Already in the desired state
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
}

impl ApplyResult {
    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Presence requested for resources that are either there or not
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Unix permission bits, written as an octal string (`"0644"`) in recipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ModeRepr", into = "String")]
pub struct Mode(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Text(String),
    Number(i64),
}

impl TryFrom<ModeRepr> for Mode {
    type Error = String;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        // Bare numbers are read as octal digits, so `mode = 644` means 0o644
        let digits = match repr {
            ModeRepr::Text(text) => text,
            ModeRepr::Number(n) => n.to_string(),
        };
        let trimmed = digits.trim().trim_start_matches("0o");
        let bits = u32::from_str_radix(trimmed, 8)
            .map_err(|_| format!("invalid octal mode '{digits}'"))?;
        if bits > 0o7777 {
            return Err(format!("mode '{digits}' out of range"));
        }
        Ok(Self(bits))
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}
