//! Maintenance log records as delivered by the log-management layer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Incident category. Closed set; anything else makes a record invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Electrical,
    Plumbing,
    #[serde(rename = "HVAC")]
    Hvac,
    Structural,
    Other,
}

impl Category {
    /// Upper-case label used for the category badge.
    pub fn badge_label(&self) -> &'static str {
        match self {
            Category::Electrical => "ELECTRICAL",
            Category::Plumbing => "PLUMBING",
            Category::Hvac => "HVAC",
            Category::Structural => "STRUCTURAL",
            Category::Other => "OTHER",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Electrical => "Electrical",
            Category::Plumbing => "Plumbing",
            Category::Hvac => "HVAC",
            Category::Structural => "Structural",
            Category::Other => "Other",
        };
        f.write_str(name)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electrical" => Ok(Category::Electrical),
            "plumbing" => Ok(Category::Plumbing),
            "hvac" => Ok(Category::Hvac),
            "structural" => Ok(Category::Structural),
            "other" => Ok(Category::Other),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// One photo attached to a record.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "mimeType", alias = "mime_type")]
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A maintenance incident. Fields are unchecked here; the record formatter
/// validates them before rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default, alias = "images")]
    pub attachments: Vec<Attachment>,
}

/// Attachment bytes travel as base64. A `data:` URL prefix is accepted on
/// input and stripped.
mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let payload = match raw.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => raw.as_str(),
        };
        STANDARD
            .decode(payload.trim())
            .map_err(serde::de::Error::custom)
    }
}
