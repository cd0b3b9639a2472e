use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A file entry as returned by the metadata service.
///
/// The service uses snake_case for entry records, unlike its request bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: i64,
    pub name: String,
    #[serde(rename = "file_size", default)]
    pub size: u64,
    #[serde(default)]
    pub mime: String,
    /// Download handle.
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// Structured error body of a 4xx response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ApiErrorBody {
    /// Returns the most specific message in the body, if any.
    ///
    /// Field validation errors win over the generic `message`.
    pub fn best_message(&self) -> Option<String> {
        if let Some(first) = self.errors.values().flatten().find(|m| !m.is_empty()) {
            return Some(first.clone());
        }
        if self.message.is_empty() {
            None
        } else {
            Some(self.message.clone())
        }
    }
}
