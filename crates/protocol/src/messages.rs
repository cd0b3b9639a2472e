use serde::{Deserialize, Serialize};

use crate::types::FileEntry;

// ---------------------------------------------------------------------------
// Single-shot upload
// ---------------------------------------------------------------------------

/// Asks the service for a presigned PUT URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub extension: String,
    /// `None` uploads into the root folder.
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

/// A presign grant. Single use, short lived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignResponse {
    pub url: String,
    #[serde(default)]
    pub acl: String,
    pub key: String,
}

// ---------------------------------------------------------------------------
// Multipart upload
// ---------------------------------------------------------------------------

/// Opens a multipart session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartRequest {
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartResponse {
    pub upload_id: String,
    pub key: String,
}

/// Requests signed PUT URLs for a batch of part numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSignRequest {
    pub key: String,
    pub upload_id: String,
    pub part_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSignResponse {
    pub urls: Vec<SignedPartUrl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPartUrl {
    pub url: String,
    pub part_number: u32,
}

/// A finished part as the storage backend expects it on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
}

/// Completes a multipart session. `parts` must be in ascending part order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortMultipartRequest {
    pub key: String,
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Entry registration
// ---------------------------------------------------------------------------

/// Attaches an uploaded storage object to the directory tree.
///
/// `filename` is the object's name inside its storage key; `client_name` is
/// the name the user sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEntryRequest {
    pub parent_id: Option<i64>,
    pub filename: String,
    pub client_mime: String,
    pub client_name: String,
    pub client_extension: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEntryResponse {
    pub file_entry: FileEntry,
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presign_root_folder_serializes_null_parent() {
        let req = PresignRequest {
            filename: "notes.txt".into(),
            mime: "text/plain".into(),
            size: 12,
            extension: "txt".into(),
            parent_id: None,
            workspace_id: Some(3),
            is_encrypted: false,
            iv: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"parentId\":null"));
        assert!(json.contains("\"workspaceId\":3"));
        assert!(!json.contains("isEncrypted"));
        assert!(!json.contains("\"iv\""));
    }

    #[test]
    fn presign_vault_carries_encryption_metadata() {
        let req = PresignRequest {
            filename: "secret.bin".into(),
            mime: "application/octet-stream".into(),
            size: 64,
            extension: "bin".into(),
            parent_id: Some(9),
            workspace_id: None,
            is_encrypted: true,
            iv: Some("aXY=".into()),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"isEncrypted\":true"));
        assert!(json.contains("\"iv\":\"aXY=\""));
        assert!(!json.contains("workspaceId"));
    }

    #[test]
    fn completed_part_uses_storage_casing() {
        let req = CompleteMultipartRequest {
            key: "uploads/k".into(),
            upload_id: "u1".into(),
            parts: vec![CompletedPart {
                etag: "\"abc\"".into(),
                part_number: 1,
            }],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"uploadId\":\"u1\""));
        assert!(json.contains("\"ETag\":\"\\\"abc\\\"\""));
        assert!(json.contains("\"PartNumber\":1"));
    }

    #[test]
    fn batch_sign_response_parses() {
        let json = r#"{"urls":[{"url":"https://s3/p1","partNumber":1},{"url":"https://s3/p2","partNumber":2}]}"#;
        let resp: BatchSignResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.urls.len(), 2);
        assert_eq!(resp.urls[1].part_number, 2);
    }

    #[test]
    fn presign_response_without_acl() {
        let json = r#"{"url":"https://s3/put","key":"uploads/abc/def"}"#;
        let resp: PresignResponse = serde_json::from_str(json).unwrap();
        assert!(resp.acl.is_empty());
        assert_eq!(resp.key, "uploads/abc/def");
    }

    #[test]
    fn register_entry_response_parses() {
        let json = r#"{"fileEntry":{"id":77,"name":"a.txt","file_size":5,"mime":"text/plain","hash":"h77"}}"#;
        let resp: RegisterEntryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.file_entry.id, 77);
        assert_eq!(resp.file_entry.size, 5);
        assert_eq!(resp.file_entry.hash, "h77");
    }
}
