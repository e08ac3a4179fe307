use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::files::repo_types::FileRecord;

/// Upload body. Fields stay untyped so each bad field gets its own message.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileRequest {
    pub slide_id: Option<Value>,
    pub name: Option<Value>,
    pub size: Option<Value>,
    #[serde(rename = "type")]
    pub mime_type: Option<Value>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub slide_id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedFileResponse {
    pub success: bool,
    pub file: FileRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub success: bool,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedFileResponse {
    pub success: bool,
    pub message: String,
}
