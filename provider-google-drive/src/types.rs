//! Google Drive API response types

use bridge_traits::RemoteFileMetadata;
use serde::{Deserialize, Serialize};

/// The subset of the Drive file resource the sync mirrors.
///
/// See: https://developers.google.com/drive/api/v3/reference/files#resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// RFC 3339, kept as text
    pub modified_time: String,
}

impl From<DriveFile> for RemoteFileMetadata {
    fn from(file: DriveFile) -> Self {
        RemoteFileMetadata {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            modified_time: file.modified_time,
        }
    }
}

/// Google Drive API files.list response
///
/// See: https://developers.google.com/drive/api/v3/reference/files/list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,

    pub next_page_token: Option<String>,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}
