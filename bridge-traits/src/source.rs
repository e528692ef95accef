//! Remote Metadata Source
//!
//! A paginated listing of remote file metadata. Pages are addressed by an
//! opaque continuation token handed out by the previous page; `None` asks for
//! the first page.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata of one remote file as the source reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMetadata {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Opaque timestamp string, stored verbatim.
    pub modified_time: String,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPage {
    pub files: Vec<RemoteFileMetadata>,
    /// Token for the following page; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

impl MetadataPage {
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// Paginated metadata listing capability.
///
/// Errors must carry their retry classification: rate limiting and server
/// unavailability as [`BridgeError::Transient`](crate::BridgeError::Transient),
/// everything else as non-retryable.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch at most `page_size` records starting at `page_token`.
    async fn list_page(&self, page_size: u32, page_token: Option<String>)
        -> Result<MetadataPage>;

    /// Human readable name of the source, used in logs.
    fn name(&self) -> &str {
        "metadata-source"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_metadata_uses_wire_names() {
        let json = r#"{
            "id": "abc",
            "name": "notes.txt",
            "mimeType": "text/plain",
            "modifiedTime": "2024-03-01T10:00:00.000Z"
        }"#;
        let file: RemoteFileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.modified_time, "2024-03-01T10:00:00.000Z");

        let back = serde_json::to_value(&file).unwrap();
        assert_eq!(back["mimeType"], "text/plain");
    }

    #[test]
    fn test_page_is_last() {
        assert!(MetadataPage::default().is_last());
        let page = MetadataPage {
            files: vec![],
            next_page_token: Some("t1".into()),
        };
        assert!(!page.is_last());
    }
}
