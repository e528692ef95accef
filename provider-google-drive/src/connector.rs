//! Google Drive API connector implementation

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::source::{MetadataPage, MetadataSource, RemoteFileMetadata};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{GoogleDriveError, Result};
use crate::types::{ApiErrorResponse, FilesListResponse};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Maximum results per page (Google Drive API limit)
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Fields requested from files.list
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime)";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Google Drive metadata connector
///
/// ```ignore
/// use provider_google_drive::GoogleDriveConnector;
/// use bridge_traits::MetadataSource;
///
/// let connector = GoogleDriveConnector::new(http_client, access_token);
/// let page = connector.list_page(100, None).await?;
/// ```
pub struct GoogleDriveConnector {
    http_client: Arc<dyn HttpClient>,

    /// OAuth 2.0 access token
    access_token: String,

    base_url: String,

    /// Optional `q` filter, e.g. `trashed = false`
    query: Option<String>,

    /// Attempts per page request before giving up on 429/5xx
    max_attempts: u32,
}

impl std::fmt::Debug for GoogleDriveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveConnector")
            .field("base_url", &self.base_url)
            .field("query", &self.query)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl GoogleDriveConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, access_token: impl Into<String>) -> Self {
        Self {
            http_client,
            access_token: access_token.into(),
            base_url: DRIVE_API_BASE.to_string(),
            query: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn build_list_request(&self, page_size: u32, page_token: Option<&str>) -> HttpRequest {
        let mut request = HttpRequest::get(format!("{}/files", self.base_url))
            .bearer_token(&self.access_token)
            .header("Accept", "application/json")
            .query("pageSize", page_size.clamp(1, MAX_PAGE_SIZE).to_string())
            .query("fields", LIST_FIELDS)
            .timeout(REQUEST_TIMEOUT);

        if let Some(q) = &self.query {
            request = request.query("q", q.as_str());
        }
        if let Some(token) = page_token {
            request = request.query("pageToken", token);
        }
        request
    }

    /// Execute a request, retrying rate limiting and server errors in place.
    ///
    /// Transport errors are not retried here; the HTTP client owns that.
    async fn execute_with_retry(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = self.http_client.execute(request.clone()).await?;
            let status = response.status;

            if response.is_success() {
                debug!(status, attempt, "Drive request succeeded");
                return Ok(response);
            }

            if !response.is_retryable() {
                return Err(Self::client_error(&response));
            }

            if attempt >= self.max_attempts {
                warn!(status, attempt, "Drive request still failing, giving up");
                return Err(if status == 429 {
                    GoogleDriveError::RateLimitExceeded { attempts: attempt }
                } else {
                    GoogleDriveError::ServiceUnavailable {
                        status_code: status,
                        attempts: attempt,
                    }
                });
            }

            let backoff = response
                .retry_after_seconds()
                .map(Duration::from_secs)
                .unwrap_or_else(|| backoff_for(attempt))
                .min(MAX_BACKOFF);
            warn!(
                status,
                attempt,
                max_attempts = self.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Drive request failed, backing off"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn client_error(response: &HttpResponse) -> GoogleDriveError {
        let message = response
            .json::<ApiErrorResponse>()
            .map(|body| body.error.message)
            .unwrap_or_else(|_| response.text_lossy());

        match response.status {
            401 | 403 => GoogleDriveError::AuthenticationFailed {
                status_code: response.status,
                message,
            },
            status_code => GoogleDriveError::ApiError {
                status_code,
                message,
            },
        }
    }

    async fn fetch_page(&self, page_size: u32, page_token: Option<&str>) -> Result<MetadataPage> {
        let request = self.build_list_request(page_size, page_token);
        let response = self.execute_with_retry(request).await?;

        let list: FilesListResponse = serde_json::from_slice(&response.body).map_err(|e| {
            GoogleDriveError::ParseError(format!("Failed to parse files list response: {}", e))
        })?;

        let files: Vec<RemoteFileMetadata> = list.files.into_iter().map(Into::into).collect();
        debug!(
            files = files.len(),
            has_next = list.next_page_token.is_some(),
            "Listed Drive page"
        );

        Ok(MetadataPage {
            files,
            next_page_token: list.next_page_token,
        })
    }
}

#[async_trait]
impl MetadataSource for GoogleDriveConnector {
    #[instrument(skip(self, page_token), fields(has_token = page_token.is_some()))]
    async fn list_page(
        &self,
        page_size: u32,
        page_token: Option<String>,
    ) -> bridge_traits::error::Result<MetadataPage> {
        self.fetch_page(page_size, page_token.as_deref())
            .await
            .map_err(Into::into)
    }

    fn name(&self) -> &str {
        "google-drive"
    }
}

/// Exponential backoff after the `attempt`-th failure, capped at `MAX_BACKOFF`.
fn backoff_for(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BASE_BACKOFF
        .checked_mul(factor)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}
