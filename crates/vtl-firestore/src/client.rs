//! Firestore REST API client.
//!
//! Thin typed wrapper over the documents endpoint:
//! - cached service-account tokens, refreshed once on an expired-token 401
//! - pooled HTTP client with connect and request timeouts
//! - transport retries with backoff ([`crate::retry`])
//! - a tracing span and request metrics per operation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::paging::DEFAULT_PAGE_SIZE;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::TokenCache;
use crate::types::{Document, RunQueryRequest, RunQueryResponse, StructuredQuery, Value};

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// Collection holding raw intervals
    pub raw_interval_collection: String,
    /// Collection holding aggregate buckets
    pub aggregate_collection: String,
    /// Results per range-listing page
    pub page_size: usize,
}

impl FirestoreConfig {
    /// Config with defaults for everything but the project.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            raw_interval_collection: "video_timeline".to_string(),
            aggregate_collection: "video_density".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID").map_err(|_| {
            FirestoreError::auth_error("GCP_PROJECT_ID must be set to access Firestore")
        })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error("GCP_PROJECT_ID cannot be empty"));
        }

        let defaults = Self::new(project_id);

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.connect_timeout.as_secs());

        let page_size = std::env::var("STORE_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|size: &usize| *size > 0)
            .unwrap_or(defaults.page_size);

        Ok(Self {
            database_id: std::env::var("FIRESTORE_DATABASE_ID").unwrap_or(defaults.database_id),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            raw_interval_collection: std::env::var("RAW_INTERVAL_COLLECTION")
                .unwrap_or(defaults.raw_interval_collection),
            aggregate_collection: std::env::var("AGGREGATE_COLLECTION")
                .unwrap_or(defaults.aggregate_collection),
            page_size,
            ..defaults
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let auth = Self::create_auth_provider()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vtl-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: documents_base_url(&config.project_id, &config.database_id),
            config,
            token_cache: Arc::new(TokenCache::new(auth)),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    /// Fetch a document, `None` when it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = document_url(&self.base_url, collection, doc_id);
        let url = &url;

        self.execute_request("get_document", collection, Some(doc_id), move || async move {
            let response = self.send_authorized(|token| self.http.get(url).bearer_auth(token)).await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Create a document that must not exist yet.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);
        let (url, body) = (&url, &body);

        self.execute_request("create_document", collection, Some(doc_id), move || async move {
            let response = self
                .send_authorized(|token| self.http.post(url).bearer_auth(token).json(body))
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json::<Document>().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Create or fully replace a document.
    pub async fn set_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = document_url(&self.base_url, collection, doc_id);
        let body = Document::new(fields);
        let (url, body) = (&url, &body);

        self.execute_request("set_document", collection, Some(doc_id), move || async move {
            let response = self
                .send_authorized(|token| self.http.patch(url).bearer_auth(token).json(body))
                .await?;

            match response.status() {
                StatusCode::OK => Ok(response.json::<Document>().await?),
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    /// Replace a document only if its update time still equals `update_time`.
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_time: &str,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}?currentDocument.updateTime={}",
            document_url(&self.base_url, collection, doc_id),
            urlencoding::encode(update_time)
        );
        let body = Document::new(fields);
        let (url, body) = (&url, &body);

        self.execute_request(
            "update_document_precondition",
            collection,
            Some(doc_id),
            move || async move {
                let response = self
                    .send_authorized(|token| self.http.patch(url).bearer_auth(token).json(body))
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(response.json::<Document>().await?),
                    StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                        let body_text = response.text().await.unwrap_or_default();
                        Err(FirestoreError::PreconditionFailed(body_text))
                    }
                    StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                        "{}/{}",
                        collection, doc_id
                    ))),
                    status => Err(error_from_response(status, url, response).await),
                }
            },
        )
        .await
    }

    // =========================================================================
    // Query operations
    // =========================================================================

    /// Run a structured query against the root collections.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let collection = query
            .from
            .first()
            .map(|selector| selector.collection_id.clone())
            .unwrap_or_default();
        let url = format!("{}:runQuery", self.base_url);
        let request = RunQueryRequest {
            structured_query: query,
        };
        let (url, request) = (&url, &request);

        self.execute_request("run_query", &collection, None, move || async move {
            let response = self
                .send_authorized(|token| self.http.post(url).bearer_auth(token).json(request))
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let body = response.text().await.unwrap_or_default();
                    let responses: Vec<RunQueryResponse> =
                        serde_json::from_str(&body).map_err(|e| {
                            FirestoreError::invalid_response(format!(
                                "Failed to parse runQuery response: {} (body prefix: {})",
                                e,
                                &body[..body.len().min(200)]
                            ))
                        })?;

                    Ok(responses.into_iter().filter_map(|r| r.document).collect())
                }
                status => Err(error_from_response(status, url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Send a request with a bearer token, refreshing it once if the server
    /// reports it expired.
    async fn send_authorized<B>(&self, build: B) -> FirestoreResult<Response>
    where
        B: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(401, body));
        }

        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    /// Run an operation with retries, a tracing span and request metrics.
    async fn execute_request<T, F, Fut>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        op: F,
    ) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = match doc_id {
            Some(id) => info_span!("firestore_request", operation = %operation, collection = %collection, doc_id = %id),
            None => info_span!("firestore_request", operation = %operation, collection = %collection),
        };

        let start = Instant::now();
        let result = with_retry(&self.config.retry, operation, op)
            .instrument(span)
            .await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }
}

fn documents_base_url(project_id: &str, database_id: &str) -> String {
    format!(
        "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents",
        project_id, database_id
    )
}

/// Document ids contain `#`, which must not reach the URL as a fragment.
fn document_url(base_url: &str, collection: &str, doc_id: &str) -> String {
    format!("{}/{}/{}", base_url, collection, urlencoding::encode(doc_id))
}

fn is_access_token_expired(body: &str) -> bool {
    body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
}

async fn error_from_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
    let body = response.text().await.unwrap_or_default();
    FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_requires_project_id() {
        std::env::remove_var("GCP_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_default_values() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("RAW_INTERVAL_COLLECTION");
        std::env::remove_var("AGGREGATE_COLLECTION");
        std::env::remove_var("STORE_PAGE_SIZE");

        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.project_id, "test-project");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.raw_interval_collection, "video_timeline");
        assert_eq!(config.aggregate_collection, "video_density");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);

        std::env::remove_var("GCP_PROJECT_ID");
    }

    #[test]
    #[serial]
    fn test_config_overrides() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::set_var("AGGREGATE_COLLECTION", "density_v2");
        std::env::set_var("STORE_PAGE_SIZE", "25");

        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.aggregate_collection, "density_v2");
        assert_eq!(config.page_size, 25);

        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("AGGREGATE_COLLECTION");
        std::env::remove_var("STORE_PAGE_SIZE");
    }

    #[test]
    fn test_document_url_escapes_hash() {
        let base = documents_base_url("p", "(default)");
        let url = document_url(&base, "video_density", "cam-1#SECONDS#5000");
        assert!(url.ends_with("/video_density/cam-1%23SECONDS%235000"));
        assert!(!url.contains('#'));
    }

    #[test]
    fn test_expired_token_detection() {
        assert!(is_access_token_expired(r#"{"error":{"status":"UNAUTHENTICATED"}}"#));
        assert!(is_access_token_expired("ACCESS_TOKEN_EXPIRED"));
        assert!(!is_access_token_expired(r#"{"error":{"status":"PERMISSION_DENIED"}}"#));
    }
}
