//! Bucket operations over the Cloud Storage JSON API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::credentials::TokenSource;
use crate::platform::{ContainerClient, CreateOutcome, PlatformError, ProviderError};

/// Error code reported when a bucket name is owned by another project.
pub const BUCKET_UNAVAILABLE: &str = "bucketNameUnavailable";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketList {
    #[serde(default)]
    items: Vec<BucketItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct BucketItem {
    name: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

/// Bucket list/create client for one project.
#[derive(Clone)]
pub struct GcsBucketClient {
    base_url: String,
    project_id: String,
    tokens: Option<Arc<TokenSource>>,
    http: reqwest::Client,
}

impl GcsBucketClient {
    /// Create a client. Without a token source requests are sent
    /// unauthenticated, as emulators expect.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        tokens: Option<Arc<TokenSource>>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::configuration(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            tokens,
            http,
        })
    }

    fn buckets_url(&self) -> String {
        format!("{}/storage/v1/b", self.base_url)
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        match &self.tokens {
            Some(tokens) => Ok(request.bearer_auth(tokens.access_token().await?)),
            None => Ok(request),
        }
    }
}

#[async_trait]
impl ContainerClient for GcsBucketClient {
    async fn list_containers(&self) -> Result<Vec<String>, ProviderError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("project", self.project_id.as_str())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.as_str()));
            }
            let request = self.http.get(self.buckets_url()).query(&query);
            let response = self.authorize(request).await?.send().await?;

            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            let page: BucketList = response.json().await?;
            names.extend(page.items.into_iter().map(|b| b.name));

            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        debug!(count = names.len(), "Listed Google buckets");
        Ok(names)
    }

    async fn create_container(&self, name: &str) -> Result<CreateOutcome, ProviderError> {
        let request = self
            .http
            .post(self.buckets_url())
            .query(&[("project", self.project_id.as_str())])
            .json(&serde_json::json!({ "name": name }));
        let response = self.authorize(request).await?.send().await?;

        match response.status() {
            status if status.is_success() => Ok(CreateOutcome::Created),
            StatusCode::CONFLICT => self.confirm_existing(name).await,
            _ => Err(error_from_response(response).await),
        }
    }
}

impl GcsBucketClient {
    /// Bucket names are global; a conflict only means success if these
    /// credentials can read the bucket.
    async fn confirm_existing(&self, name: &str) -> Result<CreateOutcome, ProviderError> {
        let url = format!("{}/{}", self.buckets_url(), urlencoding::encode(name));
        let response = self.authorize(self.http.get(url)).await?.send().await?;

        match response.status() {
            status if status.is_success() => Ok(CreateOutcome::AlreadyExists),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                warn!(bucket = %name, "Bucket name is taken by another project");
                Err(ProviderError::status(
                    StatusCode::FORBIDDEN.as_u16(),
                    Some(BUCKET_UNAVAILABLE.to_string()),
                    format!("bucket '{name}' exists but belongs to another project"),
                ))
            }
            _ => Err(error_from_response(response).await),
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            let code = envelope.error.errors.into_iter().find_map(|e| e.reason);
            ProviderError::status(status.as_u16(), code, envelope.error.message)
        }
        Err(_) => ProviderError::status(status.as_u16(), None, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn conflict() -> ResponseTemplate {
        ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": {
                "code": 409,
                "message": "The requested bucket name is not available.",
                "errors": [{"reason": "conflict"}]
            }
        }))
    }

    fn client(server: &MockServer) -> GcsBucketClient {
        GcsBucketClient::new(server.uri(), "study-project", None, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_buckets_follows_page_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b"))
            .and(query_param("project", "study-project"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "storage#buckets",
                "items": [{"name": "study-bucket"}, {"name": "archive"}],
                "nextPageToken": "next"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "storage#buckets"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let names = client(&server).list_containers().await.unwrap();
        assert_eq!(names, vec!["study-bucket", "archive"]);
    }

    #[tokio::test]
    async fn test_create_bucket() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/b"))
            .and(query_param("project", "study-project"))
            .and(body_json(serde_json::json!({"name": "study-bucket"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "study-bucket"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server).create_container("study-bucket").await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
    }

    #[tokio::test]
    async fn test_create_existing_bucket_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(conflict())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/study-bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "study-bucket",
                "projectNumber": "123456"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server).create_container("study-bucket").await.unwrap();
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_bucket_owned_elsewhere_is_denied() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(conflict())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/taken-bucket"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {
                    "code": 403,
                    "message": "uploader does not have storage.buckets.get access",
                    "errors": [{"reason": "forbidden"}]
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server).create_container("taken-bucket").await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(matches!(
            err,
            ProviderError::Status { status: 403, code: Some(ref c), .. } if c == BUCKET_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_forbidden_list_carries_reason() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {
                    "code": 403,
                    "message": "uploader does not have storage.buckets.list access",
                    "errors": [{"reason": "forbidden"}]
                }
            })))
            .mount(&server)
            .await;

        let err = client(&server).list_containers().await.unwrap_err();
        match err {
            ProviderError::Status {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("forbidden"));
                assert!(message.contains("storage.buckets.list"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_carry_bearer_token() {
        use super::super::credentials::{ServiceAccountKey, tests::key_json};
        use fieldvault_shared::SecretString;

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.bucket-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b"))
            .and(header("authorization", "Bearer ya29.bucket-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let key = ServiceAccountKey::from_json(&SecretString::new(key_json(&format!(
            "{}/token",
            server.uri()
        ))))
        .unwrap();
        let tokens = Arc::new(TokenSource::new(key, reqwest::Client::new()));
        let client = GcsBucketClient::new(
            server.uri(),
            "study-project",
            Some(tokens),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(client.list_containers().await.unwrap().is_empty());
    }
}
