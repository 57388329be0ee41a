//! Blob service container operations over REST with Shared Key auth.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Url};
use tracing::debug;

use super::signer::{STORAGE_VERSION, SharedKeyCredential, format_http_date};
use crate::platform::{ContainerClient, CreateOutcome, PlatformError, ProviderError};

static CONTAINER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Container>\s*<Name>([^<]*)</Name>").expect("valid regex"));
static NEXT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<NextMarker>([^<]+)</NextMarker>").expect("valid regex"));
static ERROR_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Code>([^<]*)</Code>").expect("valid regex"));
static ERROR_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Message>([^<]*)</Message>").expect("valid regex"));

/// Container list/create client for one storage account.
#[derive(Debug, Clone)]
pub struct AzureBlobClient {
    endpoint: String,
    credential: Arc<SharedKeyCredential>,
    http: reqwest::Client,
}

impl AzureBlobClient {
    /// Create a client for the account's blob endpoint.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(
        endpoint: impl Into<String>,
        credential: Arc<SharedKeyCredential>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::configuration(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        Url::parse(&format!("{}/{path}", self.endpoint))
            .map_err(|e| ProviderError::InvalidResponse(format!("bad endpoint: {e}")))
    }

    async fn send(&self, method: Method, url: Url) -> Result<reqwest::Response, ProviderError> {
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-date".to_string(), format_http_date(Utc::now()));
        headers.insert("x-ms-version".to_string(), STORAGE_VERSION.to_string());

        let mut signed = headers.clone();
        if method == Method::PUT {
            signed.insert("Content-Length".to_string(), "0".to_string());
        }
        let authorization = self
            .credential
            .authorization(method.as_str(), &url, &signed)
            .map_err(|e| ProviderError::Credentials(e.to_string()))?;

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, authorization);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if method == Method::PUT {
            request = request.body(Vec::new());
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl ContainerClient for AzureBlobClient {
    async fn list_containers(&self) -> Result<Vec<String>, ProviderError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.url("")?;
            url.query_pairs_mut().append_pair("comp", "list");
            if let Some(marker) = &marker {
                url.query_pairs_mut().append_pair("marker", marker);
            }

            let response = self.send(Method::GET, url).await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            let body = response.text().await?;

            names.extend(
                CONTAINER_NAME
                    .captures_iter(&body)
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
            );

            marker = NEXT_MARKER
                .captures(&body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            if marker.is_none() {
                break;
            }
        }

        debug!(count = names.len(), "Listed Azure containers");
        Ok(names)
    }

    async fn create_container(&self, name: &str) -> Result<CreateOutcome, ProviderError> {
        let mut url = self.url(name)?;
        url.query_pairs_mut().append_pair("restype", "container");

        let response = self.send(Method::PUT, url).await?;
        if response.status().is_success() {
            return Ok(CreateOutcome::Created);
        }

        let err = error_from_response(response).await;
        match &err {
            ProviderError::Status {
                status: 409,
                code: Some(code),
                ..
            } if code == "ContainerAlreadyExists" => Ok(CreateOutcome::AlreadyExists),
            _ => Err(err),
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let header_code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    let code = header_code.or_else(|| capture(&ERROR_CODE, &body));
    let message = capture(&ERROR_MESSAGE, &body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    ProviderError::status(status.as_u16(), code, message)
}

fn capture(pattern: &Regex, body: &str) -> Option<String> {
    pattern
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
