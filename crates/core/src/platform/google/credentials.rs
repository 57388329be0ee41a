//! Service-account credentials and OAuth2 access tokens.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use fieldvault_shared::SecretString;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::platform::{PlatformError, ProviderError};

/// Scope needed to list and create buckets.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Assertions are valid for one hour, the maximum Google accepts.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service-account JSON key this crate uses.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, used as the assertion issuer.
    pub client_email: String,
    /// PEM encoded RSA private key.
    pub private_key: SecretString,
    /// Key id, sent as the JWT `kid`.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// OAuth2 token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// Project the key belongs to.
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &self.private_key)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// Parse the key from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the document is not a
    /// service-account key.
    pub fn from_json(json: &SecretString) -> Result<Self, PlatformError> {
        serde_json::from_str(json.expose())
            .map_err(|e| PlatformError::configuration(format!("google service account key: {e}")))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges signed assertions for access tokens and caches the result.
pub struct TokenSource {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// Create a token source for `key`.
    #[must_use]
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self {
            key,
            http,
            cached: Mutex::new(None),
        }
    }

    /// RS256 JWT assertion issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Credentials` if the private key is unusable.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, ProviderError> {
        let key = EncodingKey::from_rsa_pem(self.key.private_key.expose().as_bytes())
            .map_err(|e| ProviderError::Credentials(format!("private key: {e}")))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);

        let claims = Claims {
            iss: &self.key.client_email,
            scope: STORAGE_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        encode(&header, &claims, &key).map_err(|e| ProviderError::Credentials(e.to_string()))
    }

    /// A valid access token, fetched when the cached one is near expiry.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the token endpoint cannot be reached or
    /// rejects the assertion.
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        let now = Utc::now();
        if let Some(cached) = self.cached_token(now) {
            return Ok(cached);
        }

        let assertion = self.assertion(now)?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Credentials(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "Obtained Google access token");

        let expires_at = now + Duration::seconds(token.expires_in);
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Option<String> {
        let guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| c.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now)
            .map(|c| c.token.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const TEST_KEY: &str = include_str!("testdata/test_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("testdata/test_key.pub.pem");

    pub(crate) fn key_json(token_uri: &str) -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "study-project",
            "private_key_id": "key-1",
            "private_key": TEST_KEY,
            "client_email": "uploader@study-project.iam.gserviceaccount.com",
            "client_id": "1234567890",
            "token_uri": token_uri,
        })
        .to_string()
    }

    fn token_source(token_uri: &str) -> TokenSource {
        let key = ServiceAccountKey::from_json(&SecretString::new(key_json(token_uri))).unwrap();
        TokenSource::new(key, reqwest::Client::new())
    }

    #[derive(Deserialize)]
    struct DecodedClaims {
        iss: String,
        scope: String,
        exp: i64,
        iat: i64,
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = ServiceAccountKey::from_json(&SecretString::new(key_json(DEFAULT_TOKEN_URI)))
            .unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("uploader@study-project.iam.gserviceaccount.com"));
        assert!(!debug.contains("BEGIN PRIVATE KEY"));
        assert_eq!(key.project_id.as_deref(), Some("study-project"));
    }

    #[test]
    fn test_invalid_key_json() {
        let err = ServiceAccountKey::from_json(&SecretString::new("{\"client_email\": 1}"))
            .unwrap_err();
        assert!(matches!(err, PlatformError::Configuration(_)));
    }

    #[test]
    fn test_assertion_is_signed_rs256() {
        let source = token_source(DEFAULT_TOKEN_URI);
        let now = Utc::now();
        let jwt = source.assertion(now).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("key-1"));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[DEFAULT_TOKEN_URI]);
        let decoded = decode::<DecodedClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(
            decoded.claims.iss,
            "uploader@study-project.iam.gserviceaccount.com"
        );
        assert_eq!(decoded.claims.scope, STORAGE_SCOPE);
        assert_eq!(decoded.claims.exp - decoded.claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn test_access_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = token_source(&format!("{}/token", server.uri()));
        assert_eq!(source.access_token().await.unwrap(), "ya29.test-token");
        assert_eq!(source.access_token().await.unwrap(), "ya29.test-token");
    }

    #[tokio::test]
    async fn test_rejected_assertion_is_credentials_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid_grant\"}"),
            )
            .mount(&server)
            .await;

        let source = token_source(&format!("{}/token", server.uri()));
        let err = source.access_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::Credentials(ref m) if m.contains("invalid_grant")));
        assert!(err.is_auth_failure());
    }
}
