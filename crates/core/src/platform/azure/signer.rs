//! Azure Storage Shared Key and service SAS signing.
//!
//! Two independent HMAC-SHA256 signatures are produced with the account key:
//! the SAS token carried in the query string and the `Authorization` header
//! computed over the request headers and the full resource URL.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use fieldvault_shared::SecretString;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use crate::platform::PlatformError;

type HmacSha256 = Hmac<Sha256>;

/// Storage service version used for requests and SAS tokens.
pub const STORAGE_VERSION: &str = "2021-08-06";

/// Protocols a SAS token may be used over.
const SAS_PROTOCOLS: &str = "https,http";

/// Standard headers of the Shared Key string-to-sign, in order.
const SIGNED_HEADERS: [&str; 11] = [
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-MD5",
    "Content-Type",
    "Date",
    "If-Modified-Since",
    "If-Match",
    "If-None-Match",
    "If-Unmodified-Since",
    "Range",
];

/// Account name and decoded account key.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"**redacted**")
            .finish()
    }
}

impl SharedKeyCredential {
    /// Create a credential from the account name and base64 account key.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Configuration` if the name is empty or the key
    /// is not valid base64.
    pub fn new(account: impl Into<String>, key: &SecretString) -> Result<Self, PlatformError> {
        let account = account.into();
        if account.is_empty() {
            return Err(PlatformError::configuration("azure account name is empty"));
        }
        let key = STANDARD
            .decode(key.expose().trim())
            .map_err(|e| PlatformError::configuration(format!("azure account key: {e}")))?;
        if key.is_empty() {
            return Err(PlatformError::configuration("azure account key is empty"));
        }
        Ok(Self { account, key })
    }

    /// Storage account name.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Signing` if the MAC cannot be keyed.
    pub fn sign(&self, string_to_sign: &str) -> Result<String, PlatformError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| PlatformError::signing(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Service SAS query string (without the leading `?`) for a single blob.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Signing` if signing fails.
    pub fn blob_sas(&self, sas: &BlobSas<'_>) -> Result<String, PlatformError> {
        let signature = self.sign(&sas.string_to_sign(&self.account))?;
        let pairs = [
            ("sv", STORAGE_VERSION.to_string()),
            ("sr", "b".to_string()),
            ("sp", sas.permissions.to_string()),
            ("st", format_sas_time(sas.start)),
            ("se", format_sas_time(sas.expiry)),
            ("spr", SAS_PROTOCOLS.to_string()),
            ("sig", signature),
        ];
        Ok(pairs
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&"))
    }

    /// `Authorization` header value for a request.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Signing` if signing fails.
    pub fn authorization(
        &self,
        method: &str,
        url: &Url,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, PlatformError> {
        let string_to_sign = shared_key_string_to_sign(&self.account, method, url, headers);
        let signature = self.sign(&string_to_sign)?;
        Ok(format!("SharedKey {}:{signature}", self.account))
    }
}

/// Parameters of a blob service SAS.
#[derive(Debug, Clone, Copy)]
pub struct BlobSas<'a> {
    /// Container name, already lower-cased.
    pub container: &'a str,
    /// Blob name as stored.
    pub blob: &'a str,
    /// Permission letters, e.g. `racwd`.
    pub permissions: &'a str,
    /// Start of validity.
    pub start: DateTime<Utc>,
    /// End of validity.
    pub expiry: DateTime<Utc>,
}

impl BlobSas<'_> {
    /// String-to-sign for service versions 2020-12-06 and later.
    #[must_use]
    pub fn string_to_sign(&self, account: &str) -> String {
        let resource = format!("/blob/{account}/{}/{}", self.container, self.blob);
        let start = format_sas_time(self.start);
        let expiry = format_sas_time(self.expiry);
        [
            self.permissions,
            start.as_str(),
            expiry.as_str(),
            resource.as_str(),
            "", // signed identifier
            "", // signed IP
            SAS_PROTOCOLS,
            STORAGE_VERSION,
            "b",
            "", // snapshot time
            "", // encryption scope
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n")
    }
}

/// Shared Key string-to-sign for the Blob service.
#[must_use]
pub fn shared_key_string_to_sign(
    account: &str,
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    out.push_str(&method.to_ascii_uppercase());
    out.push('\n');

    for name in SIGNED_HEADERS {
        let value = header_value(headers, name);
        // Since 2015-02-21 a zero length is signed as empty.
        let value = if name == "Content-Length" && value == "0" {
            ""
        } else {
            value
        };
        out.push_str(value);
        out.push('\n');
    }

    let mut ms_headers: Vec<(String, &str)> = headers
        .iter()
        .filter(|(k, _)| k.to_ascii_lowercase().starts_with("x-ms-"))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    ms_headers.sort();
    for (name, value) in ms_headers {
        out.push_str(&name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push_str(&canonicalized_resource(account, url));
    out
}

fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{account}{}", url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&name);
        resource.push(':');
        resource.push_str(&values.join(","));
    }
    resource
}

fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> &'a str {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map_or("", |(_, v)| v.as_str())
}

/// SAS timestamp: `YYYY-MM-DDThh:mm:ssZ`.
#[must_use]
pub fn format_sas_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// RFC 1123 date as used by `x-ms-date`.
#[must_use]
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
