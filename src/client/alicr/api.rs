//! Minimal Alibaba Cloud Container Registry API handle (ROA style, version 2016-06-07).

use super::Options;
use crate::client::ImageTag;
use crate::client::http::REQUEST_TIMEOUT;
use crate::secret_string::SecretString;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, DATE};
use serde::Deserialize;
use sha1::Sha1;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const API_VERSION: &str = "2016-06-07";
const DEFAULT_ENDPOINT: &str = "https://cr.{region}.aliyuncs.com";
const ACCEPT_JSON: &str = "application/json";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("invalid API endpoint {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry API returned {status}: {code} {message}")]
    Status {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to sign request: {0}")]
    Signature(#[from] hmac::digest::InvalidLength),
    #[error("page {page} is empty but {total} tags were reported")]
    EmptyPage { page: i64, total: i64 },
}

#[derive(Debug, Deserialize)]
struct TagListing {
    data: TagPage,
}

#[derive(Debug, Deserialize)]
pub struct TagPage {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
    pub digest: String,
    #[serde(default)]
    pub tag: String,
    /// Epoch milliseconds. Some clients read this field as seconds, the
    /// API responses carry milliseconds.
    #[serde(default)]
    pub image_update: i64,
}

impl From<TagEntry> for ImageTag {
    fn from(entry: TagEntry) -> Self {
        ImageTag {
            sha: entry.digest,
            tag: entry.tag,
            timestamp: DateTime::from_timestamp_millis(entry.image_update).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Region-scoped API handle. Holds no request state and is safe to share.
#[derive(Debug)]
pub struct CrClient {
    region: String,
    endpoint: String,
    access_key_id: String,
    secret_access_key: SecretString,
    security_token: Option<SecretString>,
    http: reqwest::Client,
}

impl CrClient {
    pub fn new(region: &str, options: &Options, http: reqwest::Client) -> Result<Self, BuildError> {
        if options.access_key_id.trim().is_empty() {
            return Err(BuildError::MissingCredential("accessKeyId"));
        }
        if options.secret_access_key.is_empty() {
            return Err(BuildError::MissingCredential("secretAccessKey"));
        }

        let endpoint = options
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .replace("{region}", region)
            .trim_end_matches('/')
            .to_owned();
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(BuildError::InvalidEndpoint(endpoint));
        }

        Ok(Self {
            region: region.to_owned(),
            endpoint,
            access_key_id: options.access_key_id.clone(),
            secret_access_key: options.secret_access_key.clone(),
            security_token: options
                .security_token
                .clone()
                .filter(|token| !token.is_empty()),
            http,
        })
    }

    /// Fetches one page of `GET /repos/{repo}/{image}/tags`.
    pub async fn repo_tags(
        &self,
        repo: &str,
        image: &str,
        page: i64,
        page_size: i64,
    ) -> Result<TagPage, ApiError> {
        let path = format!("/repos/{}/{}/tags", repo, image);
        let query = BTreeMap::from([("Page", page.to_string()), ("PageSize", page_size.to_string())]);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut acs_headers = BTreeMap::from([
            ("x-acs-region-id", self.region.clone()),
            ("x-acs-signature-method", "HMAC-SHA1".to_owned()),
            ("x-acs-signature-nonce", Uuid::new_v4().to_string()),
            ("x-acs-signature-version", "1.0".to_owned()),
            ("x-acs-version", API_VERSION.to_owned()),
        ]);
        if let Some(token) = &self.security_token {
            acs_headers.insert("x-acs-security-token", token.expose_secret().to_owned());
        }

        let to_sign = string_to_sign("GET", &date, &acs_headers, &path, &query);
        let signature = sign(self.secret_access_key.expose_secret(), &to_sign)?;

        debug!("Fetching page {} of {}/{} tags from {}", page, repo, image, self.endpoint);
        let mut request = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .query(&query)
            .timeout(REQUEST_TIMEOUT)
            .header(ACCEPT, ACCEPT_JSON)
            .header(DATE, &date)
            .header(
                AUTHORIZATION,
                format!("acs {}:{}", self.access_key_id, signature),
            );
        for (name, value) in &acs_headers {
            request = request.header(*name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let error: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
            return Err(ApiError::Status {
                status,
                code: error.code,
                message: error.message,
            });
        }

        let listing: TagListing = serde_json::from_slice(&body)?;
        Ok(listing.data)
    }
}

/// `METHOD\nAccept\nContent-MD5\nContent-Type\nDate\n` + x-acs headers + resource.
fn string_to_sign(
    method: &str,
    date: &str,
    acs_headers: &BTreeMap<&str, String>,
    path: &str,
    query: &BTreeMap<&str, String>,
) -> String {
    let mut out = format!("{}\n{}\n\n\n{}\n", method, ACCEPT_JSON, date);
    for (name, value) in acs_headers {
        out.push_str(&format!("{}:{}\n", name.to_lowercase(), value));
    }
    out.push_str(path);
    if !query.is_empty() {
        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        out.push('?');
        out.push_str(&query);
    }
    out
}

fn sign(secret: &str, string_to_sign: &str) -> Result<String, ApiError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            access_key_id: "LTAIexample".to_owned(),
            secret_access_key: SecretString::from("secret"),
            ..Options::default()
        }
    }

    #[test]
    fn test_string_to_sign_layout() {
        let headers = BTreeMap::from([
            ("x-acs-version", API_VERSION.to_owned()),
            ("x-acs-region-id", "cn-hangzhou".to_owned()),
            ("x-acs-signature-nonce", "nonce".to_owned()),
            ("x-acs-signature-method", "HMAC-SHA1".to_owned()),
            ("x-acs-signature-version", "1.0".to_owned()),
        ]);
        let query = BTreeMap::from([("PageSize", "30".to_owned()), ("Page", "1".to_owned())]);

        let out = string_to_sign(
            "GET",
            "Mon, 19 Oct 2026 08:00:00 GMT",
            &headers,
            "/repos/acs/nginx/tags",
            &query,
        );
        assert_eq!(
            out,
            "GET\napplication/json\n\n\nMon, 19 Oct 2026 08:00:00 GMT\n\
             x-acs-region-id:cn-hangzhou\n\
             x-acs-signature-method:HMAC-SHA1\n\
             x-acs-signature-nonce:nonce\n\
             x-acs-signature-version:1.0\n\
             x-acs-version:2016-06-07\n\
             /repos/acs/nginx/tags?Page=1&PageSize=30"
        );
        assert_eq!(sign("secret", &out).unwrap(), "xcA7SFh7sCnPCj/d50p/5QtXusk=");
    }

    #[test]
    fn test_endpoint_template() {
        let client = CrClient::new("cn-beijing", &options(), reqwest::Client::new()).unwrap();
        assert_eq!(client.endpoint, "https://cr.cn-beijing.aliyuncs.com");
        assert_eq!(client.region, "cn-beijing");

        let vpc = Options {
            endpoint: Some("https://cr-vpc.{region}.aliyuncs.com/".to_owned()),
            ..options()
        };
        let client = CrClient::new("cn-beijing", &vpc, reqwest::Client::new()).unwrap();
        assert_eq!(client.endpoint, "https://cr-vpc.cn-beijing.aliyuncs.com");
    }

    #[test]
    fn test_construction_rejects_bad_options() {
        let no_key = Options {
            access_key_id: String::new(),
            ..options()
        };
        assert!(matches!(
            CrClient::new("cn-beijing", &no_key, reqwest::Client::new()),
            Err(BuildError::MissingCredential("accessKeyId"))
        ));

        let no_secret = Options {
            secret_access_key: SecretString::default(),
            ..options()
        };
        assert!(matches!(
            CrClient::new("cn-beijing", &no_secret, reqwest::Client::new()),
            Err(BuildError::MissingCredential("secretAccessKey"))
        ));

        let bad_endpoint = Options {
            endpoint: Some("cr.{region}.aliyuncs.com".to_owned()),
            ..options()
        };
        assert!(matches!(
            CrClient::new("cn-beijing", &bad_endpoint, reqwest::Client::new()),
            Err(BuildError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_untagged_entry_keeps_digest() {
        let entry: TagEntry =
            serde_json::from_str(r#"{"digest":"sha256:abc","imageUpdate":1760860800000}"#).unwrap();
        let tag = ImageTag::from(entry);
        assert_eq!(tag.sha, "sha256:abc");
        assert_eq!(tag.tag, "");
        assert_eq!(tag.timestamp.timestamp(), 1_760_860_800);
    }
}
