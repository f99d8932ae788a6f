//! GitHub contents API client.
//!
//! Objects are addressed as `/repos/{owner}/{repo}/contents/{path}` on a
//! single branch. The blob `sha` is the version token.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::config::{RetryConfig, StoreConfig};
use crate::error::{Result, StoreError};
use crate::retry::with_backoff;
use crate::token::AccessToken;
use crate::{ContentStore, StoreConnector, StoredObject, VersionToken};

const GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_RAW: &str = "application/vnd.github.raw";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

/// Content store session bound to one repository, branch and credential.
pub struct GitHubContentStore {
    client: reqwest::Client,
    config: StoreConfig,
    retry: RetryConfig,
}

impl GitHubContentStore {
    pub fn new(config: StoreConfig, retry: RetryConfig, token: &AccessToken) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| StoreError::Validation("access token is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|_| StoreError::InvalidConfig("user_agent is not a valid header".into()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self::with_client(client, config, retry))
    }

    /// Uses a caller-supplied HTTP client. Authorization and user agent
    /// headers are expected to be configured on it already.
    pub fn with_client(client: reqwest::Client, config: StoreConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn contents_url(&self, path: &str) -> String {
        let encoded = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/repos/{}/{}/contents/{encoded}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
        )
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|value| value.to_str().ok())
            == Some("0");
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|err| err.message)
            .unwrap_or(body);
        tracing::debug!(path, status = status.as_u16(), "content store error: {message}");
        Err(StoreError::from_status(
            status.as_u16(),
            message,
            path,
            rate_limited,
        ))
    }

    async fn read_once(&self, path: &str) -> Result<StoredObject> {
        let request = self
            .client
            .get(self.contents_url(path))
            .header(ACCEPT, GITHUB_JSON)
            .query(&[("ref", self.config.branch.as_str())]);
        let body: ContentResponse = self
            .send(request, path)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(format!("{path}: {err}")))?;

        let content = match (body.encoding.as_deref(), body.content.as_deref()) {
            (Some("base64"), Some(encoded)) => decode_base64(encoded, path)?,
            // Files above the inline size limit come back without content.
            _ => self.read_raw(path).await?,
        };

        Ok(StoredObject {
            content,
            version: VersionToken::new(body.sha),
        })
    }

    async fn read_raw(&self, path: &str) -> Result<Bytes> {
        let request = self
            .client
            .get(self.contents_url(path))
            .header(ACCEPT, GITHUB_RAW)
            .query(&[("ref", self.config.branch.as_str())]);
        Ok(self.send(request, path).await?.bytes().await?)
    }

    async fn write_once(
        &self,
        path: &str,
        content: &Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken> {
        let body = WriteRequest {
            message,
            content: STANDARD.encode(content),
            branch: &self.config.branch,
            sha: expected.map(VersionToken::as_str),
        };
        let request = self
            .client
            .put(self.contents_url(path))
            .header(ACCEPT, GITHUB_JSON)
            .json(&body);
        let written: WriteResponse = self
            .send(request, path)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(format!("{path}: {err}")))?;
        Ok(VersionToken::new(written.content.sha))
    }

    async fn delete_once(&self, path: &str, version: &VersionToken, message: &str) -> Result<()> {
        let body = DeleteRequest {
            message,
            sha: version.as_str(),
            branch: &self.config.branch,
        };
        let request = self
            .client
            .delete(self.contents_url(path))
            .header(ACCEPT, GITHUB_JSON)
            .json(&body);
        self.send(request, path).await?;
        Ok(())
    }
}

fn decode_base64(encoded: &str, path: &str) -> Result<Bytes> {
    // The API wraps base64 payloads at 60 columns.
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|err| StoreError::InvalidResponse(format!("{path}: bad base64 content: {err}")))
}

#[async_trait]
impl ContentStore for GitHubContentStore {
    async fn read(&self, path: &str) -> Result<StoredObject> {
        with_backoff(&self.retry, &format!("GET {path}"), || self.read_once(path)).await
    }

    async fn write(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken> {
        let version = with_backoff(&self.retry, &format!("PUT {path}"), || {
            self.write_once(path, &content, expected, message)
        })
        .await?;
        tracing::info!(path, %version, "wrote object");
        Ok(version)
    }

    async fn delete(&self, path: &str, version: &VersionToken, message: &str) -> Result<()> {
        with_backoff(&self.retry, &format!("DELETE {path}"), || {
            self.delete_once(path, version, message)
        })
        .await?;
        tracing::info!(path, "deleted object");
        Ok(())
    }
}

/// Opens [`GitHubContentStore`] sessions for a fixed repository.
#[derive(Debug, Clone)]
pub struct GitHubConnector {
    config: StoreConfig,
    retry: RetryConfig,
}

impl GitHubConnector {
    pub fn new(config: StoreConfig, retry: RetryConfig) -> Self {
        Self { config, retry }
    }
}

impl StoreConnector for GitHubConnector {
    fn connect(&self, token: &AccessToken) -> Result<Arc<dyn ContentStore>> {
        let store = GitHubContentStore::new(self.config.clone(), self.retry.clone(), token)?;
        Ok(Arc::new(store))
    }
}
