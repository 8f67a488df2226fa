//! File storage behind the CSV backend.
//!
//! [`GitHubContentStore`] talks to the repository contents API; writes carry
//! the blob `sha` they were based on, and the API rejects a write whose `sha`
//! is stale. [`MemoryContentStore`] applies the same rule in memory.

use crate::config::GitHubConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A file and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Decoded file text.
    pub data: String,
    /// Version token to send back on write.
    pub sha: String,
}

/// Versioned file storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Reads `path`; `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or answers unexpectedly.
    async fn get(&self, path: &str) -> Result<Option<FileContent>>;

    /// Writes `path`. `sha` must be the version the data was derived from,
    /// or `None` when creating the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is rejected, including a stale `sha`.
    async fn put(&self, path: &str, data: &str, sha: Option<&str>, message: &str) -> Result<()>;
}

fn decode_base64(content: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| Error::operation("github_decode_content", e))?;
    String::from_utf8(bytes).map_err(|e| Error::operation("github_decode_content", e))
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
}

/// GitHub repository contents API client.
pub struct GitHubContentStore {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: SecretString,
}

impl GitHubContentStore {
    /// User agent sent with every request.
    pub const USER_AGENT: &'static str = concat!("murmur/", env!("CARGO_PKG_VERSION"));

    /// Creates a client for the configured repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::operation("github_client", e))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            token: SecretString::from(config.token.expose_secret().to_string()),
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(
                AUTHORIZATION,
                format!("token {}", self.token.expose_secret()),
            )
    }

    fn repo_url(&self, rest: &str) -> String {
        format!("{}/repos/{}/{rest}", self.api_base, self.repo)
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| Error::operation(operation, e))
    }

    async fn fail(operation: &'static str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("API returned status {status}: {body}"),
        }
    }

    /// Reads a blob by its sha.
    async fn blob(&self, sha: &str) -> Result<String> {
        let url = self.repo_url(&format!("git/blobs/{sha}"));
        let response = self.send("github_get_blob", self.request(Method::GET, &url)).await?;
        if !response.status().is_success() {
            return Err(Self::fail("github_get_blob", response).await);
        }
        let blob: BlobResponse = response
            .json()
            .await
            .map_err(|e| Error::operation("github_get_blob", e))?;
        decode_base64(&blob.content)
    }

    /// Finds a file too large for the contents API through the tree listing.
    async fn large_file(&self, path: &str) -> Result<Option<FileContent>> {
        let url = self.repo_url("git/trees/HEAD?recursive=1");
        let response = self.send("github_get_tree", self.request(Method::GET, &url)).await?;
        if !response.status().is_success() {
            return Err(Self::fail("github_get_tree", response).await);
        }
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| Error::operation("github_get_tree", e))?;
        let Some(entry) = tree.tree.into_iter().find(|e| e.path == path) else {
            return Ok(None);
        };
        tracing::debug!(path, sha = %entry.sha, "Reading large file through the blob API");
        let data = self.blob(&entry.sha).await?;
        Ok(Some(FileContent {
            data,
            sha: entry.sha,
        }))
    }
}

#[async_trait]
impl ContentStore for GitHubContentStore {
    async fn get(&self, path: &str) -> Result<Option<FileContent>> {
        let url = self.repo_url(&format!("contents/{path}"));
        let response = self.send("github_get", self.request(Method::GET, &url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                let too_large = serde_json::from_str::<ApiError>(&body)
                    .is_ok_and(|e| e.errors.iter().any(|d| d.code == "too_large"));
                if too_large {
                    return self.large_file(path).await;
                }
                return Err(Error::OperationFailed {
                    operation: "github_get".to_string(),
                    cause: format!("API returned status 403: {body}"),
                });
            },
            status if !status.is_success() => {
                return Err(Self::fail("github_get", response).await);
            },
            _ => {},
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .map_err(|e| Error::operation("github_get", e))?;
        let inline = contents
            .content
            .filter(|c| !c.is_empty() && contents.encoding.as_deref() != Some("none"));
        let data = match inline {
            Some(content) => decode_base64(&content)?,
            None => self.blob(&contents.sha).await?,
        };
        Ok(Some(FileContent {
            data,
            sha: contents.sha,
        }))
    }

    async fn put(&self, path: &str, data: &str, sha: Option<&str>, message: &str) -> Result<()> {
        let url = self.repo_url(&format!("contents/{path}"));
        let body = PutRequest {
            message,
            content: STANDARD.encode(data),
            sha,
        };
        let response = self
            .send("github_put", self.request(Method::PUT, &url).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail("github_put", response).await);
        }
        tracing::debug!(path, bytes = data.len(), "Wrote file");
        Ok(())
    }
}

/// In-memory [`ContentStore`] with the same version check as the API.
#[derive(Default)]
pub struct MemoryContentStore {
    files: Mutex<HashMap<String, FileContent>>,
}

impl MemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn version(data: &str) -> String {
        hex::encode(Sha256::digest(data.as_bytes()))
    }

    /// Current text of `path`.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        crate::storage::acquire_lock(&self.files)
            .get(path)
            .map(|f| f.data.clone())
    }

    /// Seeds `path` with `data`, replacing any previous version.
    pub fn insert(&self, path: &str, data: &str) {
        crate::storage::acquire_lock(&self.files).insert(
            path.to_string(),
            FileContent {
                data: data.to_string(),
                sha: Self::version(data),
            },
        );
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, path: &str) -> Result<Option<FileContent>> {
        Ok(crate::storage::acquire_lock(&self.files).get(path).cloned())
    }

    async fn put(&self, path: &str, data: &str, sha: Option<&str>, _message: &str) -> Result<()> {
        let mut files = crate::storage::acquire_lock(&self.files);
        let current = files.get(path).map(|f| f.sha.as_str());
        if current != sha {
            return Err(Error::OperationFailed {
                operation: "github_put".to_string(),
                cause: format!("{path} does not match sha {}", sha.unwrap_or("<none>")),
            });
        }
        files.insert(
            path.to_string(),
            FileContent {
                data: data.to_string(),
                sha: Self::version(data),
            },
        );
        Ok(())
    }
}
