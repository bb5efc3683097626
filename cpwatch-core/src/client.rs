use reqwest::header::{ACCEPT, EXPECT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

const FS_BASE: &str = "/fs";
const VERSION_PATH: &str = "/cp/version.json";
const DISKINFO_PATH: &str = "/cp/diskinfo.json";
const ACCEPT_JSON: &str = "application/json";
const HEADER_TIMESTAMP: &str = "X-Timestamp";
const HEADER_DESTINATION: &str = "X-Destination";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WebWorkflowError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("device address is empty")]
    EmptyAddress,
    #[error("invalid remote path: {0}")]
    InvalidPath(String),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    NotFound,
    /// The device storage is currently owned by a USB host.
    WriteLocked,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct WebWorkflowClient {
    http: Client,
    base_url: Url,
    password: String,
    retry: RetryPolicy,
}

impl WebWorkflowClient {
    /// `address` may be a bare `host[:port]` or a full `http(s)://` URL.
    pub fn new(address: &str, password: impl Into<String>) -> Result<Self, WebWorkflowError> {
        Ok(Self {
            http: build_http(DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)?,
            base_url: normalize_address(address)?,
            password: password.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replaces the per-request and connect timeouts. A request that runs out
    /// of time counts as a transport failure and is retried like one.
    pub fn with_timeouts(
        mut self,
        request: Duration,
        connect: Duration,
    ) -> Result<Self, WebWorkflowError> {
        self.http = build_http(request, connect)?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_version(&self) -> Result<VersionInfo, WebWorkflowError> {
        let url = self.endpoint(VERSION_PATH);
        let response = self
            .send(|| self.http.get(url.clone()).timeout(VERSION_TIMEOUT))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_disk_info(&self) -> Result<Vec<DiskInfo>, WebWorkflowError> {
        let url = self.endpoint(DISKINFO_PATH);
        let response = self.send(|| self.http.get(url.clone())).await?;
        Ok(response.json().await?)
    }

    pub async fn list_directory(&self, dir: &str) -> Result<DirectoryListing, WebWorkflowError> {
        let url = self.fs_endpoint(&directory_form(dir));
        let response = self
            .send(|| self.http.get(url.clone()).header(ACCEPT, ACCEPT_JSON))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>, WebWorkflowError> {
        let url = self.fs_endpoint(file_form(path)?);
        let response = self.send(|| self.http.get(url.clone())).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Writes `content` to `path`, stamping it with `timestamp_ms` when given.
    pub async fn put_file(
        &self,
        path: &str,
        content: &[u8],
        timestamp_ms: Option<i64>,
    ) -> Result<(), WebWorkflowError> {
        let url = self.fs_endpoint(file_form(path)?);
        self.send(|| {
            let request = self
                .http
                .put(url.clone())
                .header(EXPECT, "100-continue")
                .body(content.to_vec());
            with_timestamp(request, timestamp_ms)
        })
        .await?;
        Ok(())
    }

    pub async fn put_directory(
        &self,
        dir: &str,
        timestamp_ms: Option<i64>,
    ) -> Result<(), WebWorkflowError> {
        let url = self.fs_endpoint(&directory_form(dir));
        self.send(|| with_timestamp(self.http.put(url.clone()), timestamp_ms))
            .await?;
        Ok(())
    }

    pub async fn move_path(
        &self,
        from: &str,
        to: &str,
        is_dir: bool,
    ) -> Result<(), WebWorkflowError> {
        let (from, to) = if is_dir {
            (directory_form(from), directory_form(to))
        } else {
            (file_form(from)?.to_string(), file_form(to)?.to_string())
        };
        let url = self.fs_endpoint(&from);
        // The destination travels in a header, so it gets the same encoding as a request path.
        let destination = self.fs_endpoint(&to).path().to_string();
        let method = Method::from_bytes(b"MOVE").map_err(|_| {
            WebWorkflowError::InvalidPath(format!("cannot build MOVE request for {from}"))
        })?;
        self.send(|| {
            self.http
                .request(method.clone(), url.clone())
                .header(HEADER_DESTINATION, destination.as_str())
        })
        .await?;
        Ok(())
    }

    pub async fn delete_path(&self, path: &str, is_dir: bool) -> Result<(), WebWorkflowError> {
        let path = if is_dir {
            directory_form(path)
        } else {
            file_form(path)?.to_string()
        };
        let url = self.fs_endpoint(&path);
        self.send(|| self.http.delete(url.clone())).await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url
    }

    fn fs_endpoint(&self, remote_path: &str) -> Url {
        self.endpoint(&format!("{FS_BASE}{remote_path}"))
    }

    async fn send<F>(&self, build: F) -> Result<Response, WebWorkflowError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let result = build()
                .basic_auth("", Some(&self.password))
                .send()
                .await;
            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(err) => !err.is_builder(),
            };
            if !retryable || attempt >= self.retry.max_retries {
                return Self::handle_response(result?).await;
            }
            tokio::time::sleep(self.retry.backoff.delay(attempt)).await;
            attempt += 1;
        }
    }

    async fn handle_response(response: Response) -> Result<Response, WebWorkflowError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(WebWorkflowError::Api { status, body })
        }
    }
}

impl WebWorkflowError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            WebWorkflowError::Api { status, .. } => Some(*status),
            WebWorkflowError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        self.status().map(classify_api_status)
    }

    pub fn is_write_conflict(&self) -> bool {
        self.classification() == Some(ApiErrorClass::WriteLocked)
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == Some(ApiErrorClass::NotFound)
    }

    pub fn is_auth(&self) -> bool {
        self.classification() == Some(ApiErrorClass::Auth)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WebWorkflowError::Request(err) if err.is_timeout())
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorClass::Auth,
        StatusCode::NOT_FOUND => ApiErrorClass::NotFound,
        StatusCode::CONFLICT => ApiErrorClass::WriteLocked,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ApiErrorClass::Transient,
        status if status.is_server_error() => ApiErrorClass::Transient,
        _ => ApiErrorClass::Permanent,
    }
}

fn build_http(request: Duration, connect: Duration) -> Result<Client, WebWorkflowError> {
    Ok(Client::builder()
        .timeout(request)
        .connect_timeout(connect)
        .build()?)
}

fn normalize_address(address: &str) -> Result<Url, WebWorkflowError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(WebWorkflowError::EmptyAddress);
    }
    let lower = address.to_ascii_lowercase();
    let mut url = if lower.starts_with("http://") || lower.starts_with("https://") {
        Url::parse(address)?
    } else {
        Url::parse(&format!("http://{address}"))?
    };
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn with_timestamp(request: RequestBuilder, timestamp_ms: Option<i64>) -> RequestBuilder {
    match timestamp_ms {
        Some(ms) => request.header(HEADER_TIMESTAMP, ms.to_string()),
        None => request,
    }
}

fn directory_form(dir: &str) -> String {
    let mut out = String::with_capacity(dir.len() + 2);
    if !dir.starts_with('/') {
        out.push('/');
    }
    out.push_str(dir);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

fn file_form(path: &str) -> Result<&str, WebWorkflowError> {
    if path.ends_with('/') || !path.starts_with('/') {
        return Err(WebWorkflowError::InvalidPath(path.to_string()));
    }
    Ok(path)
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DirectoryListing {
    #[serde(default)]
    pub free: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub block_size: i64,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl DirectoryListing {
    pub fn find(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|entry| entry.name == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "directory", default)]
    pub is_directory: bool,
    /// Nanoseconds since the Unix epoch; zero or negative when the device does not know.
    #[serde(default)]
    pub modified_ns: i64,
    #[serde(default)]
    pub file_size: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiskInfo {
    pub root: String,
    #[serde(default)]
    pub free: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub block_size: i64,
    #[serde(default)]
    pub writable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub web_api_version: i32,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub board_name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ip: Option<String>,
}
