//! Azure Blob Storage backend
//!
//! Talks to the Blob service REST API directly with `reqwest`.
//!
//! | Operation | REST call | Notes |
//! |-----------|-----------|-------|
//! | sink `write` | Put Block (`comp=block`) | one call per full block |
//! | sink `finish` | Put Block List (`comp=blocklist`) | commits staged blocks in order |
//! | `fetch_url` | Get Blob Properties (`HEAD`) | only here does 404 map to `NotFound` |
//!
//! Block IDs are `base64("block-{upload prefix}-{index:06}")`, so every ID in
//! a blob has the same length and two uploads to the same name never share
//! staged blocks. Uncommitted blocks from failed uploads expire on the
//! service side; nothing is cleaned up here.

pub mod credentials;

use super::{BlobSink, SinkHandle, StorageBackend, StorageError};
use crate::config::StorageConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use credentials::{SharedKeyCredential, SignableRequest};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Blob service REST API version sent with every request
pub const AZURE_API_VERSION: &str = "2023-11-03";

/// Everything except unreserved characters and `/` is escaped in blob paths
const BLOB_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a blob name for use in a URL path
pub fn encode_blob_name(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, BLOB_NAME_ENCODE_SET).to_string()
}

/// Azure backend settings
#[derive(Debug, Clone)]
pub struct AzureBlobConfig {
    pub account: String,
    pub access_key: String,
    /// Defaults to `https://{account}.blob.core.windows.net`
    pub endpoint: Option<String>,
    pub block_size: usize,
    pub request_timeout: Duration,
}

impl AzureBlobConfig {
    pub fn from_storage_config(config: &StorageConfig) -> Self {
        Self {
            account: config.account.clone(),
            access_key: config.access_key.clone(),
            endpoint: config.endpoint.clone(),
            block_size: config.block_size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Error document returned by the Blob service
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Request body for Put Block List
#[derive(Debug, Serialize)]
#[serde(rename = "BlockList")]
struct BlockList<'a> {
    #[serde(rename = "Latest")]
    latest: &'a [String],
}

fn block_list_xml(block_ids: &[String]) -> Result<String, StorageError> {
    let body = quick_xml::se::to_string(&BlockList { latest: block_ids })
        .map_err(|e| StorageError::Backend(format!("Failed to encode block list: {}", e)))?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{}", body))
}

fn block_id(prefix: &str, index: usize) -> String {
    BASE64_STANDARD.encode(format!("block-{}-{:06}", prefix, index))
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Shared HTTP client, credential and endpoint
struct AzureClient {
    http: reqwest::Client,
    credential: SharedKeyCredential,
    base_url: String,
    /// Path component of the endpoint (non-empty for path-style emulators)
    base_path: String,
    block_size: usize,
}

impl AzureClient {
    fn blob_path(&self, container: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_path, container, encode_blob_name(name))
    }

    fn blob_url(&self, container: &str, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, container, encode_blob_name(name))
    }

    /// Send a signed request against a single blob
    async fn send(
        &self,
        method: Method,
        container: &str,
        name: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: Option<Bytes>,
    ) -> Result<Response, StorageError> {
        let date = rfc1123_now();
        let content_length = body.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        let resource = format!(
            "/{}{}",
            self.credential.account(),
            self.blob_path(container, name)
        );

        let signable = SignableRequest {
            method: method.as_str(),
            content_length,
            content_type,
            ms_headers: &[("x-ms-date", date.as_str()), ("x-ms-version", AZURE_API_VERSION)],
            resource: &resource,
            query,
        };
        let authorization = self
            .credential
            .authorization(&signable.string_to_sign())
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let mut request = self
            .http
            .request(method, self.blob_url(container, name))
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION)
            .header("Authorization", authorization);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !content_type.is_empty() {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    /// Turn a non-success response into a `StorageError::Backend` carrying
    /// the service error code
    async fn check(response: Response, context: &str) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = match quick_xml::de::from_str::<ServiceErrorBody>(&body) {
            Ok(err) => format!("{}: {}", err.code, err.message.trim()),
            Err(_) if body.is_empty() => status.to_string(),
            Err(_) => body,
        };
        Err(StorageError::Backend(format!(
            "Azure {} failed with HTTP {}: {}",
            context,
            status.as_u16(),
            detail
        )))
    }

    #[tracing::instrument(
        name = "azure.put_block",
        skip(self, data),
        fields(azure.container = %container, azure.blob = %name, upload.bytes = data.len()),
        err
    )]
    async fn put_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let response = self
            .send(
                Method::PUT,
                container,
                name,
                &[("comp", "block"), ("blockid", block_id)],
                "application/octet-stream",
                Some(data),
            )
            .await?;
        Self::check(response, "put_block").await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "azure.put_block_list",
        skip(self, block_ids),
        fields(azure.container = %container, azure.blob = %name, blocks = block_ids.len()),
        err
    )]
    async fn put_block_list(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<(), StorageError> {
        let xml = block_list_xml(block_ids)?;
        let response = self
            .send(
                Method::PUT,
                container,
                name,
                &[("comp", "blocklist")],
                "application/xml",
                Some(Bytes::from(xml)),
            )
            .await?;
        Self::check(response, "put_block_list").await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "azure.get_blob_properties",
        skip(self),
        fields(azure.container = %container, azure.blob = %name),
        err
    )]
    async fn get_properties(&self, container: &str, name: &str) -> Result<(), StorageError> {
        let response = self
            .send(Method::HEAD, container, name, &[], "", None)
            .await?;
        // Only a missing blob on lookup is NotFound; write-path 404s keep the service code
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(container, name));
        }
        let response = Self::check(response, "get_blob_properties").await?;
        tracing::debug!(
            content_length = ?response.content_length(),
            etag = ?response.headers().get("etag"),
            "Blob properties fetched"
        );
        Ok(())
    }
}

/// Azure Blob Storage backend
#[derive(Clone)]
pub struct AzureBlobBackend {
    client: Arc<AzureClient>,
}

impl AzureBlobBackend {
    /// Create a backend; fails only on bad credentials or endpoint
    pub fn new(config: AzureBlobConfig) -> Result<Self, StorageError> {
        let credential = SharedKeyCredential::from_base64(config.account.clone(), &config.access_key)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", config.account))
            .trim_end_matches('/')
            .to_string();
        let base_path = reqwest::Url::parse(&base_url)
            .map_err(|e| StorageError::Config(format!("Invalid endpoint {}: {}", base_url, e)))?
            .path()
            .trim_end_matches('/')
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        tracing::info!(
            account = %config.account,
            endpoint = %base_url,
            block_size = config.block_size,
            "Azure blob backend initialized"
        );

        Ok(Self {
            client: Arc::new(AzureClient {
                http,
                credential,
                base_url,
                base_path,
                block_size: config.block_size.max(1),
            }),
        })
    }

    /// Public URL of a blob (no existence check)
    pub fn blob_url(&self, container: &str, name: &str) -> String {
        self.client.blob_url(container, name)
    }
}

/// Sink that stages fixed-size blocks and commits them on finish
struct AzureBlockSink {
    client: Arc<AzureClient>,
    container: String,
    name: String,
    block_prefix: String,
    buffer: BytesMut,
    block_ids: Vec<String>,
}

impl AzureBlockSink {
    async fn stage(&mut self, data: Bytes) -> Result<(), StorageError> {
        let id = block_id(&self.block_prefix, self.block_ids.len());
        self.client
            .put_block(&self.container, &self.name, &id, data)
            .await?;
        self.block_ids.push(id);
        Ok(())
    }
}

#[async_trait]
impl BlobSink for AzureBlockSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= self.client.block_size {
            let block = self.buffer.split_to(self.client.block_size).freeze();
            self.stage(block).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split().freeze();
            self.stage(rest).await?;
        }
        self.client
            .put_block_list(&self.container, &self.name, &self.block_ids)
            .await
    }
}

#[async_trait]
impl StorageBackend for AzureBlobBackend {
    fn open_sink(&self, container: &str, name: &str) -> SinkHandle {
        Box::new(AzureBlockSink {
            client: Arc::clone(&self.client),
            container: container.to_string(),
            name: name.to_string(),
            block_prefix: uuid::Uuid::new_v4().simple().to_string(),
            buffer: BytesMut::new(),
            block_ids: Vec::new(),
        })
    }

    async fn fetch_url(&self, container: &str, name: &str) -> Result<String, StorageError> {
        self.client.get_properties(container, name).await?;
        Ok(self.client.blob_url(container, name))
    }
}
