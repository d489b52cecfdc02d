//! Azure Blob Storage backed [`ObjectStore`].
//!
//! # Design
//! - Every request carries its own short-lived service SAS; the account key
//!   never leaves the process.
//! - Listing follows `NextMarker` until the service stops returning one.
//! - Uploads are single `Put Blob` requests with an explicit length.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream;
use mailvault_config::StorageSettings;
use quick_xml::de::from_str;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::model::{BackupArtifact, DelegatedWriteCredential, WriteOperation};
use crate::sas::{SAS_VERSION, SasGrant, SasScope, SasSigner};
use crate::storage::{ObjectStore, UploadBody};

const HEADER_VERSION: &str = "x-ms-version";
const HEADER_BLOB_TYPE: &str = "x-ms-blob-type";
const HEADER_CREATION_TIME: &str = "x-ms-creation-time";
const UPLOAD_CHUNK: usize = 256 * 1024;
const ERROR_BODY_LIMIT: usize = 512;
const CLOCK_SKEW: TimeDelta = TimeDelta::minutes(5);
const REQUEST_GRANT: TimeDelta = TimeDelta::minutes(15);

#[derive(Debug, Deserialize)]
#[serde(rename = "EnumerationResults")]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: BlobProperties,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Creation-Time", default)]
    creation_time: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
}

fn parse_http_date(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| StorageError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}

fn created_at(
    creation_time: Option<&str>,
    last_modified: Option<&str>,
) -> Result<DateTime<Utc>, StorageError> {
    let value = creation_time
        .filter(|value| !value.trim().is_empty())
        .or(last_modified)
        .unwrap_or_default();
    parse_http_date(value)
}

fn parse_listing(body: &str) -> Result<(Vec<BackupArtifact>, Option<String>), StorageError> {
    let results: EnumerationResults =
        from_str(body).map_err(|source| StorageError::Listing { source })?;
    let artifacts = results
        .blobs
        .items
        .into_iter()
        .map(|item| {
            Ok(BackupArtifact {
                created_at: created_at(
                    item.properties.creation_time.as_deref(),
                    item.properties.last_modified.as_deref(),
                )?,
                size: item.properties.content_length,
                name: item.name,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;
    let next = results
        .next_marker
        .map(|marker| marker.trim().to_string())
        .filter(|marker| !marker.is_empty());
    Ok((artifacts, next))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

async fn expect_status(
    operation: &'static str,
    response: Response,
    accepted: &[StatusCode],
) -> Result<Response, StorageError> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Status {
        operation,
        status: status.as_u16(),
        body: truncate(body),
    })
}

/// Blob container client.
#[derive(Clone)]
pub struct AzureBlobStore {
    client: Client,
    endpoint: Url,
    container: String,
    signer: SasSigner,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AzureBlobStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("container", &self.container)
            .field("account", &self.signer.account())
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    /// Build a client for the configured account and container.
    ///
    /// # Errors
    ///
    /// Returns an error when the account key is not base64, the endpoint is
    /// not a URL, or the HTTP client cannot be constructed.
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| StorageError::http("storage.client", source))?;
        Self::with_client(client, settings)
    }

    /// Build a store around an existing HTTP client.
    ///
    /// # Errors
    ///
    /// See [`AzureBlobStore::new`].
    pub fn with_client(client: Client, settings: &StorageSettings) -> Result<Self, StorageError> {
        let raw = settings.endpoint_url();
        let endpoint = Url::parse(&raw).map_err(|_| StorageError::Url {
            operation: "storage.endpoint",
            value: raw.clone(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::Url {
                operation: "storage.endpoint",
                value: raw,
            });
        }
        Ok(Self {
            client,
            endpoint,
            container: settings.container.clone(),
            signer: SasSigner::new(settings.account.clone(), settings.account_key.expose())?,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for token validity windows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Container this store operates on.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    fn url_for(&self, operation: &'static str, blob: Option<&str>) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| StorageError::Url {
                operation,
                value: self.endpoint.to_string(),
            })?;
            segments.pop_if_empty().push(&self.container);
            if let Some(name) = blob {
                segments.extend(name.split('/'));
            }
        }
        Ok(url)
    }

    fn signed_url(
        &self,
        operation: &'static str,
        scope: SasScope<'_>,
        permissions: &str,
        expiry: DateTime<Utc>,
    ) -> Result<Url, StorageError> {
        let blob = match scope {
            SasScope::Container => None,
            SasScope::Blob(name) => Some(name),
        };
        let mut url = self.url_for(operation, blob)?;
        if blob.is_none() {
            url.query_pairs_mut().append_pair("restype", "container");
        }
        let token = self.signer.sign(&SasGrant {
            container: &self.container,
            scope,
            permissions,
            start: self.clock.now() - CLOCK_SKEW,
            expiry,
        })?;
        token.apply(&mut url);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(HEADER_VERSION, SAS_VERSION)
    }

    async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<(Vec<BackupArtifact>, Option<String>), StorageError> {
        const OPERATION: &str = "storage.list";
        let expiry = self.clock.now() + REQUEST_GRANT;
        let mut url = self.signed_url(OPERATION, SasScope::Container, "l", expiry)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("comp", "list");
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(marker) = marker {
                query.append_pair("marker", marker);
            }
        }
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|source| StorageError::http(OPERATION, source))?;
        let response = expect_status(OPERATION, response, &[StatusCode::OK]).await?;
        let body = response
            .text()
            .await
            .map_err(|source| StorageError::http(OPERATION, source))?;
        parse_listing(&body)
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BackupArtifact>, StorageError> {
        let mut artifacts = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let (page, next) = self.list_page(prefix, marker.as_deref()).await?;
            artifacts.extend(page);
            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        debug!(
            container = %self.container,
            count = artifacts.len(),
            "listed backup container"
        );
        Ok(artifacts)
    }

    async fn stat(&self, name: &str) -> Result<Option<BackupArtifact>, StorageError> {
        const OPERATION: &str = "storage.stat";
        let expiry = self.clock.now() + REQUEST_GRANT;
        let url = self.signed_url(OPERATION, SasScope::Blob(name), "r", expiry)?;
        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .map_err(|source| StorageError::http(OPERATION, source))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_status(OPERATION, response, &[StatusCode::OK]).await?;
        let headers = response.headers();
        let size = header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let created = created_at(
            header_str(headers, HEADER_CREATION_TIME),
            header_str(headers, LAST_MODIFIED.as_str()),
        )?;
        Ok(Some(BackupArtifact {
            name: name.to_string(),
            created_at: created,
            size,
        }))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        const OPERATION: &str = "storage.delete";
        let expiry = self.clock.now() + REQUEST_GRANT;
        let url = self.signed_url(OPERATION, SasScope::Blob(name), "d", expiry)?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|source| StorageError::http(OPERATION, source))?;
        expect_status(
            OPERATION,
            response,
            &[StatusCode::ACCEPTED, StatusCode::OK, StatusCode::NOT_FOUND],
        )
        .await?;
        info!(container = %self.container, name, "deleted backup object");
        Ok(())
    }

    async fn put_stream(
        &self,
        name: &str,
        body: UploadBody,
        length: u64,
    ) -> Result<(), StorageError> {
        const OPERATION: &str = "storage.put";
        let expiry = self.clock.now() + REQUEST_GRANT;
        let url = self.signed_url(OPERATION, SasScope::Blob(name), "cw", expiry)?;
        let chunks = stream::try_unfold(body, |mut reader| async move {
            let mut buffer = vec![0_u8; UPLOAD_CHUNK];
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                return Ok::<_, io::Error>(None);
            }
            buffer.truncate(read);
            Ok(Some((buffer, reader)))
        });
        let response = self
            .request(Method::PUT, url)
            .header(HEADER_BLOB_TYPE, "BlockBlob")
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(chunks))
            .send()
            .await
            .map_err(|source| StorageError::http(OPERATION, source))?;
        expect_status(OPERATION, response, &[StatusCode::CREATED, StatusCode::OK]).await?;
        info!(container = %self.container, name, bytes = length, "uploaded backup object");
        Ok(())
    }

    fn delegate_write(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<DelegatedWriteCredential, StorageError> {
        const OPERATION: &str = "storage.delegate";
        let ttl = TimeDelta::from_std(ttl).map_err(|_| StorageError::Rejected {
            operation: OPERATION,
            name: name.to_string(),
        })?;
        let expires_at = self.clock.now() + ttl;
        let target_uri = self.signed_url(OPERATION, SasScope::Blob(name), "cw", expires_at)?;
        Ok(DelegatedWriteCredential {
            target_uri,
            expires_at,
            allowed_operations: vec![WriteOperation::Create, WriteOperation::Write],
        })
    }
}
