//! REST client for the resource-pack API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use shared::{
    domain::{JobId, PackId, VersionString},
    protocol::{ConversionJob, ResourcePackRecord},
};
use tracing::{debug, info};
use url::Url;

use crate::{
    error::{ApiClientError, ResponseExt},
    upload::PackUpload,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for any single request, sized for a 100 MB upload.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The HTTP capability the rest of the crate depends on.
#[async_trait]
pub trait ResourcePackApi: Send + Sync {
    async fn list_packs(&self) -> Result<Vec<ResourcePackRecord>, ApiClientError>;
    async fn get_pack(&self, pack_id: PackId) -> Result<ResourcePackRecord, ApiClientError>;
    async fn pack_hash(&self, pack_id: PackId) -> Result<String, ApiClientError>;
    async fn list_conversions(
        &self,
        pack_id: PackId,
    ) -> Result<Vec<ResourcePackRecord>, ApiClientError>;
    async fn start_conversion(
        &self,
        pack_id: PackId,
        target_version: &VersionString,
    ) -> Result<ConversionJob, ApiClientError>;
    async fn conversion_job(&self, job_id: JobId) -> Result<ConversionJob, ApiClientError>;
    async fn delete_pack(&self, pack_id: PackId) -> Result<(), ApiClientError>;
    async fn upload_pack(&self, upload: PackUpload) -> Result<ResourcePackRecord, ApiClientError>;
}

#[derive(Clone)]
pub struct HttpResourcePackApi {
    http: Client,
    base_url: String,
}

impl HttpResourcePackApi {
    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Self::with_http_client(base_url, http)
    }

    pub fn with_http_client(base_url: &str, http: Client) -> Result<Self, ApiClientError> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn packs_url(&self) -> String {
        format!("{}/api/resourcepacks", self.base_url)
    }

    fn pack_url(&self, pack_id: PackId) -> String {
        format!("{}/api/resourcepacks/{}", self.base_url, pack_id.0)
    }

    async fn get_json<T>(&self, url: String, context: &'static str) -> Result<T, ApiClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!(%url, "api: GET {context}");
        self.http
            .get(&url)
            .send()
            .await
            .map_api_error()
            .await?
            .json::<T>()
            .await
            .map_err(|err| ApiClientError::decode(context, err))
    }
}

/// Validates the configured base url and strips any trailing slash so paths
/// can be appended with `format!`.
pub fn normalize_base_url(raw: &str) -> Result<String, ApiClientError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|err| ApiClientError::InvalidBaseUrl {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiClientError::InvalidBaseUrl {
            url: trimmed.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(ApiClientError::InvalidBaseUrl {
            url: trimmed.to_string(),
            reason: "query strings and fragments are not allowed".to_string(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[async_trait]
impl ResourcePackApi for HttpResourcePackApi {
    async fn list_packs(&self) -> Result<Vec<ResourcePackRecord>, ApiClientError> {
        self.get_json(self.packs_url(), "list_packs").await
    }

    async fn get_pack(&self, pack_id: PackId) -> Result<ResourcePackRecord, ApiClientError> {
        self.get_json(self.pack_url(pack_id), "get_pack").await
    }

    async fn pack_hash(&self, pack_id: PackId) -> Result<String, ApiClientError> {
        let url = format!("{}/hash", self.pack_url(pack_id));
        debug!(%url, "api: GET pack_hash");
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_api_error()
            .await?
            .text()
            .await
            .map_err(|err| ApiClientError::decode("pack_hash", err))?;
        Ok(body.trim().to_string())
    }

    async fn list_conversions(
        &self,
        pack_id: PackId,
    ) -> Result<Vec<ResourcePackRecord>, ApiClientError> {
        self.get_json(
            format!("{}/conversions", self.pack_url(pack_id)),
            "list_conversions",
        )
        .await
    }

    async fn start_conversion(
        &self,
        pack_id: PackId,
        target_version: &VersionString,
    ) -> Result<ConversionJob, ApiClientError> {
        let url = format!("{}/convert", self.pack_url(pack_id));
        info!(pack_id = pack_id.0, target_version = %target_version, "api: requesting conversion");
        self.http
            .post(&url)
            .query(&[("version", target_version.as_str())])
            .send()
            .await
            .map_api_error()
            .await?
            .json::<ConversionJob>()
            .await
            .map_err(|err| ApiClientError::decode("start_conversion", err))
    }

    async fn conversion_job(&self, job_id: JobId) -> Result<ConversionJob, ApiClientError> {
        self.get_json(
            format!("{}/conversions/{}", self.packs_url(), job_id.0),
            "conversion_job",
        )
        .await
    }

    async fn delete_pack(&self, pack_id: PackId) -> Result<(), ApiClientError> {
        info!(pack_id = pack_id.0, "api: deleting pack");
        self.http
            .delete(self.pack_url(pack_id))
            .send()
            .await
            .map_api_error()
            .await?;
        Ok(())
    }

    async fn upload_pack(&self, upload: PackUpload) -> Result<ResourcePackRecord, ApiClientError> {
        let mime = upload.mime_type();
        let PackUpload { filename, bytes } = upload;
        let size = bytes.len();
        info!(%filename, size, "api: uploading pack");
        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(ApiClientError::from)?;
        let response = self
            .http
            .post(self.packs_url())
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_api_error()
            .await?;

        // The server answers 204 when it saw the client abort mid-upload.
        if response.status() == StatusCode::NO_CONTENT {
            return Err(ApiClientError::decode(
                "upload_pack",
                "server stored nothing (upload aborted)",
            ));
        }

        response
            .json::<ResourcePackRecord>()
            .await
            .map_err(|err| ApiClientError::decode("upload_pack", err))
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
