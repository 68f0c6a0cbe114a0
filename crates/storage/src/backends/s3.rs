//! S3-compatible blob backend using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::keys::{PublicBase, suffixed_key};
use crate::traits::{BlobStore, StoredBlob};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use std::time::Duration;
use tracing::instrument;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

/// Connection settings for [`S3Backend::new`].
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    pub public_base_url: String,
}

/// S3-compatible blob store.
///
/// Object URLs are `public_base_url` followed by the full object key
/// (including the configured prefix).
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    public: PublicBase,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Prepend `http://` to bare `host:port` endpoints such as `minio:9000`.
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Explicit credentials are used when both halves are set; otherwise the
    /// ambient AWS credential chain is consulted on first request.
    pub async fn new(settings: S3Settings) -> StorageResult<Self> {
        let S3Settings {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            public_base_url,
        } = settings;

        let public = PublicBase::parse(&public_base_url)?;
        let region = aws_config::Region::new(region.unwrap_or_else(|| "us-east-1".to_string()));
        let endpoint = endpoint.as_deref().map(normalize_endpoint);
        // Plain-http endpoints (local MinIO) get an HTTP-only client so no TLS
        // trust roots are needed.
        let http_only = endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));

        let mut builder = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    key_id,
                    secret,
                    None,
                    None,
                    "shelfsheet-config",
                )),
            (None, None) => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
                if http_only {
                    loader = loader.http_client(SmithyHttpClientBuilder::new().build_http());
                }
                aws_sdk_s3::config::Builder::from(&loader.load().await)
            }
            _ => {
                return Err(StorageError::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ));
            }
        };

        if let Some(endpoint_url) = &endpoint {
            builder = builder.endpoint_url(endpoint_url);
            if http_only {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            prefix,
            public,
        })
    }

    /// Full object key for a store-relative key.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Full object key behind `url`, if it lies under this store's base URL
    /// and prefix.
    fn object_key_for(&self, url: &str) -> Option<String> {
        let key = self.public.key_for(url)?;
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
                .then_some(key),
            None => Some(key),
        }
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> StorageResult<StoredBlob> {
        let key = self.full_key(&suffixed_key(path)?);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let url = self.public.url_for(&key);
        tracing::debug!(key = %key, url = %url, "stored blob");
        Ok(StoredBlob { key, url })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, url: &str) -> StorageResult<()> {
        let key = self
            .object_key_for(url)
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))?;

        // DeleteObject succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    fn owns_url(&self, url: &str) -> bool {
        self.object_key_for(url).is_some()
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let check = async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<&str>) -> S3Backend {
        S3Backend::new(S3Settings {
            bucket: "test-bucket".to_string(),
            endpoint: Some("s3.test".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: prefix.map(str::to_string),
            access_key_id: Some("access".to_string()),
            secret_access_key: Some("secret".to_string()),
            force_path_style: true,
            public_base_url: "http://s3.test/test-bucket".to_string(),
        })
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn full_key_applies_trimmed_prefix() {
        let backend = make_backend(Some("/media/")).await;
        assert_eq!(backend.full_key("a/b.png"), "media/a/b.png");

        let backend = make_backend(None).await;
        assert_eq!(backend.full_key("a/b.png"), "a/b.png");
    }

    #[tokio::test]
    async fn owns_only_urls_under_prefix() {
        let backend = make_backend(Some("media")).await;
        assert!(backend.owns_url("http://s3.test/test-bucket/media/a.png"));
        assert!(!backend.owns_url("http://s3.test/test-bucket/other/a.png"));
        assert!(!backend.owns_url("http://s3.test/test-bucket/mediax/a.png"));
        assert!(!backend.owns_url("http://s3.test/other-bucket/media/a.png"));
    }

    #[tokio::test]
    async fn delete_of_foreign_url_fails_without_network() {
        let backend = make_backend(None).await;
        assert!(matches!(
            backend.delete("https://cdn.partner.example/a.png").await,
            Err(StorageError::ForeignUrl(_))
        ));
    }

    #[tokio::test]
    async fn rejects_partial_credentials() {
        let result = S3Backend::new(S3Settings {
            bucket: "b".to_string(),
            access_key_id: Some("access".to_string()),
            public_base_url: "https://b.example.com".to_string(),
            ..S3Settings::default()
        })
        .await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn bare_endpoints_get_http_scheme() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(normalize_endpoint("HTTPS://s3.example"), "HTTPS://s3.example");
    }
}
