//! Configuration types shared across crates.

use crate::hosts::HostAllowlist;
use crate::validate::{MediaPolicy, MediaValidator};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;
use url::Url;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for stored objects.
        path: PathBuf,
        /// Base URL under which the directory is served.
        public_base_url: String,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the default credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
        /// Base URL that published object URLs start with (bucket website,
        /// CDN, or `https://<bucket>.s3.<region>.amazonaws.com`).
        public_base_url: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
            public_base_url: "http://localhost:8080/blobs".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn public_base_url(&self) -> &str {
        match self {
            Self::Filesystem {
                public_base_url, ..
            }
            | Self::S3 {
                public_base_url, ..
            } => public_base_url,
        }
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        let base = Url::parse(self.public_base_url())
            .map_err(|e| format!("storage.public_base_url is not a valid URL: {e}"))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err("storage.public_base_url must be an absolute http(s) URL".to_string());
        }

        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (testing and single-node deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer SHELFSHEET_METADATA__PASSWORD over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/shelfsheet.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Named media policy bundles.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaPreset {
    /// 10 MiB raster images, no resolution floor.
    #[default]
    Standard,
    /// 50 MiB images including SVG and TIFF, 1500px short-side floor.
    HighResolution,
}

/// Media ingestion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Preset used for any policy not spelled out below.
    #[serde(default)]
    pub preset: MediaPreset,
    /// Explicit image policy. Overrides the preset.
    #[serde(default)]
    pub image: Option<MediaPolicy>,
    /// Explicit attachment policy. Overrides the preset.
    #[serde(default)]
    pub attachment: Option<MediaPolicy>,
    /// Hosts that sheets may reference without uploading.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Domain suffix of the managed object store. Derived from the storage
    /// public base URL when unset.
    #[serde(default)]
    pub managed_domain_suffix: Option<String>,
    /// Leading segment of every uploaded object path.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

fn default_path_prefix() -> String {
    "sheets".to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            preset: MediaPreset::default(),
            image: None,
            attachment: None,
            allowed_hosts: Vec::new(),
            managed_domain_suffix: None,
            path_prefix: default_path_prefix(),
        }
    }
}

impl MediaConfig {
    pub fn image_policy(&self) -> MediaPolicy {
        self.image.clone().unwrap_or_else(|| match self.preset {
            MediaPreset::Standard => MediaPolicy::standard_image(),
            MediaPreset::HighResolution => MediaPolicy::high_resolution_image(),
        })
    }

    pub fn attachment_policy(&self) -> MediaPolicy {
        self.attachment
            .clone()
            .unwrap_or_else(MediaPolicy::standard_attachment)
    }

    pub fn validator(&self) -> MediaValidator {
        MediaValidator::new(self.image_policy(), self.attachment_policy())
    }

    /// Allowlist for hosted URLs. `storage` supplies the managed domain when
    /// no suffix is configured.
    pub fn allowlist(&self, storage: &StorageConfig) -> HostAllowlist {
        let derived = Url::parse(storage.public_base_url())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let suffix = self.managed_domain_suffix.clone().or(derived);
        HostAllowlist::new(&self.allowed_hosts, suffix.as_deref())
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, policy) in [
            ("image", self.image_policy()),
            ("attachment", self.attachment_policy()),
        ] {
            if policy.allowed_types.is_empty() {
                return Err(format!("media.{name}.allowed_types cannot be empty"));
            }
            if policy.max_bytes == 0 {
                return Err(format!("media.{name}.max_bytes must be greater than 0"));
            }
        }
        if self.path_prefix.trim_matches('/').is_empty() {
            return Err("media.path_prefix cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Retention purge configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Sheets created longer ago than this are removed by `purge`.
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
}

fn default_horizon_days() -> u32 {
    365
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
        }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::days(i64::from(self.horizon_days))
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `dir`.
    ///
    /// **For testing only.** Uses filesystem storage and SQLite metadata.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            storage: StorageConfig::Filesystem {
                path: dir.join("blobs"),
                public_base_url: "http://blobs.shelfsheet.test/media".to_string(),
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("shelfsheet.db"),
            },
            media: MediaConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.media.validate()?;
        Ok(())
    }
}
