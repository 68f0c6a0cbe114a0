//! Media acceptance rules.

use crate::media::{MediaKind, essence};
use crate::sniff::sniff;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIB: u64 = 1024 * 1024;

/// Reasons a media payload or reference is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported {kind} type: {mime}")]
    UnsupportedType { kind: MediaKind, mime: String },

    #[error("{kind} size {size} bytes is outside 1..={max} bytes")]
    SizeOutOfBounds { kind: MediaKind, size: u64, max: u64 },

    #[error("image resolution {width}x{height} is below the {min_short_side}px minimum short side")]
    ResolutionTooLow {
        width: u32,
        height: u32,
        min_short_side: u32,
    },

    #[error("image dimensions could not be determined for {mime}")]
    FormatUnrecognized { mime: String },

    #[error("media source is not allowed: {0}")]
    DisallowedSource(String),

    #[error("malformed media payload: {0}")]
    MalformedPayload(String),
}

impl ValidationError {
    /// Stable short label, used for metrics and API error codes.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::SizeOutOfBounds { .. } => "size_out_of_bounds",
            Self::ResolutionTooLow { .. } => "resolution_too_low",
            Self::FormatUnrecognized { .. } => "format_unrecognized",
            Self::DisallowedSource(_) => "disallowed_source",
            Self::MalformedPayload(_) => "malformed_payload",
        }
    }
}

/// Acceptance rules bound to one [`MediaKind`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPolicy {
    /// Accepted mime types (compared lowercased, without parameters).
    pub allowed_types: Vec<String>,
    /// Largest accepted payload in bytes.
    pub max_bytes: u64,
    /// Minimum pixel length of the shorter image side. `None` disables the
    /// resolution check. Only consulted for [`MediaKind::Image`].
    #[serde(default)]
    pub min_short_side_px: Option<u32>,
}

const BASE_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
];

const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/zip",
    "application/x-zip-compressed",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

fn owned(types: &[&str]) -> Vec<String> {
    types.iter().map(|t| t.to_string()).collect()
}

impl MediaPolicy {
    /// Raster images up to 10 MiB, no resolution floor.
    pub fn standard_image() -> Self {
        Self {
            allowed_types: owned(BASE_IMAGE_TYPES),
            max_bytes: 10 * MIB,
            min_short_side_px: None,
        }
    }

    /// Print-quality images: up to 50 MiB, SVG and TIFF accepted, 1500px
    /// minimum short side.
    pub fn high_resolution_image() -> Self {
        let mut allowed_types = owned(BASE_IMAGE_TYPES);
        allowed_types.extend(owned(&["image/svg+xml", "image/tiff"]));
        Self {
            allowed_types,
            max_bytes: 50 * MIB,
            min_short_side_px: Some(1500),
        }
    }

    /// Images plus common documents, up to 25 MiB.
    pub fn standard_attachment() -> Self {
        let mut allowed_types = owned(BASE_IMAGE_TYPES);
        allowed_types.extend(owned(DOCUMENT_TYPES));
        Self {
            allowed_types,
            max_bytes: 25 * MIB,
            min_short_side_px: None,
        }
    }

    pub fn allows(&self, mime: &str) -> bool {
        let mime = essence(mime);
        self.allowed_types
            .iter()
            .any(|allowed| essence(allowed) == mime)
    }
}

/// Checks payloads against the policy of their [`MediaKind`].
#[derive(Clone, Debug)]
pub struct MediaValidator {
    image: MediaPolicy,
    attachment: MediaPolicy,
}

impl Default for MediaValidator {
    fn default() -> Self {
        Self::new(
            MediaPolicy::standard_image(),
            MediaPolicy::standard_attachment(),
        )
    }
}

impl MediaValidator {
    pub fn new(image: MediaPolicy, attachment: MediaPolicy) -> Self {
        Self { image, attachment }
    }

    pub fn policy(&self, kind: MediaKind) -> &MediaPolicy {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Attachment => &self.attachment,
        }
    }

    /// Check only the declared type.
    pub fn check_type(&self, mime: &str, kind: MediaKind) -> Result<(), ValidationError> {
        if self.policy(kind).allows(mime) {
            Ok(())
        } else {
            Err(ValidationError::UnsupportedType {
                kind,
                mime: essence(mime),
            })
        }
    }

    /// Check only the payload length.
    pub fn check_size(&self, size: u64, kind: MediaKind) -> Result<(), ValidationError> {
        let max = self.policy(kind).max_bytes;
        if size == 0 || size > max {
            return Err(ValidationError::SizeOutOfBounds { kind, size, max });
        }
        Ok(())
    }

    /// Run every rule of `kind` against a decoded payload.
    pub fn validate(&self, mime: &str, bytes: &[u8], kind: MediaKind) -> Result<(), ValidationError> {
        self.check_type(mime, kind)?;
        self.check_size(bytes.len() as u64, kind)?;

        if kind == MediaKind::Image
            && let Some(min_short_side) = self.image.min_short_side_px
        {
            let dims = sniff(bytes, mime).ok_or_else(|| ValidationError::FormatUnrecognized {
                mime: essence(mime),
            })?;
            if dims.short_side() < min_short_side {
                return Err(ValidationError::ResolutionTooLow {
                    width: dims.width,
                    height: dims.height,
                    min_short_side,
                });
            }
        }

        Ok(())
    }
}
