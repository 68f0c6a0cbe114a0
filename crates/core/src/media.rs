//! Media references carried by sheet fields.
//!
//! A media-bearing field holds either an embedded `data:` payload that still
//! needs to be uploaded, or an http(s) URL that points at an already hosted
//! object. [`MediaSource::parse`] tells the two apart.

use crate::validate::ValidationError;
use base64::Engine as _;
use base64::engine::general_purpose;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

/// Maximum length kept from a client file name when building object keys.
const MAX_FILE_NAME_LEN: usize = 100;

/// Role of a media field. Each kind is validated against its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Product and promotional images.
    Image,
    /// Documents and other files attached to a sheet or product.
    Attachment,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased mime type without parameters (`image/PNG; q=1` -> `image/png`).
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decoded contents of a `data:` URI.
#[derive(Clone, PartialEq, Eq)]
pub struct DataPayload {
    pub mime: String,
    pub bytes: Bytes,
}

impl fmt::Debug for DataPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl DataPayload {
    /// Parse `data:<mime>[;param]*[;base64],<data>`.
    pub fn parse(uri: &str) -> Result<Self, ValidationError> {
        let rest = strip_prefix_ignore_case(uri.trim(), "data:")
            .ok_or_else(|| ValidationError::MalformedPayload("missing data: scheme".to_string()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| ValidationError::MalformedPayload("missing ',' separator".to_string()))?;

        let mut params = header.split(';');
        let declared = params.next().unwrap_or_default();
        let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        // RFC 2397 default media type.
        let mime = if declared.trim().is_empty() {
            "text/plain".to_string()
        } else {
            essence(declared)
        };

        let bytes = if is_base64 {
            let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| ValidationError::MalformedPayload(format!("invalid base64: {e}")))?
        } else {
            percent_decode_str(data).collect::<Vec<u8>>()
        };

        Ok(Self {
            mime,
            bytes: Bytes::from(bytes),
        })
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

/// A media field value as submitted by a client.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Embedded payload awaiting upload.
    Embedded(DataPayload),
    /// Already hosted object.
    Hosted(Url),
}

impl MediaSource {
    /// Classify a field value.
    ///
    /// Anything that is neither a decodable data payload nor an absolute
    /// http(s) URL is rejected.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if is_data_uri(trimmed) {
            return DataPayload::parse(trimmed).map(Self::Embedded);
        }

        let url = Url::parse(trimmed)
            .map_err(|_| ValidationError::DisallowedSource(truncate_for_display(trimmed)))?;
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(Self::Hosted(url)),
            _ => Err(ValidationError::DisallowedSource(truncate_for_display(
                trimmed,
            ))),
        }
    }
}

/// Whether a field value is an embedded data payload.
pub fn is_data_uri(value: &str) -> bool {
    strip_prefix_ignore_case(value.trim_start(), "data:").is_some()
}

/// Keep error messages bounded when clients send huge strings.
fn truncate_for_display(value: &str) -> String {
    const MAX: usize = 120;
    if value.len() <= MAX {
        return value.to_string();
    }
    let mut end = MAX;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

/// Longest extension kept apart from the stem.
const MAX_EXTENSION_LEN: usize = 10;

/// Reduce a client file name to a safe object-key segment.
///
/// ASCII alphanumerics, `.`, `-` and `_` survive; runs of anything else become
/// a single `_`. Leading dots are dropped so keys never name hidden files. An
/// alphanumeric extension is kept even when nothing of the stem survives, so
/// `商品画像.png` becomes `file.png`.
pub fn sanitize_file_name(name: &str) -> String {
    let name = name.trim();
    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext))
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    };

    let budget = match extension {
        Some(ext) => MAX_FILE_NAME_LEN - ext.len() - 1,
        None => MAX_FILE_NAME_LEN,
    };
    let mut result: String = sanitize_stem(stem).chars().take(budget).collect();
    if result.is_empty() || result.chars().all(|c| c == '.') {
        result = "file".to_string();
    }
    if let Some(ext) = extension {
        result.push('.');
        result.push_str(ext);
    }
    result
}

fn sanitize_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len().min(MAX_FILE_NAME_LEN));
    let mut last_was_replacement = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            out.push(ch);
            last_was_replacement = false;
        } else if !last_was_replacement {
            out.push('_');
            last_was_replacement = true;
        }
    }
    out.trim_start_matches(['.', '_'])
        .trim_end_matches('_')
        .to_string()
}

/// Conventional file extension for a mime type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match essence(mime).as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" | "image/x-ms-bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/tiff" => "tiff",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        _ => "bin",
    }
}
