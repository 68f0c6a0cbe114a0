//! Object key construction and the key <-> public URL mapping.

use crate::error::{StorageError, StorageResult};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rand::Rng;
use url::Url;

/// Characters left unescaped in a URL path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Check that `key` is a relative, slash-separated path with no empty, `.`
/// or `..` segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path segment: {key}"
        )));
    }
    Ok(())
}

/// Append a random suffix to the last segment of `path`, before its
/// extension: `a/b/1700-photo.png` -> `a/b/1700-photo-3f9c0a12.png`.
pub fn suffixed_key(path: &str) -> StorageResult<String> {
    let path = path.trim_matches('/');
    validate_key(path)?;

    let suffix = format!("{:08x}", rand::rng().random::<u32>());
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}-{suffix}.{ext}")
        }
        _ => format!("{name}-{suffix}"),
    };
    Ok(match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name,
    })
}

/// Base URL under which a store publishes its objects.
#[derive(Clone, Debug)]
pub struct PublicBase {
    base: Url,
}

impl PublicBase {
    pub fn parse(base: &str) -> StorageResult<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| StorageError::Config(format!("invalid public_base_url {base}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(StorageError::Config(format!(
                "public_base_url must be an absolute http(s) URL: {base}"
            )));
        }
        base.set_query(None);
        base.set_fragment(None);
        let path = base.path().trim_end_matches('/').to_string();
        base.set_path(&path);
        Ok(Self { base })
    }

    pub fn host(&self) -> Option<&str> {
        self.base.host_str()
    }

    /// Public URL of `key`.
    pub fn url_for(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        let root = self.base.as_str().trim_end_matches('/');
        format!("{root}/{}", encoded.join("/"))
    }

    /// Object key behind `url`, or `None` when the URL is not under this base.
    pub fn key_for(&self, url: &str) -> Option<String> {
        let url = Url::parse(url.trim()).ok()?;
        if url.scheme() != self.base.scheme()
            || url.host_str() != self.base.host_str()
            || url.port_or_known_default() != self.base.port_or_known_default()
        {
            return None;
        }

        let root = self.base.path().trim_end_matches('/');
        let rest = url.path().strip_prefix(root)?.strip_prefix('/')?;
        let key = percent_decode_str(rest).decode_utf8().ok()?.into_owned();
        validate_key(&key).ok()?;
        Some(key)
    }
}
