//! Host allowlist for already-hosted media URLs.

use url::Url;

/// Decides which hosts a sheet may reference and which hosts this system
/// manages (and may therefore delete from).
#[derive(Clone, Debug, Default)]
pub struct HostAllowlist {
    allowed_hosts: Vec<String>,
    managed_domain_suffix: Option<String>,
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl HostAllowlist {
    pub fn new(
        allowed_hosts: impl IntoIterator<Item = impl AsRef<str>>,
        managed_domain_suffix: Option<&str>,
    ) -> Self {
        let allowed_hosts = allowed_hosts
            .into_iter()
            .map(|h| normalize_host(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        let managed_domain_suffix = managed_domain_suffix
            .map(|s| normalize_host(s).trim_start_matches('.').to_string())
            .filter(|s| !s.is_empty());
        Self {
            allowed_hosts,
            managed_domain_suffix,
        }
    }

    /// Whether `host` sits on the managed storage domain (the suffix itself or
    /// any subdomain of it).
    pub fn is_managed_host(&self, host: &str) -> bool {
        let Some(suffix) = &self.managed_domain_suffix else {
            return false;
        };
        let host = normalize_host(host);
        host == *suffix
            || host
                .strip_suffix(suffix.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }

    pub fn is_allowed_host(&self, host: &str) -> bool {
        let normalized = normalize_host(host);
        self.allowed_hosts.iter().any(|h| *h == normalized) || self.is_managed_host(host)
    }

    /// http(s) URL whose host is allowed.
    pub fn allows_url(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|h| self.is_allowed_host(h))
    }

    /// http(s) URL string on the managed domain.
    pub fn is_managed_url(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| {
            matches!(u.scheme(), "http" | "https")
                && u.host_str().is_some_and(|h| self.is_managed_host(h))
        })
    }
}
