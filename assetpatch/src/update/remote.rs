//! Remote endpoints of a package.

use std::sync::atomic::{AtomicU64, Ordering};

/// Main and fallback base URLs plus a request counter.
///
/// Manifest-level requests alternate between the two hosts per call.
#[derive(Debug, Default)]
pub struct RemoteServices {
    main_url: String,
    fallback_url: String,
    request_count: AtomicU64,
}

impl Clone for RemoteServices {
    fn clone(&self) -> Self {
        Self {
            main_url: self.main_url.clone(),
            fallback_url: self.fallback_url.clone(),
            request_count: AtomicU64::new(self.request_count.load(Ordering::SeqCst)),
        }
    }
}

impl RemoteServices {
    /// Create services; an empty fallback reuses the main URL.
    pub fn new(main_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        let main_url = trim_base(main_url.into());
        let fallback_url = trim_base(fallback_url.into());
        let fallback_url = if fallback_url.is_empty() {
            main_url.clone()
        } else {
            fallback_url
        };
        Self {
            main_url,
            fallback_url,
            request_count: AtomicU64::new(0),
        }
    }

    pub fn main_url(&self) -> &str {
        &self.main_url
    }

    pub fn fallback_url(&self) -> &str {
        &self.fallback_url
    }

    pub fn main_file_url(&self, file_name: &str) -> String {
        join_url(&self.main_url, file_name)
    }

    pub fn fallback_file_url(&self, file_name: &str) -> String {
        join_url(&self.fallback_url, file_name)
    }

    /// URL for the next manifest-level request, alternating hosts.
    pub fn request_url(&self, file_name: &str) -> String {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count % 2 == 0 {
            self.fallback_file_url(file_name)
        } else {
            self.main_file_url(file_name)
        }
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn join_url(base: &str, file_name: &str) -> String {
    if base.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", base, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_alternates() {
        let remote = RemoteServices::new("http://main/cdn/", "http://backup/cdn");
        assert_eq!(remote.request_url("a.version"), "http://main/cdn/a.version");
        assert_eq!(remote.request_url("a.version"), "http://backup/cdn/a.version");
        assert_eq!(remote.request_url("a.version"), "http://main/cdn/a.version");
    }

    #[test]
    fn test_empty_fallback_uses_main() {
        let remote = RemoteServices::new("http://main", "");
        assert_eq!(remote.fallback_file_url("x"), "http://main/x");
    }

    #[test]
    fn test_clone_keeps_counter_separate() {
        let remote = RemoteServices::new("http://m", "http://f");
        remote.request_url("x");
        let copy = remote.clone();
        assert_eq!(copy.request_url("x"), "http://f/x");
        assert_eq!(remote.request_url("x"), "http://f/x");
    }
}
