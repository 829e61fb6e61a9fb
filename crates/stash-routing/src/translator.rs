//! URL Translator
//!
//! Two address forms exist for every captured page:
//!
//! ```text
//! original:  https://example.com/a?b
//! local:     http://127.0.0.1:9000/a?b                      (same origin)
//!            http://127.0.0.1:9000/https://cdn.net/x.js     (embedded resource)
//! ```
//!
//! Both directions are total: anything that cannot be translated is returned
//! unchanged.

use url::Url;

use crate::recent::RecentSessions;

pub const DEFAULT_LOCAL_HOSTS: &[&str] = &["127.0.0.1", "localhost", "[::1]"];

#[derive(Debug, Clone)]
pub struct UrlTranslator {
    local_hosts: Vec<String>,
}

impl UrlTranslator {
    pub fn new<I, S>(local_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local_hosts: local_hosts
                .into_iter()
                .map(|h| h.into().to_lowercase())
                .collect(),
        }
    }

    /// True for http(s) addresses served from a loopback host.
    pub fn is_local(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        parsed
            .host_str()
            .is_some_and(|host| self.local_hosts.iter().any(|h| h == host))
    }

    /// Rewrite `url` to be served from `local_url`'s origin.
    ///
    /// Same-origin addresses (relative to `original_url`) keep their path and
    /// query; anything else is embedded as an absolute address. Addresses
    /// already in local form are returned as is, so the rewrite is idempotent.
    pub fn to_local(&self, url: &str, original_url: &str, local_url: &str) -> String {
        let Some(local_origin) = origin_of(local_url) else {
            return url.to_string();
        };

        let target = collapse_embedded(url, &local_origin);
        let Ok(parsed) = Url::parse(target) else {
            return url.to_string();
        };

        let target_origin = parsed.origin().ascii_serialization();
        if target_origin == local_origin {
            return parsed.to_string();
        }

        if origin_of(original_url).as_deref() == Some(target_origin.as_str()) {
            format!("{}{}", local_origin, path_and_query(&parsed))
        } else {
            format!("{}/{}", local_origin, parsed)
        }
    }

    /// Map a local address back to its original form using the recent
    /// session log. Non-local or unknown addresses are returned unchanged.
    pub fn to_original(&self, url: &str, recent: &RecentSessions) -> String {
        if !self.is_local(url) {
            return url.to_string();
        }

        for entry in recent.entries() {
            let Some(rest) = strip_origin(url, &entry.local_origin) else {
                continue;
            };

            if let Some(embedded) = rest.strip_prefix('/').filter(|r| is_absolute_http(r)) {
                return collapse_embedded(embedded, &entry.local_origin).to_string();
            }

            let Some(origin) = entry.origin() else {
                continue;
            };
            return format!("{}{}", origin, rest);
        }

        url.to_string()
    }
}

impl Default for UrlTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_HOSTS.iter().copied())
    }
}

/// `scheme://host[:port]` of an absolute address.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Peel off `local_origin/` prefixes that wrap another absolute address.
fn collapse_embedded<'a>(url: &'a str, local_origin: &str) -> &'a str {
    let mut current = url;
    while let Some(inner) = current
        .strip_prefix(local_origin)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| is_absolute_http(rest))
    {
        current = inner;
    }
    current
}

/// The remainder of `url` after `origin`, if `origin` ends on a boundary.
fn strip_origin<'a>(url: &'a str, origin: &str) -> Option<&'a str> {
    let rest = url.strip_prefix(origin)?;
    match rest.chars().next() {
        None | Some('/') | Some('?') | Some('#') => Some(rest),
        _ => None,
    }
}

fn is_absolute_http(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recent::RecentSessionEntry;
    use stash_storage::Database;

    const ORIGINAL: &str = "https://example.com/";
    const LOCAL: &str = "http://127.0.0.1:9000";

    fn recent_with(entries: &[RecentSessionEntry]) -> RecentSessions {
        let recent = RecentSessions::load(Database::open_in_memory().unwrap()).unwrap();
        for entry in entries.iter().rev() {
            recent.record(entry.clone()).unwrap();
        }
        recent
    }

    #[test]
    fn test_is_local() {
        let translator = UrlTranslator::default();
        assert!(translator.is_local("http://127.0.0.1:9000/a"));
        assert!(translator.is_local("http://localhost:8080"));
        assert!(translator.is_local("http://[::1]:9000/"));
        assert!(!translator.is_local("https://example.com/"));
        assert!(!translator.is_local("file:///tmp/x"));
        assert!(!translator.is_local("garbage"));
    }

    #[test]
    fn test_to_local_same_origin_keeps_path_and_query() {
        let translator = UrlTranslator::default();
        assert_eq!(
            translator.to_local("https://example.com/a/b?c=1#frag", ORIGINAL, LOCAL),
            "http://127.0.0.1:9000/a/b?c=1"
        );
    }

    #[test]
    fn test_to_local_cross_origin_embeds() {
        let translator = UrlTranslator::default();
        assert_eq!(
            translator.to_local("https://cdn.net/x.js", ORIGINAL, LOCAL),
            "http://127.0.0.1:9000/https://cdn.net/x.js"
        );
    }

    #[test]
    fn test_to_local_is_idempotent() {
        let translator = UrlTranslator::default();
        for url in [
            "https://example.com/",
            "https://example.com/a?b=c",
            "https://cdn.net/x.js?v=2",
            "http://other.org/",
        ] {
            let once = translator.to_local(url, ORIGINAL, LOCAL);
            let twice = translator.to_local(&once, ORIGINAL, LOCAL);
            assert_eq!(once, twice, "rewriting {url} twice changed it");
        }
    }

    #[test]
    fn test_to_local_collapses_nested_patches() {
        let translator = UrlTranslator::default();
        let nested = "http://127.0.0.1:9000/http://127.0.0.1:9000/https://cdn.net/x.js";
        assert_eq!(
            translator.to_local(nested, ORIGINAL, LOCAL),
            "http://127.0.0.1:9000/https://cdn.net/x.js"
        );
    }

    #[test]
    fn test_to_local_unparseable_is_unchanged() {
        let translator = UrlTranslator::default();
        assert_eq!(translator.to_local("::", ORIGINAL, LOCAL), "::");
        assert_eq!(
            translator.to_local("https://example.com/a", ORIGINAL, "nope"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_to_original_roundtrip() {
        let translator = UrlTranslator::default();
        let recent = recent_with(&[RecentSessionEntry::new(LOCAL, ORIGINAL, None)]);

        for url in ["https://example.com/a?b=c", "https://example.com/"] {
            let local = translator.to_local(url, ORIGINAL, LOCAL);
            assert_eq!(translator.to_original(&local, &recent), url);
        }

        let embedded = translator.to_local("https://cdn.net/x.js", ORIGINAL, LOCAL);
        assert_eq!(
            translator.to_original(&embedded, &recent),
            "https://cdn.net/x.js"
        );
    }

    #[test]
    fn test_to_original_uses_redirected_origin() {
        let translator = UrlTranslator::default();
        let recent = recent_with(&[RecentSessionEntry::new(
            LOCAL,
            "http://example.com/",
            Some("https://www.example.com".to_string()),
        )]);

        assert_eq!(
            translator.to_original("http://127.0.0.1:9000/a", &recent),
            "https://www.example.com/a"
        );
    }

    #[test]
    fn test_to_original_requires_origin_boundary() {
        let translator = UrlTranslator::default();
        let recent = recent_with(&[RecentSessionEntry::new(
            "http://127.0.0.1:900",
            ORIGINAL,
            None,
        )]);

        assert_eq!(
            translator.to_original("http://127.0.0.1:9000/a", &recent),
            "http://127.0.0.1:9000/a"
        );
    }

    #[test]
    fn test_to_original_leaves_unknown_addresses() {
        let translator = UrlTranslator::default();
        let recent = recent_with(&[]);

        assert_eq!(
            translator.to_original("http://127.0.0.1:9000/a", &recent),
            "http://127.0.0.1:9000/a"
        );
        assert_eq!(
            translator.to_original("https://example.com/a", &recent),
            "https://example.com/a"
        );
    }
}
