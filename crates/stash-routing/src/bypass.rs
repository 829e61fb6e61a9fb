//! Bypass hosts
//!
//! Resources from these domains (and their subdomains) are never rewritten
//! to the capture backend, e.g. video CDNs that must stream live.

use std::collections::HashSet;
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct BypassHosts {
    hosts: HashSet<String>,
}

impl BypassHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bypass = Self::default();
        bypass.set_hosts(hosts);
        bypass
    }

    pub fn set_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hosts = hosts
            .into_iter()
            .filter_map(|h| normalize_host(h.as_ref()))
            .collect();
    }

    pub fn insert(&mut self, host: &str) -> bool {
        match normalize_host(host) {
            Some(host) => self.hosts.insert(host),
            None => false,
        }
    }

    pub fn remove(&mut self, host: &str) -> bool {
        normalize_host(host).is_some_and(|h| self.hosts.remove(&h))
    }

    /// Sorted, for persisting and display.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.iter().cloned().collect();
        hosts.sort();
        hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// True if the host of `url`, or any parent domain of it, is listed.
    /// Walks from the full hostname toward the top-level domain.
    pub fn matches(&self, url: &str) -> bool {
        if self.hosts.is_empty() {
            return false;
        }

        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();

        let mut candidate = host.as_str();
        loop {
            if self.hosts.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return false,
            }
        }
    }
}

fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_start_matches('.').trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}
