// src/core/target.rs

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::{debug, info, warn};
use url::{Host, Url};

/// The three forms of a user-supplied target the launch path needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Bare host or IP, suitable for a port scanner.
    pub host: String,
    /// Fully qualified URL for web-layer tools.
    pub url: Option<String>,
    /// Forward-resolved address, when resolution succeeded.
    pub ip: Option<IpAddr>,
}

impl ResolvedTarget {
    /// The argument handed to the external scanner. An IP is preferred since
    /// port scanners behave more predictably against addresses.
    pub fn scan_target(&self) -> String {
        self.ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| self.host.clone())
    }
}

/// Normalizes, builds the URL form of and resolves `raw` in one pass.
///
/// Returns `None` only when `raw` is blank.
pub async fn resolve(raw: &str) -> Option<ResolvedTarget> {
    let host = normalize(raw)?;
    let url = build_url(raw);
    let ip = resolve_ip(&host).await;
    Some(ResolvedTarget { host, url, ip })
}

/// Reduces a target to its host component.
///
/// Inputs without a scheme are parsed as if they were `http://` URLs. When no
/// host can be extracted the trimmed input is returned as-is.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let host = Url::parse(&candidate).ok().and_then(|url| match url.host() {
        // `Host`'s Display wraps IPv6 in brackets; scanners want the bare address.
        Some(Host::Ipv6(addr)) => Some(addr.to_string()),
        Some(host) => Some(host.to_string()),
        None => None,
    });

    match host {
        Some(h) if !h.is_empty() => Some(h),
        _ => {
            debug!(target = trimmed, "No host component found, keeping input as-is.");
            Some(trimmed.to_string())
        }
    }
}

/// Builds the `scheme://authority/path` form of a target for web tools.
///
/// The authority and path are taken verbatim from the input; the parser is
/// only used to check that the input is a URL with a host.
pub fn build_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return Some(format!("http://{trimmed}"));
    };

    match Url::parse(trimmed) {
        Ok(url) if url.has_authority() && url.host().is_some() => {
            // Query and fragment are not part of the address.
            let address = rest.split(['?', '#']).next().unwrap_or(rest);
            Some(format!("{scheme}://{address}"))
        }
        _ if trimmed.starts_with("http") => Some(trimmed.to_string()),
        _ => Some(format!("http://{trimmed}")),
    }
}

/// Forward-resolves `host` to its first address.
///
/// Failures are logged and reported as `None`; callers fall back to the
/// hostname, which downstream scanners accept directly.
pub async fn resolve_ip(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Some(ip);
    }

    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(e) => {
            debug!(error = %e, "System resolver configuration unavailable, using defaults.");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        }
    };

    match resolver.lookup_ip(host).await {
        Ok(lookup) => {
            let ip = lookup.iter().next();
            match ip {
                Some(addr) => info!(host, ip = %addr, "Resolved target host."),
                None => warn!(host, "Lookup returned no addresses."),
            }
            ip
        }
        Err(e) => {
            warn!(host, error = %e, "Unable to resolve host to IP.");
            None
        }
    }
}
