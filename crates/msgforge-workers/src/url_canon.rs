//! URL canonicalization and the SSRF guard (§4.8 steps 2-3). Canonicalization happens
//! first so the dedup key and the guard both see the same normalized form.

use msgforge_core::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use url::Url;

static TRACKING_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(utm_|gclid$)").unwrap());

/// Lowercases the host, punycode-encodes it, strips `utm_*`/`gclid` query params and a
/// trailing `/`, decodes percent-escapes, and collapses `m.`/`amp.` mobile mirrors to the
/// bare host (§4.8 step 2).
pub fn canonicalize(raw: &str) -> Result<String, PipelineError> {
    let mut url = Url::parse(raw).map_err(|e| PipelineError::permanent_input(format!("unparseable url: {e}")))?;

    let host = url.host_str().ok_or_else(|| PipelineError::permanent_input("url has no host"))?;
    let lowered = host.to_ascii_lowercase();
    let punycoded = idna::domain_to_ascii(&lowered).map_err(|e| PipelineError::permanent_input(format!("idna: {e:?}")))?;
    let collapsed = collapse_mobile_mirror(&punycoded);
    url.set_host(Some(&collapsed)).map_err(|e| PipelineError::permanent_input(format!("set_host: {e}")))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAM.is_match(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&kept);
    }

    let decoded_path = percent_decode(url.path());
    url.set_path(&decoded_path);

    let mut out = url.to_string();
    if out.ends_with('/') && url.path() == "/" && url.query().is_none() {
        out.pop();
    } else if out.ends_with('/') && !url.path().is_empty() && url.path() != "/" {
        out.pop();
    }
    Ok(out)
}

fn collapse_mobile_mirror(host: &str) -> String {
    for prefix in ["m.", "amp."] {
        if let Some(stripped) = host.strip_prefix(prefix) {
            return stripped.to_string();
        }
    }
    host.to_string()
}

fn percent_decode(path: &str) -> String {
    percent_encoding_decode(path)
}

/// Minimal percent-decoder: the canonical form strips `%`-escapes from the path so two
/// URLs that differ only in escaping dedup to the same key (§4.8 step 2).
fn percent_encoding_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, Clone, Default)]
pub struct SsrfGuardConfig {
    pub allow_hosts: Vec<String>,
    pub deny_hosts: Vec<String>,
}

/// Rejects non-`http(s)` schemes, localhost, loopback/private/link-local addresses, and
/// anything on the explicit deny list; an explicit allow list (if non-empty) must also
/// match (§4.8 step 3).
pub fn guard(canonical_url: &str, config: &SsrfGuardConfig) -> Result<(), PipelineError> {
    let url = Url::parse(canonical_url).map_err(|e| PipelineError::permanent_input(format!("unparseable url: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PipelineError::policy_denied("ssrf_denied: non-http(s) scheme"));
    }

    let host = url.host_str().ok_or_else(|| PipelineError::policy_denied("ssrf_denied: no host"))?;

    if config.deny_hosts.iter().any(|d| host.eq_ignore_ascii_case(d)) {
        return Err(PipelineError::policy_denied("ssrf_denied: host on deny list"));
    }
    if !config.allow_hosts.is_empty() && !config.allow_hosts.iter().any(|a| host.eq_ignore_ascii_case(a)) {
        return Err(PipelineError::policy_denied("ssrf_denied: host not on allow list"));
    }

    if host == "localhost" {
        return Err(PipelineError::policy_denied("ssrf_denied: localhost"));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(PipelineError::policy_denied("ssrf_denied: private/loopback/link-local address"));
        }
    }

    Ok(())
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_utm_params_and_trailing_slash() {
        let out = canonicalize("https://Example.com/path/?utm_source=x&keep=1").unwrap();
        assert_eq!(out, "https://example.com/path?keep=1");
    }

    #[test]
    fn canonicalize_collapses_mobile_mirror() {
        let out = canonicalize("https://m.example.com/a").unwrap();
        assert_eq!(out, "https://example.com/a");
    }

    #[test]
    fn guard_rejects_loopback() {
        let err = guard("http://127.0.0.1/admin", &SsrfGuardConfig::default());
        assert!(matches!(err, Err(PipelineError::PolicyDenied { .. })));
    }

    #[test]
    fn guard_rejects_private_range() {
        let err = guard("http://10.1.2.3/", &SsrfGuardConfig::default());
        assert!(matches!(err, Err(PipelineError::PolicyDenied { .. })));
    }

    #[test]
    fn guard_rejects_non_http_scheme() {
        let err = guard("ftp://example.com/file", &SsrfGuardConfig::default());
        assert!(matches!(err, Err(PipelineError::PolicyDenied { .. })));
    }

    #[test]
    fn guard_allows_public_https() {
        assert!(guard("https://example.com/page", &SsrfGuardConfig::default()).is_ok());
    }
}
