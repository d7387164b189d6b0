//! Provider connection settings: explicit values first, `GITLAB_*` environment variables second.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4/";
const API_PATH: &str = "api/v4/";

fn request_timeout() -> Duration {
    let secs = std::env::var("TANUKI_HTTP_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(60);
    Duration::from_secs(secs)
}

/// Settings as an operator writes them. Every field may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub insecure: Option<bool>,
    #[serde(default)]
    pub cacert_file: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub early_auth_check: Option<bool>,
}

/// Validated settings used to build a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub token: String,
    pub base_url: reqwest::Url,
    pub insecure: bool,
    pub cacert_file: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub early_auth_check: bool,
    pub timeout: Duration,
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{}: expected a boolean, got {:?}", name, other)),
    }
}

impl ProviderConfig {
    /// Fill unset fields from the process environment.
    pub fn with_env_fallbacks(self) -> Result<Self> { self.with_fallbacks_from(|k| std::env::var(k).ok()) }

    pub fn with_fallbacks_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if self.token.is_none() { self.token = lookup("GITLAB_TOKEN"); }
        if self.base_url.is_none() { self.base_url = lookup("GITLAB_BASE_URL"); }
        if self.cacert_file.is_none() { self.cacert_file = lookup("GITLAB_CACERT_FILE"); }
        if self.client_cert.is_none() { self.client_cert = lookup("GITLAB_CLIENT_CERT"); }
        if self.client_key.is_none() { self.client_key = lookup("GITLAB_CLIENT_KEY"); }
        if self.insecure.is_none() {
            self.insecure = lookup("GITLAB_INSECURE").map(|v| parse_flag("GITLAB_INSECURE", &v)).transpose()?;
        }
        if self.early_auth_check.is_none() {
            self.early_auth_check = lookup("GITLAB_EARLY_AUTH_CHECK").map(|v| parse_flag("GITLAB_EARLY_AUTH_CHECK", &v)).transpose()?;
        }
        Ok(self)
    }

    pub fn resolve(self) -> Result<ClientConfig> {
        let token = self.token.filter(|t| !t.trim().is_empty()).ok_or_else(|| anyhow!("token is required (set `token` or GITLAB_TOKEN)"))?;
        let base_url = normalize_base_url(self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;
        if self.client_cert.is_some() != self.client_key.is_some() {
            bail!("client_cert and client_key must be set together");
        }
        Ok(ClientConfig {
            token,
            base_url,
            insecure: self.insecure.unwrap_or(false),
            cacert_file: self.cacert_file.filter(|s| !s.is_empty()),
            client_cert: self.client_cert,
            client_key: self.client_key,
            early_auth_check: self.early_auth_check.unwrap_or(true),
            timeout: request_timeout(),
        })
    }
}

/// Ensure a trailing slash and the `api/v4/` suffix; v3 endpoints are refused.
pub fn normalize_base_url(raw: &str) -> Result<reqwest::Url> {
    let mut s = raw.trim().to_string();
    if !s.ends_with('/') { s.push('/'); }
    if s.ends_with("/api/v3/") {
        bail!("base_url {:?} points at the GitLab v3 API, which is no longer supported; use /api/v4", raw);
    }
    if !s.ends_with(API_PATH) { s.push_str(API_PATH); }
    let url = reqwest::Url::parse(&s).with_context(|| format!("parsing base_url {:?}", raw))?;
    if url.cannot_be_a_base() { bail!("base_url {:?} cannot be used as a base", raw); }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(normalize_base_url("https://git.example.com").unwrap().as_str(), "https://git.example.com/api/v4/");
        assert_eq!(normalize_base_url("https://git.example.com/api/v4").unwrap().as_str(), "https://git.example.com/api/v4/");
        assert_eq!(normalize_base_url("https://h/gitlab/api/v4/").unwrap().as_str(), "https://h/gitlab/api/v4/");
        assert!(normalize_base_url("https://h/api/v3").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn explicit_values_win_over_environment() {
        let env: HashMap<&str, &str> = [("GITLAB_TOKEN", "env-token"), ("GITLAB_BASE_URL", "https://env.example.com"), ("GITLAB_INSECURE", "true")].into_iter().collect();
        let cfg = ProviderConfig { token: Some("explicit".into()), ..Default::default() }
            .with_fallbacks_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(cfg.token, "explicit");
        assert_eq!(cfg.base_url.as_str(), "https://env.example.com/api/v4/");
        assert!(cfg.insecure);
        assert!(cfg.early_auth_check);
    }

    #[test]
    fn missing_token_and_bad_flags_are_rejected() {
        assert!(ProviderConfig::default().with_fallbacks_from(|_| None).unwrap().resolve().is_err());
        let err = ProviderConfig::default().with_fallbacks_from(|k| (k == "GITLAB_INSECURE").then(|| "maybe".to_string())).unwrap_err();
        assert!(err.to_string().contains("GITLAB_INSECURE"));
        let half = ProviderConfig { token: Some("t".into()), client_cert: Some("c.pem".into()), ..Default::default() };
        assert!(half.resolve().is_err());
    }
}
