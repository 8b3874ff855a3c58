use crate::error::{RailError, Result};

pub const DEFAULT_BASE_URL: &str = "https://testrail.example.net";
pub const DEFAULT_PROJECT_ID: i64 = 5;

/// Platforms a run is created for when none are requested explicitly.
pub const DEFAULT_PLATFORMS: &[&str] = &["xenial", "centos7"];

const ARTIFACTS_HOST: &str = "artifacts.example.net/builds";
const ARTIFACTS_HOST_OLD: &str = "artifacts-old.example.net/builds";
const ARTIFACTS_INTERNAL_URL: &str = "http://artifacts/builds/";

pub const URL_ARTIFACTS_PUBLIC: &str = "https://artifacts.example.net/builds/";

/// Explicit process configuration, built once at startup and passed by
/// reference to every component. Backend credentials are required; artifact
/// credentials fall back to the unauthenticated internal mirror.
#[derive(Debug, Clone)]
pub struct RailConfig {
    pub base_url: String,
    pub login: String,
    pub key: String,
    pub project_id: i64,
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone)]
pub struct ArtifactsConfig {
    pub url: String,
    pub url_old: String,
    pub public_url: String,
}

impl RailConfig {
    pub fn from_env() -> Result<Self> {
        let login = read_non_empty_env("TESTRAIL_LOGIN")
            .ok_or_else(|| RailError::Credentials("TESTRAIL_LOGIN is not set".to_string()))?;
        let key = read_non_empty_env("TESTRAIL_KEY")
            .ok_or_else(|| RailError::Credentials("TESTRAIL_KEY is not set".to_string()))?;

        Ok(Self {
            base_url: read_non_empty_env("TESTRAIL_URL")
                .map(|url| normalize_base_url(&url))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            login,
            key,
            project_id: read_env_i64("TESTRAIL_PROJECT_ID").unwrap_or(DEFAULT_PROJECT_ID),
            artifacts: ArtifactsConfig::from_env(),
        })
    }
}

impl ArtifactsConfig {
    pub fn from_env() -> Self {
        let credentials = match (
            read_non_empty_env("ARTIFACTS_LOGIN"),
            read_non_empty_env("ARTIFACTS_PWD"),
        ) {
            (Some(login), Some(pwd)) => Some(format!("{login}:{pwd}")),
            _ => None,
        };

        match credentials {
            Some(creds) => Self {
                url: format!("https://{creds}@{ARTIFACTS_HOST}/"),
                url_old: format!("https://{creds}@{ARTIFACTS_HOST_OLD}/"),
                public_url: URL_ARTIFACTS_PUBLIC.to_string(),
            },
            None => Self {
                url: ARTIFACTS_INTERNAL_URL.to_string(),
                url_old: ARTIFACTS_INTERNAL_URL.to_string(),
                public_url: URL_ARTIFACTS_PUBLIC.to_string(),
            },
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[must_use]
fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
fn read_env_i64(name: &str) -> Option<i64> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(
            normalize_base_url("https://testrail.example.net/"),
            "https://testrail.example.net"
        );
    }

    #[test]
    fn artifacts_config_without_credentials_uses_internal_url() {
        let config = ArtifactsConfig {
            url: ARTIFACTS_INTERNAL_URL.to_string(),
            url_old: ARTIFACTS_INTERNAL_URL.to_string(),
            public_url: URL_ARTIFACTS_PUBLIC.to_string(),
        };
        assert!(config.url.starts_with("http://"));
        assert_eq!(config.url, config.url_old);
    }
}
