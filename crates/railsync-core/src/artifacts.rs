use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

use crate::error::{RailError, Result};

/// Mirror an artifact's report tree into a temp directory with the
/// external `wget` tool. The caller feeds the directory to report
/// discovery; the directory lives as long as the returned handle.
pub fn fetch_reports(artifacts_url: &str, artifact: &str) -> Result<TempDir> {
    let url = format!("{artifacts_url}{artifact}/");
    let dir = TempDir::new()?;
    info!("fetching reports from {url}");

    let status = Command::new("wget")
        .args(["--tries=50", "-l", "10", "-r", "-P"])
        .arg(dir.path())
        .args(["--progress=dot:mega", "--accept=*.xml,report.json"])
        .arg(&url)
        .status()
        .map_err(|err| RailError::ArtifactFetch(format!("wget not runnable: {err}")))?;
    info!("wget exit: {status}");

    Ok(dir)
}

/// Resolve the related (premerge) artifact name for a postmerge build, if
/// the artifact store exposes one.
pub fn related_artifact(artifacts_url: &str, artifact: &str) -> Result<Option<String>> {
    let url = format!("{artifacts_url}{artifact}/.related_artifacts/");
    let dir = TempDir::new()?;
    info!("fetching related artifacts index from {url}");

    let status = Command::new("wget")
        .args(["--tries=50", "-l", "3", "-r", "-P"])
        .arg(dir.path())
        .args(["--progress=dot:mega"])
        .arg(&url)
        .status()
        .map_err(|err| RailError::ArtifactFetch(format!("wget not runnable: {err}")))?;
    info!("wget exit: {status}");

    for entry in WalkDir::new(dir.path()).into_iter().flatten() {
        if entry.file_type().is_file() && entry.file_name() == "index.html" {
            let content = std::fs::read_to_string(entry.path())?;
            return Ok(parse_index(&content));
        }
    }
    Ok(None)
}

/// Pull the linked artifact name out of the store's index listing.
pub(crate) fn parse_index(content: &str) -> Option<String> {
    static HREF_RE: OnceLock<Regex> = OnceLock::new();
    let re = HREF_RE.get_or_init(|| {
        Regex::new(r#"href="\./(.*?)">"#).expect("href pattern compiles")
    });
    re.captures(content)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_href_is_extracted() {
        let html = r#"<html><body><a href="./staging-7.1.0.pre-merge.00012345">link</a></body></html>"#;
        assert_eq!(
            parse_index(html),
            Some("staging-7.1.0.pre-merge.00012345".to_string())
        );
    }

    #[test]
    fn index_without_links_yields_none() {
        assert_eq!(parse_index("<html></html>"), None);
    }
}
