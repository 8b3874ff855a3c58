use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Local;
use railsync_core::artifacts;
use railsync_core::config::{ArtifactsConfig, DEFAULT_PLATFORMS};
use railsync_core::report::{self, Report};
use railsync_core::{RailClient, RailConfig};
use tempfile::TempDir;
use tracing::info;

use crate::cli::ReportSource;

/// Classified reports plus everything the upload needs to describe itself.
/// Holds the fetch directory so mirrored report paths stay valid.
pub(crate) struct CollectedReports {
    pub reports: Vec<Report>,
    pub global_reports: Vec<PathBuf>,
    pub platforms: Vec<String>,
    pub upload_location: String,
    _fetch_dir: Option<TempDir>,
}

pub(crate) fn collect_reports(
    config: &RailConfig,
    client: &RailClient,
    suite: &str,
    source: &ReportSource,
    exclude_sections: &[String],
) -> Result<CollectedReports> {
    let platforms = resolve_platforms(&source.platforms);

    let mut fetch_dir = None;
    let (inputs, upload_location) = if let Some(artifact) = &source.artifact {
        info!("artifact: {artifact}");
        let base = artifacts_base(&config.artifacts, source);
        let dir = artifacts::fetch_reports(&base, artifact)?;
        let inputs = vec![dir.path().to_path_buf()];
        fetch_dir = Some(dir);
        let location = format!("{}{artifact}", config.artifacts.public_url);
        (inputs, location)
    } else {
        if source.reports.is_empty() {
            bail!("need an artifact url or a list of reports");
        }
        let location = source
            .reports
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        (source.reports.clone(), location)
    };

    let (xml_reports, global_reports) = report::discover_reports(&inputs, &platforms)?;
    if xml_reports.is_empty() && source.artifact.is_some() {
        bail!("no report found in artifact");
    }

    let suite_id = client.suite_id(suite)?;
    let section_names: Vec<String> = client
        .sections(suite_id)?
        .into_iter()
        .map(|section| section.name)
        .filter(|name| !exclude_sections.contains(name))
        .collect();
    info!("sections: {section_names:?}");

    let reports = report::classify_reports(&xml_reports, &section_names, &platforms);

    Ok(CollectedReports {
        reports,
        global_reports,
        platforms,
        upload_location,
        _fetch_dir: fetch_dir,
    })
}

pub(crate) fn resolve_platforms(requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        DEFAULT_PLATFORMS.iter().map(ToString::to_string).collect()
    } else {
        requested.iter().map(|name| name.to_lowercase()).collect()
    }
}

/// Pick the fetch base url: an explicit private url wins (its parent
/// directory is the base), then the old mirror when requested, then the
/// configured mirror.
pub(crate) fn artifacts_base(artifacts: &ArtifactsConfig, source: &ReportSource) -> String {
    if let Some(base) = &source.base_url {
        let trimmed = base.trim_end_matches('/');
        return match trimmed.rfind('/') {
            Some(idx) => format!("{}/", &trimmed[..idx]),
            None => format!("{trimmed}/"),
        };
    }
    if source.old_artifacts {
        artifacts.url_old.clone()
    } else {
        artifacts.url.clone()
    }
}

/// Description block recorded on the plan and on every posted result, so a
/// reader of the backend can trace where an upload came from.
pub(crate) fn build_description(upload_location: &str, reason: &str) -> String {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
    format!(
        "***\n\
         # Upload infos #\n\
         + Last upload: {now}\n\
         + hostname: {hostname}\n\
         + user: {user}\n\
         + artifacts: [{location}]({location})\n\
         + reason: {reason}\n\
         ***\n",
        now = Local::now().format("%a %b %e %H:%M:%S %Y"),
        user = whoami::username(),
        location = upload_location,
    )
}
