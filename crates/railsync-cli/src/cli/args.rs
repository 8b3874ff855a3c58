use std::path::PathBuf;

use clap::Args;
use railsync_core::sweeper::DEFAULT_RETENTION_SECS;

/// Where the junit reports come from: a CI artifact mirrored over HTTP, or
/// local report files and directories.
#[derive(Debug, Args)]
pub struct ReportSource {
    /// Artifact name, ex: staging-7.1.0.r170626213221.69c5697.post-merge.00034526
    #[arg(short, long)]
    pub artifact: Option<String>,

    /// Local junit report file(s) or directory(ies). Section and platform
    /// must appear in the report path.
    #[arg(short, long, num_args = 1..)]
    pub reports: Vec<PathBuf>,

    /// Platform name(s) the runs are matched on, ex: centos7 xenial
    #[arg(short = 'd', long = "platform", num_args = 1..)]
    pub platforms: Vec<String>,

    /// Fetch from the old artifacts mirror.
    #[arg(short = 'o', long)]
    pub old_artifacts: bool,

    /// Private artifacts url; its parent directory becomes the fetch base.
    #[arg(short = 'b', long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddCasesArgs {
    /// Suite (case catalog) name, ex: "7.1"
    #[arg(short = 'c', long)]
    pub suite: String,

    #[command(flatten)]
    pub source: ReportSource,

    /// Section name(s) ignored during classification.
    #[arg(short = 'e', long = "exclude-section", num_args = 1..)]
    pub exclude_sections: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AddResultsArgs {
    /// Suite (case catalog) name, ex: "7.1"
    #[arg(short = 'c', long)]
    pub suite: String,

    /// Version the plan is named after, ex: "7.1.0_rc5"
    #[arg(short, long)]
    pub version: String,

    #[command(flatten)]
    pub source: ReportSource,

    /// Milestone name; defaults to the suite name.
    #[arg(short, long)]
    pub milestone: Option<String>,

    /// Section name(s) ignored during classification and env tagging.
    #[arg(short = 'e', long = "exclude-section", num_args = 1..)]
    pub exclude_sections: Vec<String>,

    /// Close the plan once the upload is done.
    #[arg(short = 'k', long)]
    pub close_plan: bool,

    /// Write the resulting plan url to this file.
    #[arg(short = 'f', long)]
    pub linkfile: Option<PathBuf>,

    /// Label recorded in the run description.
    #[arg(short = 'R', long, default_value = "")]
    pub reason: String,

    /// File where identifiers with no matching test are appended.
    #[arg(long, default_value = "tests_not_found.txt")]
    pub not_found_file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ClosePlansArgs {
    /// Plan name prefix, ex: "7.2.0.0-"
    pub pattern: String,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Plans containing any of these substrings are kept.
    #[arg(short = 'x', long = "exclude", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Seconds a plan is retained after creation.
    #[arg(short, long, default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention_secs: u64,

    /// Wall-time budget for the sweep loop, in seconds.
    #[arg(short = 'u', long, default_value_t = 300)]
    pub duration_secs: u64,

    /// Delete swept plans instead of closing them.
    #[arg(long)]
    pub delete: bool,
}
