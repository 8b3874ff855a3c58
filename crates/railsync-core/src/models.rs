use serde::{Deserialize, Serialize};

/// Backend entities, parsed at the remote access layer boundary so the
/// pipeline never handles untyped JSON maps.

#[derive(Debug, Clone, Deserialize)]
pub struct Suite {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub suite_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Case {
    pub id: i64,
    pub title: String,
    pub section_id: i64,
    /// Free-form reference field; carries the `flaky` / `known_failed`
    /// markers curated by hand in the backend.
    #[serde(default)]
    pub refs: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: i64,
    pub entry_id: String,
    /// Platform configuration label, e.g. `centos7`.
    #[serde(default)]
    pub config: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestRecord {
    pub id: i64,
    pub title: String,
    pub case_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigGroup {
    #[serde(default)]
    pub configs: Vec<PlatformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub id: i64,
    pub name: String,
}

/// Write-once result payload; never updated after upload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultPayload {
    pub test_id: i64,
    pub status_id: u8,
    pub comment: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
}
