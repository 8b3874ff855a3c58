use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::RailConfig;
use crate::error::{RailError, Result};
use crate::models::{
    Case, ConfigGroup, Milestone, Plan, PlanSummary, ResultPayload, Run, Section, Suite,
    TestRecord,
};

pub const MAX_RETRY: u32 = 5;

/// Single retry policy applied uniformly by the remote access layer.
/// 429 is the only retryable status; after the attempt ceiling the last
/// response is surfaced to the caller, which must check the status itself.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        status == 429 && attempt < self.max_attempts
    }

    /// Server-supplied `Retry-After` wins (plus one second of slack);
    /// otherwise the wait grows with the attempt count.
    pub fn backoff(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(seconds) => Duration::from_secs(seconds + 1),
            None => Duration::from_secs(u64::from(attempt)),
        }
    }
}

/// Raw POST outcome. `200` and `204` are the only statuses treated as
/// unconditional success by callers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, 200 | 204)
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Thin typed wrapper over the backend HTTP API. Every call attaches basic
/// authentication and a JSON content type; rate limiting is handled here so
/// call sites never carry their own retry loops.
pub struct RailClient {
    config: RailConfig,
    http: Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RailClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RailClient")
            .field("base_url", &self.config.base_url)
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}

impl RailClient {
    pub fn new(config: &RailConfig) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            config: config.clone(),
            http,
            retry: RetryPolicy::default(),
        })
    }

    /// `GET index.php?/api/v2/<command>/<scope_id>[&k=v...]`, retried on
    /// 429. Non-2xx after retry exhaustion is an error carrying the raw
    /// status and body.
    pub fn get(
        &self,
        command: &str,
        scope_id: i64,
        filters: &[(&str, Option<String>)],
    ) -> Result<Value> {
        let url = build_get_url(&self.config.base_url, command, scope_id, filters);
        let response = self.send_with_retry(&url, || self.http.get(&url))?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if !(200..300).contains(&status) {
            return Err(RailError::Backend {
                command: command.to_string(),
                status,
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// `POST index.php?/api/v2/<command_path>` with a JSON payload. The
    /// response is returned even when it is a failure; callers decide
    /// whether a rejection is fatal.
    pub fn post(&self, command_path: &str, payload: &Value) -> Result<ApiResponse> {
        let url = format!(
            "{}/index.php?/api/v2/{command_path}",
            self.config.base_url
        );
        let response = self.send_with_retry(&url, || self.http.post(&url).json(payload))?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if !matches!(status, 200 | 204) {
            warn!("post {command_path} rejected: status {status}: {body}");
        }
        Ok(ApiResponse { status, body })
    }

    fn send_with_retry(
        &self,
        url: &str,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = build()
                .basic_auth(&self.config.login, Some(&self.config.key))
                .header(CONTENT_TYPE, "application/json")
                .send()?;
            let status = response.status().as_u16();
            if !self.retry.should_retry(status, attempt) {
                return Ok(response);
            }
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            let delay = self.retry.backoff(attempt, retry_after);
            info!(
                "{url}\nrate limited, waiting {} sec (attempt {attempt})",
                delay.as_secs()
            );
            thread::sleep(delay);
        }
    }

    // --- suites and sections ---

    pub fn suites(&self) -> Result<Vec<Suite>> {
        let value = self.get("get_suites", self.config.project_id, &[])?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn suite_id(&self, name: &str) -> Result<i64> {
        self.suites()?
            .into_iter()
            .find(|suite| suite.name == name)
            .map(|suite| suite.id)
            .ok_or_else(|| RailError::NotFound(format!("suite {name}")))
    }

    pub fn sections(&self, suite_id: i64) -> Result<Vec<Section>> {
        let value = self.get(
            "get_sections",
            self.config.project_id,
            &[("suite_id", Some(suite_id.to_string()))],
        )?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn section_id(&self, suite_id: i64, name: &str) -> Result<Option<i64>> {
        Ok(self
            .sections(suite_id)?
            .into_iter()
            .find(|section| section.name == name)
            .map(|section| section.id))
    }

    pub fn add_section(&self, suite_id: i64, name: &str) -> Result<ApiResponse> {
        self.post(
            &format!("add_section/{}", self.config.project_id),
            &json!({"name": name, "suite_id": suite_id}),
        )
    }

    // --- cases ---

    pub fn cases(&self, suite_id: i64, section_id: Option<i64>) -> Result<Vec<Case>> {
        let value = self.get(
            "get_cases",
            self.config.project_id,
            &[
                ("suite_id", Some(suite_id.to_string())),
                ("section_id", section_id.map(|id| id.to_string())),
            ],
        )?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn add_case(&self, section_id: i64, title: &str) -> Result<ApiResponse> {
        self.post(&format!("add_case/{section_id}"), &json!({"title": title}))
    }

    // --- plans and runs ---

    pub fn plans(&self, filters: &[(&str, Option<String>)]) -> Result<Vec<PlanSummary>> {
        let value = self.get("get_plans", self.config.project_id, filters)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Id of the open (non-completed) plan named `version`, if any.
    pub fn open_plan_id(&self, version: &str) -> Result<Option<i64>> {
        let plans = self.plans(&[("is_completed", Some("0".to_string()))])?;
        Ok(plans.into_iter().find_map(|plan| {
            if plan.name == version {
                info!("plan already exists: {}", plan.name);
                Some(plan.id)
            } else {
                None
            }
        }))
    }

    pub fn plan_id(&self, version: &str) -> Result<Option<i64>> {
        let plans = self.plans(&[])?;
        Ok(plans
            .into_iter()
            .find(|plan| plan.name == version)
            .map(|plan| plan.id))
    }

    pub fn plans_created_before(&self, timestamp: i64, offset: usize) -> Result<Vec<PlanSummary>> {
        self.plans(&[
            ("created_before", Some(timestamp.to_string())),
            ("offset", Some(offset.to_string())),
        ])
    }

    pub fn plan_runs(&self, plan_id: i64) -> Result<Vec<Run>> {
        let plan: Plan = serde_json::from_value(self.get("get_plan", plan_id, &[])?)?;
        Ok(plan
            .entries
            .into_iter()
            .flat_map(|entry| entry.runs)
            .collect())
    }

    /// `(entry_id, platform config)` for every run of the plan.
    pub fn entry_ids(&self, plan_id: i64) -> Result<Vec<(String, String)>> {
        Ok(self
            .plan_runs(plan_id)?
            .into_iter()
            .map(|run| (run.entry_id, run.config))
            .collect())
    }

    pub fn run_id(&self, plan_id: i64, platform: &str) -> Result<Option<i64>> {
        Ok(self
            .plan_runs(plan_id)?
            .into_iter()
            .find(|run| run.config.eq_ignore_ascii_case(platform))
            .map(|run| run.id))
    }

    pub fn tests(&self, run_id: i64) -> Result<Vec<TestRecord>> {
        let value = self.get("get_tests", run_id, &[])?;
        Ok(serde_json::from_value(value)?)
    }

    // --- configurations and milestones ---

    pub fn platform_config_ids(&self) -> Result<Vec<i64>> {
        let groups: Vec<ConfigGroup> =
            serde_json::from_value(self.get("get_configs", self.config.project_id, &[])?)?;
        Ok(groups
            .first()
            .map(|group| group.configs.iter().map(|config| config.id).collect())
            .unwrap_or_default())
    }

    pub fn milestones(&self) -> Result<Vec<Milestone>> {
        let value = self.get("get_milestones", self.config.project_id, &[])?;
        Ok(serde_json::from_value(value)?)
    }

    /// Resolve a milestone by name, descending into sub-milestones.
    pub fn milestone_id(&self, name: &str) -> Result<Option<i64>> {
        for milestone in self.milestones()? {
            if milestone.name == name {
                return Ok(Some(milestone.id));
            }
            let detail: Milestone =
                serde_json::from_value(self.get("get_milestone", milestone.id, &[])?)?;
            if let Some(sub) = detail.milestones.iter().find(|sub| sub.name == name) {
                return Ok(Some(sub.id));
            }
        }
        Ok(None)
    }

    // --- mutations ---

    pub fn add_plan(
        &self,
        name: &str,
        suite_id: i64,
        milestone_id: Option<i64>,
        description: &str,
    ) -> Result<ApiResponse> {
        info!("add plan {name}");
        let mut payload = json!({
            "name": name,
            "suite_id": suite_id,
            "description": description,
        });
        if let Some(id) = milestone_id {
            payload["milestone_id"] = json!(id);
        }
        self.post(&format!("add_plan/{}", self.config.project_id), &payload)
    }

    pub fn add_plan_entry(
        &self,
        plan_id: i64,
        suite_id: i64,
        config_ids: &[i64],
    ) -> Result<ApiResponse> {
        self.post(
            &format!("add_plan_entry/{plan_id}"),
            &plan_entry_payload(suite_id, config_ids),
        )
    }

    pub fn update_plan_entry(
        &self,
        plan_id: i64,
        entry_id: &str,
        description: &str,
    ) -> Result<ApiResponse> {
        self.post(
            &format!("update_plan_entry/{plan_id}/{entry_id}"),
            &json!({"include_all": true, "description": description}),
        )
    }

    pub fn add_results(&self, run_id: i64, results: &[ResultPayload]) -> Result<ApiResponse> {
        self.post(&format!("add_results/{run_id}"), &json!({"results": results}))
    }

    pub fn close_plan(&self, plan_id: i64) -> Result<ApiResponse> {
        self.post(&format!("close_plan/{plan_id}"), &json!({}))
    }

    pub fn delete_plan(&self, plan_id: i64) -> Result<ApiResponse> {
        self.post(&format!("delete_plan/{plan_id}"), &json!({}))
    }

    pub fn plan_url(&self, plan_id: i64) -> String {
        format!("{}/index.php?/plans/view/{plan_id}", self.config.base_url)
    }
}

pub(crate) fn build_get_url(
    base_url: &str,
    command: &str,
    scope_id: i64,
    filters: &[(&str, Option<String>)],
) -> String {
    let mut args = scope_id.to_string();
    for (key, value) in filters {
        if let Some(value) = value {
            args.push_str(&format!("&{key}={value}"));
        }
    }
    format!("{base_url}/index.php?/api/v2/{command}/{args}")
}

pub(crate) fn plan_entry_payload(suite_id: i64, config_ids: &[i64]) -> Value {
    let runs: Vec<Value> = config_ids
        .iter()
        .map(|id| json!({"include_all": true, "config_ids": [id]}))
        .collect();
    json!({"suite_id": suite_id, "config_ids": config_ids, "runs": runs})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_url_joins_scope_and_filters_skipping_absent_values() {
        let url = build_get_url(
            "https://testrail.example.net",
            "get_cases",
            5,
            &[
                ("suite_id", Some("12".to_string())),
                ("section_id", None),
                ("offset", Some("250".to_string())),
            ],
        );
        assert_eq!(
            url,
            "https://testrail.example.net/index.php?/api/v2/get_cases/5&suite_id=12&offset=250"
        );
    }

    #[test]
    fn retry_policy_only_retries_rate_limits_up_to_the_ceiling() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(429, 1));
        assert!(policy.should_retry(429, 4));
        assert!(!policy.should_retry(429, 5));
        assert!(!policy.should_retry(500, 1));
        assert!(!policy.should_retry(200, 1));
    }

    #[test]
    fn backoff_honors_retry_after_plus_one_else_grows_with_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(3, Some(10)), Duration::from_secs(11));
        assert_eq!(policy.backoff(1, None), Duration::from_secs(1));
        assert_eq!(policy.backoff(4, None), Duration::from_secs(4));
    }

    #[test]
    fn api_response_success_statuses() {
        assert!(ApiResponse { status: 200, body: String::new() }.is_ok());
        assert!(ApiResponse { status: 204, body: String::new() }.is_ok());
        assert!(!ApiResponse { status: 400, body: String::new() }.is_ok());
        assert!(!ApiResponse { status: 429, body: String::new() }.is_ok());
    }

    #[test]
    fn plan_entry_payload_builds_one_run_per_config() {
        let payload = plan_entry_payload(12, &[3, 7]);
        assert_eq!(payload["suite_id"], 12);
        let runs = payload["runs"].as_array().expect("runs");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["include_all"], true);
        assert_eq!(runs[0]["config_ids"], json!([3]));
        assert_eq!(runs[1]["config_ids"], json!([7]));
    }

    #[test]
    fn plan_runs_shape_parses_into_typed_records() {
        let plan: Plan = serde_json::from_value(json!({
            "id": 81,
            "name": "7.4.0.0_rc1",
            "entries": [{
                "id": "3933d74b-4282-4c1f-be62-7a2df25b8f44",
                "runs": [
                    {"id": 810, "entry_id": "3933d74b", "config": "centos7"},
                    {"id": 811, "entry_id": "3933d74b", "config": "xenial"}
                ]
            }]
        }))
        .expect("parse plan");

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].runs[1].config, "xenial");
    }
}
