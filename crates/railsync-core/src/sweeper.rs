use std::time::{Duration, Instant};

use tracing::info;

use crate::client::{ApiResponse, RailClient};
use crate::error::Result;
use crate::models::PlanSummary;

/// Plans whose name contains one of these survive every sweep by default.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["promoted", "rc", "pw", "postmerge", "post-merge"];
pub const DEFAULT_RETENTION_SECS: u64 = 2_592_000;
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Soft: archive the plan and its runs.
    Close,
    /// Hard: remove the plan from the backend.
    Delete,
}

impl SweepAction {
    const fn success_status(self) -> u16 {
        match self {
            Self::Close => 204,
            Self::Delete => 200,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Delete => "delete",
        }
    }
}

/// Backend surface the sweep loop drives. `RailClient` is the live
/// implementation; the loop itself never sees HTTP.
pub trait SweepBackend {
    fn plans_created_before(&self, timestamp: i64, offset: usize) -> Result<Vec<PlanSummary>>;
    fn close_plan(&self, plan_id: i64) -> Result<ApiResponse>;
    fn delete_plan(&self, plan_id: i64) -> Result<ApiResponse>;
}

impl SweepBackend for RailClient {
    fn plans_created_before(&self, timestamp: i64, offset: usize) -> Result<Vec<PlanSummary>> {
        RailClient::plans_created_before(self, timestamp, offset)
    }

    fn close_plan(&self, plan_id: i64) -> Result<ApiResponse> {
        RailClient::close_plan(self, plan_id)
    }

    fn delete_plan(&self, plan_id: i64) -> Result<ApiResponse> {
        RailClient::delete_plan(self, plan_id)
    }
}

/// Split a page of plans into the ones kept by the exclude patterns and
/// the ones to act on. Exclusion is substring containment on the name.
pub fn partition<'a>(
    plans: &'a [PlanSummary],
    exclude_patterns: &[String],
) -> (Vec<&'a PlanSummary>, Vec<&'a PlanSummary>) {
    let mut kept = Vec::new();
    let mut candidates = Vec::new();
    for plan in plans {
        if exclude_patterns
            .iter()
            .any(|pattern| plan.name.contains(pattern.as_str()))
        {
            kept.push(plan);
        } else {
            candidates.push(plan);
        }
    }
    (kept, candidates)
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub acted: Vec<String>,
    pub kept: Vec<String>,
}

/// Close or delete plans created before `now - retention`, within a wall
/// time budget. After acting on a page, the next page is fetched offset by
/// the number of plans kept this iteration, so the plans acted on fall out
/// of the paging naturally. No state is persisted across invocations.
pub fn sweep(
    backend: &impl SweepBackend,
    now_epoch: i64,
    retention_secs: u64,
    exclude_patterns: &[String],
    time_budget: Duration,
    action: SweepAction,
) -> Result<SweepOutcome> {
    let cutoff = now_epoch - retention_secs as i64;
    let started = Instant::now();
    let mut outcome = SweepOutcome::default();
    let mut offset = 0;

    let mut plans = backend.plans_created_before(cutoff, offset)?;
    while !plans.is_empty() && started.elapsed() < time_budget {
        let (kept, candidates) = partition(&plans, exclude_patterns);

        for plan in &kept {
            info!("keep {}", plan.name);
            outcome.kept.push(plan.name.clone());
        }
        for plan in &candidates {
            info!("{} {}", action.as_str(), plan.name);
            let response = match action {
                SweepAction::Close => backend.close_plan(plan.id)?,
                SweepAction::Delete => backend.delete_plan(plan.id)?,
            };
            if response.status == action.success_status() {
                outcome.acted.push(plan.name.clone());
            } else {
                info!(
                    "{} {} failed: status {}: {}",
                    action.as_str(),
                    plan.name,
                    response.status,
                    response.body
                );
            }
        }

        offset += kept.len();
        if candidates.is_empty() {
            break;
        }
        plans = backend.plans_created_before(cutoff, offset)?;
    }

    Ok(outcome)
}

/// Close every open plan whose name starts with the given pattern.
pub fn close_plans_matching(client: &RailClient, pattern: &str) -> Result<usize> {
    let plans = client.plans(&[("is_completed", Some("0".to_string()))])?;
    info!("{} open plan(s)", plans.len());

    let mut closed = 0;
    for plan in plans {
        if !plan.name.starts_with(pattern) {
            continue;
        }
        info!("closing plan {}", plan.name);
        let response = client.close_plan(plan.id)?;
        if response.is_ok() {
            closed += 1;
        } else {
            info!(
                "close {} failed: status {}: {}",
                plan.name, response.status, response.body
            );
        }
    }
    info!("{closed} plan(s) closed with pattern {pattern}");
    Ok(closed)
}
