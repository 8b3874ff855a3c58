use tracing::{info, warn};

use crate::client::RailClient;
use crate::error::{RailError, Result};

/// Ensure an open plan named `version` exists and has one run per platform
/// configuration. Plan name is the idempotency key: an existing open plan
/// is reused as-is.
pub fn ensure_plan(
    client: &RailClient,
    version: &str,
    suite_id: i64,
    milestone: Option<&str>,
    description: &str,
) -> Result<i64> {
    if let Some(plan_id) = client.open_plan_id(version)? {
        return Ok(plan_id);
    }

    let milestone_id = match milestone {
        Some(name) => {
            let id = client.milestone_id(name)?;
            if id.is_none() {
                warn!("milestone {name} not found; creating the plan without one");
            }
            id
        }
        None => None,
    };

    let response = client.add_plan(version, suite_id, milestone_id, description)?;
    if !response.is_ok() {
        return Err(RailError::Backend {
            command: format!("add_plan/{version}"),
            status: response.status,
            body: response.body,
        });
    }

    let plan_id = client.plan_id(version)?.ok_or_else(|| {
        RailError::MissingContext(format!("no plan found linked to test suite {version}"))
    })?;

    let config_ids = client.platform_config_ids()?;
    let response = client.add_plan_entry(plan_id, suite_id, &config_ids)?;
    if !response.is_ok() {
        return Err(RailError::Backend {
            command: format!("add_plan_entry/{plan_id}"),
            status: response.status,
            body: response.body,
        });
    }

    Ok(plan_id)
}

/// Refresh every run entry of the plan so it includes all case ids added to
/// the suite since the run was created. Called on every upload pass, not
/// only at plan creation: reconciliation may have just added cases.
pub fn sync_runs(client: &RailClient, plan_id: i64, description: &str) -> Result<()> {
    for (entry_id, config) in client.entry_ids(plan_id)? {
        info!("update config {config} run (entry {entry_id})");
        let response = client.update_plan_entry(plan_id, &entry_id, description)?;
        if !response.is_ok() {
            warn!(
                "update_plan_entry {entry_id} rejected: status {}",
                response.status
            );
        }
    }
    Ok(())
}
