use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};

use crate::client::RailClient;
use crate::error::{RailError, Result};
use crate::normalize::normalize;
use crate::report::{Report, parse_junit};

/// Names known to exist in the backend catalog, including the ones created
/// earlier in the same pass. The backend is NOT re-checked per creation:
/// the snapshot is taken once per reconciliation pass, so a concurrent
/// writer can still produce a duplicate (documented limitation).
#[derive(Debug, Default)]
pub struct CreationLedger {
    seen: Vec<String>,
}

impl CreationLedger {
    pub fn preload(existing: impl IntoIterator<Item = String>) -> Self {
        Self {
            seen: existing.into_iter().collect(),
        }
    }

    /// Claim an identifier for creation. Returns false when the name is
    /// already present, either from the catalog snapshot or from an earlier
    /// creation in this pass.
    pub fn try_claim(&mut self, identifier: &str) -> bool {
        if self.seen.iter().any(|name| name == identifier) {
            return false;
        }
        self.seen.push(identifier.to_string());
        true
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.seen.iter().any(|name| name == identifier)
    }
}

/// Outcome of a reconciliation pass: normalized identifiers missing from
/// the catalog, grouped per section, plus the normalized snapshot of the
/// existing catalog.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub missing: BTreeMap<String, Vec<String>>,
    pub existing: Vec<String>,
}

impl Reconciliation {
    pub fn missing_count(&self) -> usize {
        self.missing.values().map(Vec::len).sum()
    }
}

/// Set difference of observed identifiers against the normalized catalog,
/// de-duplicated per section, preserving first-seen order.
pub fn compute_missing(
    observed: &[(String, Vec<String>)],
    existing: &[String],
) -> BTreeMap<String, Vec<String>> {
    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (section, identifiers) in observed {
        for identifier in identifiers {
            let normalized = normalize(identifier);
            if existing.contains(normalized.as_str()) {
                continue;
            }
            let entries = missing.entry(section.clone()).or_default();
            if !entries.contains(&normalized) {
                entries.push(normalized);
            }
        }
    }

    missing
}

/// Fetch the suite catalog once, normalize every title, and diff the
/// classified reports against it. Reports without a section are skip
/// candidates and take no part in reconciliation.
pub fn reconcile(client: &RailClient, reports: &[Report], suite: &str) -> Result<Reconciliation> {
    info!("get cases from suite {suite}");
    let suite_id = client.suite_id(suite)?;
    let catalog = client.cases(suite_id, None)?;
    let existing: Vec<String> = catalog.iter().map(|case| normalize(&case.title)).collect();

    let mut observed = Vec::new();
    for report in reports {
        let Some(section) = report.section.as_deref() else {
            continue;
        };
        let identifiers = parse_junit(&report.path)?
            .into_iter()
            .map(|outcome| outcome.identifier)
            .collect();
        observed.push((section.to_string(), identifiers));
    }

    Ok(Reconciliation {
        missing: compute_missing(&observed, &existing),
        existing,
    })
}

/// Create the missing cases, resolving (or lazily creating) each section
/// id. A single creation failure is logged and does not abort the pass.
/// The ledger is updated immediately after each successful creation so an
/// identical name later in the same pass is not duplicated.
pub fn create_missing(
    client: &RailClient,
    suite: &str,
    missing: &BTreeMap<String, Vec<String>>,
    ledger: &mut CreationLedger,
) -> Result<usize> {
    let mut created = 0;
    let suite_id = client.suite_id(suite)?;

    for (section, identifiers) in missing {
        info!("adding {} case(s) to section {section}", identifiers.len());
        let section_id = match resolve_section_id(client, suite_id, section)? {
            Some(id) => id,
            None => {
                warn!("could not resolve or create section {section}; skipping");
                continue;
            }
        };

        for identifier in identifiers {
            if ledger.contains(identifier) {
                warn!("test case already exists: {identifier}");
                continue;
            }
            let response = client.add_case(section_id, identifier)?;
            if response.status == 200 {
                created += 1;
                ledger.try_claim(identifier);
            } else {
                info!("{identifier} test case not added (status {})", response.status);
            }
        }
    }

    Ok(created)
}

fn resolve_section_id(client: &RailClient, suite_id: i64, section: &str) -> Result<Option<i64>> {
    if let Some(id) = client.section_id(suite_id, section)? {
        return Ok(Some(id));
    }
    info!("section {section} not found; creating it");
    let response = client.add_section(suite_id, section)?;
    if !response.is_ok() {
        return Err(RailError::Backend {
            command: format!("add_section/{section}"),
            status: response.status,
            body: response.body,
        });
    }
    client.section_id(suite_id, section)
}

/// Normalized titles of catalog cases whose `refs` field carries the given
/// flag (`flaky`, `known_failed`). These sets feed the status overrides.
pub fn flagged_cases(client: &RailClient, suite: &str, flag: &str) -> Result<HashSet<String>> {
    let suite_id = client.suite_id(suite)?;
    let cases = client.cases(suite_id, None)?;
    Ok(cases
        .iter()
        .filter(|case| {
            case.refs
                .as_deref()
                .is_some_and(|refs| refs.contains(flag))
        })
        .map(|case| normalize(&case.title))
        .collect())
}
