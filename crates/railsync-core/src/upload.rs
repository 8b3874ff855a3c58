use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::catalog::flagged_cases;
use crate::client::RailClient;
use crate::error::{RailError, Result};
use crate::models::{ResultPayload, TestRecord};
use crate::normalize::normalize;
use crate::plan::{ensure_plan, sync_runs};
use crate::report::{FailedStep, RawOutcome, Report, parse_junit};
use crate::status::{Status, classify, format_elapsed, match_task_section};

/// Results are posted in bounded slices; the backend rejects oversized
/// payloads and the rate limiter prefers many small posts anyway.
pub const BATCH_SIZE: usize = 1000;

/// Append-only sink for report identifiers with no matching test in the
/// run snapshot. One line per unmatched test: run, version, identifier.
#[derive(Debug)]
pub struct NotFoundSink {
    path: PathBuf,
    file: File,
}

impl NotFoundSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn record(&mut self, run_id: i64, version: &str, identifier: &str) -> Result<()> {
        writeln!(self.file, "{run_id}\t{version}\t{identifier}")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Join parsed outcomes against the run's test snapshot by normalized
/// title and classify each match. Identifiers with no matching test are
/// recorded to the not-found sink and dropped; they are never uploaded and
/// never retried.
pub fn build_results(
    outcomes: &[RawOutcome],
    tests: &[TestRecord],
    run_id: i64,
    version: &str,
    description: &str,
    flaky: &HashSet<String>,
    known_failed: &HashSet<String>,
    sink: &mut NotFoundSink,
) -> Result<Vec<ResultPayload>> {
    let index: HashMap<String, i64> = tests
        .iter()
        .map(|test| (normalize(&test.title), test.id))
        .collect();

    let mut results = Vec::new();
    for outcome in outcomes {
        let Some(&test_id) = index.get(&normalize(&outcome.identifier)) else {
            debug!("{}: no test found", outcome.identifier);
            sink.record(run_id, version, &outcome.identifier)?;
            continue;
        };
        let (status, comment) = classify(outcome, flaky, known_failed, description);
        results.push(ResultPayload {
            test_id,
            status_id: status.id(),
            comment,
            version: version.to_string(),
            elapsed: format_elapsed(outcome.elapsed),
        });
    }
    Ok(results)
}

/// Post results in order-preserving batches of `BATCH_SIZE`, returning the
/// summed count of accepted results. A batch that fails after the retry
/// ceiling is logged and skipped; earlier batches are not rolled back and
/// later batches still go out.
pub fn upload(client: &RailClient, run_id: i64, results: &[ResultPayload]) -> Result<usize> {
    let mut accepted = 0;
    for batch in results.chunks(BATCH_SIZE) {
        info!("posting {} result(s) to run {run_id}", batch.len());
        match client.add_results(run_id, batch) {
            Ok(response) if response.is_ok() => accepted += batch.len(),
            Ok(response) => {
                warn!(
                    "put failed for run {run_id}: status {}: {}",
                    response.status, response.body
                );
            }
            Err(err) => warn!("put failed for run {run_id}: {err}"),
        }
    }
    Ok(accepted)
}

#[derive(Debug)]
pub struct UploadSummary {
    pub results_posted: usize,
    pub plan_id: i64,
}

/// The full upload pass for one version: flagged-set retrieval, plan/run
/// lifecycle, then per-platform result building and batched upload.
///
/// Ordering is load-bearing: reconciliation must already have run (the
/// catalog snapshot feeds classification), run-sync must precede upload
/// (uploads need test ids for newly added cases). A failure on one
/// platform does not block the others; a missing run for a platform is
/// fatal, because continuing would upload against a nonexistent target.
pub fn put_results_from_reports(
    client: &RailClient,
    version: &str,
    suite: &str,
    milestone: Option<&str>,
    reports: &[Report],
    platforms: &[String],
    description: &str,
    sink: &mut NotFoundSink,
) -> Result<UploadSummary> {
    let suite_id = client.suite_id(suite)?;

    let flaky = flagged_cases(client, suite, "flaky")?;
    let known_failed = flagged_cases(client, suite, "known_failed")?;

    let plan_id = ensure_plan(client, version, suite_id, milestone, description)?;
    sync_runs(client, plan_id, description)?;

    let mut results_posted = 0;
    for platform in platforms {
        let run_id = client
            .run_id(plan_id, platform)?
            .ok_or_else(|| {
                RailError::MissingContext(format!(
                    "no run found linked to plan {plan_id} for platform {platform}"
                ))
            })?;

        match upload_platform(
            client,
            run_id,
            version,
            platform,
            reports,
            description,
            &flaky,
            &known_failed,
            sink,
        ) {
            Ok(count) => results_posted += count,
            Err(err) => error!("platform {platform}: {err}"),
        }
    }

    Ok(UploadSummary {
        results_posted,
        plan_id,
    })
}

fn upload_platform(
    client: &RailClient,
    run_id: i64,
    version: &str,
    platform: &str,
    reports: &[Report],
    description: &str,
    flaky: &HashSet<String>,
    known_failed: &HashSet<String>,
    sink: &mut NotFoundSink,
) -> Result<usize> {
    let tests = client.tests(run_id)?;
    let mut posted = 0;

    for report in reports {
        if report.section.is_none() {
            continue;
        }
        if report.platform.as_deref() != Some(&platform.to_lowercase()) {
            continue;
        }

        let outcomes = match parse_junit(&report.path) {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!("skipping {}: {err}", report.path.display());
                continue;
            }
        };

        let results = build_results(
            &outcomes,
            &tests,
            run_id,
            version,
            description,
            flaky,
            known_failed,
            sink,
        )?;
        info!("{}: {} result(s)", report.path.display(), results.len());
        posted += upload(client, run_id, &results)?;
    }

    Ok(posted)
}

/// Blanket environment-failure tagging from the global report feed: every
/// test of the matched section in the step's platform run receives the
/// setup/requirements failure status, one batched upload per task.
pub fn mass_tag_environment_failures(
    client: &RailClient,
    failed_steps: &BTreeMap<String, FailedStep>,
    version: &str,
    suite: &str,
    exclude_sections: &[String],
    description: &str,
) -> Result<()> {
    if failed_steps.is_empty() {
        return Ok(());
    }

    let plan_id = client.plan_id(version)?.ok_or_else(|| {
        RailError::MissingContext(format!("no plan found for version {version}"))
    })?;
    let suite_id = client.suite_id(suite)?;
    let section_names: Vec<String> = client
        .sections(suite_id)?
        .into_iter()
        .map(|section| section.name)
        .filter(|name| !exclude_sections.contains(name))
        .collect();

    info!("check environment issues");
    for (task_key, step) in failed_steps {
        let Some(section) = match_task_section(task_key, &section_names) else {
            info!("no valid section found for task {task_key}");
            continue;
        };
        info!("task {task_key} -> section {section}");

        let Some(section_id) = client.section_id(suite_id, section)? else {
            warn!("section {section} disappeared from suite {suite}; skipping");
            continue;
        };
        let Some(run_id) = client.run_id(plan_id, &step.platform)? else {
            warn!("no run for platform {} in plan {plan_id}; skipping", step.platform);
            continue;
        };

        let case_ids: HashSet<i64> = client
            .cases(suite_id, Some(section_id))?
            .iter()
            .map(|case| case.id)
            .collect();
        let tests = client.tests(run_id)?;
        let results = environment_failure_results(&tests, &case_ids, step, version, description);

        info!(
            "put env issues: {section} - {} - {}",
            step.platform,
            step.step.as_str()
        );
        upload(client, run_id, &results)?;
    }

    Ok(())
}

/// Blanket results for one failed step: every test of the section's cases
/// receives the step's environment-failure status with the same comment.
pub(crate) fn environment_failure_results(
    tests: &[TestRecord],
    case_ids: &HashSet<i64>,
    step: &FailedStep,
    version: &str,
    description: &str,
) -> Vec<ResultPayload> {
    let status = Status::for_step(step.step);
    tests
        .iter()
        .filter(|test| case_ids.contains(&test.case_id))
        .map(|test| ResultPayload {
            test_id: test.id,
            status_id: status.id(),
            comment: format!("{description}\n{} failed", step.step.as_str()),
            version: version.to_string(),
            elapsed: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Outcome, StepKind};

    fn outcome(identifier: &str, outcome: Outcome, elapsed: f64) -> RawOutcome {
        RawOutcome {
            identifier: identifier.to_string(),
            elapsed,
            outcome,
            message: None,
            trace: None,
        }
    }

    fn test_record(id: i64, title: &str) -> TestRecord {
        TestRecord {
            id,
            title: title.to_string(),
            case_id: id * 10,
        }
    }

    fn sink(dir: &tempfile::TempDir) -> NotFoundSink {
        NotFoundSink::open(dir.path().join("not_found.log")).expect("open sink")
    }

    #[test]
    fn batches_are_bounded_ordered_and_complete() {
        let results: Vec<u32> = (0..2500).collect();
        let batches: Vec<&[u32]> = results.chunks(BATCH_SIZE).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 1000);
        assert_eq!(batches[1].len(), 1000);
        assert_eq!(batches[2].len(), 500);

        let rejoined: Vec<u32> = batches.concat();
        assert_eq!(rejoined, results);
    }

    #[test]
    fn four_outcomes_against_a_complete_catalog_yield_four_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = sink(&dir);

        let outcomes = vec![
            outcome("suite.test_a", Outcome::Pass, 1.2),
            outcome("suite.test_b", Outcome::Pass, 0.0),
            outcome("suite.test_c", Outcome::Failure, 2.0),
            outcome("suite.test_d", Outcome::Pass, 9.9),
        ];
        let tests = vec![
            test_record(1, "suite.test_a"),
            test_record(2, "suite.test_b"),
            test_record(3, "suite.test_c"),
            test_record(4, "suite.test_d"),
        ];

        let results = build_results(
            &outcomes,
            &tests,
            77,
            "7.4.0.0_rc1",
            "",
            &HashSet::new(),
            &HashSet::new(),
            &mut sink,
        )
        .expect("build");

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.status_id == 5).count(), 1);
        assert_eq!(results.iter().filter(|r| r.status_id == 1).count(), 3);
        // One batch for all four.
        assert_eq!(results.chunks(BATCH_SIZE).count(), 1);
    }

    #[test]
    fn unmatched_identifiers_go_to_the_sink_and_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = sink(&dir);

        let outcomes = vec![outcome("suite.test_ghost", Outcome::Pass, 0.0)];
        let results = build_results(
            &outcomes,
            &[test_record(1, "suite.test_a")],
            42,
            "7.4.0.0_rc1",
            "",
            &HashSet::new(),
            &HashSet::new(),
            &mut sink,
        )
        .expect("build");

        assert!(results.is_empty());
        let sink_path = sink.path().to_path_buf();
        drop(sink);
        let logged = std::fs::read_to_string(sink_path).expect("read sink");
        assert_eq!(logged, "42\t7.4.0.0_rc1\tsuite.test_ghost\n");
    }

    #[test]
    fn titles_match_after_normalization_on_both_sides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = sink(&dir);

        let outcomes = vec![outcome("suite.test_x(172.16.0.9)", Outcome::Pass, 0.0)];
        let tests = vec![test_record(8, "suite.test_x(172.16.0.5)")];

        let results = build_results(
            &outcomes,
            &tests,
            1,
            "v",
            "",
            &HashSet::new(),
            &HashSet::new(),
            &mut sink,
        )
        .expect("build");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_id, 8);
    }

    #[test]
    fn elapsed_is_attached_only_when_nonzero_after_truncation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sink = sink(&dir);

        let outcomes = vec![
            outcome("suite.test_a", Outcome::Pass, 3.7),
            outcome("suite.test_b", Outcome::Pass, 0.7),
        ];
        let tests = vec![test_record(1, "suite.test_a"), test_record(2, "suite.test_b")];

        let results = build_results(
            &outcomes,
            &tests,
            1,
            "v",
            "",
            &HashSet::new(),
            &HashSet::new(),
            &mut sink,
        )
        .expect("build");

        assert_eq!(results[0].elapsed.as_deref(), Some("3s"));
        assert_eq!(results[1].elapsed, None);
    }

    #[test]
    fn environment_failures_blanket_only_the_sections_tests() {
        let step = FailedStep {
            task_name: "http_suite".to_string(),
            platform: "centos7".to_string(),
            step: StepKind::Setup,
        };
        let tests = vec![
            test_record(1, "suite.test_a"),
            test_record(2, "suite.test_b"),
            test_record(3, "suite.test_c"),
        ];
        // test_record gives case_id = id * 10; only a and c belong to the
        // failed step's section.
        let case_ids: HashSet<i64> = [10, 30].into_iter().collect();

        let results =
            environment_failure_results(&tests, &case_ids, &step, "7.4.0.0_rc1", "desc");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test_id, 1);
        assert_eq!(results[1].test_id, 3);
        assert!(results.iter().all(|result| result.status_id == 8));
        assert!(results.iter().all(|result| result.comment == "desc\nsetup failed"));
        assert!(results.iter().all(|result| result.elapsed.is_none()));
    }

    #[test]
    fn requirements_step_maps_to_its_own_status() {
        let step = FailedStep {
            task_name: "fuse_suite".to_string(),
            platform: "xenial".to_string(),
            step: StepKind::Requirements,
        };
        let tests = vec![test_record(4, "suite.test_d")];
        let case_ids: HashSet<i64> = [40].into_iter().collect();

        let results = environment_failure_results(&tests, &case_ids, &step, "v", "");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status_id, 9);
        assert_eq!(results[0].comment, "\nrequirements failed");
    }

    #[test]
    fn result_payload_serializes_without_absent_elapsed() {
        let payload = ResultPayload {
            test_id: 9,
            status_id: 1,
            comment: "OK".to_string(),
            version: "v".to_string(),
            elapsed: None,
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert!(value.get("elapsed").is_none());
        assert_eq!(value["status_id"], 1);
    }
}
