use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RailError, Result};

pub const GLOBAL_REPORT_NAME: &str = "report.json";

/// Path-substring overrides for section inference: a report whose path
/// contains the key is assigned that section no matter what else matches,
/// and falls back to the paired platform when none is embedded in the path.
/// Slice order is significant and must stay deterministic.
const SECTION_OVERRIDES: &[(&str, &str)] = &[("undelete", "centos7"), ("versioning", "centos7")];

/// A report file classified by section and platform. Section and platform
/// are derived from the path, not authoritative; a report with no section
/// cannot be reconciled or uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Report {
    pub path: PathBuf,
    pub section: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Failure,
    Error,
    Skipped,
}

impl Outcome {
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }
}

/// One `testcase` element from a JUnit-style report.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    pub identifier: String,
    pub elapsed: f64,
    pub outcome: Outcome,
    pub message: Option<String>,
    pub trace: Option<String>,
}

/// Parse a JUnit-style XML report into an ordered outcome sequence.
///
/// The first child element of a `testcase` decides the outcome: `failure`
/// or `error` maps to a failed outcome, `skipped` to skipped, anything else
/// (or no child) to pass. Entries whose classname and name are both empty
/// are dropped.
pub fn parse_junit(path: &Path) -> Result<Vec<RawOutcome>> {
    let content = fs::read_to_string(path)?;
    let mut reader = Reader::from_str(&content);
    reader.trim_text(true);

    let mut outcomes = Vec::new();
    let mut current: Option<RawOutcome> = None;
    let mut child_seen = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) if element.name().as_ref() == b"testcase" => {
                if let Some(outcome) = current.take() {
                    push_outcome(&mut outcomes, outcome);
                }
                current = Some(outcome_from_attributes(path, &element)?);
                child_seen = false;
            }
            Event::Empty(element) if element.name().as_ref() == b"testcase" => {
                if let Some(outcome) = current.take() {
                    push_outcome(&mut outcomes, outcome);
                }
                push_outcome(&mut outcomes, outcome_from_attributes(path, &element)?);
            }
            Event::Start(element) => match current.as_mut() {
                Some(outcome) if !child_seen => {
                    child_seen = true;
                    apply_child(path, outcome, &element)?;
                    let is_outcome_tag = outcome_tag(element.name().as_ref()).is_some();
                    let trace = reader.read_text(element.name())?;
                    if is_outcome_tag && !trace.is_empty() {
                        outcome.trace = Some(trace.into_owned());
                    }
                }
                Some(_) => {
                    // Only the first child decides the outcome.
                    reader.read_to_end(element.name())?;
                }
                // Suite wrapper elements; descend looking for testcases.
                None => {}
            },
            Event::Empty(element) => {
                if let Some(outcome) = current.as_mut() {
                    if !child_seen {
                        child_seen = true;
                        apply_child(path, outcome, &element)?;
                    }
                }
            }
            Event::End(element) if element.name().as_ref() == b"testcase" => {
                if let Some(outcome) = current.take() {
                    push_outcome(&mut outcomes, outcome);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(outcome) = current.take() {
        push_outcome(&mut outcomes, outcome);
    }

    Ok(outcomes)
}

fn push_outcome(outcomes: &mut Vec<RawOutcome>, outcome: RawOutcome) {
    // A testcase with neither classname nor name yields the bare separator.
    if outcome.identifier != "." {
        outcomes.push(outcome);
    }
}

fn outcome_from_attributes(path: &Path, element: &BytesStart<'_>) -> Result<RawOutcome> {
    let mut classname = String::new();
    let mut name = String::new();
    let mut elapsed = 0.0f64;

    for attribute in element.attributes() {
        let attribute = attribute
            .map_err(|err| RailError::invalid_report(path, format!("bad attribute: {err}")))?;
        let value = attribute
            .unescape_value()
            .map_err(RailError::from)?
            .into_owned();
        match attribute.key.as_ref() {
            b"classname" => classname = value,
            b"name" => name = value,
            b"time" => elapsed = value.parse::<f64>().unwrap_or(0.0),
            _ => {}
        }
    }

    Ok(RawOutcome {
        identifier: format!("{classname}.{name}"),
        elapsed,
        outcome: Outcome::Pass,
        message: None,
        trace: None,
    })
}

fn outcome_tag(name: &[u8]) -> Option<Outcome> {
    match name {
        b"failure" => Some(Outcome::Failure),
        b"error" => Some(Outcome::Error),
        b"skipped" => Some(Outcome::Skipped),
        _ => None,
    }
}

fn apply_child(path: &Path, outcome: &mut RawOutcome, element: &BytesStart<'_>) -> Result<()> {
    // Unknown child tags leave the outcome at pass.
    let Some(parsed) = outcome_tag(element.name().as_ref()) else {
        return Ok(());
    };
    outcome.outcome = parsed;

    for attribute in element.attributes() {
        let attribute = attribute
            .map_err(|err| RailError::invalid_report(path, format!("bad attribute: {err}")))?;
        if attribute.key.as_ref() == b"message" {
            outcome.message = Some(attribute.unescape_value().map_err(RailError::from)?.into_owned());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Setup,
    Requirements,
}

impl StepKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "setup" => Some(Self::Setup),
            "requirements" => Some(Self::Requirements),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Requirements => "requirements",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    pub task_name: String,
    pub platform: String,
    pub step: StepKind,
}

/// Parse the JSON global report into the failed-step feed used for mass
/// environment-failure tagging. Only failed `setup` / `requirements` steps
/// are relevant. A task without a `steps` list rejects the whole file.
pub fn parse_global_report(path: &Path) -> Result<BTreeMap<String, FailedStep>> {
    let content = fs::read_to_string(path)?;
    let tasks: Value = serde_json::from_str(&content)?;

    let Some(tasks) = tasks.as_array() else {
        return Err(RailError::invalid_report(path, "expected a task array"));
    };

    let mut failed_steps = BTreeMap::new();
    for task in tasks {
        let Some(steps) = task.get("steps").and_then(Value::as_array) else {
            return Err(RailError::invalid_report(path, "task without a steps list"));
        };
        let infos = task.get("task_infos");
        let task_name = infos
            .and_then(|infos| infos.get("task_name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let platform = infos
            .and_then(|infos| infos.get("permutation"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        for step in steps {
            if !step.get("failed").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(step_name) = step.get("step_name").and_then(Value::as_str) else {
                continue;
            };
            let Some(kind) = StepKind::parse(step_name) else {
                continue;
            };
            failed_steps.insert(
                format!("{task_name}_{platform}_{step_name}"),
                FailedStep {
                    task_name: task_name.to_string(),
                    platform: platform.to_string(),
                    step: kind,
                },
            );
        }
    }

    Ok(failed_steps)
}

/// Validate global-report candidates, keeping only files whose every task
/// exposes a `steps` list. Invalid candidates are logged and excluded
/// wholesale, never partially processed.
pub fn valid_global_reports(candidates: &[PathBuf]) -> Vec<PathBuf> {
    candidates
        .iter()
        .filter(|path| match parse_global_report(path) {
            Ok(_) => true,
            Err(err) => {
                info!("{} is not a valid global report: {err}", path.display());
                false
            }
        })
        .cloned()
        .collect()
}

/// Expand report arguments (files or directories) into XML report paths and
/// global-report candidates. Directory trees are walked for `*.xml` files
/// and `report.json` files; XML paths are then filtered on the requested
/// platform names.
pub fn discover_reports(
    inputs: &[PathBuf],
    platforms: &[String],
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let xml_matcher = glob_set("*.xml")?;
    let mut xml_reports = Vec::new();
    let mut global_candidates = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|err| {
                    RailError::invalid_report(input, format!("walk failed: {err}"))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let file_name = entry.file_name();
                if file_name == GLOBAL_REPORT_NAME {
                    global_candidates.push(entry.path().to_path_buf());
                } else if xml_matcher.is_match(Path::new(file_name)) {
                    xml_reports.push(entry.path().to_path_buf());
                }
            }
        } else {
            xml_reports.push(input.clone());
        }
    }

    xml_reports.retain(|path| {
        let path_text = path.to_string_lossy().to_lowercase();
        // Override-section reports may embed no platform at all; they get
        // the override's default platform at classification time.
        if SECTION_OVERRIDES
            .iter()
            .any(|(needle, _)| path_text.contains(needle))
        {
            return true;
        }
        platforms
            .iter()
            .any(|platform| path_text.contains(&platform.to_lowercase()))
    });

    debug!("discovered {} xml report(s)", xml_reports.len());
    Ok((xml_reports, valid_global_reports(&global_candidates)))
}

/// Classify report paths by section and platform.
///
/// Section inference scans the known section names in catalog order and the
/// LAST substring match wins; platform inference takes the FIRST match.
/// Both orders are deterministic and part of the contract. Reports hitting
/// a `SECTION_OVERRIDES` key take that section unconditionally and default
/// to the override's platform when the path embeds none. Unclassifiable
/// reports are kept as skip candidates and warned about.
pub fn classify_reports(
    paths: &[PathBuf],
    section_names: &[String],
    platforms: &[String],
) -> Vec<Report> {
    let mut reports = Vec::new();

    for path in paths {
        let path_text = path.to_string_lossy().to_lowercase();

        let mut section = None;
        let mut default_platform = None;
        for (needle, platform) in SECTION_OVERRIDES {
            if path_text.contains(needle) {
                section = Some((*needle).to_string());
                default_platform = Some((*platform).to_string());
                break;
            }
        }
        if section.is_none() {
            for name in section_names {
                if path_text.contains(&name.to_lowercase()) {
                    section = Some(name.clone());
                }
            }
        }

        let mut platform = None;
        for candidate in platforms {
            if path_text.contains(&candidate.to_lowercase()) {
                platform = Some(candidate.to_lowercase());
                break;
            }
        }
        if platform.is_none() && section.is_some() {
            platform = default_platform;
        }

        if section.is_none() {
            warn!(
                "no section found for {}; the section must be in the report path; \
                 available sections: {section_names:?}",
                path.display()
            );
        }

        reports.push(Report {
            path: path.clone(),
            section,
            platform,
        });
    }

    reports
}

fn glob_set(pattern: &str) -> Result<GlobSet> {
    let glob = Glob::new(pattern)
        .map_err(|err| RailError::Validation(format!("bad glob {pattern}: {err}")))?;
    GlobSetBuilder::new()
        .add(glob)
        .build()
        .map_err(|err| RailError::Validation(format!("bad glob set: {err}")))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create fixture");
        file.write_all(content.as_bytes()).expect("write fixture");
        path
    }

    const JUNIT_SAMPLE: &str = r#"<?xml version="1.0"?>
<testsuite name="sample" tests="4">
  <testcase classname="suite.http" name="test_put" time="1.5"/>
  <testcase classname="suite.http" name="test_get" time="0.2">
    <failure message="status 500">stack frame one
stack frame two</failure>
  </testcase>
  <testcase classname="suite.http" name="test_delete" time="0">
    <skipped message="not supported"/>
  </testcase>
  <testcase classname="suite.http" name="test_head" time="3.9"/>
</testsuite>
"#;

    #[test]
    fn junit_outcomes_are_ordered_and_classified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, "report_http_centos7.xml", JUNIT_SAMPLE);

        let outcomes = parse_junit(&path).expect("parse");
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].identifier, "suite.http.test_put");
        assert_eq!(outcomes[0].outcome, Outcome::Pass);
        assert!((outcomes[0].elapsed - 1.5).abs() < f64::EPSILON);

        assert_eq!(outcomes[1].outcome, Outcome::Failure);
        assert_eq!(outcomes[1].message.as_deref(), Some("status 500"));
        assert_eq!(
            outcomes[1].trace.as_deref(),
            Some("stack frame one\nstack frame two")
        );

        assert_eq!(outcomes[2].outcome, Outcome::Skipped);
        assert_eq!(outcomes[2].message.as_deref(), Some("not supported"));
        assert_eq!(outcomes[2].trace, None);

        assert_eq!(outcomes[3].outcome, Outcome::Pass);
    }

    #[test]
    fn junit_empty_identifier_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(
            &dir,
            "report.xml",
            r#"<testsuite><testcase/><testcase classname="a" name="b"/></testsuite>"#,
        );

        let outcomes = parse_junit(&path).expect("parse");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].identifier, "a.b");
    }

    #[test]
    fn junit_first_child_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(
            &dir,
            "report.xml",
            r#"<testsuite><testcase classname="a" name="b">
                 <error message="boom">trace</error>
                 <skipped/>
               </testcase></testsuite>"#,
        );

        let outcomes = parse_junit(&path).expect("parse");
        assert_eq!(outcomes[0].outcome, Outcome::Error);
        assert_eq!(outcomes[0].message.as_deref(), Some("boom"));
    }

    #[test]
    fn junit_unknown_child_defaults_to_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(
            &dir,
            "report.xml",
            r#"<testsuite><testcase classname="a" name="b">
                 <system-out>noise</system-out>
               </testcase></testsuite>"#,
        );

        let outcomes = parse_junit(&path).expect("parse");
        assert_eq!(outcomes[0].outcome, Outcome::Pass);
    }

    const GLOBAL_SAMPLE: &str = r#"[
      {
        "task_infos": {"task_name": "http_suite", "permutation": "centos7"},
        "steps": [
          {"step_name": "setup", "failed": true},
          {"step_name": "run", "failed": true},
          {"step_name": "requirements", "failed": false}
        ]
      },
      {
        "task_infos": {"task_name": "fuse_suite", "permutation": "xenial"},
        "steps": [{"step_name": "requirements", "failed": true}]
      }
    ]"#;

    #[test]
    fn global_report_keeps_only_relevant_failed_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(&dir, GLOBAL_REPORT_NAME, GLOBAL_SAMPLE);

        let failed = parse_global_report(&path).expect("parse");
        assert_eq!(failed.len(), 2);

        let setup = failed.get("http_suite_centos7_setup").expect("setup entry");
        assert_eq!(setup.platform, "centos7");
        assert_eq!(setup.step, StepKind::Setup);

        let requirements = failed
            .get("fuse_suite_xenial_requirements")
            .expect("requirements entry");
        assert_eq!(requirements.step, StepKind::Requirements);
    }

    #[test]
    fn global_report_without_steps_is_rejected_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_fixture(
            &dir,
            GLOBAL_REPORT_NAME,
            r#"[{"steps": [{"step_name": "setup", "failed": true}]}, {"task_infos": {}}]"#,
        );

        assert!(parse_global_report(&path).is_err());
        assert!(valid_global_reports(&[path]).is_empty());
    }

    #[test]
    fn discovery_expands_directories_and_filters_platforms() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture(&dir, "report_http_centos7.xml", JUNIT_SAMPLE);
        write_fixture(&dir, "report_http_windows.xml", JUNIT_SAMPLE);
        write_fixture(&dir, GLOBAL_REPORT_NAME, GLOBAL_SAMPLE);
        write_fixture(&dir, "notes.txt", "not a report");

        let (xml, global) = discover_reports(
            &[dir.path().to_path_buf()],
            &["centos7".to_string(), "xenial".to_string()],
        )
        .expect("discover");

        assert_eq!(xml.len(), 1);
        assert!(xml[0].ends_with("report_http_centos7.xml"));
        assert_eq!(global.len(), 1);
    }

    #[test]
    fn discovery_keeps_override_reports_without_platform_in_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture(&dir, "report_undelete.xml", JUNIT_SAMPLE);

        let platforms = vec!["xenial".to_string(), "centos7".to_string()];
        let (xml, _) = discover_reports(&[dir.path().to_path_buf()], &platforms)
            .expect("discover");
        assert_eq!(xml.len(), 1);

        // Through classification the override section applies and the
        // platform falls back to the override's default.
        let reports = classify_reports(&xml, &["http".to_string()], &platforms);
        assert_eq!(reports[0].section.as_deref(), Some("undelete"));
        assert_eq!(reports[0].platform.as_deref(), Some("centos7"));
    }

    #[test]
    fn classification_last_section_match_wins_first_platform_match_wins() {
        let sections = vec!["http".to_string(), "http_extended".to_string()];
        let platforms = vec!["xenial".to_string(), "centos7".to_string()];
        let paths = vec![PathBuf::from("reports/report_http_extended_centos7.xml")];

        let reports = classify_reports(&paths, &sections, &platforms);
        assert_eq!(reports[0].section.as_deref(), Some("http_extended"));
        assert_eq!(reports[0].platform.as_deref(), Some("centos7"));
    }

    #[test]
    fn classification_override_sections_take_priority() {
        let sections = vec!["http".to_string()];
        let platforms = vec!["xenial".to_string(), "centos7".to_string()];
        let paths = vec![PathBuf::from("reports/report_undelete_http.xml")];

        let reports = classify_reports(&paths, &sections, &platforms);
        assert_eq!(reports[0].section.as_deref(), Some("undelete"));
        // No platform in the path: the override's default platform applies.
        assert_eq!(reports[0].platform.as_deref(), Some("centos7"));
    }

    #[test]
    fn classification_without_section_is_a_skip_candidate() {
        let sections = vec!["http".to_string()];
        let platforms = vec!["centos7".to_string()];
        let paths = vec![PathBuf::from("reports/report_mystery_centos7.xml")];

        let reports = classify_reports(&paths, &sections, &platforms);
        assert_eq!(reports[0].section, None);
        assert_eq!(reports[0].platform.as_deref(), Some("centos7"));
    }
}
