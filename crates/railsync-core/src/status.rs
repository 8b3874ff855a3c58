use std::collections::HashSet;

use crate::normalize::normalize;
use crate::report::{Outcome, RawOutcome, StepKind};

/// Backend status taxonomy. The numeric values are a wire contract shared
/// with the backend's custom statuses, not an implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    KnownFailedOk,
    EnvSetupFailed,
    EnvRequirementsFailed,
    KnownFailed,
    FlakyPassed,
    FlakyFailed,
}

impl Status {
    pub const fn id(self) -> u8 {
        match self {
            Self::Passed => 1,
            Self::Failed => 5,
            Self::Skipped => 6,
            Self::KnownFailedOk => 7,
            Self::EnvSetupFailed => 8,
            Self::EnvRequirementsFailed => 9,
            Self::KnownFailed => 10,
            Self::FlakyPassed => 11,
            Self::FlakyFailed => 12,
        }
    }

    pub const fn for_step(step: StepKind) -> Self {
        match step {
            StepKind::Setup => Self::EnvSetupFailed,
            StepKind::Requirements => Self::EnvRequirementsFailed,
        }
    }
}

/// Classify a raw outcome into a final status and annotated comment.
///
/// Base mapping: pass -> passed, failure/error -> failed, skipped ->
/// skipped. Known-failed membership is checked before flaky membership; a
/// test present in both sets only receives the known-failed override.
/// `flaky` and `known_failed` hold normalized titles; the identifier is
/// normalized the same way before the membership checks.
pub fn classify(
    outcome: &RawOutcome,
    flaky: &HashSet<String>,
    known_failed: &HashSet<String>,
    description: &str,
) -> (Status, String) {
    let base = match outcome.outcome {
        Outcome::Pass => Status::Passed,
        Outcome::Failure | Outcome::Error => Status::Failed,
        Outcome::Skipped => Status::Skipped,
    };

    let mut comment = String::from(description);
    if outcome.outcome.is_pass() {
        comment.push_str("OK");
    } else {
        let message = outcome.message.as_deref().unwrap_or_default();
        let trace = outcome.trace.as_deref().unwrap_or("No trace");
        comment.push_str(&format!(
            "***\n# Error message\n{message}\n***\n# Traceback\n{trace}\n***\n"
        ));
    }

    let identifier = normalize(&outcome.identifier);
    if known_failed.contains(&identifier) {
        match base {
            Status::Failed => {
                return (
                    Status::KnownFailed,
                    format!("*** Known failed test ***\n{comment}"),
                );
            }
            Status::Passed => {
                return (
                    Status::KnownFailedOk,
                    format!("*** Known failed test PASSED (!)***\n{comment}"),
                );
            }
            _ => {}
        }
    } else if flaky.contains(&identifier) {
        match base {
            Status::Passed => {
                return (Status::FlakyPassed, format!("*** flaky test OK ***\n{comment}"));
            }
            Status::Failed => {
                return (
                    Status::FlakyFailed,
                    format!("*** flaky test FAILED ***\n{comment}"),
                );
            }
            _ => {}
        }
    }

    (base, comment)
}

/// Elapsed time truncated to whole seconds and suffixed; zero or absent
/// values are omitted entirely, never serialized as "0s".
pub fn format_elapsed(elapsed: f64) -> Option<String> {
    let seconds = elapsed.max(0.0) as u64;
    if seconds == 0 {
        None
    } else {
        Some(format!("{seconds}s"))
    }
}

/// First substring match of a section name inside a failed-step task key.
/// Iteration order over `section_names` is significant and must be the
/// backend catalog order.
pub fn match_task_section<'a>(task_key: &str, section_names: &'a [String]) -> Option<&'a str> {
    section_names
        .iter()
        .find(|section| task_key.contains(section.as_str()))
        .map(String::as_str)
}
