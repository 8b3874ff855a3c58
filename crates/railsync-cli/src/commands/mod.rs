use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use railsync_core::catalog::{self, CreationLedger};
use railsync_core::report;
use railsync_core::sweeper::{self, DEFAULT_EXCLUDE_PATTERNS, SweepAction};
use railsync_core::upload::{self, NotFoundSink};
use railsync_core::{RailClient, RailConfig};
use tracing::{info, warn};

use crate::cli::{AddCasesArgs, AddResultsArgs, ClosePlansArgs, Commands, SweepArgs};

mod support;

use self::support::{build_description, collect_reports};

pub(crate) fn run(command: Commands) -> Result<()> {
    let config = RailConfig::from_env()?;
    let client = RailClient::new(&config)?;

    match command {
        Commands::AddCases(args) => run_add_cases(&config, &client, args),
        Commands::AddResults(args) => run_add_results(&config, &client, args),
        Commands::ClosePlans(args) => run_close_plans(&client, &args),
        Commands::Sweep(args) => run_sweep(&client, args),
    }
}

fn run_add_cases(config: &RailConfig, client: &RailClient, args: AddCasesArgs) -> Result<()> {
    let collected = collect_reports(
        config,
        client,
        &args.suite,
        &args.source,
        &args.exclude_sections,
    )?;

    let reconciliation = catalog::reconcile(client, &collected.reports, &args.suite)?;
    info!("{} missing test case(s)", reconciliation.missing_count());

    let mut ledger = CreationLedger::preload(reconciliation.existing.clone());
    let created = catalog::create_missing(client, &args.suite, &reconciliation.missing, &mut ledger)?;
    info!("added {created} new test case(s) to suite {}", args.suite);
    Ok(())
}

fn run_add_results(config: &RailConfig, client: &RailClient, args: AddResultsArgs) -> Result<()> {
    info!("version: {}", args.version);
    info!("suite: {}", args.suite);

    // The milestone carries the release train; absent an explicit one the
    // suite name is the train.
    let milestone = args.milestone.clone().unwrap_or_else(|| args.suite.clone());

    let collected = collect_reports(
        config,
        client,
        &args.suite,
        &args.source,
        &args.exclude_sections,
    )?;
    let description = build_description(&collected.upload_location, &args.reason);

    // Reconciliation first: results can only land on cases the catalog knows.
    let reconciliation = catalog::reconcile(client, &collected.reports, &args.suite)?;
    info!("{} missing test case(s)", reconciliation.missing_count());
    let mut ledger = CreationLedger::preload(reconciliation.existing.clone());
    let created = catalog::create_missing(client, &args.suite, &reconciliation.missing, &mut ledger)?;
    if created > 0 {
        info!("added {created} new test case(s)");
    }

    let mut sink = NotFoundSink::open(&args.not_found_file)?;
    let summary = upload::put_results_from_reports(
        client,
        &args.version,
        &args.suite,
        Some(&milestone),
        &collected.reports,
        &collected.platforms,
        &description,
        &mut sink,
    )?;
    info!("put {} result(s)", summary.results_posted);

    for global in &collected.global_reports {
        let failed_steps = report::parse_global_report(global)?;
        info!("{}: {} failed step(s)", global.display(), failed_steps.len());
        upload::mass_tag_environment_failures(
            client,
            &failed_steps,
            &args.version,
            &args.suite,
            &args.exclude_sections,
            &description,
        )?;
    }

    if args.close_plan {
        info!("closing plan {}", summary.plan_id);
        let response = client.close_plan(summary.plan_id)?;
        if !response.is_ok() {
            warn!("close_plan rejected: status {}", response.status);
        }
    }

    let url = client.plan_url(summary.plan_id);
    info!("plan: {url}");
    if let Some(linkfile) = &args.linkfile {
        fs::write(linkfile, &url)
            .with_context(|| format!("cannot write linkfile {}", linkfile.display()))?;
    }
    Ok(())
}

fn run_close_plans(client: &RailClient, args: &ClosePlansArgs) -> Result<()> {
    sweeper::close_plans_matching(client, &args.pattern)?;
    Ok(())
}

fn run_sweep(client: &RailClient, args: SweepArgs) -> Result<()> {
    let exclude = if args.exclude.is_empty() {
        DEFAULT_EXCLUDE_PATTERNS
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        args.exclude
    };
    let action = if args.delete {
        SweepAction::Delete
    } else {
        SweepAction::Close
    };

    let outcome = sweeper::sweep(
        client,
        chrono::Utc::now().timestamp(),
        args.retention_secs,
        &exclude,
        Duration::from_secs(args.duration_secs),
        action,
    )?;
    info!(
        "sweep done: {} plan(s) acted on, {} kept",
        outcome.acted.len(),
        outcome.kept.len()
    );
    Ok(())
}
