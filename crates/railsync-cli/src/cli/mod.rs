use clap::{Parser, Subcommand};

mod args;


pub use args::{AddCasesArgs, AddResultsArgs, ClosePlansArgs, ReportSource, SweepArgs};

#[derive(Debug, Parser)]
#[command(name = "railsync")]
#[command(about = "Sync CI test reports into the test-management backend", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile report identifiers against the suite catalog, creating
    /// missing cases.
    AddCases(AddCasesArgs),
    /// Upload report results into a plan run, reconciling cases first.
    AddResults(AddResultsArgs),
    /// Close every open plan whose name starts with the given pattern.
    ClosePlans(ClosePlansArgs),
    /// Close or delete plans older than the retention window.
    Sweep(SweepArgs),
}
