//! Command-line interface of the campaign runner.

use std::path::PathBuf;

use clap::Parser;

/// Run campaigns through the pipeline against an in-process simulated broker.
#[derive(Debug, Parser)]
#[command(name = "campaign-runner", version, about)]
pub struct Cli {
    /// Names of the campaigns to create and run.
    #[arg(default_value = "demo campaign")]
    pub campaigns: Vec<String>,

    /// Path to a TOML file with pipeline tunables.
    #[arg(long, env = "CAMPAIGN_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,

    /// Print every pipeline event as a server-sent-event frame on stdout.
    #[arg(long, default_value_t = false)]
    pub sse: bool,

    /// The simulated broker answers every Nth submission with a 503.
    #[arg(long)]
    pub fail_every: Option<u32>,

    /// Times each simulated task reports `running` before it succeeds.
    #[arg(long, default_value_t = 2)]
    pub running_polls: u32,

    /// Start offline and regain connectivity after this many seconds.
    #[arg(long)]
    pub outage_secs: Option<u64>,
}
