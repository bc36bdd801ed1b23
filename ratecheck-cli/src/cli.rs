//! `ratecheck` command line definition
//!
//! Declarative clap types only. Handlers live in [`crate::commands`].

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ratecheck_harness::PolicyVariant;

/// ratecheck -- verify that mesh rate-limit policies actually throttle traffic.
///
/// Use `ratecheck <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "ratecheck", version, about, long_about = None)]
pub struct Cli {
    /// Path to the ratecheck.toml configuration file.
    #[arg(short, long, default_value = "ratecheck.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Tables and raw rendered policies.
    Text,
    /// Pretty-printed JSON reports.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a test environment and run the policy scenarios.
    Run(RunArgs),

    /// Render a policy template without touching the cluster.
    Render(RenderArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

/// Policy variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    /// Global rate limiting through the external decision service.
    Global,
    /// Local rate limiting inside each sidecar.
    Local,
    /// Every variant, in order.
    All,
}

impl VariantArg {
    /// Expands the selection into the variants to run.
    pub fn variants(self) -> Vec<PolicyVariant> {
        match self {
            Self::Global => vec![PolicyVariant::Global],
            Self::Local => vec![PolicyVariant::Local],
            Self::All => PolicyVariant::all().to_vec(),
        }
    }
}

// ---- run ----

/// Run the verification suite.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Which policy variant(s) to verify.
    #[arg(long, default_value = "all")]
    pub variant: VariantArg,

    /// Keep the workload groups after the run for debugging.
    #[arg(long)]
    pub keep_environment: bool,

    /// Send traffic through the ingress gateway instead of from the client workload.
    #[arg(long)]
    pub via_gateway: bool,
}

// ---- render ----

/// Render a policy template with the given group names.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Policy variant to render (global or local).
    #[arg(long)]
    pub variant: VariantArg,

    /// Name of the client/server workload group.
    #[arg(long)]
    pub echo_namespace: String,

    /// Name of the decision service workload group.
    #[arg(long)]
    pub ratelimit_namespace: String,
}

// ---- config ----

/// Manage ratecheck configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Check that the configuration file loads and passes validation.
    Validate,
    /// Print the configuration a run would use.
    Show {
        /// Show only a specific section (general, cluster, environment, policy, traffic).
        #[arg(long)]
        section: Option<String>,
    },
}
