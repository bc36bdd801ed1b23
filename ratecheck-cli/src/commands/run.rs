//! `ratecheck run` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use ratecheck_core::config::RatecheckConfig;
use ratecheck_harness::{
    HarnessConfig, HttpTrafficGenerator, KubectlExecTrafficGenerator, KubectlPlatform,
    PolicyVariant, RoutedTrafficGenerator, ScenarioOutcome, ScenarioStatus, Suite, SuiteReport,
    TrafficGenerator,
};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `run` command.
///
/// Provisions the environment, runs the selected scenarios and tears the
/// environment down. The report is rendered even when scenarios fail.
///
/// # Errors
///
/// - `CliError::Core` (exit 2/3) for configuration or provisioning failures
/// - `CliError::ScenariosFailed` (exit 1) when any scenario did not pass
pub async fn execute(
    args: RunArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let mut config = super::load_config(config_path).await?;
    if args.keep_environment {
        config.environment.keep_environment = true;
    }
    if args.via_gateway {
        config.traffic.via_gateway = true;
    }

    let harness_config = HarnessConfig::from_core(&config);
    harness_config.validate()?;
    ratecheck_core::metrics::describe_all();

    let variants = args.variant.variants();
    info!(
        variants = ?variants,
        via_gateway = config.traffic.via_gateway,
        keep_environment = config.environment.keep_environment,
        "starting rate-limit verification suite"
    );

    // Gateway traffic leaves from this process; cluster-internal canaries stay in the mesh.
    let report = if config.traffic.via_gateway {
        let generator = RoutedTrafficGenerator::new(
            HttpTrafficGenerator::from_config(&config)?,
            KubectlExecTrafficGenerator::from_config(&config),
        );
        run_suite(&config, harness_config, generator, &variants).await?
    } else {
        let generator = KubectlExecTrafficGenerator::from_config(&config);
        run_suite(&config, harness_config, generator, &variants).await?
    };

    let payload = RunReport {
        config: config_path.display().to_string(),
        report,
    };
    writer.render(&payload)?;

    if !payload.report.all_passed() {
        return Err(CliError::ScenariosFailed {
            failed: payload.report.failed(),
            total: payload.report.outcomes.len(),
        });
    }

    Ok(())
}

async fn run_suite<G: TrafficGenerator>(
    config: &RatecheckConfig,
    harness_config: HarnessConfig,
    generator: G,
    variants: &[PolicyVariant],
) -> Result<SuiteReport, CliError> {
    let platform = Arc::new(KubectlPlatform::from_config(config));
    let suite = Suite::new(harness_config, platform, Arc::new(generator));
    Ok(suite.run(variants).await?)
}

/// Output payload for `ratecheck run`.
#[derive(Serialize)]
pub struct RunReport {
    /// Configuration file the suite ran with.
    pub config: String,
    /// Suite outcome.
    #[serde(flatten)]
    pub report: SuiteReport,
}

fn retraction_label(outcome: &ScenarioOutcome) -> &'static str {
    match (&outcome.status, &outcome.retract_error) {
        (_, Some(_)) => "failed",
        (ScenarioStatus::Aborted { .. }, None) => "-",
        (_, None) => "ok",
    }
}

impl Render for RunReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Rate-limit verification ({})", self.config)?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<8} {:<8} {:>8} {:>10} {:>10} {:<10}",
            "Variant", "Result", "Requests", "Throttled", "Errors", "Retraction"
        )?;
        writeln!(w, "{}", "-".repeat(59))?;

        for outcome in &self.report.outcomes {
            let (requests, throttled, errors) = match &outcome.summary {
                Some(s) => (
                    s.total.to_string(),
                    s.throttled.to_string(),
                    s.transport_errors.to_string(),
                ),
                None => ("-".to_owned(), "-".to_owned(), "-".to_owned()),
            };
            writeln!(
                w,
                "{:<8} {:<8} {:>8} {:>10} {:>10} {:<10}",
                outcome.variant.name(),
                outcome.status.label(),
                requests,
                throttled,
                errors,
                retraction_label(outcome)
            )?;
        }

        let details: Vec<&ScenarioOutcome> = self
            .report
            .outcomes
            .iter()
            .filter(|o| !o.passed() || o.retract_error.is_some() || o.released == Some(false))
            .collect();
        if !details.is_empty() {
            writeln!(w)?;
            for outcome in details {
                if !outcome.passed() {
                    writeln!(w, "  {}: {}", outcome.variant, outcome.status)?;
                }
                if let Some(err) = &outcome.retract_error {
                    writeln!(w, "  {}: retraction failed: {err}", outcome.variant)?;
                }
                if outcome.released == Some(false) {
                    writeln!(w, "  {}: still throttled after retraction", outcome.variant)?;
                }
            }
        }

        writeln!(w)?;
        writeln!(
            w,
            "{} scenario(s): {} passed, {} failed",
            self.report.outcomes.len(),
            self.report.passed(),
            self.report.failed()
        )?;
        Ok(())
    }
}
