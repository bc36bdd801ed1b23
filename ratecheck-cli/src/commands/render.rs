//! `ratecheck render` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use ratecheck_harness::template;
use ratecheck_harness::{HarnessConfig, PolicyVariant, TemplateParams};

use crate::cli::{RenderArgs, VariantArg};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `render` command.
///
/// Renders the policy template for one variant exactly as a scenario would,
/// without contacting the cluster.
pub async fn execute(
    args: RenderArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let variant = match args.variant {
        VariantArg::Global => PolicyVariant::Global,
        VariantArg::Local => PolicyVariant::Local,
        VariantArg::All => {
            return Err(CliError::Command(
                "render needs a single variant (global or local)".to_owned(),
            ));
        }
    };

    let config = super::load_config(config_path).await?;
    let harness_config = HarnessConfig::from_core(&config);
    let path = match variant {
        PolicyVariant::Global => &harness_config.global_template,
        PolicyVariant::Local => &harness_config.local_template,
    };

    info!(variant = %variant, template = %path.display(), "rendering policy template");

    let text = template::load(path).await?;
    let content = TemplateParams::new(args.echo_namespace, args.ratelimit_namespace)
        .with_server(&harness_config.server_service, harness_config.server_service_port)
        .render(&text)?;
    let documents = template::validate_documents(&content)?;

    writer.render(&RenderReport {
        variant,
        template: path.display().to_string(),
        documents,
        content,
    })?;

    Ok(())
}

/// Output payload for `ratecheck render`.
#[derive(Serialize)]
pub struct RenderReport {
    /// Rendered variant.
    pub variant: PolicyVariant,
    /// Template file.
    pub template: String,
    /// Number of YAML documents.
    pub documents: usize,
    /// Rendered text.
    pub content: String,
}

impl Render for RenderReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        write!(w, "{}", self.content)?;
        if !self.content.ends_with('\n') {
            writeln!(w)?;
        }
        Ok(())
    }
}
