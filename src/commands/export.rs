use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cloud::credential::CredentialProvider;
use crate::cloud::{AzureControlPlane, ControlPlane};
use crate::config::Config;
use crate::context::Context as AppContext;
use crate::export::{ExportPipeline, ExportRequest, ExportRequestBody, NormalizationSummary};

/// Arguments of a one-shot export
#[derive(Debug, Clone, Default)]
pub struct ExportArgs {
    pub subscription: String,
    pub resource_group: String,
    pub kinds: Vec<String>,
    pub ids: Vec<String>,
    /// Where the archive is written; `./<group>-terraform.zip` when unset
    pub output: Option<PathBuf>,
}

/// Handles the 'export' command - runs one export without the HTTP server
pub struct ExportCommand;

impl ExportCommand {
    /// Execute the export command
    pub fn execute(ctx: &AppContext, config: Config, args: ExportArgs) -> Result<()> {
        let config = Arc::new(config);
        let credential = super::credential_from_config(ctx, &config);
        let control_plane = Arc::new(AzureControlPlane::with_endpoint(&config.azure.endpoint)?);

        let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
        runtime.block_on(Self::run(ctx, config, control_plane, credential, args))?;

        Ok(())
    }

    async fn run(
        ctx: &AppContext,
        config: Arc<Config>,
        control_plane: Arc<dyn ControlPlane>,
        credential: Arc<dyn CredentialProvider>,
        args: ExportArgs,
    ) -> Result<PathBuf> {
        let request = ExportRequest::from_body(ExportRequestBody {
            control_plane_account_id: Some(args.subscription),
            resource_container: Some(args.resource_group),
            resource_kinds: args.kinds,
            resource_ids: args.ids,
        })?;

        ctx.output.section("Exporting resources");
        ctx.output.key_value("Subscription", &request.account_id);
        ctx.output.key_value("Resource group", &request.container);
        ctx.output.key_value("Credential", &credential.describe());
        ctx.output.blank();
        ctx.output
            .info("Running the exporter, this can take several minutes");

        let pipeline = ExportPipeline::new(config, control_plane, Arc::clone(&ctx.fs))?;
        let prepared = pipeline.run(&request, credential).await?;

        let destination = args
            .output
            .unwrap_or_else(|| PathBuf::from(&prepared.download_name));
        let copied = tokio::fs::copy(prepared.archive_path(), &destination).await;
        let summary = prepared.summary.clone();
        prepared.finish().await;

        copied.with_context(|| format!("Failed to write archive to {:?}", destination))?;

        Self::print_summary(ctx, &summary);
        ctx.output.success(&format!(
            "Terraform configuration written to {}",
            destination.display()
        ));

        Ok(destination)
    }

    fn print_summary(ctx: &AppContext, summary: &NormalizationSummary) {
        ctx.output.key_value("Files processed", &summary.files_processed.to_string());
        if summary.files_dropped > 0 {
            ctx.output
                .dimmed(&format!("{} empty file(s) dropped", summary.files_dropped));
        }

        for (kind, count) in &summary.kinds {
            ctx.output.list_item(&format!("{}.tf ({} block(s))", kind, count));
        }
        ctx.output.blank();
    }
}
