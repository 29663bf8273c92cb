//! Existing-resource export pipeline
//!
//! Request → resolve kinds → workspace → exporter → normalize → archive.
//! Every failure after the workspace exists releases it before the error is
//! returned; on success the workspace travels with the [`PreparedArchive`] and is
//! released once the archive has been delivered.

pub mod archive;
pub mod error;
pub mod normalizer;
pub mod prompt;
pub mod request;
pub mod scaffold;
pub mod supervisor;
pub mod workspace;

use anyhow::Result;
use axum::body::Body;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cloud::credential::CredentialProvider;
use crate::cloud::{self, ControlPlane};
use crate::config::Config;
use crate::traits::FileSystem;

pub use error::{ExportError, ExportResult};
pub use normalizer::NormalizationSummary;
pub use request::{ExportRequest, ExportRequestBody, ResourceSelection};

use normalizer::{ExportTarget, OutputNormalizer};
use prompt::MarkerPromptDriver;
use supervisor::{ExportSupervisor, ExporterInvocation};
use workspace::{CleanupGuard, ExportWorkspace};

/// What the exporter is asked to import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExport {
    /// Sorted, deduplicated resource kinds
    pub kinds: Vec<String>,
    /// Resource ID filter; empty when exporting whole kinds
    pub resource_ids: Vec<String>,
}

/// A finished export whose workspace is still alive
pub struct PreparedArchive {
    guard: CleanupGuard,
    pub summary: NormalizationSummary,
    pub download_name: String,
}

impl PreparedArchive {
    pub fn archive_path(&self) -> &Path {
        self.guard.workspace().archive_path()
    }

    /// Response body that streams the archive and then releases the workspace
    pub fn into_body(self) -> Body {
        let path = self.archive_path().to_path_buf();
        archive::stream_archive(path, self.guard)
    }

    /// Release the workspace without streaming
    pub async fn finish(self) {
        self.guard.finish().await;
    }
}

pub struct ExportPipeline {
    config: Arc<Config>,
    control_plane: Arc<dyn ControlPlane>,
    normalizer: Arc<OutputNormalizer>,
    supervisor: ExportSupervisor,
}

impl ExportPipeline {
    pub fn new(
        config: Arc<Config>,
        control_plane: Arc<dyn ControlPlane>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        Ok(Self {
            supervisor: ExportSupervisor::new(&config.exporter),
            normalizer: Arc::new(OutputNormalizer::new(fs)?),
            control_plane,
            config,
        })
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Turn the selection into exporter filters.
    ///
    /// In ID mode the container is enumerated and only selected resources that
    /// exist and have a mapping are passed on, with their kinds.
    pub async fn resolve(
        &self,
        request: &ExportRequest,
        credential: &dyn CredentialProvider,
    ) -> ExportResult<ResolvedExport> {
        match &request.selection {
            ResourceSelection::Kinds(kinds) => Ok(ResolvedExport {
                kinds: kinds.iter().cloned().collect(),
                resource_ids: Vec::new(),
            }),
            ResourceSelection::Ids(ids) => {
                let resources = cloud::discover_resources(
                    self.control_plane.as_ref(),
                    credential,
                    &request.account_id,
                    &request.container,
                )
                .await
                .map_err(ExportError::enumeration)?;

                let selected = cloud::select_by_ids(&resources, ids);
                if selected.is_empty() {
                    return Err(ExportError::Validation(
                        "None of the selected resources can be exported".to_string(),
                    ));
                }
                if selected.len() < ids.len() {
                    tracing::warn!(
                        requested = ids.len(),
                        exportable = selected.len(),
                        "Skipping resource IDs that are unknown or cannot be exported"
                    );
                }

                let kinds: BTreeSet<String> = selected
                    .iter()
                    .filter_map(|r| r.mapped_kind.clone())
                    .collect();
                let resource_ids: BTreeSet<String> =
                    selected.iter().map(|r| r.id.clone()).collect();

                Ok(ResolvedExport {
                    kinds: kinds.into_iter().collect(),
                    resource_ids: resource_ids.into_iter().collect(),
                })
            }
        }
    }

    /// Run a whole export; the returned archive owns the workspace
    pub async fn run(
        &self,
        request: &ExportRequest,
        credential: Arc<dyn CredentialProvider>,
    ) -> ExportResult<PreparedArchive> {
        let resolved = self.resolve(request, credential.as_ref()).await?;

        let workspace = ExportWorkspace::create(&self.config.workspace.work_dir, &request.container)?;
        tracing::info!(
            container = %request.container,
            workspace = %workspace.root().display(),
            kinds = ?resolved.kinds,
            "Starting export"
        );
        let guard = CleanupGuard::new(workspace);

        match self
            .export_into(request, &resolved, credential.as_ref(), guard.workspace())
            .await
        {
            Ok(summary) => Ok(PreparedArchive {
                guard,
                summary,
                download_name: download_name(&request.container),
            }),
            Err(e) => {
                guard.finish().await;
                Err(e)
            }
        }
    }

    async fn export_into(
        &self,
        request: &ExportRequest,
        resolved: &ResolvedExport,
        credential: &dyn CredentialProvider,
        workspace: &ExportWorkspace,
    ) -> ExportResult<NormalizationSummary> {
        // The exporter can fall back to its own login, so a missing token is not fatal
        let token = match credential.access_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(error = %e, "No management token for the exporter environment");
                None
            }
        };

        let invocation = ExporterInvocation::build(
            &self.config.exporter,
            &request.account_id,
            &request.container,
            workspace.output_dir(),
            &resolved.kinds,
            &resolved.resource_ids,
            token.as_ref(),
        )
        .with_tenant(credential.tenant_id());
        let mut driver = MarkerPromptDriver::new(self.config.exporter.prompt.clone());
        let transcript = self.supervisor.run(&invocation, &mut driver).await?;
        tracing::debug!(
            stdout = %transcript.stdout,
            stderr = %transcript.stderr,
            "Exporter finished"
        );

        let normalizer = Arc::clone(&self.normalizer);
        let output_dir: PathBuf = workspace.output_dir().to_path_buf();
        let subscription_id = request.account_id.clone();
        let resource_group = request.container.clone();
        let provider_version = self.config.azure.provider_version.clone();

        let summary = tokio::task::spawn_blocking(move || {
            normalizer.normalize(
                &output_dir,
                &ExportTarget {
                    subscription_id: &subscription_id,
                    resource_group: &resource_group,
                    provider_version: &provider_version,
                },
            )
        })
        .await
        .map_err(|e| ExportError::Normalization(format!("normalization task failed: {}", e)))?
        .map_err(ExportError::normalization)?;

        archive::build_archive(workspace.output_dir(), workspace.archive_path()).await?;

        Ok(summary)
    }
}

/// File name offered to the client
pub fn download_name(container: &str) -> String {
    let safe: String = container
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-terraform.zip", safe)
}
