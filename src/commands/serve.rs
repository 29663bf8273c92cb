use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Json, Path, State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cloud::{self, CredentialStore, DiscoveredResource, ResourceDescriptor};
use crate::config::Config;
use crate::context::Context as AppContext;
use crate::export::request::validate_identifier;
use crate::export::{ExportError, ExportPipeline, ExportRequest, ExportRequestBody, ExportResult};

/// Handles the 'serve' command - starts the HTTP API
pub struct ServeCommand;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ExportPipeline>,
    pub credentials: Arc<CredentialStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceKindsResponse {
    success: bool,
    resource_types: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourcesResponse {
    success: bool,
    resources: BTreeMap<String, Vec<DiscoveredResource>>,
    resource_count: usize,
}

#[derive(Debug, Serialize)]
struct AccountsResponse {
    success: bool,
    accounts: Vec<ResourceDescriptor>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceContainersResponse {
    success: bool,
    resource_containers: Vec<ResourceDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantRequest {
    tenant_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TenantResponse {
    success: bool,
    tenant_id: String,
    credential: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    success: bool,
    message: &'static str,
    version: &'static str,
    exporter: String,
    endpoints: Vec<&'static str>,
}

const ENDPOINTS: &[&str] = &[
    "POST /api/export",
    "GET /api/resource-kinds/:accountId/:container",
    "GET /api/resources/:accountId/:container",
    "GET /api/accounts",
    "GET /api/resource-containers/:accountId",
    "POST /api/tenant",
    "GET /api/health",
    "GET /api/status",
];

impl ServeCommand {
    /// Execute the serve command
    pub fn execute(ctx: &AppContext, config: Config) -> Result<()> {
        ctx.output.section("Teleform API");
        ctx.output.dimmed("Starting HTTP server...");

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("Invalid host or port")?;

        let config = Arc::new(config);
        let credential = super::credential_from_config(ctx, &config);
        ctx.output.key_value("Credential", &credential.describe());
        ctx.output.key_value("Exporter", &config.exporter.program);
        ctx.output
            .key_value("Work directory", &config.workspace.work_dir.display().to_string());

        let control_plane = Arc::new(cloud::AzureControlPlane::with_endpoint(
            &config.azure.endpoint,
        )?);
        let state = AppState {
            pipeline: Arc::new(ExportPipeline::new(
                Arc::clone(&config),
                control_plane,
                Arc::clone(&ctx.fs),
            )?),
            credentials: Arc::new(CredentialStore::new(credential, Arc::clone(&ctx.command))),
        };

        let app = router(state);

        ctx.output.blank();
        ctx.output
            .success(&format!("Server started at http://{}", addr));
        ctx.output.dimmed("Press Ctrl+C to stop");
        ctx.output.blank();

        // Run the server
        let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
        runtime.block_on(async {
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .context("Failed to bind to address")?;
            tracing::info!(%addr, "Listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Failed to start server")?;

            Ok::<(), anyhow::Error>(())
        })?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// All API routes over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/export", post(export))
        .route(
            "/api/resource-kinds/:account_id/:container",
            get(list_resource_kinds),
        )
        .route("/api/resources/:account_id/:container", get(list_resources))
        .route("/api/accounts", get(list_accounts))
        .route(
            "/api/resource-containers/:account_id",
            get(list_resource_containers),
        )
        .route("/api/tenant", post(switch_tenant))
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        // CORS layer for browser clients
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// Export
// ============================================================================

async fn export(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequestBody>, JsonRejection>,
) -> ExportResult<Response> {
    let Json(body) = payload.map_err(|e| ExportError::Validation(e.body_text()))?;
    let request = ExportRequest::from_body(body)?;

    // One credential for the whole request, whatever happens to the store meanwhile
    let credential = state.credentials.current().await;
    let prepared = state.pipeline.run(&request, credential).await?;

    tracing::info!(
        container = %request.container,
        kinds = prepared.summary.kinds.len(),
        "Export ready, streaming archive"
    );

    let disposition = format!("attachment; filename=\"{}\"", prepared.download_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        prepared.into_body(),
    )
        .into_response())
}

// ============================================================================
// Discovery
// ============================================================================

async fn discover(
    state: &AppState,
    account_id: &str,
    container: &str,
) -> ExportResult<Vec<DiscoveredResource>> {
    validate_identifier(account_id, "accountId")?;
    validate_identifier(container, "container")?;

    let credential = state.credentials.current().await;
    cloud::discover_resources(
        state.pipeline.control_plane(),
        credential.as_ref(),
        account_id,
        container,
    )
    .await
    .map_err(ExportError::enumeration)
}

async fn list_resource_kinds(
    State(state): State<AppState>,
    Path((account_id, container)): Path<(String, String)>,
) -> ExportResult<Json<ResourceKindsResponse>> {
    let resources = discover(&state, &account_id, &container).await?;

    Ok(Json(ResourceKindsResponse {
        success: true,
        resource_types: cloud::available_kinds(&resources),
    }))
}

async fn list_resources(
    State(state): State<AppState>,
    Path((account_id, container)): Path<(String, String)>,
) -> ExportResult<Json<ResourcesResponse>> {
    let resources = discover(&state, &account_id, &container).await?;
    let grouped = cloud::group_by_kind(resources);
    let resource_count = grouped.values().map(Vec::len).sum();

    Ok(Json(ResourcesResponse {
        success: true,
        resources: grouped,
        resource_count,
    }))
}

async fn list_accounts(State(state): State<AppState>) -> ExportResult<Json<AccountsResponse>> {
    let credential = state.credentials.current().await;
    let accounts = state
        .pipeline
        .control_plane()
        .list_accounts(credential.as_ref())
        .await
        .map_err(ExportError::enumeration)?;

    Ok(Json(AccountsResponse {
        success: true,
        accounts,
    }))
}

async fn list_resource_containers(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ExportResult<Json<ResourceContainersResponse>> {
    validate_identifier(&account_id, "accountId")?;

    let credential = state.credentials.current().await;
    let resource_containers = state
        .pipeline
        .control_plane()
        .list_resource_containers(credential.as_ref(), &account_id)
        .await
        .map_err(ExportError::enumeration)?;

    Ok(Json(ResourceContainersResponse {
        success: true,
        resource_containers,
    }))
}

// ============================================================================
// Credentials and service info
// ============================================================================

async fn switch_tenant(
    State(state): State<AppState>,
    payload: Result<Json<TenantRequest>, JsonRejection>,
) -> ExportResult<Json<TenantResponse>> {
    let Json(body) = payload.map_err(|e| ExportError::Validation(e.body_text()))?;
    let tenant_id = body.tenant_id.trim().to_string();
    if tenant_id.is_empty() {
        return Err(ExportError::Validation("tenantId is required".to_string()));
    }

    let provider = state
        .credentials
        .switch_tenant(&tenant_id)
        .await
        .map_err(ExportError::credential)?;

    Ok(Json(TenantResponse {
        success: true,
        tenant_id,
        credential: provider.describe(),
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        message: "Teleform API is running",
        version: env!("CARGO_PKG_VERSION"),
        exporter: state.pipeline.config().exporter.program.clone(),
        endpoints: ENDPOINTS.to_vec(),
    })
}
