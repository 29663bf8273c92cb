//! Control-plane credentials
//!
//! A request captures one `Arc<dyn CredentialProvider>` from the [`CredentialStore`]
//! when it starts and uses it for every control-plane call and for the exporter's
//! environment. Switching tenants swaps the stored provider, which never affects a
//! request that has already captured the previous one.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::traits::CommandExecutor;

/// Resource the management-plane tokens are issued for
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// A bearer token for the management plane
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Expiry reported by the issuer, if any
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Tokens with a known expiry can be handed to the exporter through its
    /// environment; long-lived or opaque tokens cannot.
    pub fn has_finite_lifetime(&self) -> bool {
        self.expires_on.is_some()
    }
}

/// Source of management-plane tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token for the management plane
    async fn access_token(&self) -> Result<AccessToken>;

    /// Tenant the provider authenticates against, if pinned
    fn tenant_id(&self) -> Option<&str>;

    /// Short human-readable description for logs and status output
    fn describe(&self) -> String;
}

/// Credential backed by the Azure CLI login (`az account get-access-token`)
pub struct AzureCliCredential {
    command: Arc<dyn CommandExecutor>,
    tenant_id: Option<String>,
}

/// JSON shape returned by `az account get-access-token`
#[derive(Debug, Deserialize)]
struct CliToken {
    #[serde(rename = "accessToken")]
    access_token: String,
    /// Unix timestamp, present on newer CLI versions
    #[serde(default)]
    expires_on: Option<i64>,
    /// Local timestamp such as `2024-05-01 10:00:00.000000`, present on older versions
    #[serde(rename = "expiresOn", default)]
    expires_on_local: Option<String>,
}

impl AzureCliCredential {
    pub fn new(command: Arc<dyn CommandExecutor>, tenant_id: Option<String>) -> Self {
        Self { command, tenant_id }
    }

    fn fetch(&self) -> Result<AccessToken> {
        let mut args = vec![
            "account",
            "get-access-token",
            "--resource",
            MANAGEMENT_RESOURCE,
            "--output",
            "json",
        ];
        if let Some(tenant) = &self.tenant_id {
            args.push("--tenant");
            args.push(tenant.as_str());
        }

        let output = self.command.run("az", &args)?;
        if !output.success() {
            bail!(
                "az account get-access-token failed (exit code {}): {}",
                output.exit_code,
                output.stderr.trim()
            );
        }

        parse_cli_token(&output.stdout)
    }
}

/// Parse the JSON printed by `az account get-access-token`
pub fn parse_cli_token(json: &str) -> Result<AccessToken> {
    let token: CliToken =
        serde_json::from_str(json).context("Failed to parse az access token response")?;

    let expires_on = match (token.expires_on, token.expires_on_local.as_deref()) {
        (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single(),
        (None, Some(local)) => NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive)),
        (None, None) => None,
    };

    Ok(AccessToken {
        token: token.access_token,
        expires_on,
    })
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    async fn access_token(&self) -> Result<AccessToken> {
        let command = Arc::clone(&self.command);
        let tenant_id = self.tenant_id.clone();

        tokio::task::spawn_blocking(move || AzureCliCredential::new(command, tenant_id).fetch())
            .await
            .context("Token fetch task panicked")?
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    fn describe(&self) -> String {
        match &self.tenant_id {
            Some(tenant) => format!("azure-cli (tenant {})", tenant),
            None => "azure-cli".to_string(),
        }
    }
}

/// Pre-issued token supplied through configuration
pub struct StaticTokenCredential {
    token: String,
    tenant_id: Option<String>,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            token: token.into(),
            tenant_id,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenCredential {
    async fn access_token(&self) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: None,
        })
    }

    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    fn describe(&self) -> String {
        "static token".to_string()
    }
}

/// Holds the active credential; requests snapshot it, tenant switches replace it
pub struct CredentialStore {
    active: RwLock<Arc<dyn CredentialProvider>>,
    command: Arc<dyn CommandExecutor>,
}

impl CredentialStore {
    pub fn new(initial: Arc<dyn CredentialProvider>, command: Arc<dyn CommandExecutor>) -> Self {
        Self {
            active: RwLock::new(initial),
            command,
        }
    }

    /// Snapshot of the active credential, to be held for a whole request
    pub async fn current(&self) -> Arc<dyn CredentialProvider> {
        Arc::clone(&*self.active.read().await)
    }

    /// Point subsequent requests at another tenant through the Azure CLI login
    pub async fn switch_tenant(&self, tenant_id: &str) -> Result<Arc<dyn CredentialProvider>> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            bail!("Tenant ID must not be empty");
        }

        let provider: Arc<dyn CredentialProvider> = Arc::new(AzureCliCredential::new(
            Arc::clone(&self.command),
            Some(tenant_id.to_string()),
        ));

        *self.active.write().await = Arc::clone(&provider);
        tracing::info!(tenant_id, "Switched active control-plane tenant");

        Ok(provider)
    }
}
