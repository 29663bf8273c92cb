//! Service configuration
//!
//! Loaded from an optional YAML file; every section and field has a default so an
//! empty (or missing) file is valid. Command-line flags and environment variables
//! are applied on top by the commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::prompt::PromptConfig;
use crate::traits::FileSystem;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub exporter: ExporterConfig,
    pub workspace: WorkspaceConfig,
    pub azure: AzureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// How the external exporter is run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Program name or path
    pub program: String,
    /// Appended after the standard arguments, before the container name
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
    pub prompt: PromptConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            program: "aztfexport".to_string(),
            extra_args: Vec::new(),
            timeout_secs: 1800,
            prompt: PromptConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent of the per-request workspaces
    pub work_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("teleform"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub endpoint: String,
    pub tenant_id: Option<String>,
    /// Pre-issued management token; the Azure CLI login is used when unset
    pub access_token: Option<String>,
    /// Version constraint written into the generated `required_providers` block
    pub provider_version: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::cloud::azure::DEFAULT_ENDPOINT.to_string(),
            tenant_id: None,
            access_token: None,
            provider_version: "~> 3.0".to_string(),
        }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub exporter: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub tenant_id: Option<String>,
    pub access_token: Option<String>,
}

impl Config {
    /// Load the config file, or the defaults when no path is given
    pub fn load(fs: &dyn FileSystem, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_yaml(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Apply command-line and environment values over the file values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(exporter) = &overrides.exporter {
            self.exporter.program = exporter.clone();
        }
        if let Some(work_dir) = &overrides.work_dir {
            self.workspace.work_dir = work_dir.clone();
        }
        if let Some(tenant_id) = &overrides.tenant_id {
            self.azure.tenant_id = Some(tenant_id.clone());
        }
        if let Some(token) = &overrides.access_token {
            self.azure.access_token = Some(token.clone());
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }
}
