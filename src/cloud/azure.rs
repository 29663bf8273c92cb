//! Azure Resource Manager client
//!
//! Thin adapter over the ARM REST API. List endpoints are paged: every page
//! carries a `value` array and, when more results exist, a `nextLink` absolute
//! URL that is followed until it disappears.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::credential::CredentialProvider;
use super::{ControlPlane, ResourceDescriptor};

/// Public cloud management endpoint
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Upper bound on pages followed for one listing
const MAX_PAGES: usize = 1000;

/// One page of an ARM list response
#[derive(Debug, Deserialize)]
struct ArmPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

/// Subscriptions use `subscriptionId`/`displayName` rather than `name`/`type`
#[derive(Debug, Deserialize)]
struct ArmSubscription {
    id: String,
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
    #[serde(default)]
    state: Option<String>,
}

impl From<ArmSubscription> for ResourceDescriptor {
    fn from(sub: ArmSubscription) -> Self {
        let name = if sub.display_name.is_empty() {
            sub.subscription_id.clone()
        } else {
            sub.display_name
        };

        let mut descriptor = ResourceDescriptor::new(
            sub.subscription_id,
            name,
            "Microsoft.Resources/subscriptions",
        );
        descriptor.tags.insert("armId".to_string(), sub.id);
        if let Some(state) = sub.state {
            descriptor.tags.insert("state".to_string(), state);
        }
        descriptor
    }
}

/// ARM-backed [`ControlPlane`]
pub struct AzureControlPlane {
    client: reqwest::Client,
    endpoint: Url,
}

impl AzureControlPlane {
    /// Client for the given ARM endpoint (public, sovereign cloud or a local stand-in)
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("Invalid ARM endpoint: {}", endpoint))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, endpoint })
    }

    fn url(&self, segments: &[&str], api_version: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("ARM endpoint cannot be a base URL: {}", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// GET every page of a list endpoint
    async fn get_all<T: DeserializeOwned>(
        &self,
        credential: &dyn CredentialProvider,
        first: Url,
    ) -> Result<Vec<T>> {
        let token = credential
            .access_token()
            .await
            .context("Failed to obtain management token")?;

        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                bail!("ARM listing exceeded {} pages", MAX_PAGES);
            }

            tracing::debug!(%url, "ARM GET");
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&token.token)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", url.path()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                bail!("ARM returned {} for {}: {}", status, url.path(), body.trim());
            }

            let page: ArmPage<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to decode ARM response from {}", url.path()))?;

            items.extend(page.value);
            next = match page.next_link {
                Some(link) if !link.is_empty() => Some(
                    Url::parse(&link).with_context(|| format!("Invalid nextLink: {}", link))?,
                ),
                _ => None,
            };
        }

        Ok(items)
    }
}

#[async_trait]
impl ControlPlane for AzureControlPlane {
    async fn list_accounts(
        &self,
        credential: &dyn CredentialProvider,
    ) -> Result<Vec<ResourceDescriptor>> {
        let url = self.url(&["subscriptions"], SUBSCRIPTIONS_API_VERSION)?;
        let subscriptions: Vec<ArmSubscription> = self.get_all(credential, url).await?;

        Ok(subscriptions.into_iter().map(ResourceDescriptor::from).collect())
    }

    async fn list_resource_containers(
        &self,
        credential: &dyn CredentialProvider,
        account_id: &str,
    ) -> Result<Vec<ResourceDescriptor>> {
        let url = self.url(
            &["subscriptions", account_id, "resourcegroups"],
            RESOURCES_API_VERSION,
        )?;
        self.get_all(credential, url).await
    }

    async fn list_resources_in_container(
        &self,
        credential: &dyn CredentialProvider,
        account_id: &str,
        container: &str,
    ) -> Result<Vec<ResourceDescriptor>> {
        let url = self.url(
            &[
                "subscriptions",
                account_id,
                "resourceGroups",
                container,
                "resources",
            ],
            RESOURCES_API_VERSION,
        )?;
        self.get_all(credential, url).await
    }
}
