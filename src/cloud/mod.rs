//! Cloud control-plane access
//!
//! The [`ControlPlane`] trait is the seam between the export pipeline and the
//! provider's management API: list accounts (subscriptions), resource containers
//! (resource groups) and the resources inside a container. Everything listed here
//! is transient; nothing is persisted between requests.

pub mod azure;
pub mod credential;
pub mod resource_mapper;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use self::credential::CredentialProvider;

pub use azure::AzureControlPlane;
pub use credential::{AccessToken, CredentialStore};

/// A resource as reported by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: resource_type.into(),
            location: String::new(),
            tags: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    #[cfg(test)]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A live resource together with the IaC kind it maps to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    pub id: String,
    pub name: String,
    pub vendor_type: String,
    /// `None` when the vendor type is not in the mapping table
    pub mapped_kind: Option<String>,
    pub location: String,
    pub tags: HashMap<String, String>,
}

impl From<ResourceDescriptor> for DiscoveredResource {
    fn from(descriptor: ResourceDescriptor) -> Self {
        let mapped_kind =
            resource_mapper::map_vendor_type(&descriptor.resource_type).map(str::to_string);

        Self {
            id: descriptor.id,
            name: descriptor.name,
            vendor_type: descriptor.resource_type,
            mapped_kind,
            location: descriptor.location,
            tags: descriptor.tags,
        }
    }
}

/// Management API of a cloud provider
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List the accounts (subscriptions) visible to the credential
    async fn list_accounts(
        &self,
        credential: &dyn CredentialProvider,
    ) -> Result<Vec<ResourceDescriptor>>;

    /// List the resource containers (resource groups) of an account
    async fn list_resource_containers(
        &self,
        credential: &dyn CredentialProvider,
        account_id: &str,
    ) -> Result<Vec<ResourceDescriptor>>;

    /// List every resource inside one container
    async fn list_resources_in_container(
        &self,
        credential: &dyn CredentialProvider,
        account_id: &str,
        container: &str,
    ) -> Result<Vec<ResourceDescriptor>>;
}

/// Enumerate a container and attach the mapped kind to every resource
pub async fn discover_resources(
    control_plane: &dyn ControlPlane,
    credential: &dyn CredentialProvider,
    account_id: &str,
    container: &str,
) -> Result<Vec<DiscoveredResource>> {
    let descriptors = control_plane
        .list_resources_in_container(credential, account_id, container)
        .await?;

    Ok(descriptors.into_iter().map(DiscoveredResource::from).collect())
}

/// Deduplicated, sorted kinds of the exportable resources
pub fn available_kinds(resources: &[DiscoveredResource]) -> Vec<String> {
    resources
        .iter()
        .filter_map(|r| r.mapped_kind.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Exportable resources grouped by kind; unmapped resources are left out
pub fn group_by_kind(resources: Vec<DiscoveredResource>) -> BTreeMap<String, Vec<DiscoveredResource>> {
    let mut groups: BTreeMap<String, Vec<DiscoveredResource>> = BTreeMap::new();

    for resource in resources {
        if let Some(kind) = resource.mapped_kind.clone() {
            groups.entry(kind).or_default().push(resource);
        }
    }

    groups
}

/// Exportable resources whose ID is in `ids`; unknown and unmapped IDs are dropped
pub fn select_by_ids<'a>(
    resources: &'a [DiscoveredResource],
    ids: &BTreeSet<String>,
) -> Vec<&'a DiscoveredResource> {
    // ARM resource IDs are case-insensitive
    let wanted: BTreeSet<String> = ids.iter().map(|id| id.to_ascii_lowercase()).collect();

    resources
        .iter()
        .filter(|r| r.mapped_kind.is_some())
        .filter(|r| wanted.contains(&r.id.to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<DiscoveredResource> {
        vec![
            ResourceDescriptor::new("/sub/rg/vm1", "vm1", "Microsoft.Compute/virtualMachines"),
            ResourceDescriptor::new("/sub/rg/vm2", "vm2", "Microsoft.ClassicCompute/virtualMachines"),
            ResourceDescriptor::new("/sub/rg/sa", "sa", "Microsoft.Storage/storageAccounts")
                .with_location("westeurope")
                .with_tag("env", "dev"),
            ResourceDescriptor::new("/sub/rg/odd", "odd", "Microsoft.Unknown/things"),
        ]
        .into_iter()
        .map(DiscoveredResource::from)
        .collect()
    }

    #[test]
    fn test_discovered_resource_mapping() {
        let resources = sample();
        assert_eq!(
            resources[2].mapped_kind.as_deref(),
            Some("azurerm_storage_account")
        );
        assert_eq!(resources[2].location, "westeurope");
        assert!(resources[3].mapped_kind.is_none());
    }

    #[test]
    fn test_available_kinds_deduplicates_and_skips_unmapped() {
        assert_eq!(
            available_kinds(&sample()),
            vec!["azurerm_storage_account", "azurerm_virtual_machine"]
        );
    }

    #[test]
    fn test_group_by_kind() {
        let groups = group_by_kind(sample());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["azurerm_virtual_machine"].len(), 2);
        assert_eq!(groups["azurerm_storage_account"][0].name, "sa");
    }

    #[test]
    fn test_select_by_ids() {
        let ids: BTreeSet<String> = [
            "/SUB/RG/SA".to_string(),
            "/sub/rg/odd".to_string(),
            "/sub/rg/missing".to_string(),
        ]
        .into_iter()
        .collect();

        let resources = sample();
        let selected = select_by_ids(&resources, &ids);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "/sub/rg/sa");
    }

    #[test]
    fn test_discovered_resource_serializes_camel_case() {
        let json = serde_json::to_value(&sample()[0]).unwrap();
        assert_eq!(json["vendorType"], "Microsoft.Compute/virtualMachines");
        assert_eq!(json["mappedKind"], "azurerm_virtual_machine");
    }
}
