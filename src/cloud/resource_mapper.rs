//! Resource Type Mapper
//!
//! Maps Azure Resource Manager resource types (format: `Namespace/type[/subtype]`)
//! to the azurerm resource kinds understood by the exporter.
//!
//! Several ARM types can collapse onto one kind (classic and ARM virtual machines,
//! both scale-set flavours, ...). Types without an entry are simply not exportable.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Maps an ARM resource type to its azurerm resource kind.
///
/// ARM is inconsistent about casing (`Microsoft.Web/serverFarms` vs
/// `Microsoft.Web/serverfarms`), so the lookup ignores ASCII case.
pub fn map_vendor_type(vendor_type: &str) -> Option<&'static str> {
    RESOURCE_TYPE_MAP
        .get(vendor_type.trim().to_ascii_lowercase().as_str())
        .copied()
}

/// Get all supported ARM resource types
pub fn supported_vendor_types() -> Vec<&'static str> {
    RESOURCE_TYPES.iter().map(|(vendor, _)| *vendor).collect()
}

/// ARM resource type → azurerm resource kind
const RESOURCE_TYPES: &[(&str, &str)] = &[
    // Compute
    ("Microsoft.Compute/virtualMachines", "azurerm_virtual_machine"),
    ("Microsoft.ClassicCompute/virtualMachines", "azurerm_virtual_machine"),
    ("Microsoft.Compute/virtualMachineScaleSets", "azurerm_virtual_machine_scale_set"),
    (
        "Microsoft.Compute/virtualMachineScaleSets/virtualMachines",
        "azurerm_virtual_machine_scale_set",
    ),
    ("Microsoft.Compute/disks", "azurerm_managed_disk"),
    ("Microsoft.Compute/availabilitySets", "azurerm_availability_set"),
    ("Microsoft.Compute/images", "azurerm_image"),
    ("Microsoft.Compute/snapshots", "azurerm_snapshot"),
    ("Microsoft.Compute/sshPublicKeys", "azurerm_ssh_public_key"),
    // Storage
    ("Microsoft.Storage/storageAccounts", "azurerm_storage_account"),
    ("Microsoft.ClassicStorage/storageAccounts", "azurerm_storage_account"),
    // Databases
    ("Microsoft.Sql/servers", "azurerm_mssql_server"),
    ("Microsoft.Sql/servers/databases", "azurerm_mssql_database"),
    ("Microsoft.DBforPostgreSQL/flexibleServers", "azurerm_postgresql_flexible_server"),
    ("Microsoft.DBforPostgreSQL/servers", "azurerm_postgresql_server"),
    ("Microsoft.DBforMySQL/flexibleServers", "azurerm_mysql_flexible_server"),
    ("Microsoft.DocumentDB/databaseAccounts", "azurerm_cosmosdb_account"),
    ("Microsoft.Cache/Redis", "azurerm_redis_cache"),
    // Networking
    ("Microsoft.Network/virtualNetworks", "azurerm_virtual_network"),
    ("Microsoft.Network/virtualNetworks/subnets", "azurerm_subnet"),
    ("Microsoft.Network/networkSecurityGroups", "azurerm_network_security_group"),
    ("Microsoft.Network/networkInterfaces", "azurerm_network_interface"),
    ("Microsoft.Network/publicIPAddresses", "azurerm_public_ip"),
    ("Microsoft.Network/loadBalancers", "azurerm_lb"),
    ("Microsoft.Network/applicationGateways", "azurerm_application_gateway"),
    ("Microsoft.Network/routeTables", "azurerm_route_table"),
    ("Microsoft.Network/natGateways", "azurerm_nat_gateway"),
    ("Microsoft.Network/privateEndpoints", "azurerm_private_endpoint"),
    ("Microsoft.Network/privateDnsZones", "azurerm_private_dns_zone"),
    ("Microsoft.Network/dnszones", "azurerm_dns_zone"),
    // Serverless and web
    ("Microsoft.Web/sites", "azurerm_linux_web_app"),
    ("Microsoft.Web/serverFarms", "azurerm_service_plan"),
    ("Microsoft.Logic/workflows", "azurerm_logic_app_workflow"),
    // Containers
    ("Microsoft.ContainerService/managedClusters", "azurerm_kubernetes_cluster"),
    ("Microsoft.ContainerRegistry/registries", "azurerm_container_registry"),
    ("Microsoft.ContainerInstance/containerGroups", "azurerm_container_group"),
    ("Microsoft.App/containerApps", "azurerm_container_app"),
    ("Microsoft.App/managedEnvironments", "azurerm_container_app_environment"),
    // Identity and secrets
    ("Microsoft.ManagedIdentity/userAssignedIdentities", "azurerm_user_assigned_identity"),
    ("Microsoft.KeyVault/vaults", "azurerm_key_vault"),
    ("Microsoft.Authorization/roleAssignments", "azurerm_role_assignment"),
    ("Microsoft.Authorization/roleDefinitions", "azurerm_role_definition"),
    // Messaging
    ("Microsoft.ServiceBus/namespaces", "azurerm_servicebus_namespace"),
    ("Microsoft.EventHub/namespaces", "azurerm_eventhub_namespace"),
    // Monitoring
    ("Microsoft.OperationalInsights/workspaces", "azurerm_log_analytics_workspace"),
    ("Microsoft.Insights/components", "azurerm_application_insights"),
    ("Microsoft.Insights/actionGroups", "azurerm_monitor_action_group"),
];

/// Build the resource type mapping, keyed by lowercased ARM type
fn build_resource_type_map() -> HashMap<String, &'static str> {
    let mut m = HashMap::new();

    for (vendor_type, kind) in RESOURCE_TYPES {
        m.insert(vendor_type.to_ascii_lowercase(), *kind);
    }

    m
}

lazy_static! {
    static ref RESOURCE_TYPE_MAP: HashMap<String, &'static str> = build_resource_type_map();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_maps_to_a_kind() {
        for vendor_type in supported_vendor_types() {
            let kind = map_vendor_type(vendor_type)
                .unwrap_or_else(|| panic!("{} should be mapped", vendor_type));
            assert!(!kind.is_empty());
        }
    }

    #[test]
    fn test_many_to_one_mapping() {
        assert_eq!(
            map_vendor_type("Microsoft.Compute/virtualMachineScaleSets"),
            map_vendor_type("Microsoft.Compute/virtualMachineScaleSets/virtualMachines")
        );
        assert_eq!(
            map_vendor_type("Microsoft.Compute/virtualMachines"),
            Some("azurerm_virtual_machine")
        );
        assert_eq!(
            map_vendor_type("Microsoft.ClassicCompute/virtualMachines"),
            Some("azurerm_virtual_machine")
        );
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(
            map_vendor_type("microsoft.web/serverfarms"),
            Some("azurerm_service_plan")
        );
        assert_eq!(
            map_vendor_type("MICROSOFT.STORAGE/STORAGEACCOUNTS"),
            Some("azurerm_storage_account")
        );
    }

    #[test]
    fn test_unsupported_type() {
        assert!(map_vendor_type("Microsoft.Unknown/widgets").is_none());
        assert!(map_vendor_type("").is_none());
    }

    #[test]
    fn test_no_duplicate_vendor_types() {
        let types = supported_vendor_types();
        assert_eq!(types.len(), build_resource_type_map().len());
    }
}
