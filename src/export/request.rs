//! Export request parsing and validation

use serde::Deserialize;
use std::collections::BTreeSet;

use super::error::{ExportError, ExportResult};

/// JSON body of `POST /api/export`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequestBody {
    #[serde(alias = "subscriptionId")]
    pub control_plane_account_id: Option<String>,
    #[serde(alias = "resourceGroup")]
    pub resource_container: Option<String>,
    #[serde(default)]
    pub resource_kinds: Vec<String>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}

/// Which resources the exporter should import
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSelection {
    /// Every resource of the listed kinds
    Kinds(BTreeSet<String>),
    /// Only the listed resources; their kinds are looked up at export time
    Ids(BTreeSet<String>),
}

/// A validated export request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub account_id: String,
    pub container: String,
    pub selection: ResourceSelection,
}

impl ExportRequest {
    /// Validate a request body.
    ///
    /// IDs win over kinds when both are supplied; an empty selection in the
    /// chosen mode is rejected.
    pub fn from_body(body: ExportRequestBody) -> ExportResult<Self> {
        let account_id = required(body.control_plane_account_id, "controlPlaneAccountId")?;
        let container = required(body.resource_container, "resourceContainer")?;
        validate_identifier(&account_id, "controlPlaneAccountId")?;
        validate_identifier(&container, "resourceContainer")?;

        let ids = clean_set(body.resource_ids);
        let kinds = clean_set(body.resource_kinds);

        let selection = if !ids.is_empty() {
            ResourceSelection::Ids(ids)
        } else if !kinds.is_empty() {
            ResourceSelection::Kinds(kinds)
        } else {
            return Err(ExportError::Validation(
                "Select at least one resource kind or resource ID".to_string(),
            ));
        };

        Ok(Self {
            account_id,
            container,
            selection,
        })
    }

    #[cfg(test)]
    pub fn new(
        account_id: impl Into<String>,
        container: impl Into<String>,
        selection: ResourceSelection,
    ) -> ExportResult<Self> {
        let (resource_kinds, resource_ids) = match selection {
            ResourceSelection::Kinds(kinds) => (kinds.into_iter().collect(), Vec::new()),
            ResourceSelection::Ids(ids) => (Vec::new(), ids.into_iter().collect()),
        };

        Self::from_body(ExportRequestBody {
            control_plane_account_id: Some(account_id.into()),
            resource_container: Some(container.into()),
            resource_kinds,
            resource_ids,
        })
    }
}

fn required(value: Option<String>, field: &str) -> ExportResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ExportError::Validation(format!("{} is required", field))),
    }
}

/// Identifiers end up in URLs, process arguments and directory names
pub fn validate_identifier(value: &str, field: &str) -> ExportResult<()> {
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(ExportError::Validation(format!(
            "{} must not contain path separators",
            field
        )));
    }

    if value.chars().any(char::is_control) {
        return Err(ExportError::Validation(format!(
            "{} must not contain control characters",
            field
        )));
    }

    Ok(())
}

fn clean_set(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(kinds: &[&str], ids: &[&str]) -> ExportRequestBody {
        ExportRequestBody {
            control_plane_account_id: Some("sub-1".to_string()),
            resource_container: Some("rg-1".to_string()),
            resource_kinds: kinds.iter().map(|s| s.to_string()).collect(),
            resource_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_kinds_mode() {
        let request = ExportRequest::from_body(body(&["azurerm_key_vault"], &[])).unwrap();
        assert_eq!(
            request.selection,
            ResourceSelection::Kinds(["azurerm_key_vault".to_string()].into())
        );
    }

    #[test]
    fn test_ids_take_precedence_over_kinds() {
        let request =
            ExportRequest::from_body(body(&["azurerm_key_vault"], &["/sub/rg/vm"])).unwrap();
        assert_eq!(
            request.selection,
            ResourceSelection::Ids(["/sub/rg/vm".to_string()].into())
        );
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        let err = ExportRequest::from_body(body(&[], &[])).unwrap_err();
        assert!(matches!(err, ExportError::Validation(_)));

        // Blank entries do not count as a selection
        let err = ExportRequest::from_body(body(&["  "], &[""])).unwrap_err();
        assert!(matches!(err, ExportError::Validation(_)));
    }

    #[test]
    fn test_missing_identifiers_are_rejected() {
        let mut missing_account = body(&["k"], &[]);
        missing_account.control_plane_account_id = None;
        assert!(ExportRequest::from_body(missing_account).is_err());

        let mut blank_container = body(&["k"], &[]);
        blank_container.resource_container = Some("   ".to_string());
        assert!(ExportRequest::from_body(blank_container).is_err());
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let mut traversal = body(&["k"], &[]);
        traversal.resource_container = Some("../etc".to_string());
        assert!(ExportRequest::from_body(traversal).is_err());
    }

    #[test]
    fn test_aliases_are_accepted() {
        let body: ExportRequestBody = serde_json::from_str(
            r#"{"subscriptionId":"sub-1","resourceGroup":"rg-1","resourceKinds":["a"]}"#,
        )
        .unwrap();
        let request = ExportRequest::from_body(body).unwrap();
        assert_eq!(request.account_id, "sub-1");
        assert_eq!(request.container, "rg-1");
    }
}
