//! Test helpers: an in-memory control plane and scripted stand-ins for the exporter

#![cfg(test)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::Path;

use crate::cloud::credential::CredentialProvider;
use crate::cloud::{ControlPlane, ResourceDescriptor};

/// Control plane serving a fixed resource list
pub struct FakeControlPlane {
    resources: Vec<ResourceDescriptor>,
    fail: bool,
}

impl FakeControlPlane {
    pub const ACCOUNT_ID: &'static str = "sub-1";
    pub const CONTAINER: &'static str = "rg-1";
    pub const STORAGE_ID: &'static str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Storage/storageAccounts/demo";
    pub const VNET_ID: &'static str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network/virtualNetworks/vnet";
    pub const UNMAPPED_ID: &'static str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Widget/gadgets/g1";

    /// A storage account, a virtual network and one resource without a mapping
    pub fn sample() -> Self {
        Self {
            resources: vec![
                ResourceDescriptor::new(
                    Self::STORAGE_ID,
                    "demo",
                    "Microsoft.Storage/storageAccounts",
                )
                .with_location("westeurope"),
                ResourceDescriptor::new(
                    Self::VNET_ID,
                    "vnet",
                    "Microsoft.Network/virtualNetworks",
                )
                .with_location("westeurope")
                .with_tag("env", "dev"),
                ResourceDescriptor::new(Self::UNMAPPED_ID, "g1", "Microsoft.Widget/gadgets"),
            ],
            fail: false,
        }
    }

    /// Every call fails as if the control plane were unreachable
    pub fn failing() -> Self {
        Self {
            resources: Vec::new(),
            fail: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            bail!("control plane unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_accounts(
        &self,
        _credential: &dyn CredentialProvider,
    ) -> Result<Vec<ResourceDescriptor>> {
        self.check()?;
        Ok(vec![ResourceDescriptor::new(
            Self::ACCOUNT_ID,
            "Development",
            "Microsoft.Resources/subscriptions",
        )])
    }

    async fn list_resource_containers(
        &self,
        _credential: &dyn CredentialProvider,
        account_id: &str,
    ) -> Result<Vec<ResourceDescriptor>> {
        self.check()?;
        Ok(vec![
            ResourceDescriptor::new(
                format!("/subscriptions/{}/resourceGroups/{}", account_id, Self::CONTAINER),
                Self::CONTAINER,
                "Microsoft.Resources/resourceGroups",
            )
            .with_location("westeurope"),
        ])
    }

    async fn list_resources_in_container(
        &self,
        _credential: &dyn CredentialProvider,
        _account_id: &str,
        _container: &str,
    ) -> Result<Vec<ResourceDescriptor>> {
        self.check()?;
        Ok(self.resources.clone())
    }
}

/// Walks through the menu and quit prompts, then leaves a typical export behind
const SUCCESSFUL_EXPORTER: &str = r##"#!/bin/sh
out=""
for arg in "$@"; do
  case "$arg" in
    --output-dir=*) out="${arg#--output-dir=}" ;;
  esac
done

echo "Listing resources in the resource group"
echo "Show menu"
read answer
if [ "$answer" != "w" ]; then
  echo "unexpected answer: $answer" >&2
  exit 3
fi

mkdir -p "$out/.terraform/providers"
cat > "$out/main.tf" <<'EOF'
terraform {
  required_providers {
    azurerm = {
      source = "hashicorp/azurerm"
    }
  }
}

provider "azurerm" {
  features {}
}

resource "azurerm_storage_account" "demo" {
  name                     = "demo"
  allow_blob_public_access = false
}
EOF
printf '   \n' > "$out/empty.tf"
echo "cache" > "$out/.terraform/providers/lock"

echo "Import completed, press q to quit"
read answer
[ "$answer" = "q" ] || exit 4
exit 0
"##;

const FAILING_EXPORTER: &str = r##"#!/bin/sh
echo "auth error" >&2
exit 2
"##;

/// Write an executable exporter stand-in into `dir` and return its path
#[cfg(unix)]
pub fn write_fake_exporter(dir: &Path, succeed: bool) -> String {
    use std::os::unix::fs::PermissionsExt;

    let name = if succeed {
        "fake-exporter-ok"
    } else {
        "fake-exporter-fail"
    };
    let path = dir.join(name);
    let script = if succeed {
        SUCCESSFUL_EXPORTER
    } else {
        FAILING_EXPORTER
    };

    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    path.to_string_lossy().into_owned()
}
