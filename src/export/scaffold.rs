//! Standard files written next to the exported resources

use anyhow::{Context, Result};
use handlebars::{Handlebars, Helper, HelperResult, Output, RenderContext};
use serde::Serialize;

const PROVIDER_TEMPLATE: &str = r#"terraform {
  required_providers {
    azurerm = {
      source  = "hashicorp/azurerm"
      version = "{{hcl provider_version}}"
    }
  }
}

provider "azurerm" {
  features {}
  subscription_id = var.subscription_id
}
"#;

const VARIABLES_TEMPLATE: &str = r#"variable "subscription_id" {
  description = "Azure subscription the resources live in"
  type        = string
  sensitive   = true
  default     = "{{hcl subscription_id}}"
}

variable "resource_group_name" {
  description = "Resource group the resources were exported from"
  type        = string
  default     = "{{hcl resource_group}}"
}
"#;

const OUTPUTS_TEMPLATE: &str = r#"output "resource_group_name" {
  value = data.azurerm_resource_group.main.name
}

output "subscription_id" {
  value     = var.subscription_id
  sensitive = true
}

output "workspace" {
  value = terraform.workspace
}
"#;

const MAIN_TEMPLATE: &str = r#"data "azurerm_resource_group" "main" {
  name = var.resource_group_name
}
"#;

/// Values substituted into the scaffold
#[derive(Debug, Serialize)]
pub struct ScaffoldContext<'a> {
    pub subscription_id: &'a str,
    pub resource_group: &'a str,
    pub provider_version: &'a str,
    /// Exported content without a resource declaration, appended to `main.tf`
    #[serde(skip)]
    pub main_content: Option<&'a str>,
}

pub struct Scaffold {
    handlebars: Handlebars<'static>,
}

impl Scaffold {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("hcl", Box::new(hcl_helper));

        for (name, template) in [
            ("provider.tf", PROVIDER_TEMPLATE),
            ("variables.tf", VARIABLES_TEMPLATE),
            ("outputs.tf", OUTPUTS_TEMPLATE),
            ("main.tf", MAIN_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, template)
                .with_context(|| format!("Invalid scaffold template: {}", name))?;
        }

        Ok(Self { handlebars })
    }

    /// Render every scaffold file as `(file name, content)`
    pub fn render(&self, ctx: &ScaffoldContext) -> Result<Vec<(&'static str, String)>> {
        let mut files = Vec::new();

        for name in ["provider.tf", "variables.tf", "outputs.tf", "main.tf"] {
            let mut rendered = self
                .handlebars
                .render(name, ctx)
                .with_context(|| format!("Failed to render {}", name))?;
            if name == "main.tf" {
                if let Some(extra) = ctx.main_content.map(str::trim).filter(|c| !c.is_empty()) {
                    rendered.push('\n');
                    rendered.push_str(extra);
                    rendered.push('\n');
                }
            }
            files.push((name, rendered));
        }

        Ok(files)
    }
}

/// Escape a value for use inside an HCL quoted string
pub fn escape_hcl(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace("${", "$${")
        .replace("%{", "%%{")
}

fn hcl_helper(
    h: &Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    if let Some(value) = h.param(0).and_then(|v| v.value().as_str()) {
        out.write(&escape_hcl(value))?;
    }

    Ok(())
}
