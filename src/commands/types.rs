use anyhow::Result;

use crate::cloud::resource_mapper;
use crate::context::Context;

/// Handles the 'types' command - lists the exportable ARM resource types
pub struct TypesCommand;

impl TypesCommand {
    /// Execute the types command, optionally keeping only types containing `filter`
    pub fn execute(ctx: &Context, filter: Option<&str>) -> Result<()> {
        let filter = filter.map(str::to_ascii_lowercase);
        let mut matched = 0;

        ctx.output.section("Supported resource types");

        for vendor_type in resource_mapper::supported_vendor_types() {
            let Some(kind) = resource_mapper::map_vendor_type(vendor_type) else {
                continue;
            };

            if let Some(filter) = &filter {
                let haystack = format!("{} {}", vendor_type, kind).to_ascii_lowercase();
                if !haystack.contains(filter.as_str()) {
                    continue;
                }
            }

            ctx.output.list_item(&format!("{} → {}", vendor_type, kind));
            matched += 1;
        }

        ctx.output.blank();
        if matched == 0 {
            ctx.output.warning("No resource types matched");
        } else {
            ctx.output.dimmed(&format!("{} resource type(s)", matched));
        }

        Ok(())
    }
}
