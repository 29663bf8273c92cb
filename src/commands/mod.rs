pub mod export;
pub mod serve;
pub mod types;

pub use export::ExportCommand;
pub use serve::ServeCommand;
pub use types::TypesCommand;

use std::sync::Arc;

use crate::cloud::credential::{AzureCliCredential, CredentialProvider, StaticTokenCredential};
use crate::config::Config;
use crate::context::Context;

/// A configured token wins; otherwise the Azure CLI login is used
pub(crate) fn credential_from_config(ctx: &Context, config: &Config) -> Arc<dyn CredentialProvider> {
    let tenant_id = config.azure.tenant_id.clone();

    match &config.azure.access_token {
        Some(token) if !token.trim().is_empty() => {
            Arc::new(StaticTokenCredential::new(token.trim(), tenant_id))
        }
        _ => Arc::new(AzureCliCredential::new(Arc::clone(&ctx.command), tenant_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_token_wins() {
        let ctx = Context::test();
        let mut config = Config::default();
        config.azure.access_token = Some("abc".to_string());

        assert_eq!(credential_from_config(&ctx, &config).describe(), "static token");
    }

    #[test]
    fn test_blank_token_falls_back_to_cli() {
        let ctx = Context::test();
        let mut config = Config::default();
        config.azure.access_token = Some("  ".to_string());
        config.azure.tenant_id = Some("tenant-a".to_string());

        let credential = credential_from_config(&ctx, &config);
        assert_ne!(credential.describe(), "static token");
        assert_eq!(credential.tenant_id(), Some("tenant-a"));
    }
}
