// src/plugins/mod.rs - bundled collectors
mod dns_resolve;
mod email_extract;
mod search_subdomains;

pub use dns_resolve::DnsResolvePlugin;
pub use email_extract::EmailExtractPlugin;
pub use search_subdomains::SearchSubdomainsPlugin;

use crate::plugin::Plugin;

/// Every collector shipped with the binary, one fresh instance each.
pub fn registry() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(DnsResolvePlugin::new()),
        Box::new(SearchSubdomainsPlugin::new()),
        Box::new(EmailExtractPlugin::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_names_unique() {
        let names: Vec<&str> = registry().iter().map(|p| p.meta().name).collect();
        let unique: HashSet<&&str> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn test_registry_produced_types_declared() {
        for plugin in registry() {
            assert!(
                !plugin.produced_events().is_empty(),
                "{} declares no produced events",
                plugin.meta().name
            );
        }
    }
}
