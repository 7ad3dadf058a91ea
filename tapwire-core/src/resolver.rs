//! Address-to-name labelling of entry endpoints.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::entry::Entry;

pub trait NameResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> Option<String>;

    fn label(&self, entry: &mut Entry) {
        entry.source_label = self.resolve(entry.flow.src_ip);
        entry.destination_label = self.resolve(entry.flow.dst_ip);
    }
}

/// Fixed address book, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    names: HashMap<IpAddr, String>,
}

impl StaticResolver {
    pub fn new(names: HashMap<IpAddr, String>) -> Self {
        Self { names }
    }

    pub fn insert(&mut self, ip: IpAddr, name: impl Into<String>) {
        self.names.insert(ip, name.into());
    }
}

impl NameResolver for StaticResolver {
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        self.names.get(&ip).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_addresses_only() {
        let mut resolver = StaticResolver::default();
        resolver.insert([10, 0, 0, 9].into(), "orders");
        assert_eq!(resolver.resolve([10, 0, 0, 9].into()).as_deref(), Some("orders"));
        assert_eq!(resolver.resolve([10, 0, 0, 2].into()), None);
    }
}
