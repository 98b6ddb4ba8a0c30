//! The wallet-supplied address filter.
//!
//! The scanner takes one stable snapshot per batch; addresses registered
//! while a pass is running are picked up by the next pass.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use stashd_primitives::script::ScriptAddress;

pub trait AddressFilter: Send + Sync {
    fn has_address(&self, address: &ScriptAddress) -> bool;

    /// Every address in the filter, for aggregation passes.
    fn addresses(&self) -> Vec<ScriptAddress>;

    /// A stable view for the duration of one batch.
    fn snapshot(&self) -> Arc<dyn AddressFilter>;
}

/// An immutable set filter; its snapshot is itself.
#[derive(Clone, Debug, Default)]
pub struct StaticAddressFilter {
    set: HashSet<ScriptAddress>,
}

impl StaticAddressFilter {
    pub fn new(addresses: impl IntoIterator<Item = ScriptAddress>) -> Self {
        Self {
            set: addresses.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl AddressFilter for StaticAddressFilter {
    fn has_address(&self, address: &ScriptAddress) -> bool {
        self.set.contains(address)
    }

    fn addresses(&self) -> Vec<ScriptAddress> {
        self.set.iter().copied().collect()
    }

    fn snapshot(&self) -> Arc<dyn AddressFilter> {
        Arc::new(self.clone())
    }
}

/// A filter that accepts concurrent registration. Reads go through a
/// snapshot so the hot path never holds the lock.
#[derive(Default)]
pub struct SharedAddressFilter {
    inner: RwLock<HashSet<ScriptAddress>>,
}

impl SharedAddressFilter {
    pub fn new(addresses: impl IntoIterator<Item = ScriptAddress>) -> Self {
        Self {
            inner: RwLock::new(addresses.into_iter().collect()),
        }
    }

    pub fn register(&self, address: ScriptAddress) -> bool {
        self.inner.write().expect("filter lock").insert(address)
    }

    pub fn register_batch(&self, addresses: impl IntoIterator<Item = ScriptAddress>) {
        let mut guard = self.inner.write().expect("filter lock");
        guard.extend(addresses);
    }
}

impl AddressFilter for SharedAddressFilter {
    fn has_address(&self, address: &ScriptAddress) -> bool {
        self.inner.read().expect("filter lock").contains(address)
    }

    fn addresses(&self) -> Vec<ScriptAddress> {
        self.inner.read().expect("filter lock").iter().copied().collect()
    }

    fn snapshot(&self) -> Arc<dyn AddressFilter> {
        let set = self.inner.read().expect("filter lock").clone();
        Arc::new(StaticAddressFilter { set })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_under_registration() {
        let filter = SharedAddressFilter::default();
        filter.register([0x01; 21]);
        let snapshot = filter.snapshot();

        filter.register([0x02; 21]);
        assert!(snapshot.has_address(&[0x01; 21]));
        assert!(!snapshot.has_address(&[0x02; 21]));
        assert!(filter.has_address(&[0x02; 21]));
    }
}
