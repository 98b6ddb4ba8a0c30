//! Registered wallet addresses, persisted in the Meta column so they
//! survive every reset mode.

use stashd_primitives::script::{ScriptAddress, ADDRESS_LEN};
use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const ADDR_PREFIX: &[u8] = b"addr:";

fn address_key(address: &ScriptAddress) -> [u8; ADDR_PREFIX.len() + ADDRESS_LEN] {
    let mut out = [0u8; ADDR_PREFIX.len() + ADDRESS_LEN];
    out[..ADDR_PREFIX.len()].copy_from_slice(ADDR_PREFIX);
    out[ADDR_PREFIX.len()..].copy_from_slice(address);
    out
}

pub fn register_addresses<S: KeyValueStore>(
    store: &S,
    addresses: &[ScriptAddress],
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    batch.reserve(addresses.len());
    for address in addresses {
        batch.put(Column::Meta, address_key(address), []);
    }
    store.write_batch(&batch)
}

pub fn registered_addresses<S: KeyValueStore>(
    store: &S,
) -> Result<Vec<ScriptAddress>, StoreError> {
    let entries = store.scan_prefix(Column::Meta, ADDR_PREFIX)?;
    let mut addresses = Vec::with_capacity(entries.len());
    for (key, _) in entries {
        if key.len() != ADDR_PREFIX.len() + ADDRESS_LEN {
            continue;
        }
        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&key[ADDR_PREFIX.len()..]);
        addresses.push(address);
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use stashd_storage::memory::MemoryStore;

    use super::*;

    #[test]
    fn registration_roundtrip() {
        let store = MemoryStore::new();
        register_addresses(&store, &[[0x11; ADDRESS_LEN], [0x22; ADDRESS_LEN]])
            .expect("register");
        let mut addresses = registered_addresses(&store).expect("load");
        addresses.sort_unstable();
        assert_eq!(addresses, vec![[0x11; ADDRESS_LEN], [0x22; ADDRESS_LEN]]);
    }
}
