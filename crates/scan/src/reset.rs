//! Database reset modes.
//!
//! Address registration lives in the Meta column and survives every mode.

use stashd_storage::{clear_column, Column, KeyValueStore, StoreError};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InitMode {
    #[default]
    Normal,
    /// Clear scanned history; keep headers and registered addresses.
    Rescan,
    /// Clear everything except registered addresses; headers and indexes
    /// are rebuilt from file 0.
    Rebuild,
    /// Clear only the aggregated balances; they are recomputed from the
    /// history records.
    RescanSsh,
}

pub fn reset_databases<S: KeyValueStore>(store: &S, mode: InitMode) -> Result<(), StoreError> {
    let columns: &[Column] = match mode {
        InitMode::Normal => return Ok(()),
        InitMode::Rescan => &[
            Column::Stxo,
            Column::History,
            Column::TxHints,
            Column::Ssh,
            Column::SubSsh,
        ],
        InitMode::Rebuild => &[
            Column::Stxo,
            Column::History,
            Column::TxHints,
            Column::Ssh,
            Column::SubSsh,
            Column::BlkData,
        ],
        InitMode::RescanSsh => &[Column::Ssh, Column::SubSsh],
    };

    for column in columns {
        let removed = clear_column(store, *column)?;
        stashd_log::log_info!("cleared {} records from {}", removed, column.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use stashd_storage::memory::MemoryStore;

    use super::*;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        for column in Column::ALL {
            store.put(column, b"record", b"value").expect("put");
        }
        store
    }

    fn has(store: &MemoryStore, column: Column) -> bool {
        store.get(column, b"record").expect("get").is_some()
    }

    #[test]
    fn rescan_keeps_headers_and_registration() {
        let store = seeded_store();
        reset_databases(&store, InitMode::Rescan).expect("reset");
        assert!(!has(&store, Column::Stxo));
        assert!(!has(&store, Column::History));
        assert!(!has(&store, Column::TxHints));
        assert!(!has(&store, Column::Ssh));
        assert!(!has(&store, Column::SubSsh));
        assert!(has(&store, Column::BlkData));
        assert!(has(&store, Column::Meta));
    }

    #[test]
    fn rebuild_clears_headers_too() {
        let store = seeded_store();
        reset_databases(&store, InitMode::Rebuild).expect("reset");
        assert!(!has(&store, Column::BlkData));
        assert!(has(&store, Column::Meta));
    }

    #[test]
    fn rescan_ssh_clears_only_aggregates() {
        let store = seeded_store();
        reset_databases(&store, InitMode::RescanSsh).expect("reset");
        assert!(!has(&store, Column::Ssh));
        assert!(!has(&store, Column::SubSsh));
        assert!(has(&store, Column::Stxo));
        assert!(has(&store, Column::History));
        assert!(has(&store, Column::BlkData));
    }

    #[test]
    fn normal_mode_is_a_no_op() {
        let store = seeded_store();
        reset_databases(&store, InitMode::Normal).expect("reset");
        for column in Column::ALL {
            assert!(has(&store, column));
        }
    }
}
