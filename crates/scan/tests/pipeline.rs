//! End-to-end pipeline tests over synthetic block files and the in-memory
//! store.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use stashd_blockfiles::fileset::{blk_file_path, BlockFileSet};
use stashd_blockfiles::ingest::ingest_headers;
use stashd_blockfiles::parse::FilePosition;
use stashd_chain::HeaderChain;
use stashd_primitives::encoding::Encoder;
use stashd_primitives::hash::{hash160, sha256d};
use stashd_primitives::header::BlockHeader;
use stashd_primitives::script::{script_to_address, AddressPrefixes, ScriptAddress};
use stashd_primitives::Hash256;
use stashd_scan::keys::IndexKey;
use stashd_scan::pipeline::{ScanConfig, ScanPipeline};
use stashd_scan::progress::NullProgressSink;
use stashd_scan::ssh::{get_ssh_entry, update_ssh};
use stashd_scan::stxo::StoredOutput;
use stashd_scan::subssh::{decode_sub_history, parse_history_key};
use stashd_scan::{top_scanned_hash, DbType, StaticAddressFilter};
use stashd_storage::memory::MemoryStore;
use stashd_storage::{Column, KeyValueStore};

const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];
const PREFIXES: AddressPrefixes = AddressPrefixes {
    pubkey_hash: 0x6f,
    script_hash: 0xc4,
};

fn temp_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    dir.push(format!("stashd_pipeline_{tag}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

fn p2pkh_script(pubkey: &[u8]) -> Vec<u8> {
    let hash = hash160(pubkey);
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn wallet_script() -> Vec<u8> {
    p2pkh_script(&[0x02; 33])
}

fn wallet_address() -> ScriptAddress {
    script_to_address(&wallet_script(), &PREFIXES).expect("wallet address")
}

fn other_script() -> Vec<u8> {
    p2pkh_script(&[0x03; 33])
}

fn coinbase_tx(tag: u8, outputs: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_u32_le(1);
    encoder.write_varint(1);
    encoder.write_bytes(&[0u8; 32]);
    encoder.write_u32_le(u32::MAX);
    encoder.write_var_bytes(&[tag, 0x51]);
    encoder.write_u32_le(u32::MAX);
    encoder.write_varint(outputs.len() as u64);
    for (value, script) in outputs {
        encoder.write_i64_le(*value);
        encoder.write_var_bytes(script);
    }
    encoder.write_u32_le(0);
    encoder.into_inner()
}

fn spend_tx(prev_hash: Hash256, prev_index: u32, outputs: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_u32_le(1);
    encoder.write_varint(1);
    encoder.write_bytes(&prev_hash);
    encoder.write_u32_le(prev_index);
    encoder.write_var_bytes(&[0x00, 0x00]);
    encoder.write_u32_le(u32::MAX);
    encoder.write_varint(outputs.len() as u64);
    for (value, script) in outputs {
        encoder.write_i64_le(*value);
        encoder.write_var_bytes(script);
    }
    encoder.write_u32_le(0);
    encoder.into_inner()
}

fn tx_hash(tx: &[u8]) -> Hash256 {
    sha256d(tx)
}

fn header(prev: Hash256, nonce: u32) -> BlockHeader {
    BlockHeader {
        version: 2,
        prev_block: prev,
        merkle_root: [0u8; 32],
        time: 0,
        bits: 0x207fffff,
        nonce,
    }
}

fn block_payload(header: &BlockHeader, txs: &[Vec<u8>]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_bytes(&header.consensus_encode());
    encoder.write_varint(txs.len() as u64);
    for tx in txs {
        encoder.write_bytes(tx);
    }
    encoder.into_inner()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn write_file(dir: &Path, fnum: u32, bytes: &[u8]) {
    let mut file = std::fs::File::create(blk_file_path(dir, fnum)).expect("create");
    file.write_all(bytes).expect("write");
}

/// A chain of block tx-lists; the first block is the genesis.
struct TestChain {
    payloads: Vec<Vec<u8>>,
    genesis_hash: Hash256,
}

fn build_chain(blocks: Vec<Vec<Vec<u8>>>) -> TestChain {
    let mut payloads = Vec::with_capacity(blocks.len());
    let mut prev = [0u8; 32];
    let mut genesis_hash = [0u8; 32];
    for (i, txs) in blocks.into_iter().enumerate() {
        let header = header(prev, i as u32);
        if i == 0 {
            genesis_hash = header.hash();
        }
        prev = header.hash();
        payloads.push(block_payload(&header, &txs));
    }
    TestChain {
        payloads,
        genesis_hash,
    }
}

struct Setup {
    dir: PathBuf,
    files: BlockFileSet,
    chain: HeaderChain,
    store: MemoryStore,
}

/// Write payload groups as files (one group per blk file) and ingest the
/// headers.
fn setup(tag: &str, chain_def: &TestChain, files_split: &[usize]) -> Setup {
    let dir = temp_dir(tag);
    let mut offset = 0;
    for (fnum, count) in files_split.iter().enumerate() {
        let mut bytes = Vec::new();
        for payload in &chain_def.payloads[offset..offset + count] {
            bytes.extend_from_slice(&frame(payload));
        }
        write_file(&dir, fnum as u32, &bytes);
        offset += count;
    }
    assert_eq!(offset, chain_def.payloads.len());

    let mut files = BlockFileSet::new(&dir);
    files.discover().expect("discover");
    let store = MemoryStore::new();
    let mut chain = HeaderChain::new(chain_def.genesis_hash);
    ingest_headers(
        &files,
        &MAGIC,
        &mut chain,
        &store,
        FilePosition { fnum: 0, offset: 0 },
    )
    .expect("ingest");

    Setup {
        dir,
        files,
        chain,
        store,
    }
}

fn scan_config() -> ScanConfig {
    ScanConfig {
        thread_count: 2,
        n_files_per_batch: 1,
        n_blocks_look_ahead: 2,
        db_type: DbType::Full,
    }
}

fn run_scan(setup: &Setup, filter: &StaticAddressFilter, from_height: u32) {
    let mut pipeline = ScanPipeline::new(
        &setup.files,
        &setup.chain,
        &setup.store,
        filter,
        PREFIXES,
        MAGIC,
        scan_config(),
        &NullProgressSink,
    );
    pipeline.scan(from_height).expect("scan");
}

fn stxo_records(store: &MemoryStore) -> Vec<StoredOutput> {
    let mut records = Vec::new();
    for (key, value) in store.scan_prefix(Column::Stxo, &[]).expect("scan") {
        let Some(key) = IndexKey::from_slice(&key) else {
            continue; // metadata record
        };
        records.push(StoredOutput::decode(key, &value).expect("decode stxo"));
    }
    records
}

fn history_records(store: &MemoryStore, address: &ScriptAddress) -> Vec<([u8; 4], Vec<u8>)> {
    store
        .scan_prefix(Column::History, address)
        .expect("scan")
        .into_iter()
        .map(|(key, value)| {
            let (_, hgtx) = parse_history_key(&key).expect("history key");
            (hgtx, value)
        })
        .collect()
}

fn dump_store(store: &MemoryStore) -> Vec<(u32, Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    for column in Column::ALL {
        for (key, value) in store.scan_prefix(column, &[]).expect("scan") {
            out.push((column.bit(), key, value));
        }
    }
    out
}

#[test]
fn genesis_only_scan_writes_sentinel_and_nothing_else() {
    let chain = build_chain(vec![vec![coinbase_tx(0, &[(50_000, other_script())])]]);
    let genesis_hash = chain.genesis_hash;
    let setup = setup("genesis", &chain, &[1]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);

    assert!(stxo_records(&setup.store).is_empty());
    assert!(history_records(&setup.store, &wallet_address()).is_empty());
    assert_eq!(
        top_scanned_hash(&setup.store).expect("sentinel"),
        Some(genesis_hash)
    );

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn cross_block_spend_produces_one_spent_record() {
    let pay = coinbase_tx(0, &[(50_000, wallet_script())]);
    let pay_hash = tx_hash(&pay);
    let spend = spend_tx(pay_hash, 0, &[(49_000, other_script())]);
    let chain = build_chain(vec![
        vec![pay],
        vec![coinbase_tx(1, &[(25_000, other_script())]), spend],
    ]);
    let setup = setup("spend", &chain, &[2]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);

    let records = stxo_records(&setup.store);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key, IndexKey::new(0, 0, 0, 0));
    assert_eq!(record.value, 50_000);
    assert_eq!(record.parent_tx_hash, pay_hash);
    // consuming input: block 1, tx 1, input 0
    assert_eq!(record.spent_by, Some(IndexKey::new(1, 0, 1, 0)));

    // credit at height 0, debit at height 1
    let history = history_records(&setup.store, &wallet_address());
    assert_eq!(history.len(), 2);
    let credit = decode_sub_history(&history[0].1).expect("credit record");
    assert_eq!(credit.len(), 1);
    assert!(!credit[&IndexKey::new(0, 0, 0, 0)].is_spending());
    let debit = decode_sub_history(&history[1].1).expect("debit record");
    assert_eq!(debit.len(), 1);
    let entry = debit[&IndexKey::new(1, 0, 1, 0)];
    assert!(entry.is_spending());
    assert_eq!(entry.tx_out_key, IndexKey::new(0, 0, 0, 0));
    assert_eq!(entry.value, 50_000);

    // aggregate balance nets to zero
    update_ssh(&setup.store, &filter, 1, MAGIC, DbType::Full).expect("ssh");
    let entry = get_ssh_entry(&setup.store, &wallet_address())
        .expect("get")
        .expect("entry");
    assert_eq!(entry.balance, 0);
    assert_eq!(entry.txio_count, 2);

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn same_block_spend_overwrites_unspent_record() {
    let pay = spend_tx([0xaa; 32], 7, &[(30_000, wallet_script())]);
    let pay_hash = tx_hash(&pay);
    let spend = spend_tx(pay_hash, 0, &[(29_000, other_script())]);
    let chain = build_chain(vec![
        vec![coinbase_tx(0, &[(25_000, other_script())])],
        vec![coinbase_tx(1, &[(25_000, other_script())]), pay, spend],
    ]);
    let setup = setup("sameblock", &chain, &[2]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);

    let records = stxo_records(&setup.store);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    // the paying tx is tx 1 of block 1; the spender is tx 2 of the same block
    assert_eq!(record.key, IndexKey::new(1, 0, 1, 0));
    assert!(record.is_spent());
    assert_eq!(record.spent_by, Some(IndexKey::new(1, 0, 2, 0)));

    // one history record at the block's hgtx carrying credit and debit
    let history = history_records(&setup.store, &wallet_address());
    assert_eq!(history.len(), 1);
    let sub = decode_sub_history(&history[0].1).expect("record");
    assert_eq!(sub.len(), 2);
    assert!(!sub[&IndexKey::new(1, 0, 1, 0)].is_spending());
    assert!(sub[&IndexKey::new(1, 0, 2, 0)].is_spending());

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn batch_boundary_across_files_commits_monotonically() {
    // five blocks over two files; with one file per batch the first batch
    // ends at the first block of file 1, and the spend lands in batch two
    let pay = coinbase_tx(0, &[(10_000, wallet_script())]);
    let pay_hash = tx_hash(&pay);
    let spend = spend_tx(pay_hash, 0, &[(9_000, other_script())]);
    let chain = build_chain(vec![
        vec![pay],
        vec![coinbase_tx(1, &[(1, other_script())])],
        vec![coinbase_tx(2, &[(1, other_script())])],
        vec![coinbase_tx(3, &[(1, other_script())])],
        vec![coinbase_tx(4, &[(1, other_script())]), spend],
    ]);
    let top_hash = {
        let mut prev = [0u8; 32];
        let mut top = [0u8; 32];
        for i in 0..5u32 {
            let h = header(prev, i);
            top = h.hash();
            prev = top;
        }
        top
    };
    let setup = setup("batches", &chain, &[3, 2]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);

    let records = stxo_records(&setup.store);
    assert_eq!(records.len(), 1);
    assert!(records[0].is_spent());
    assert_eq!(records[0].spent_by, Some(IndexKey::new(4, 0, 1, 0)));
    assert_eq!(
        top_scanned_hash(&setup.store).expect("sentinel"),
        Some(top_hash)
    );

    // a second scan over the same range must not duplicate anything
    let before = dump_store(&setup.store);
    run_scan(&setup, &filter, 0);
    assert_eq!(dump_store(&setup.store), before);

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn rescan_after_lost_sentinel_recommits_identically() {
    // simulates a crash after the index tables were written but before the
    // sentinel update: the sentinel is gone, so the next startup re-scans
    // the same heights
    let pay = coinbase_tx(0, &[(10_000, wallet_script())]);
    let pay_hash = tx_hash(&pay);
    let spend = spend_tx(pay_hash, 0, &[(9_000, other_script())]);
    let chain = build_chain(vec![
        vec![pay],
        vec![coinbase_tx(1, &[(5_000, other_script())]), spend],
    ]);
    let setup = setup("crash", &chain, &[2]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);
    let committed = dump_store(&setup.store);

    setup
        .store
        .delete(Column::History, stashd_scan::sdbi::SDBI_KEY)
        .expect("drop sentinel");
    assert_eq!(top_scanned_hash(&setup.store).expect("sentinel"), None);

    // startup sees no sentinel and scans from zero again
    run_scan(&setup, &filter, 0);
    assert_eq!(dump_store(&setup.store), committed);

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn garbage_between_blocks_still_indexes_both_sides() {
    let pay = coinbase_tx(1, &[(40_000, wallet_script())]);
    let chain = build_chain(vec![
        vec![coinbase_tx(0, &[(1, other_script())])],
        vec![pay],
    ]);
    let genesis_hash = chain.genesis_hash;

    // hand-assemble the file with 17 bytes of garbage between the frames
    let dir = temp_dir("midgarbage");
    let mut bytes = frame(&chain.payloads[0]);
    bytes.extend_from_slice(&[0x5a; 17]);
    bytes.extend_from_slice(&frame(&chain.payloads[1]));
    write_file(&dir, 0, &bytes);

    let mut files = BlockFileSet::new(&dir);
    files.discover().expect("discover");
    let store = MemoryStore::new();
    let mut header_chain = HeaderChain::new(genesis_hash);
    ingest_headers(
        &files,
        &MAGIC,
        &mut header_chain,
        &store,
        FilePosition { fnum: 0, offset: 0 },
    )
    .expect("ingest");
    assert_eq!(header_chain.top_height().expect("top"), 1);

    let setup = Setup {
        dir,
        files,
        chain: header_chain,
        store,
    };
    let filter = StaticAddressFilter::new([wallet_address()]);
    run_scan(&setup, &filter, 0);

    let records = stxo_records(&setup.store);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, IndexKey::new(1, 0, 0, 0));
    assert!(!records[0].is_spent());

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn scan_from_beyond_top_is_a_clean_no_op() {
    let chain = build_chain(vec![vec![coinbase_tx(0, &[(1, other_script())])]]);
    let setup = setup("beyond", &chain, &[1]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    let mut pipeline = ScanPipeline::new(
        &setup.files,
        &setup.chain,
        &setup.store,
        &filter,
        PREFIXES,
        MAGIC,
        scan_config(),
        &NullProgressSink,
    );
    let summary = pipeline.scan(5).expect("scan");
    assert_eq!(summary.blocks_scanned, 0);
    assert_eq!(summary.top_scanned_hash, None);
    assert_eq!(top_scanned_hash(&setup.store).expect("sentinel"), None);

    let _ = std::fs::remove_dir_all(&setup.dir);
}

#[test]
fn cancellation_drains_and_keeps_complete_batches() {
    let mut blocks = vec![vec![coinbase_tx(0, &[(1, other_script())])]];
    for i in 1..6u8 {
        blocks.push(vec![coinbase_tx(i, &[(1, other_script())])]);
    }
    let chain = build_chain(blocks);
    let setup = setup("cancel", &chain, &[6]);

    let filter = StaticAddressFilter::new([wallet_address()]);
    let mut pipeline = ScanPipeline::new(
        &setup.files,
        &setup.chain,
        &setup.store,
        &filter,
        PREFIXES,
        MAGIC,
        scan_config(),
        &NullProgressSink,
    );
    // flag set before the run: the loop drains immediately, commits
    // nothing, and reports a cancelled summary instead of an error
    pipeline.stop_flag().store(true, Ordering::Relaxed);
    let summary = pipeline.scan(0).expect("scan");
    assert!(summary.cancelled);
    assert_eq!(summary.blocks_scanned, 0);

    let _ = std::fs::remove_dir_all(&setup.dir);
}
