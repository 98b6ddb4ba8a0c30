use stashd::{BlockDataManager, Config, LogProgressSink};
use stashd_chain::chain_params;
use stashd_log::LogConfig;
use stashd_scan::ScanConfig;
use stashd_storage::fjall::FjallStore;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    stashd_log::init(LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: true,
    });

    if let Err(err) = run(&config) {
        stashd_log::log_error!("{err}");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate_paths()?;

    stashd_log::log_info!("blkfile dir: {}", config.blk_file_dir.display());
    stashd_log::log_info!("db dir: {}", config.db_dir.display());

    let params = chain_params(config.network);
    let scan_config = ScanConfig::from_level(config.thread_count, config.ram_usage, config.db_type);
    let store = FjallStore::open(&config.db_dir)?;

    let mut manager =
        BlockDataManager::open(&store, params, scan_config, &config.blk_file_dir)?;
    let summary = manager.initial_sync(config.init_mode, &LogProgressSink)?;

    if summary.cancelled {
        stashd_log::log_warn!("sync cancelled after {} blocks", summary.blocks_scanned);
    } else {
        stashd_log::log_info!("sync complete, {} blocks scanned", summary.blocks_scanned);
    }
    Ok(())
}
