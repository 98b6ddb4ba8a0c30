//! Command-line configuration.
//!
//! Arguments use the `--key=value` form. Flags without a value select the
//! init mode or the network.

use std::path::PathBuf;

use stashd_chain::Network;
use stashd_log::{Format, Level};
use stashd_scan::{DbType, InitMode};

#[derive(Debug)]
pub enum ConfigError {
    BadArgument(String),
    BadValue(&'static str, String),
    BadPath(PathBuf),
    Unsupported(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::BadArgument(arg) => write!(f, "bad argument syntax: {arg}"),
            ConfigError::BadValue(option, value) => {
                write!(f, "bad value for {option}: {value}")
            }
            ConfigError::BadPath(path) => write!(f, "{} is not a valid path", path.display()),
            ConfigError::Unsupported(what) => write!(f, "{what}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub datadir: PathBuf,
    pub db_dir: PathBuf,
    pub blk_file_dir: PathBuf,
    pub init_mode: InitMode,
    pub db_type: DbType,
    pub ram_usage: usize,
    pub thread_count: usize,
    pub log_level: Level,
    pub log_format: Format,
}

impl Config {
    pub fn parse_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut network = Network::Main;
        let mut datadir: Option<PathBuf> = None;
        let mut db_dir: Option<PathBuf> = None;
        let mut blk_file_dir: Option<PathBuf> = None;
        let mut init_mode = InitMode::Normal;
        let mut db_type = DbType::Full;
        let mut ram_usage = 4usize;
        let mut thread_count = default_thread_count();
        let mut log_level = Level::Info;
        let mut log_format = Format::Text;

        for arg in args {
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (arg.as_str(), None),
            };

            match (key, value) {
                ("--rescan", None) => init_mode = InitMode::Rescan,
                ("--rebuild", None) => init_mode = InitMode::Rebuild,
                ("--rescan-ssh", None) => init_mode = InitMode::RescanSsh,
                ("--network", Some(raw)) => {
                    network = Network::parse(raw)
                        .ok_or_else(|| ConfigError::BadValue("--network", raw.to_string()))?;
                }
                ("--datadir", Some(raw)) => datadir = Some(expand_home(raw)),
                ("--db-dir", Some(raw)) => db_dir = Some(expand_home(raw)),
                ("--blkfile-dir", Some(raw)) => blk_file_dir = Some(expand_home(raw)),
                ("--db-type", Some(raw)) => {
                    db_type = DbType::parse(raw)
                        .ok_or_else(|| ConfigError::BadValue("--db-type", raw.to_string()))?;
                }
                ("--ram-usage", Some(raw)) => {
                    ram_usage = parse_positive(raw)
                        .ok_or_else(|| ConfigError::BadValue("--ram-usage", raw.to_string()))?;
                }
                ("--thread-count", Some(raw)) => {
                    thread_count = parse_positive(raw)
                        .ok_or_else(|| ConfigError::BadValue("--thread-count", raw.to_string()))?;
                }
                ("--log-level", Some(raw)) => {
                    log_level = Level::parse(raw)
                        .ok_or_else(|| ConfigError::BadValue("--log-level", raw.to_string()))?;
                }
                ("--log-format", Some(raw)) => {
                    log_format = Format::parse(raw)
                        .ok_or_else(|| ConfigError::BadValue("--log-format", raw.to_string()))?;
                }
                _ => return Err(ConfigError::BadArgument(arg.clone())),
            }
        }

        if db_type == DbType::Super {
            return Err(ConfigError::Unsupported("DB_SUPER is not implemented"));
        }

        let datadir = datadir.unwrap_or_else(|| default_datadir(network));
        let db_dir = db_dir.unwrap_or_else(|| datadir.join("databases"));
        let blk_file_dir = blk_file_dir.unwrap_or_else(|| default_blk_file_dir(network));

        Ok(Self {
            network,
            datadir,
            db_dir,
            blk_file_dir,
            init_mode,
            db_type,
            ram_usage,
            thread_count,
            log_level,
            log_format,
        })
    }

    /// Check the configured paths, creating the database directory when
    /// missing. The block-file directory must already exist.
    pub fn validate_paths(&self) -> Result<(), ConfigError> {
        if !self.blk_file_dir.is_dir() {
            return Err(ConfigError::BadPath(self.blk_file_dir.clone()));
        }
        if !self.db_dir.is_dir() && std::fs::create_dir_all(&self.db_dir).is_err() {
            return Err(ConfigError::BadPath(self.db_dir.clone()));
        }
        Ok(())
    }
}

fn parse_positive(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|value| *value > 0)
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(raw),
    }
}

fn default_datadir(network: Network) -> PathBuf {
    let base = home_dir().join(".stashd");
    match network {
        Network::Main => base,
        Network::Test => base.join("testnet3"),
        Network::Regtest => base.join("regtest"),
    }
}

fn default_blk_file_dir(network: Network) -> PathBuf {
    let base = home_dir().join(".bitcoin");
    match network {
        Network::Main => base.join("blocks"),
        Network::Test => base.join("testnet3").join("blocks"),
        Network::Regtest => base.join("regtest").join("blocks"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn defaults() {
        let config = Config::parse_args(&[]).expect("parse");
        assert_eq!(config.network, Network::Main);
        assert_eq!(config.init_mode, InitMode::Normal);
        assert_eq!(config.db_type, DbType::Full);
        assert_eq!(config.ram_usage, 4);
        assert!(config.thread_count >= 1);
        assert!(config.db_dir.ends_with("databases"));
    }

    #[test]
    fn network_and_mode_flags() {
        let config = Config::parse_args(&args(&[
            "--network=regtest",
            "--rebuild",
            "--ram-usage=8",
            "--thread-count=2",
            "--db-type=DB_BARE",
        ]))
        .expect("parse");
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.init_mode, InitMode::Rebuild);
        assert_eq!(config.ram_usage, 8);
        assert_eq!(config.thread_count, 2);
        assert_eq!(config.db_type, DbType::Bare);
    }

    #[test]
    fn explicit_dirs_override_defaults() {
        let config = Config::parse_args(&args(&[
            "--datadir=/tmp/wallet",
            "--blkfile-dir=/tmp/blocks",
        ]))
        .expect("parse");
        assert_eq!(config.datadir, PathBuf::from("/tmp/wallet"));
        assert_eq!(config.db_dir, PathBuf::from("/tmp/wallet/databases"));
        assert_eq!(config.blk_file_dir, PathBuf::from("/tmp/blocks"));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(Config::parse_args(&args(&["--frobnicate"])).is_err());
        assert!(Config::parse_args(&args(&["--ram-usage=0"])).is_err());
        assert!(Config::parse_args(&args(&["--network=signet"])).is_err());
        assert!(Config::parse_args(&args(&["--db-type=DB_SUPER"])).is_err());
    }
}
