use crate::{StorageEngine, WarpRelayerConfig};
use anyhow::Context;
use directories_next::ProjectDirs;
use std::path::{Path, PathBuf};
use warp_relayer_store::{FileStore, PersistentStore, SledStore};

/// Package identifier, where the default configuration & database are defined.
/// If no config directory is given, the relayer reads from the default
/// location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "warp-relayer"];

/// Where to read the configuration from and where to keep the store.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    /// Directory that contains configration files.
    pub config_dir: Option<PathBuf>,
    /// Create the Database Store in a temporary directory.
    /// and will be deleted when the process exits.
    pub tmp: bool,
}

/// Loads the configuration from the given directory.
///
/// Returns `Ok(Config)` on success, or `Err(anyhow::Error)` on failure.
///
/// # Arguments
///
/// * `config_dir` - An optional path to the directory that contains the configuration.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<WarpRelayerConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => {
            tracing::debug!("Getting default dirs for warp relayer");
            let dirs = ProjectDirs::from(
                PACKAGE_ID[0],
                PACKAGE_ID[1],
                PACKAGE_ID[2],
            )
            .context("failed to get config")?;
            dirs.config_dir().to_path_buf()
        }
    };
    // return an error if the path is not a directory.
    if !path.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", path.display()));
    }
    tracing::trace!("Loading Config from {} ..", path.display());
    let v = crate::utils::load(path)?;
    tracing::trace!("Config loaded..");
    Ok(v)
}

/// Sets up the logger for the relayer, based on the verbosity level passed in.
///
/// `0` only shows errors and `4` or more shows everything. The relayer
/// crates and the probe target follow `verbosity`, everything else follows
/// `RUST_LOG`.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in [
        "warp_relayer",
        "warp_relayer_catch_up",
        "warp_relayer_validators",
        "warp_relayer_store",
        warp_relayer_utils::probe::TARGET,
    ] {
        env_filter = env_filter.add_directive(
            format!("{target}={log_level}")
                .parse()
                .context("invalid log directive")?,
        );
    }
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter);
    // if we are not compiling for integration tests, we should use pretty logs
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // otherwise, we should use json, which is easy to parse.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install the logger: {e}"))?;
    Ok(())
}

/// Creates the checkpoint store.
///
/// `storage-location` wins over the config directory, which wins over the
/// OS data directory.
pub fn create_store(
    opts: &SetupOptions,
    config: &WarpRelayerConfig,
) -> anyhow::Result<PersistentStore> {
    // check if we shall use the temp dir.
    if opts.tmp {
        tracing::debug!("Using temp dir for store");
        let store = match config.storage_engine {
            StorageEngine::File => PersistentStore::File(FileStore::temporary()?),
            StorageEngine::Sled => PersistentStore::Sled(SledStore::temporary()?),
        };
        return Ok(store);
    }
    let db_path = match (&config.storage_location, &opts.config_dir) {
        (Some(location), _) => location.clone(),
        (None, Some(config_dir)) => match config_dir.parent() {
            Some(parent) => parent.join("store"),
            None => config_dir.join("store"),
        },
        (None, None) => {
            let dirs = ProjectDirs::from(
                PACKAGE_ID[0],
                PACKAGE_ID[1],
                PACKAGE_ID[2],
            )
            .context("failed to get data dir")?;
            dirs.data_local_dir().join("store")
        }
    };
    tracing::debug!(
        engine = ?config.storage_engine,
        "Opening store at {}",
        db_path.display()
    );
    let store = match config.storage_engine {
        StorageEngine::File => PersistentStore::File(FileStore::open(db_path)?),
        StorageEngine::Sled => PersistentStore::Sled(SledStore::open(db_path)?),
    };
    Ok(store)
}
