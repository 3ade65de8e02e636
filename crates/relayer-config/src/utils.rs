use config::{Config, File};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use warp_relayer_utils::Error;

use super::*;

/// Prefix of the environment variables that override the config files.
pub const ENV_PREFIX: &str = "WARP";

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> warp_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`WarpRelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> warp_relayer_utils::Result<WarpRelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        // get file extension
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of WARP).
    let builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        WarpRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files and
///
/// Returns `Ok(WarpRelayerConfig)` on success, or `Err(Error)` on failure.
///
/// # Arguments
///
/// * `path` - The path to the configuration directory
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> warp_relayer_utils::Result<WarpRelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: WarpRelayerConfig,
) -> warp_relayer_utils::Result<WarpRelayerConfig> {
    tracing::trace!("Checking configration sanity ...");

    // only enabled chains take part in routing.
    config.source_blockchains.retain(|c| c.enabled);
    config.destination_blockchains.retain(|c| c.enabled);

    if !(1..=100).contains(&config.quorum_percentage) {
        return Err(Error::InvalidConfig(format!(
            "quorum-percentage must be between 1 and 100, got {}",
            config.quorum_percentage
        )));
    }
    if config.catch_up.max_blocks_per_step == 0 {
        return Err(Error::InvalidConfig(
            "catch-up.max-blocks-per-step must be positive".into(),
        ));
    }
    if config.source_blockchains.is_empty() {
        return Err(Error::InvalidConfig(
            "at least one enabled source blockchain is required".into(),
        ));
    }
    if config.destination_blockchains.is_empty() {
        return Err(Error::InvalidConfig(
            "at least one enabled destination blockchain is required".into(),
        ));
    }

    let mut seen = HashSet::new();
    for source in &config.source_blockchains {
        if !seen.insert(source.blockchain_id) {
            return Err(Error::InvalidConfig(format!(
                "source blockchain {} is configured twice",
                source.blockchain_id
            )));
        }
    }
    let mut seen = HashSet::new();
    for destination in &config.destination_blockchains {
        if !seen.insert(destination.blockchain_id) {
            return Err(Error::InvalidConfig(format!(
                "destination blockchain {} is configured twice",
                destination.blockchain_id
            )));
        }
    }

    for source in &config.source_blockchains {
        let reachable = config
            .destination_blockchains
            .iter()
            .any(|d| d.blockchain_id != source.blockchain_id);
        if !reachable {
            tracing::warn!(
                "!!WARNING!!: source blockchain {} has no destination other than itself,
                only messages sent to the same chain will be relayed",
                source.blockchain_id
            );
        }
    }

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}
