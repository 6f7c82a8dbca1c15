//! Config file discovery and layered loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge `/etc/mlppp/config.toml` (system)
//! 3. Merge `~/.mlppp/config.toml`, or `$MLPPP_HOME/config.toml` (user)
//! 4. Merge the file named on the command line (explicit)
//! 5. Apply `MLPPP_*` fallbacks for fields no file set
//! 6. Resolve `${VAR}` references
//! 7. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::env::{apply_env_fallbacks, collect_env_vars, resolve_env_references};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Default location of the system layer.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/mlppp/config.toml";

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A validated configuration and where its values came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The merged configuration.
    pub config: Config,
    /// Dotted field path to the layer that set it.
    pub field_sources: FieldSources,
    /// Files that were merged, in precedence order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// The layer that set `field`, if any.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<&ConfigLayer> {
        self.field_sources.get(field)
    }
}

/// Inputs to [`load_with`]. [`LoadOptions::from_env`] fills them in from the
/// running process.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// System layer path; skipped when `None`.
    pub system_file: Option<PathBuf>,
    /// Home directory used to find `~/.mlppp`; skipped when `None`.
    pub home: Option<PathBuf>,
    /// File named on the command line. Unlike the other layers it must
    /// exist.
    pub explicit_file: Option<PathBuf>,
    /// Environment snapshot.
    pub env: HashMap<String, String>,
}

impl LoadOptions {
    /// Options for the running process: the standard system path, the
    /// user's home directory and the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoHomeDir`] if the home directory cannot be found.
    pub fn from_env(explicit_file: Option<&Path>) -> ConfigResult<Self> {
        Ok(Self {
            system_file: Some(PathBuf::from(SYSTEM_CONFIG_PATH)),
            home: Some(home_directory()?),
            explicit_file: explicit_file.map(Path::to_path_buf),
            env: collect_env_vars(),
        })
    }
}

/// Load the layered configuration.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file cannot be read or parsed, if the
/// explicit file is missing, or if the merged result fails validation.
pub fn load_with(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    let mut layers: Vec<(PathBuf, ConfigLayer, toml::Value)> = Vec::new();

    if let Some(path) = &options.system_file {
        if let Some(overlay) = try_load_file(path)? {
            layers.push((path.clone(), ConfigLayer::System, overlay));
        }
    }

    if let Some((path, overlay)) = user_layer(options)? {
        layers.push((path, ConfigLayer::User, overlay));
    }

    if let Some(path) = &options.explicit_file {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        layers.push((path.clone(), ConfigLayer::Explicit, overlay));
    }

    for (path, layer, overlay) in layers {
        deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
        info!(path = %path.display(), layer = %layer, "loaded config");
        loaded_files.push(path.display().to_string());
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, &options.env)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    resolve_env_references(&mut merged, &options.env);
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a single file with no layering.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or
/// validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn user_layer(options: &LoadOptions) -> ConfigResult<Option<(PathBuf, toml::Value)>> {
    if let Some(home) = &options.home {
        let path = home.join(".mlppp").join("config.toml");
        if let Some(overlay) = try_load_file(&path)? {
            return Ok(Some((path, overlay)));
        }
    }
    let Some(raw) = options.env.get("MLPPP_HOME") else {
        return Ok(None);
    };
    match PathBuf::from(raw).canonicalize() {
        Ok(dir) if dir.is_dir() => {
            let path = dir.join("config.toml");
            Ok(try_load_file(&path)?.map(|overlay| (path, overlay)))
        },
        _ => {
            warn!(path = raw.as_str(), "MLPPP_HOME is not a directory; ignoring");
            Ok(None)
        },
    }
}

/// Read and parse a file, returning `None` if it does not exist.
///
/// A single read avoids a race between an existence check and the read.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}
