use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Name of the per-user subdirectory under platform config/data dirs.
const APP_DIR: &str = "facemask";

/// Files whose presence in the working directory makes it the config dir.
const LOCAL_FILES: [&str; 2] = ["facemask.json", "facemask.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Create PathConfig from CLI arguments and environment variables
    ///
    /// Priority: CLI args → ENV var (FACEMASK_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| {
            std::env::var("FACEMASK_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        });

        Self { config_dir }
    }
}

/// Get path to a configuration file (filter settings)
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FACEMASK_CONFIG_DIR environment variable
/// 3. Local folder IF facemask.json or facemask.log exist there
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/facemask/{name}
/// - macOS: ~/Library/Application Support/facemask/{name}
/// - Windows: %APPDATA%\facemask\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (logs, etc.)
///
/// Same priority as [`config_file`], ending in the platform data directory:
/// - Linux: ~/.local/share/facemask/{name}
/// - macOS: ~/Library/Application Support/facemask/{name}
/// - Windows: %APPDATA%\facemask\{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

/// Ensure that configuration and data directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    }

    // Only create data_dir if it's different from config_dir
    if data_dir != config_dir && !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }

    Ok(())
}

/// Check if any config files exist in the given directory
fn has_local_config_files(dir: &Path) -> bool {
    LOCAL_FILES.iter().any(|f| dir.join(f).exists())
}

/// Shared resolution: explicit dir, then `cwd` with local files, then platform.
fn resolve_dir(config: &PathConfig, cwd: Option<&Path>, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(cwd) = cwd {
        if has_local_config_files(cwd) {
            return cwd.to_path_buf();
        }
    }
    match platform {
        Some(dir) => dir.join(APP_DIR),
        // Fallback: "." if everything else fails
        None => PathBuf::from("."),
    }
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve_dir(config, cwd.as_deref(), dirs_next::config_dir())
}

fn get_data_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve_dir(config, cwd.as_deref(), dirs_next::data_dir())
}
