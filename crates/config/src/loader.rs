use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::WebgateConfig};

/// Standard config file name.
const CONFIG_FILENAME: &str = "webgate.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> anyhow::Result<WebgateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    Ok(toml::from_str(&raw)?)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `$WEBGATE_CONFIG` (explicit file path)
/// 2. `./webgate.toml` (project-local)
/// 3. `~/.config/webgate/webgate.toml` (user-global)
///
/// Returns `WebgateConfig::default()` if no config file is found.
pub fn discover_and_load() -> WebgateConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    WebgateConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("WEBGATE_CONFIG") {
        let p = PathBuf::from(explicit);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "webgate") {
        let p = dirs.config_dir().join(CONFIG_FILENAME);
        if p.exists() {
            return Some(p);
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/webgate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "webgate").map(|d| d.config_dir().to_path_buf())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn load_config_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webgate.toml");
        std::fs::write(&path, "[server]\nport = 4000\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 4000);
    }

    #[test]
    fn load_config_missing_file_errors() {
        assert!(load_config(Path::new("/nonexistent/webgate.toml")).is_err());
    }

    #[test]
    fn load_config_bad_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webgate.toml");
        std::fs::write(&path, "not [[ valid").unwrap();
        assert!(load_config(&path).is_err());
    }
}
