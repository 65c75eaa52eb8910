//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Installs the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::config("logging", format!("failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;

    toml::from_str(&content).map_err(|e| {
        Error::config(
            "config file",
            format!("failed to parse {}: {e}", path.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelKind, RunConfig};
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "model = \"densenet\"\nepochs = 3\n").unwrap();

        let config: RunConfig = load_toml_config(&path).unwrap();
        assert_eq!(config.model, ModelKind::Densenet);
        assert_eq!(config.epochs, 3);
    }

    #[test]
    fn test_missing_config_is_read_error() {
        let result: Result<RunConfig> = load_toml_config(Path::new("/nonexistent/run.toml"));
        assert!(matches!(result, Err(Error::FileIo { .. })));
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "epochs = \"many\"").unwrap();

        let result: Result<RunConfig> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
