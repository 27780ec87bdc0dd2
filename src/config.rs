//! Where the msos engine lives and how to create it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShimError};

/// Name of the config file under `<config dir>/msosext/`.
const CONFIG_FILE: &str = "msosext.toml";

/// Points at an explicit config file.
pub const ENV_CONFIG: &str = "MSOS_CONFIG";
pub const ENV_LIBRARY_PATH: &str = "MSOS_LIBRARY_PATH";
pub const ENV_FACTORY_SYMBOL: &str = "MSOS_FACTORY_SYMBOL";
pub const ENV_FACTORY_KIND: &str = "MSOS_FACTORY_KIND";

/// Calling convention of the exported factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryKind {
    /// `void __stdcall CreateMsos(IMsos** msos)`
    #[default]
    Plain,
    /// `void __stdcall CreateMsos(IUnknown* debugClient, IMsos** msos)`; the
    /// engine builds its data target over the debugger's client.
    WithClient,
}

impl FactoryKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "plain" => Ok(FactoryKind::Plain),
            "with_client" => Ok(FactoryKind::WithClient),
            other => Err(ShimError::Config(format!(
                "unknown factory_kind {other:?}, expected \"plain\" or \"with_client\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Library exporting the factory. Relative paths go through the loader's
    /// normal search order.
    pub library_path: PathBuf,
    /// Name of the exported factory.
    pub factory_symbol: String,
    pub factory_kind: FactoryKind,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("msos.dll"),
            factory_symbol: "CreateMsos".to_string(),
            factory_kind: FactoryKind::Plain,
        }
    }
}

impl ShimConfig {
    /// Defaults, then the config file, then environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok(), default_config_path())
    }

    /// Same as [`ShimConfig::load`] with the environment and the default file
    /// location supplied by the caller.
    pub fn load_with<E>(env: E, default_path: Option<PathBuf>) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config = match env(ENV_CONFIG) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match default_path {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("no msosext config file, using defaults");
                    Self::default()
                }
            },
        };

        let config = config.apply_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| ShimError::Config(format!("reading {}: {e}", path.display())))?;
        let config = Self::from_toml(&data)
            .map_err(|e| ShimError::Config(format!("parsing {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded msosext config");
        Ok(config)
    }

    pub fn from_toml(data: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    pub fn apply_overrides<E>(mut self, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env(ENV_LIBRARY_PATH) {
            self.library_path = PathBuf::from(path);
        }
        if let Some(symbol) = env(ENV_FACTORY_SYMBOL) {
            self.factory_symbol = symbol;
        }
        if let Some(kind) = env(ENV_FACTORY_KIND) {
            self.factory_kind = FactoryKind::parse(&kind)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.library_path.as_os_str().is_empty() {
            return Err(ShimError::Config("library_path is empty".into()));
        }
        if self.factory_symbol.trim().is_empty() {
            return Err(ShimError::Config("factory_symbol is empty".into()));
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("msosext").join(CONFIG_FILE))
}
