use std::{
    fs,
    path::PathBuf,
    sync::{LazyLock, RwLock},
    time::Duration,
};

use documented::{Documented, DocumentedFields};
use parcel_utils::{
    path::{resolve_path, xdg_config_home},
    time::parse_duration,
};
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;
use tracing::info;

use crate::{
    annotations::annotate_toml_table,
    error::{ConfigError, Result},
};

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Parcel configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct Config {
    /// Git executable used to fetch repositories.
    /// Default: git
    pub git_binary: Option<String>,

    /// Fetch only the requested ref instead of the full history.
    /// Default: true
    pub shallow_clone: Option<bool>,

    /// Abort a fetch that runs longer than this, e.g. "90s", "10m" or "1h30m".
    /// Default: no timeout
    pub timeout: Option<String>,

    /// Fetch sibling sub-packages in parallel.
    /// Default: false
    pub parallel: Option<bool>,

    /// Maximum sub-package nesting depth.
    /// Default: 16
    pub max_depth: Option<usize>,

    /// Registries reached over plain HTTP. localhost and 127.0.0.1 are always included.
    /// Default: []
    pub insecure_registries: Option<Vec<String>>,

    /// User agent sent to OCI registries.
    /// Default: parcel/<version>
    pub user_agent: Option<String>,
}

pub static CONFIG: LazyLock<RwLock<Option<Config>>> = LazyLock::new(|| RwLock::new(None));

pub static CONFIG_PATH: LazyLock<RwLock<PathBuf>> = LazyLock::new(|| {
    RwLock::new(match std::env::var("PARCEL_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => xdg_config_home().join("parcel").join("config.toml"),
    })
});

pub fn init() -> Result<()> {
    let config = Config::new()?;
    let mut global_config = CONFIG.write().unwrap();
    *global_config = Some(config);
    Ok(())
}

/// Returns the loaded configuration, falling back to defaults when [`init`] was never called.
pub fn get_config() -> Config {
    if let Some(config) = CONFIG.read().unwrap().as_ref() {
        return config.clone();
    }

    let mut guard = CONFIG.write().unwrap();
    guard.get_or_insert_with(Config::default_config).clone()
}

fn default_user_agent() -> String {
    format!("parcel/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            git_binary: Some("git".to_string()),
            shallow_clone: Some(true),
            timeout: None,
            parallel: Some(false),
            max_depth: Some(DEFAULT_MAX_DEPTH),
            insecure_registries: Some(Vec::new()),
            user_agent: Some(default_user_agent()),
        }
    }

    /// Loads the configuration file at [`CONFIG_PATH`], using defaults when it does not exist.
    pub fn new() -> Result<Self> {
        let config_path = CONFIG_PATH.read().unwrap().to_path_buf();

        let mut config = match fs::read_to_string(&config_path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default_config(),
            Err(err) => return Err(ConfigError::IoError(err)),
        };

        config.resolve()?;

        Ok(config)
    }

    pub fn resolve(&mut self) -> Result<()> {
        if let Some(timeout) = &self.timeout {
            if parse_duration(timeout).is_none() {
                return Err(ConfigError::InvalidTimeout(timeout.clone()));
            }
        }
        if self.max_depth == Some(0) {
            return Err(ConfigError::InvalidMaxDepth);
        }

        self.git_binary.get_or_insert_with(|| "git".to_string());
        self.shallow_clone.get_or_insert(true);
        self.parallel.get_or_insert(false);
        self.max_depth.get_or_insert(DEFAULT_MAX_DEPTH);
        self.insecure_registries.get_or_insert_with(Vec::new);
        self.user_agent.get_or_insert_with(default_user_agent);

        Ok(())
    }

    /// Git executable, with `~` and environment variables expanded when it is a path.
    pub fn git_binary(&self) -> Result<PathBuf> {
        let binary = self.git_binary.as_deref().unwrap_or("git");
        if binary.contains(['/', '$']) || binary.starts_with('~') {
            Ok(resolve_path(binary)?)
        } else {
            Ok(PathBuf::from(binary))
        }
    }

    pub fn shallow_clone(&self) -> bool {
        self.shallow_clone.unwrap_or(true)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }

    pub fn parallel(&self) -> bool {
        self.parallel.unwrap_or(false)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(default_user_agent)
    }

    pub fn to_annotated_document(&self) -> Result<DocumentMut> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut doc = toml_string.parse::<DocumentMut>()?;
        annotate_toml_table::<Config>(doc.as_table_mut(), true)?;
        Ok(doc)
    }
}

pub fn generate_default_config() -> Result<()> {
    let config_path = CONFIG_PATH.read().unwrap().to_path_buf();

    if config_path.exists() {
        return Err(ConfigError::ConfigAlreadyExists);
    }

    let annotated_doc = Config::default_config().to_annotated_document()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, annotated_doc.to_string())?;
    info!(
        "Default configuration file generated with documentation at: {}",
        config_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::test_utils::with_env;

    #[test]
    fn test_default_config_values() {
        let config = Config::default_config();

        assert_eq!(config.git_binary().unwrap(), PathBuf::from("git"));
        assert!(config.shallow_clone());
        assert!(!config.parallel());
        assert_eq!(config.max_depth(), 16);
        assert_eq!(config.timeout(), None);
        assert!(config.user_agent().starts_with("parcel/"));
    }

    #[test]
    fn test_resolve_fills_missing_fields() {
        let mut config: Config = toml::from_str("parallel = true").unwrap();
        config.resolve().unwrap();

        assert_eq!(config.parallel, Some(true));
        assert_eq!(config.git_binary.as_deref(), Some("git"));
        assert_eq!(config.max_depth, Some(DEFAULT_MAX_DEPTH));
        assert_eq!(config.shallow_clone, Some(true));
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let mut config = Config::default_config();
        config.timeout = Some("ten minutes".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidTimeout(t)) if t == "ten minutes"
        ));

        let mut config = Config::default_config();
        config.max_depth = Some(0);
        assert!(matches!(config.resolve(), Err(ConfigError::InvalidMaxDepth)));
    }

    #[test]
    fn test_timeout_parsing() {
        let mut config = Config::default_config();
        config.timeout = Some("1m30s".to_string());
        config.resolve().unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    #[serial]
    fn test_git_binary_path_expansion() {
        with_env(&[("PARCEL_GIT_HOME", Some("/opt/git"))], || {
            let config = Config {
                git_binary: Some("$PARCEL_GIT_HOME/bin/git".to_string()),
                ..Config::default_config()
            };
            assert_eq!(config.git_binary().unwrap(), PathBuf::from("/opt/git/bin/git"));
        });
    }

    #[test]
    #[serial]
    fn test_config_path_and_generate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let previous = std::mem::replace(&mut *CONFIG_PATH.write().unwrap(), path.clone());

        generate_default_config().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("# Maximum sub-package nesting depth."));
        assert!(matches!(
            generate_default_config(),
            Err(ConfigError::ConfigAlreadyExists)
        ));

        let loaded = Config::new().unwrap();
        assert_eq!(loaded.max_depth(), DEFAULT_MAX_DEPTH);

        fs::write(&path, "timeout = \"soon\"").unwrap();
        assert!(Config::new().is_err());

        *CONFIG_PATH.write().unwrap() = previous;
    }
}
