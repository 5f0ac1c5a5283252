//! Loader configuration.
//!
//! Sources, highest precedence first:
//! 1. Fields set explicitly on [`LoaderConfig`] or in a config file
//! 2. Environment variables (`NATIVECALL_LIBRARY_PATH`, `NATIVECALL_CACHE_KEY`)
//! 3. Built-in defaults

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::cif::CacheKeyPolicy;
use crate::error::ConfigError;

/// Extra library directories, separated like `PATH`.
pub const LIBRARY_PATH_ENV: &str = "NATIVECALL_LIBRARY_PATH";
/// `symbol` or `signature`; see [`CacheKeyPolicy`].
pub const CACHE_KEY_ENV: &str = "NATIVECALL_CACHE_KEY";

bitflags! {
    /// How symbols are bound when a library is opened. Mirrors the
    /// `RTLD_*` flags of `dlopen`; ignored on platforms without them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BindMode: u32 {
        /// Resolve symbols on first use.
        const LAZY = 0b0001;
        /// Resolve all symbols at load time.
        const NOW = 0b0010;
        /// Keep symbols private to this handle.
        const LOCAL = 0b0100;
        /// Make symbols available to libraries loaded later.
        const GLOBAL = 0b1000;
    }
}

impl Default for BindMode {
    fn default() -> Self {
        BindMode::NOW | BindMode::LOCAL
    }
}

#[cfg(unix)]
impl BindMode {
    pub(crate) fn to_dlopen_flags(self) -> std::ffi::c_int {
        use libloading::os::unix::{RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

        let mut flags = if self.contains(BindMode::LAZY) && !self.contains(BindMode::NOW) {
            RTLD_LAZY
        } else {
            RTLD_NOW
        };
        if self.contains(BindMode::GLOBAL) {
            flags |= RTLD_GLOBAL;
        } else {
            flags |= RTLD_LOCAL;
        }
        flags
    }
}

/// Settings for opening libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directories searched before the environment and system defaults.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Bind mode used by `NativeLibrary::open_with`.
    #[serde(default)]
    pub mode: BindMode,
    #[serde(default)]
    pub cache_key: CacheKeyPolicy,
    /// Search the platform's standard library directories.
    #[serde(default = "default_true")]
    pub system_paths: bool,
}

/// A config file as written; absent fields fall back to the environment.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    search_paths: Option<Vec<PathBuf>>,
    mode: Option<BindMode>,
    cache_key: Option<CacheKeyPolicy>,
    system_paths: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            mode: BindMode::default(),
            cache_key: CacheKeyPolicy::default(),
            system_paths: true,
        }
    }
}

impl LoaderConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_environment();
        config
    }

    /// Read a JSON config file, then overlay environment variables on
    /// anything the file left unset.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_env();
        if let Some(search_paths) = file.search_paths {
            config.search_paths = search_paths;
        }
        if let Some(mode) = file.mode {
            config.mode = mode;
        }
        if let Some(cache_key) = file.cache_key {
            config.cache_key = cache_key;
        }
        if let Some(system_paths) = file.system_paths {
            config.system_paths = system_paths;
        }
        log::debug!("loaded loader config from {}", path.display());
        Ok(config)
    }

    pub fn with_mode(mut self, mode: BindMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    pub fn with_cache_key(mut self, policy: CacheKeyPolicy) -> Self {
        self.cache_key = policy;
        self
    }

    fn apply_environment(&mut self) {
        if let Some(paths) = env::var_os(LIBRARY_PATH_ENV) {
            for dir in env::split_paths(&paths) {
                if !dir.as_os_str().is_empty() && !self.search_paths.contains(&dir) {
                    self.search_paths.push(dir);
                }
            }
        }
        if let Ok(policy) = env::var(CACHE_KEY_ENV) {
            match parse_cache_key(&policy) {
                Some(policy) => self.cache_key = policy,
                None => log::warn!("ignoring unknown {CACHE_KEY_ENV} value '{policy}'"),
            }
        }
    }
}

fn parse_cache_key(s: &str) -> Option<CacheKeyPolicy> {
    match s.trim().to_lowercase().as_str() {
        "symbol" | "symbol_only" => Some(CacheKeyPolicy::SymbolOnly),
        "signature" | "symbol_and_signature" => Some(CacheKeyPolicy::SymbolAndSignature),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn test_config_defaults() {
        let config = LoaderConfig::default();
        assert!(config.search_paths.is_empty());
        assert!(config.system_paths);
        assert_eq!(config.mode, BindMode::NOW | BindMode::LOCAL);
        assert_eq!(config.cache_key, CacheKeyPolicy::SymbolAndSignature);
    }

    #[test]
    fn test_json_round_trip() {
        let config = LoaderConfig::default()
            .with_search_path("/opt/native")
            .with_mode(BindMode::LAZY | BindMode::GLOBAL)
            .with_cache_key(CacheKeyPolicy::SymbolOnly);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: LoaderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: LoaderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, LoaderConfig::default());
    }

    #[test]
    fn test_environment_overlay() {
        let _guard = ENV_GUARD.lock().unwrap();
        let joined = env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        env::set_var(LIBRARY_PATH_ENV, &joined);
        env::set_var(CACHE_KEY_ENV, "symbol");

        let config = LoaderConfig::from_env();

        env::remove_var(LIBRARY_PATH_ENV);
        env::remove_var(CACHE_KEY_ENV);

        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert_eq!(config.cache_key, CacheKeyPolicy::SymbolOnly);
    }

    #[test]
    fn test_file_loading() {
        let _guard = ENV_GUARD.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loader.json");
        fs::write(
            &path,
            r#"{ "search_paths": ["/srv/lib"], "cache_key": "symbol_only",
                 "system_paths": false }"#,
        )
        .unwrap();

        let config = LoaderConfig::from_file(&path).unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("/srv/lib")]);
        assert_eq!(config.cache_key, CacheKeyPolicy::SymbolOnly);
        assert!(!config.system_paths);
    }

    #[test]
    fn test_file_overrides_environment() {
        let _guard = ENV_GUARD.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let explicit = temp_dir.path().join("explicit.json");
        fs::write(
            &explicit,
            r#"{ "search_paths": ["/srv/lib"], "cache_key": "symbol_and_signature" }"#,
        )
        .unwrap();
        let empty = temp_dir.path().join("empty.json");
        fs::write(&empty, "{}").unwrap();

        env::set_var(LIBRARY_PATH_ENV, "/opt/env");
        env::set_var(CACHE_KEY_ENV, "symbol");
        let from_explicit = LoaderConfig::from_file(&explicit);
        let from_empty = LoaderConfig::from_file(&empty);
        env::remove_var(LIBRARY_PATH_ENV);
        env::remove_var(CACHE_KEY_ENV);

        let config = from_explicit.unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("/srv/lib")]);
        assert_eq!(config.cache_key, CacheKeyPolicy::SymbolAndSignature);
        assert!(config.system_paths);

        let config = from_empty.unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("/opt/env")]);
        assert_eq!(config.cache_key, CacheKeyPolicy::SymbolOnly);
        assert_eq!(config.mode, BindMode::default());
    }

    #[test]
    fn test_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        assert!(matches!(
            LoaderConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = temp_dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            LoaderConfig::from_file(&broken),
            Err(ConfigError::Json { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dlopen_flags() {
        use libloading::os::unix::{RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};
        assert_eq!(BindMode::LAZY.to_dlopen_flags(), RTLD_LAZY | RTLD_LOCAL);
        assert_eq!(
            (BindMode::NOW | BindMode::GLOBAL).to_dlopen_flags(),
            RTLD_NOW | RTLD_GLOBAL
        );
        assert_eq!(BindMode::empty().to_dlopen_flags(), RTLD_NOW | RTLD_LOCAL);
    }
}
