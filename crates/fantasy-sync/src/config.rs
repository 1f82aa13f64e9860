// Configuration loading and parsing (sync.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_TTL;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub game: GameConfig,
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Time-to-live applied to cached game-state snapshots.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }

    /// Resolved path of the SQLite store. An empty `storage.path` means the
    /// platform data directory (e.g. `~/.local/share/fantasy-sync`).
    pub fn storage_path(&self) -> PathBuf {
        if !self.storage.path.is_empty() {
            return PathBuf::from(&self.storage.path);
        }
        match directories::ProjectDirs::from("", "", "fantasy-sync") {
            Some(dirs) => dirs.data_dir().join(DEFAULT_DB_FILE),
            None => PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

const DEFAULT_DB_FILE: &str = "fantasy-sync.db";
const SYNC_FILE: &str = "sync.toml";

// ---------------------------------------------------------------------------
// sync.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire sync.toml file.
#[derive(Debug, Clone, Deserialize)]
struct SyncFile {
    remote: RemoteConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    game: GameConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Root URL of the game-state service, e.g. `https://example.com/api`.
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787/api".to_string(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
        }
    }
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL.as_millis() as u64
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path; empty selects the platform data directory.
    #[serde(default)]
    pub path: String,
    /// Key the session record is persisted under.
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            session_key: default_session_key(),
        }
    }
}

fn default_session_key() -> String {
    "session".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Game loaded by the CLI when none is given on the command line.
    #[serde(default = "default_game_id")]
    pub default_game_id: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_game_id: default_game_id(),
        }
    }
}

fn default_game_id() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    /// Bearer token sent to the game-state service, if it requires one.
    pub api_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/sync.toml` and (optionally)
/// `config/credentials.toml`, relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- sync.toml (required) ---
    let sync_path = config_dir.join(SYNC_FILE);
    let sync_text = read_file(&sync_path)?;
    let sync_file: SyncFile = toml::from_str(&sync_text).map_err(|e| ConfigError::ParseError {
        path: sync_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        remote: sync_file.remote,
        cache: sync_file.cache,
        storage: sync_file.storage,
        game: sync_file.game,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/sync.toml` into `config/` if no `config/sync.toml` exists
/// yet. Returns the path written, or `None` if the file was already there.
/// `credentials.toml` is never created; `defaults/` only carries an example.
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(SYNC_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(SYNC_FILE);
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{SYNC_FILE} and no defaults/{SYNC_FILE} in {}",
                base_dir.display()
            ),
        });
    }

    let copy_error = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", target.display()),
    };
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(copy_error)?;
    }
    std::fs::copy(&source, &target).map_err(copy_error)?;
    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let url = config.remote.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "remote.base_url".into(),
            message: format!("must start with http:// or https://, got {url:?}"),
        });
    }

    if config.remote.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "remote.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.cache.ttl_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "cache.ttl_ms".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.storage.session_key.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "storage.session_key".into(),
            message: "must not be empty".into(),
        });
    }

    if config.game.default_game_id.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "game.default_game_id".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: the crate root, which holds `defaults/`.
    fn crate_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    }

    /// Helper: a scratch directory with a `config/` holding `sync_toml`.
    fn scratch_config(name: &str, sync_toml: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let config_dir = tmp.join("config");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("sync.toml"), sync_toml).unwrap();
        tmp
    }

    const MINIMAL: &str = r#"
[remote]
base_url = "https://fantasy.example.com/api"
"#;

    #[test]
    fn load_defaults_file() {
        let tmp = std::env::temp_dir().join("fantasy_sync_config_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::copy(
            crate_root().join("defaults/sync.toml"),
            tmp.join("config/sync.toml"),
        )
        .unwrap();

        let config = load_config_from(&tmp).expect("defaults should load");
        assert_eq!(config.remote.base_url, "http://127.0.0.1:8787/api");
        assert_eq!(config.remote.request_timeout_secs, 10);
        assert_eq!(config.cache.ttl_ms, 60_000);
        assert_eq!(config.cache_ttl(), DEFAULT_TTL);
        assert_eq!(config.storage.path, "fantasy-sync.db");
        assert_eq!(config.storage.session_key, "session");
        assert_eq!(config.game.default_game_id, "default");
        assert!(config.credentials.api_token.is_none());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let tmp = scratch_config("fantasy_sync_config_minimal", MINIMAL);
        let config = load_config_from(&tmp).unwrap();

        assert_eq!(config.remote.base_url, "https://fantasy.example.com/api");
        assert_eq!(config.remote.request_timeout_secs, 10);
        assert_eq!(config.cache.ttl_ms, 60_000);
        assert_eq!(config.storage.session_key, "session");
        assert_eq!(config.game.default_game_id, "default");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn credentials_toml_with_api_token() {
        let tmp = scratch_config("fantasy_sync_config_creds", MINIMAL);
        fs::write(
            tmp.join("config/credentials.toml"),
            "api_token = \"secret-token\"\n",
        )
        .unwrap();

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.credentials.api_token.as_deref(), Some("secret-token"));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_ttl() {
        let tmp = scratch_config(
            "fantasy_sync_config_zero_ttl",
            &format!("{MINIMAL}\n[cache]\nttl_ms = 0\n"),
        );
        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "cache.ttl_ms"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_non_http_base_url() {
        let tmp = scratch_config(
            "fantasy_sync_config_bad_url",
            "[remote]\nbase_url = \"ftp://example.com\"\n",
        );
        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "remote.base_url"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_session_key() {
        let tmp = scratch_config(
            "fantasy_sync_config_empty_key",
            &format!("{MINIMAL}\n[storage]\nsession_key = \"  \"\n"),
        );
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_sync_toml() {
        let tmp = std::env::temp_dir().join("fantasy_sync_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = scratch_config("fantasy_sync_config_invalid", "[remote\nbase_url = ");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_sync_toml_once() {
        let tmp = std::env::temp_dir().join("fantasy_sync_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/sync.toml"), MINIMAL).unwrap();
        fs::write(tmp.join("defaults/credentials.toml.example"), "api_token = \"\"").unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied, Some(tmp.join("config/sync.toml")));
        assert!(!tmp.join("config/credentials.toml").exists());
        assert!(!tmp.join("config/credentials.toml.example").exists());

        // Second run leaves the edited file alone.
        fs::write(tmp.join("config/sync.toml"), "# edited").unwrap();
        assert_eq!(ensure_config_files(&tmp).unwrap(), None);
        assert_eq!(
            fs::read_to_string(tmp.join("config/sync.toml")).unwrap(),
            "# edited"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_defaults_keeps_existing_config() {
        let tmp = scratch_config("fantasy_sync_config_no_defaults", MINIMAL);
        assert_eq!(ensure_config_files(&tmp).unwrap(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_nothing_to_copy() {
        let tmp = std::env::temp_dir().join("fantasy_sync_config_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn storage_path_uses_configured_path() {
        let mut config = Config::default();
        config.storage.path = "/tmp/custom.db".into();
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/custom.db"));

        config.storage.path.clear();
        assert!(config.storage_path().ends_with(DEFAULT_DB_FILE));
    }
}
