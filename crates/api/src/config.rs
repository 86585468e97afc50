//! Server and import configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dumpsync_core::config::{
    ArchiveConfig, ArchivePassword, RemoteConfig, RemoteProtocol, RetryConfig, StagingConfig,
    SyncConfig, TargetConfig, DEFAULT_CHECKPOINT_PATH, DEFAULT_LOG_BUFFER_SIZE,
    DEFAULT_MAX_RETRIES, DEFAULT_REMOTE_PATTERN, DEFAULT_SCHEDULE, DEFAULT_SFTP_PORT,
    DEFAULT_STAGING_DIR,
};
use dumpsync_core::error::SyncError;
use dumpsync_core::freshness::FreshnessOptions;
use dumpsync_core::retry::BackoffPolicy;
use dumpsync_pipeline::loader::{CommandApplier, DatabaseApplier, PgApplier};

/// Default external loader invocation for `IMPORT_LOADER=command`.
pub const DEFAULT_LOADER_COMMAND: &str = "psql -v ON_ERROR_STOP=1 --single-transaction -q {url}";

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for an in-flight import, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Loader selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderConfig {
    /// Execute dumps over a PostgreSQL pool per target.
    Sqlx,
    /// Pipe dumps into an external client command.
    Command(String),
}

impl LoaderConfig {
    /// Load the loader selection from the environment.
    ///
    /// | Env Var                 | Default                                               |
    /// |-------------------------|-------------------------------------------------------|
    /// | `IMPORT_LOADER`         | `sqlx` (or `command`)                                 |
    /// | `IMPORT_LOADER_COMMAND` | `psql -v ON_ERROR_STOP=1 --single-transaction -q {url}` |
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(var: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = var("IMPORT_LOADER").unwrap_or_else(|| "sqlx".into());
        match kind.trim().to_ascii_lowercase().as_str() {
            "sqlx" => Ok(Self::Sqlx),
            "command" => Ok(Self::Command(
                var("IMPORT_LOADER_COMMAND").unwrap_or_else(|| DEFAULT_LOADER_COMMAND.into()),
            )),
            other => Err(SyncError::Configuration(format!(
                "IMPORT_LOADER must be 'sqlx' or 'command', got '{other}'"
            ))),
        }
    }

    pub fn build_applier(&self) -> Result<Arc<dyn DatabaseApplier>, SyncError> {
        match self {
            Self::Sqlx => Ok(Arc::new(PgApplier::new())),
            Self::Command(line) => Ok(Arc::new(CommandApplier::parse(line)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Import pipeline
// ---------------------------------------------------------------------------

/// Load the import pipeline configuration from environment variables.
///
/// Only malformed values are rejected here; semantic checks run in
/// [`SyncConfig::validate`] when the scheduler starts.
///
/// | Env Var                        | Default                   |
/// |--------------------------------|---------------------------|
/// | `IMPORT_ENABLED`               | `true`                    |
/// | `IMPORT_SCHEDULE`              | `0 3 * * *`               |
/// | `REMOTE_PROTOCOL`              | `sftp`                    |
/// | `REMOTE_HOST` / `REMOTE_PORT`  | `localhost` / `22`        |
/// | `REMOTE_USERNAME`              | (empty)                   |
/// | `REMOTE_PASSWORD`              | (none)                    |
/// | `REMOTE_PRIVATE_KEY`           | (none)                    |
/// | `REMOTE_PATH`                  | `/`                       |
/// | `REMOTE_PATTERNS`              | `*.zip`                   |
/// | `REMOTE_TIMEOUT_SECS`          | `300`                     |
/// | `ARCHIVE_PASSWORD`             | (none)                    |
/// | `ARCHIVE_PASSWORDS`            | (none) `pattern=password` |
/// | `EXTRACT_TIMEOUT_SECS`         | `600`                     |
/// | `IMPORT_TARGETS`               | (none) `name=pattern`     |
/// | `IMPORT_TARGET_<NAME>_URL`     | required per target       |
/// | `IMPORT_TIMEOUT_SECS`          | `1800`                    |
/// | `STAGING_DIR`                  | `data/staging`            |
/// | `CHECKPOINT_PATH`              | `data/last_import.json`   |
/// | `CLEANUP_ON_SUCCESS`           | `true`                    |
/// | `KEEP_FAILED_FILES`            | `true`                    |
/// | `FRESHNESS_ENABLED`            | `true`                    |
/// | `FRESHNESS_COMPARE_TIMESTAMP`  | `true`                    |
/// | `FRESHNESS_COMPARE_SIZE`       | `true`                    |
/// | `FRESHNESS_COMPARE_CHECKSUM`   | `false`                   |
/// | `FRESHNESS_SKIP_IF_NOT_NEWER`  | `true`                    |
/// | `IMPORT_MAX_RETRIES`           | `3`                       |
/// | `IMPORT_RETRY_DELAY_MS`        | `1000`                    |
/// | `CACHE_INVALIDATE_URL`         | (none)                    |
/// | `LOG_BUFFER_SIZE`              | `1000`                    |
pub fn sync_config_from_env() -> Result<SyncConfig, SyncError> {
    sync_config_from_lookup(|key| std::env::var(key).ok())
}

/// Same as [`sync_config_from_env`], reading variables through `var`.
pub fn sync_config_from_lookup<F>(var: F) -> Result<SyncConfig, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env(var);
    let defaults = SyncConfig::default();

    let protocol = match env.get("REMOTE_PROTOCOL") {
        Some(value) => RemoteProtocol::from_str(&value).ok_or_else(|| {
            SyncError::Configuration(format!(
                "REMOTE_PROTOCOL must be 'sftp' or 'local', got '{value}'"
            ))
        })?,
        None => RemoteProtocol::Sftp,
    };

    let remote = RemoteConfig {
        protocol,
        host: env.string("REMOTE_HOST", "localhost"),
        port: env.parse("REMOTE_PORT", DEFAULT_SFTP_PORT)?,
        username: env.string("REMOTE_USERNAME", ""),
        password: env.get("REMOTE_PASSWORD"),
        private_key_path: env.get("REMOTE_PRIVATE_KEY").map(PathBuf::from),
        path: env.string("REMOTE_PATH", "/"),
        patterns: split_list(&env.string("REMOTE_PATTERNS", DEFAULT_REMOTE_PATTERN)),
        timeout: env.secs("REMOTE_TIMEOUT_SECS", defaults.remote.timeout)?,
    };

    let archive = ArchiveConfig {
        default_password: env.get("ARCHIVE_PASSWORD"),
        passwords: match env.get("ARCHIVE_PASSWORDS") {
            Some(value) => parse_pairs("ARCHIVE_PASSWORDS", &value)?
                .into_iter()
                .map(|(pattern, password)| ArchivePassword { pattern, password })
                .collect(),
            None => Vec::new(),
        },
        extract_timeout: env.secs("EXTRACT_TIMEOUT_SECS", defaults.archive.extract_timeout)?,
    };

    let mut targets = Vec::new();
    if let Some(value) = env.get("IMPORT_TARGETS") {
        for (name, pattern) in parse_pairs("IMPORT_TARGETS", &value)? {
            let key = target_url_var(&name);
            let database_url = env.get(&key).ok_or_else(|| {
                SyncError::Configuration(format!("{key} must be set for target '{name}'"))
            })?;
            targets.push(TargetConfig {
                name,
                pattern,
                database_url,
            });
        }
    }

    let staging = StagingConfig {
        dir: PathBuf::from(env.string("STAGING_DIR", DEFAULT_STAGING_DIR)),
        checkpoint_path: PathBuf::from(env.string("CHECKPOINT_PATH", DEFAULT_CHECKPOINT_PATH)),
        cleanup_on_success: env.flag("CLEANUP_ON_SUCCESS", true)?,
        keep_failed_files: env.flag("KEEP_FAILED_FILES", true)?,
    };

    let freshness_defaults = FreshnessOptions::default();
    let freshness = FreshnessOptions {
        enabled: env.flag("FRESHNESS_ENABLED", freshness_defaults.enabled)?,
        compare_timestamp: env.flag(
            "FRESHNESS_COMPARE_TIMESTAMP",
            freshness_defaults.compare_timestamp,
        )?,
        compare_size: env.flag("FRESHNESS_COMPARE_SIZE", freshness_defaults.compare_size)?,
        compare_checksum: env.flag(
            "FRESHNESS_COMPARE_CHECKSUM",
            freshness_defaults.compare_checksum,
        )?,
        skip_if_not_newer: env.flag(
            "FRESHNESS_SKIP_IF_NOT_NEWER",
            freshness_defaults.skip_if_not_newer,
        )?,
    };

    let default_backoff = BackoffPolicy::default();
    let initial_delay = Duration::from_millis(env.parse(
        "IMPORT_RETRY_DELAY_MS",
        default_backoff.initial_delay.as_millis() as u64,
    )?);
    let retry = RetryConfig {
        max_retries: env.parse("IMPORT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
        backoff: BackoffPolicy {
            initial_delay,
            max_delay: default_backoff.max_delay.max(initial_delay),
            ..default_backoff
        },
    };

    Ok(SyncConfig {
        enabled: env.flag("IMPORT_ENABLED", true)?,
        schedule: env.string("IMPORT_SCHEDULE", DEFAULT_SCHEDULE),
        remote,
        archive,
        targets,
        import_timeout: env.secs("IMPORT_TIMEOUT_SECS", defaults.import_timeout)?,
        staging,
        freshness,
        retry,
        cache_invalidate_url: env.get("CACHE_INVALIDATE_URL"),
        log_buffer_size: env.parse("LOG_BUFFER_SIZE", DEFAULT_LOG_BUFFER_SIZE)?,
    })
}

/// Name of the variable holding a target's database URL:
/// `orders-db` becomes `IMPORT_TARGET_ORDERS_DB_URL`.
pub fn target_url_var(target: &str) -> String {
    let name: String = target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("IMPORT_TARGET_{name}_URL")
}

/// Split a comma-separated list, dropping blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `key=value,key=value`. Values may contain `=`; neither side may be empty.
fn parse_pairs(var: &str, value: &str) -> Result<Vec<(String, String)>, SyncError> {
    split_list(value)
        .into_iter()
        .map(|item| {
            item.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "{var} entries must look like 'key=value', got '{item}'"
                    ))
                })
        })
        .collect()
}

fn parse_flag(var: &str, value: &str) -> Result<bool, SyncError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::Configuration(format!(
            "{var} must be a boolean, got '{value}'"
        ))),
    }
}

/// Typed accessors over a variable lookup. Blank values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, SyncError> {
        self.get(key)
            .map_or(Ok(default), |value| parse_flag(key, &value))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, SyncError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|e| {
                SyncError::Configuration(format!("{key} is invalid ('{value}'): {e}"))
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, SyncError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    #[test]
    fn empty_environment_uses_defaults() {
        let config = sync_config_from_lookup(lookup(&[])).unwrap();

        assert!(config.enabled);
        assert_eq!(config.schedule, DEFAULT_SCHEDULE);
        assert_eq!(config.remote.protocol, RemoteProtocol::Sftp);
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.remote.patterns, vec!["*.zip".to_string()]);
        assert!(config.targets.is_empty());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(config.freshness, FreshnessOptions::default());
        assert!(config.staging.cleanup_on_success);
        assert!(config.cache_invalidate_url.is_none());
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn full_environment_is_parsed() {
        let config = sync_config_from_lookup(lookup(&[
            ("IMPORT_ENABLED", "false"),
            ("IMPORT_SCHEDULE", "*/15 * * * *"),
            ("REMOTE_PROTOCOL", "local"),
            ("REMOTE_PATH", "/mnt/exports"),
            ("REMOTE_PATTERNS", "export_*.zip, extra_*.zip ,"),
            ("ARCHIVE_PASSWORD", "fallback"),
            ("ARCHIVE_PASSWORDS", "export_*.zip=pw=1,extra_*.zip=pw2"),
            ("IMPORT_TARGETS", "users=users*.sql,orders-db=orders*.sql"),
            ("IMPORT_TARGET_USERS_URL", "postgres://db/users"),
            ("IMPORT_TARGET_ORDERS_DB_URL", "postgres://db/orders"),
            ("FRESHNESS_COMPARE_CHECKSUM", "yes"),
            ("CLEANUP_ON_SUCCESS", "0"),
            ("IMPORT_MAX_RETRIES", "5"),
            ("IMPORT_RETRY_DELAY_MS", "250"),
            ("CACHE_INVALIDATE_URL", "http://cache/invalidate"),
        ]))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.remote.protocol, RemoteProtocol::Local);
        assert_eq!(config.remote.path, "/mnt/exports");
        assert_eq!(config.remote.patterns, vec!["export_*.zip", "extra_*.zip"]);
        assert_eq!(config.archive.password_for("export_1.zip"), Some("pw=1"));
        assert_eq!(config.archive.password_for("extra_1.zip"), Some("pw2"));
        assert_eq!(config.archive.password_for("other.zip"), Some("fallback"));

        let names: Vec<&str> = config.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["users", "orders-db"]);
        assert_eq!(config.targets[1].database_url, "postgres://db/orders");

        assert!(config.freshness.compare_checksum);
        assert!(!config.staging.cleanup_on_success);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(
            config.cache_invalidate_url.as_deref(),
            Some("http://cache/invalidate")
        );
    }

    #[test]
    fn target_without_url_is_rejected() {
        let result = sync_config_from_lookup(lookup(&[("IMPORT_TARGETS", "users=*.sql")]));
        assert_matches!(result, Err(SyncError::Configuration(msg)) if msg.contains("IMPORT_TARGET_USERS_URL"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for vars in [
            [("IMPORT_ENABLED", "maybe")],
            [("REMOTE_PORT", "ssh")],
            [("REMOTE_PROTOCOL", "ftp")],
            [("IMPORT_TARGETS", "users")],
            [("ARCHIVE_PASSWORDS", "=secret")],
        ] {
            assert_matches!(
                sync_config_from_lookup(lookup(&vars)),
                Err(SyncError::Configuration(_)),
                "expected {vars:?} to be rejected"
            );
        }
    }

    #[test]
    fn target_url_var_normalizes_name() {
        assert_eq!(target_url_var("users"), "IMPORT_TARGET_USERS_URL");
        assert_eq!(target_url_var("orders-db.v2"), "IMPORT_TARGET_ORDERS_DB_V2_URL");
    }

    // -----------------------------------------------------------------------
    // Loader selection
    // -----------------------------------------------------------------------

    #[test]
    fn loader_defaults_to_sqlx() {
        assert_eq!(LoaderConfig::from_lookup(lookup(&[])).unwrap(), LoaderConfig::Sqlx);
    }

    #[test]
    fn command_loader_uses_default_command() {
        let loader = LoaderConfig::from_lookup(lookup(&[("IMPORT_LOADER", "command")])).unwrap();
        assert_eq!(loader, LoaderConfig::Command(DEFAULT_LOADER_COMMAND.to_string()));
        assert!(loader.build_applier().is_ok());
    }

    #[test]
    fn unknown_loader_is_rejected() {
        assert_matches!(
            LoaderConfig::from_lookup(lookup(&[("IMPORT_LOADER", "mysqldump")])),
            Err(SyncError::Configuration(_))
        );
    }
}
