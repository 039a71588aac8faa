// Configuration loading and parsing (hoopscout.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Name of the single configuration file under `config/` and `defaults/`.
pub const CONFIG_FILE_NAME: &str = "hoopscout.toml";

const ENV_DB_PATH: &str = "HOOPSCOUT_DB_PATH";
const ENV_INDEX_URL: &str = "HOOPSCOUT_INDEX_URL";
const ENV_INDEX_COLLECTION: &str = "HOOPSCOUT_INDEX_COLLECTION";

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

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub cohort: CohortConfig,
    pub index: IndexConfig,
    pub similar: LimitBounds,
    pub search: LimitBounds,
}

// ---------------------------------------------------------------------------
// hoopscout.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire hoopscout.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
    cohort: CohortConfig,
    index: IndexConfig,
    similar: LimitBounds,
    search: LimitBounds,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

/// Which raw records form the league cohort the aggregates are computed over.
#[derive(Debug, Clone, Deserialize)]
pub struct CohortConfig {
    /// Top-N players by fantasy points.
    pub size: usize,
    #[serde(default)]
    pub min_games: u32,
}

/// Connection settings for the vector index service.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub url: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub collection: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    #[serde(default = "default_upsert_concurrency")]
    pub upsert_concurrency: usize,
}

fn default_tenant() -> String {
    "default_tenant".into()
}

fn default_database() -> String {
    "default_database".into()
}

fn default_upsert_concurrency() -> usize {
    4
}

/// Default and upper bound for a caller-supplied result count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LimitBounds {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl LimitBounds {
    /// Clamp a requested count into `[1, max_limit]`.
    ///
    /// Absent, NaN and infinite requests fall back to `default_limit`.
    /// Fractional requests are floored before clamping.
    pub fn resolve(&self, requested: Option<f64>) -> usize {
        match requested {
            Some(v) if v.is_finite() => {
                let floored = v.floor();
                if floored < 1.0 {
                    1
                } else if floored >= self.max_limit as f64 {
                    self.max_limit
                } else {
                    floored as usize
                }
            }
            _ => self.default_limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/hoopscout.toml` relative to
/// `base_dir`, then apply environment overrides.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE_NAME);
    let text = read_file(&path)?;
    let mut config = parse_config(&text, &path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(Config {
        db_path: file.database.path,
        cohort: file.cohort,
        index: file.index,
        similar: file.similar,
        search: file.search,
    })
}

/// Override file values with any of the `HOOPSCOUT_*` variables that are set.
/// `lookup` is injected so tests do not have to touch the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = non_empty(ENV_DB_PATH) {
        config.db_path = path;
    }
    if let Some(url) = non_empty(ENV_INDEX_URL) {
        config.index.url = url;
    }
    if let Some(collection) = non_empty(ENV_INDEX_COLLECTION) {
        config.index.collection = collection;
    }
}

/// Install `defaults/hoopscout.toml` as `config/hoopscout.toml` when no
/// config exists yet. Returns the installed path, or `None` when a config
/// was already in place.
///
/// The default is parsed and validated before it is written, so a broken
/// default never lands in `config/`. An existing config is never touched.
pub fn install_default_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE_NAME);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE_NAME);
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no {CONFIG_FILE_NAME} under config/ or defaults/ in {}",
                base_dir.display()
            ),
        });
    }
    let text = read_file(&source)?;
    validate(&parse_config(&text, &source)?)?;

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| copy_error(&target, e))?;
    }
    // `create_new` keeps a config written concurrently by another process.
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, text.as_bytes())
                .map_err(|e| copy_error(&target, e))?;
            info!(path = %target.display(), "installed default config");
            Ok(Some(target))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(copy_error(&target, e)),
    }
}

fn copy_error(target: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::DefaultsCopyError {
        message: format!("failed to write {}: {e}", target.display()),
    }
}

/// Convenience wrapper: loads config relative to the current working
/// directory, copying defaults first. Falls back to the per-user config
/// directory when the working directory has neither `config/` nor
/// `defaults/`.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;

    match install_default_config(&cwd) {
        Ok(_) => load_config_from(&cwd),
        Err(local_err) => match user_base_dir() {
            Some(base) if base.join("config").join(CONFIG_FILE_NAME).exists() => {
                load_config_from(&base)
            }
            _ => Err(local_err),
        },
    }
}

/// Base directory whose `config/` holds the per-user configuration,
/// e.g. `~/.config/hoopscout` on Linux.
fn user_base_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hoopscout").map(|dirs| dirs.config_dir().to_path_buf())
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
    let positive: &[(&str, usize)] = &[
        ("cohort.size", config.cohort.size),
        ("index.batch_size", config.index.batch_size),
        ("index.timeout_secs", config.index.timeout_secs as usize),
        ("index.upsert_concurrency", config.index.upsert_concurrency),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    if config.index.url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "index.url".into(),
            message: "must not be empty".into(),
        });
    }

    for (section, bounds) in [("similar", &config.similar), ("search", &config.search)] {
        if bounds.max_limit == 0 {
            return Err(ConfigError::ValidationError {
                field: format!("{section}.max_limit"),
                message: "must be > 0".into(),
            });
        }
        if bounds.default_limit == 0 || bounds.default_limit > bounds.max_limit {
            return Err(ConfigError::ValidationError {
                field: format!("{section}.default_limit"),
                message: format!(
                    "must be between 1 and max_limit ({}), got {}",
                    bounds.max_limit, bounds.default_limit
                ),
            });
        }
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

    const VALID_TOML: &str = r#"
[database]
path = "out/hoopscout.db"

[cohort]
size = 200
min_games = 10

[index]
url = "http://localhost:8000"
collection = "scores"
batch_size = 100
timeout_secs = 10

[similar]
default_limit = 3
max_limit = 10

[search]
default_limit = 10
max_limit = 25
"#;

    /// Helper: a fresh temp directory with `config/hoopscout.toml` holding `toml`.
    fn temp_config_dir(name: &str, toml: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("hoopscout_config_{name}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE_NAME), toml).unwrap();
        tmp
    }

    fn parse(toml: &str) -> Result<Config, ConfigError> {
        let config = parse_config(toml, Path::new("inline.toml"))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn parse_valid_config() {
        let config = parse(VALID_TOML).expect("should parse");
        assert_eq!(config.db_path, "out/hoopscout.db");
        assert_eq!(config.cohort.size, 200);
        assert_eq!(config.cohort.min_games, 10);
        assert_eq!(config.index.url, "http://localhost:8000");
        assert_eq!(config.index.tenant, "default_tenant");
        assert_eq!(config.index.database, "default_database");
        assert_eq!(config.index.collection, "scores");
        assert_eq!(config.index.upsert_concurrency, 4);
        assert_eq!(config.similar.default_limit, 3);
        assert_eq!(config.similar.max_limit, 10);
        assert_eq!(config.search.max_limit, 25);
    }

    #[test]
    fn default_config_file_is_valid() {
        let text = fs::read_to_string(shipped_default()).expect("defaults/hoopscout.toml should exist");
        let config = parse(&text).expect("defaults should be valid");
        assert_eq!(config.cohort.size, 200);
        assert_eq!(config.similar.default_limit, 3);
        assert_eq!(config.similar.max_limit, 10);
    }

    #[test]
    fn load_from_directory() {
        let tmp = temp_config_dir("load", VALID_TOML);
        let config = load_config_from(&tmp).expect("should load");
        assert_eq!(config.cohort.size, 200);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_cohort_size() {
        let err = parse(&VALID_TOML.replace("size = 200", "size = 0")).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "cohort.size"),
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_default_above_max() {
        let toml = VALID_TOML.replace(
            "default_limit = 3\nmax_limit = 10",
            "default_limit = 11\nmax_limit = 10",
        );
        let err = parse(&toml).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "similar.default_limit")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = parse(&VALID_TOML.replace("batch_size = 100", "batch_size = 0")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { ref field, .. } if field == "index.batch_size"
        ));
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config_dir("invalid", "this is not valid [[[ toml");
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE_NAME)),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("hoopscout_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = parse(VALID_TOML).unwrap();
        apply_env_overrides(&mut config, |key| match key {
            ENV_DB_PATH => Some("/tmp/other.db".into()),
            ENV_INDEX_URL => Some("http://chroma:9000".into()),
            ENV_INDEX_COLLECTION => Some("   ".into()),
            _ => None,
        });
        assert_eq!(config.db_path, "/tmp/other.db");
        assert_eq!(config.index.url, "http://chroma:9000");
        // Blank values are ignored.
        assert_eq!(config.index.collection, "scores");
    }

    #[test]
    fn limit_resolution() {
        let bounds = LimitBounds {
            default_limit: 3,
            max_limit: 10,
        };
        assert_eq!(bounds.resolve(None), 3);
        assert_eq!(bounds.resolve(Some(f64::NAN)), 3);
        assert_eq!(bounds.resolve(Some(f64::INFINITY)), 3);
        assert_eq!(bounds.resolve(Some(0.0)), 1);
        assert_eq!(bounds.resolve(Some(-4.0)), 1);
        assert_eq!(bounds.resolve(Some(5.9)), 5);
        assert_eq!(bounds.resolve(Some(10.0)), 10);
        assert_eq!(bounds.resolve(Some(50.0)), 10);
    }

    /// A temp project root whose `defaults/` holds the shipped default config.
    fn temp_project_with_defaults(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("hoopscout_install_{name}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(shipped_default(), tmp.join("defaults").join(CONFIG_FILE_NAME)).unwrap();
        tmp
    }

    fn shipped_default() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../defaults")
            .join(CONFIG_FILE_NAME)
    }

    #[test]
    fn first_run_installs_shipped_default() {
        let tmp = temp_project_with_defaults("first_run");

        let installed = install_default_config(&tmp).unwrap();
        let target = tmp.join("config").join(CONFIG_FILE_NAME);
        assert_eq!(installed.as_deref(), Some(target.as_path()));
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            fs::read_to_string(shipped_default()).unwrap()
        );
        // Second run finds the installed file and leaves it alone.
        assert_eq!(install_default_config(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_wins_over_default() {
        let tmp = temp_project_with_defaults("keeps_existing");
        let custom = VALID_TOML.replace(r#"collection = "scores""#, r#"collection = "scores_2024""#);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE_NAME), &custom).unwrap();

        assert_eq!(install_default_config(&tmp).unwrap(), None);
        let text = fs::read_to_string(tmp.join("config").join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(text, custom);
        let config = parse(&text).unwrap();
        assert_eq!(config.index.collection, "scores_2024");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn invalid_default_is_not_installed() {
        let tmp = std::env::temp_dir().join("hoopscout_install_invalid_default");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        let broken = VALID_TOML.replace("size = 200", "size = 0");
        fs::write(tmp.join("defaults").join(CONFIG_FILE_NAME), broken).unwrap();

        let err = install_default_config(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "cohort.size"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        assert!(!tmp.join("config").join(CONFIG_FILE_NAME).exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn no_config_and_no_default_is_an_error() {
        let tmp = std::env::temp_dir().join("hoopscout_install_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = install_default_config(&tmp).unwrap_err();
        match &err {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("config/ or defaults/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
