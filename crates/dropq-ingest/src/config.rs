//! Application configuration
//!
//! Loaded from an optional TOML file layered under `DROPQ_*` environment
//! variables (after `.env` has been read).

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "dropq.toml";

/// Default watched root; `~` is expanded to the home directory.
pub const DEFAULT_ROOT_DIR: &str = "~/S_FILE_UPLOADER";

pub const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt"];

pub const DEFAULT_QUEUE: &str = "dropq:ofs";

pub const DEFAULT_STABILITY_THRESHOLD_MS: u64 = 2_000;

/// Absolute wait before a still-changing file is abandoned (15 minutes).
pub const DEFAULT_MAX_FILE_WAIT_MS: u64 = 900_000;

pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_WORKERS: usize = 4;

pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Journal folder under the root when `log_folder` is unset.
pub const DEFAULT_LOG_FOLDER: &str = ".logs";

pub const DEFAULT_FALLBACK_LOG_NAME: &str = "fallback.log";

/// Broker credentials embedded in every message
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl TryFrom<String> for Credentials {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for Credentials {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((user, password)) if !user.is_empty() && !password.is_empty() => Ok(Self {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err("credentials must have the form USER/PASSWORD".to_string()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_dir: PathBuf,
    pub supported_extensions: Vec<String>,
    pub credentials: Credentials,

    /// `redis://` URL of the broker; unset runs the logging stub sender
    pub broker_url: Option<String>,
    pub queue: String,

    /// Skip files whose content hash is already in the index
    pub check_hash_before_copy: bool,
    pub write_hash_sidecar: bool,

    pub file_stability_threshold_ms: u64,
    pub max_file_wait_ms: u64,
    pub scan_interval_ms: u64,

    pub workers: usize,
    pub shutdown_grace_secs: u64,

    pub log_folder: Option<PathBuf>,
    pub fallback_log_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            supported_extensions: DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            credentials: Credentials {
                user: "INPUTT".to_string(),
                password: "123456".to_string(),
            },
            broker_url: None,
            queue: DEFAULT_QUEUE.to_string(),
            check_hash_before_copy: true,
            write_hash_sidecar: true,
            file_stability_threshold_ms: DEFAULT_STABILITY_THRESHOLD_MS,
            max_file_wait_ms: DEFAULT_MAX_FILE_WAIT_MS,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            workers: DEFAULT_WORKERS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            log_folder: None,
            fallback_log_name: DEFAULT_FALLBACK_LOG_NAME.to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `.env`, the default config file if present, and the environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit config file, which must then exist
    pub fn load_from(file: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix("DROPQ")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("supported_extensions"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Expand `~` and canonicalise the extension list
    pub fn normalized(mut self) -> Self {
        self.root_dir = expand_home(&self.root_dir);
        self.log_folder = self.log_folder.map(|p| expand_home(&p));

        let mut extensions: Vec<String> = Vec::new();
        for ext in &self.supported_extensions {
            let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if !ext.is_empty() && !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        self.supported_extensions = extensions;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            bail!("root_dir cannot be empty");
        }

        if self.supported_extensions.is_empty() {
            bail!("supported_extensions must list at least one extension");
        }

        if self.queue.trim().is_empty() {
            bail!("queue cannot be empty");
        }

        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }

        if self.scan_interval_ms == 0 || self.file_stability_threshold_ms == 0 {
            bail!("scan_interval_ms and file_stability_threshold_ms must be greater than 0");
        }

        if self.max_file_wait_ms < self.file_stability_threshold_ms {
            bail!(
                "max_file_wait_ms ({}) cannot be less than file_stability_threshold_ms ({})",
                self.max_file_wait_ms,
                self.file_stability_threshold_ms
            );
        }

        if self.fallback_log_name.trim().is_empty() {
            bail!("fallback_log_name cannot be empty");
        }

        Ok(())
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.file_stability_threshold_ms)
    }

    pub fn max_file_wait(&self) -> Duration {
        Duration::from_millis(self.max_file_wait_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn log_folder(&self) -> PathBuf {
        self.log_folder
            .clone()
            .unwrap_or_else(|| self.root_dir.join(DEFAULT_LOG_FOLDER))
    }

    // Builder-style overrides, mostly for embedding and tests.

    pub fn with_root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = root.into();
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.check_hash_before_copy = enabled;
        self
    }

    pub fn with_stability(mut self, threshold: Duration, max_wait: Duration) -> Self {
        self.file_stability_threshold_ms = threshold.as_millis() as u64;
        self.max_file_wait_ms = max_wait.as_millis() as u64;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_secs = grace.as_secs();
        self
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default().with_root_dir("/srv/in").normalized();
        config.validate().unwrap();
        assert_eq!(config.supported_extensions, vec!["csv", "txt"]);
        assert_eq!(config.log_folder(), PathBuf::from("/srv/in/.logs"));
        assert_eq!(config.credentials.user, "INPUTT");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
root_dir = "/data/drops"
supported_extensions = [".CSV", "dat", "csv"]
credentials = "OPER/secret"
queue = "ofs.in"
workers = 8
check_hash_before_copy = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/data/drops"));
        assert_eq!(config.supported_extensions, vec!["csv", "dat"]);
        assert_eq!(config.credentials.password, "secret");
        assert_eq!(config.queue, "ofs.in");
        assert_eq!(config.workers, 8);
        assert!(!config.check_hash_before_copy);
        assert_eq!(config.max_file_wait_ms, DEFAULT_MAX_FILE_WAIT_MS);
    }

    #[test]
    fn test_validation_errors() {
        let base = AppConfig::default().with_root_dir("/srv/in");
        assert!(base.clone().with_workers(0).validate().is_err());

        let config = base
            .clone()
            .with_stability(Duration::from_secs(10), Duration::from_secs(5));
        assert!(config.validate().is_err());

        let mut config = base;
        config.supported_extensions = vec![" ".to_string()];
        assert!(config.normalized().validate().is_err());
    }

    #[test]
    fn test_credentials() {
        let creds: Credentials = "USER/PASS".parse().unwrap();
        assert_eq!(creds.user, "USER");
        assert!(!format!("{creds:?}").contains("PASS"));
        assert!("nopassword".parse::<Credentials>().is_err());
        assert!("/x".parse::<Credentials>().is_err());
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("~/S_FILE_UPLOADER"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("S_FILE_UPLOADER"));
        }
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
