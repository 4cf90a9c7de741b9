//! Configuration management for posse
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. a TOML file (`$POSSE_CONFIG`, or `<config dir>/posse/config.toml`),
//! 2. environment variables (secrets only ever come from here),
//! 3. command line flags, applied by each binary.
//!
//! ```toml
//! [mastodon]
//! instance = "https://mamot.fr"
//! account_id = "000262395"
//!
//! [links]
//! feeds = ["https://example.com/feeds/mastodon/links.json"]
//! days = 10
//! ledger = "cache/posse-mastodon.json"
//!
//! [photos]
//! feeds = ["https://example.photo/feeds/mastodon/photos.json"]
//! min_interval = "20h"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::platforms::PlatformKind;
use crate::remote::RemoteCheckMethod;
use crate::stager::MediaFailurePolicy;
use crate::types::Visibility;

pub const ENV_CONFIG: &str = "POSSE_CONFIG";
pub const ENV_MASTODON_INSTANCE: &str = "MASTODON_INSTANCE";
pub const ENV_MASTODON_ACCESS_TOKEN: &str = "MASTODON_ACCESS_TOKEN";
pub const ENV_MASTODON_ACCOUNT_ID: &str = "MASTODON_ACCOUNT_ID";
pub const ENV_MASTODON_APPLICATION: &str = "MASTODON_APPLICATION";
pub const ENV_TWITTER_ACCESS_TOKEN: &str = "TWITTER_ACCESS_TOKEN";
pub const ENV_TWITTER_USERNAME: &str = "TWITTER_USERNAME";
pub const ENV_TEMP_DIR: &str = "RUNNER_TEMPORARY_DIRECTORY";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mastodon: MastodonConfig,
    pub twitter: TwitterConfig,
    pub links: LinksConfig,
    pub photos: PhotosConfig,
    pub check: CheckConfig,
    pub media: MediaConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MastodonConfig {
    /// Base URL of the instance, e.g. "https://mastodon.social"
    pub instance: Option<String>,
    /// Account whose timeline is scanned by the remote check
    pub account_id: Option<String>,
    /// Client application name that identifies syndicated statuses
    pub application: Option<String>,
    pub visibility: Visibility,
    /// Instances on which `@` is defused before posting
    pub defuse_mentions_on: Vec<String>,
    #[serde(skip)]
    pub access_token: Option<SecretString>,
}

impl MastodonConfig {
    /// Instance URL with an https:// scheme when none was given
    pub fn instance_url(&self) -> Result<String> {
        let instance = self
            .instance
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField(ENV_MASTODON_INSTANCE.to_string()))?;

        let url = if instance.starts_with("http://") || instance.starts_with("https://") {
            instance.to_string()
        } else {
            format!("https://{}", instance)
        };
        Ok(url.trim_end_matches('/').to_string())
    }

    pub fn access_token(&self) -> Result<&SecretString> {
        self.access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField(ENV_MASTODON_ACCESS_TOKEN.to_string()).into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub username: Option<String>,
    pub api_base: String,
    pub upload_base: String,
    #[serde(skip)]
    pub access_token: Option<SecretString>,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            username: None,
            api_base: "https://api.twitter.com".to_string(),
            upload_base: "https://api.x.com".to_string(),
            access_token: None,
        }
    }
}

impl TwitterConfig {
    pub fn access_token(&self) -> Result<&SecretString> {
        self.access_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField(ENV_TWITTER_ACCESS_TOKEN.to_string()).into())
    }
}

/// Recent items tracked in a local ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub feeds: Vec<String>,
    pub days: u32,
    pub ledger: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            days: 10,
            ledger: "cache/posse-mastodon.json".to_string(),
        }
    }
}

/// Least syndicated photos with a run throttle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotosConfig {
    pub feeds: Vec<String>,
    pub ledger: String,
    pub timestamp: String,
    #[serde(with = "duration_str")]
    pub min_interval: Duration,
}

impl Default for PhotosConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            ledger: "cache/posse-mastodon-photo.json".to_string(),
            timestamp: "cache/posse-mastodon-photo-timestamp.json".to_string(),
            min_interval: Duration::from_secs(20 * 60 * 60),
        }
    }
}

/// Recent items checked against the network instead of a ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub feeds: Vec<String>,
    pub days: u32,
    pub platform: PlatformKind,
    pub method: RemoteCheckMethod,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            days: 6,
            platform: PlatformKind::Mastodon,
            method: RemoteCheckMethod::Search,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub on_failure: MediaFailurePolicy,
    /// Where images are staged; defaults to the OS temp directory
    pub temp_dir: Option<String>,
}

impl MediaConfig {
    pub fn temp_dir(&self) -> PathBuf {
        match self.temp_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("posse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load the configuration file if there is one, then apply the environment
    ///
    /// A missing file at the default location means defaults; a path named
    /// by `POSSE_CONFIG` must exist.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let explicit = std::env::var_os(ENV_CONFIG).is_some();
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else if explicit {
            return Err(ConfigError::InvalidValue {
                field: ENV_CONFIG.to_string(),
                message: format!("{} does not exist", config_path.display()),
            }
            .into());
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(instance) = get(ENV_MASTODON_INSTANCE) {
            self.mastodon.instance = Some(instance);
        }
        if let Some(token) = get(ENV_MASTODON_ACCESS_TOKEN) {
            self.mastodon.access_token = Some(SecretString::from(token.trim().to_string()));
        }
        if let Some(account_id) = get(ENV_MASTODON_ACCOUNT_ID) {
            self.mastodon.account_id = Some(account_id);
        }
        if let Some(application) = get(ENV_MASTODON_APPLICATION) {
            self.mastodon.application = Some(application);
        }
        if let Some(token) = get(ENV_TWITTER_ACCESS_TOKEN) {
            self.twitter.access_token = Some(SecretString::from(token.trim().to_string()));
        }
        if let Some(username) = get(ENV_TWITTER_USERNAME) {
            self.twitter.username = Some(username);
        }
        if let Some(dir) = get(ENV_TEMP_DIR) {
            self.media.temp_dir = Some(dir);
        }
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("posse").join("config.toml"))
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Durations written the humantime way ("20h", "90s", "1h 30m")
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
