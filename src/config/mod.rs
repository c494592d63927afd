//! Configuration resolution.
//!
//! Values come from three layers, highest priority first:
//! command-line overrides, the process environment, and the `.env` file.
//! The result is a typed [`Settings`] value that later stages receive as an
//! explicit parameter; the process environment is only ever read.

mod parse;

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

pub use parse::{EnvMap, load_env_file, parse_env};

pub const DEFAULT_USERNAME_KEY: &str = "DEFAULT_GITHUB_USERNAME";
pub const DEFAULT_TOKEN_KEY: &str = "DEFAULT_GITHUB_TOKEN";
pub const USERNAME_KEY: &str = "GITHUB_USERNAME";
pub const TOKEN_KEY: &str = "GITHUB_TOKEN";
pub const REPO_NAME_KEY: &str = "GITHUB_REPO_NAME";
pub const MIRROR_DIR_KEY: &str = "MIRROR_DIR";
pub const TRANSPORT_KEY: &str = "MIRROR_TRANSPORT";
pub const DELETE_KEY: &str = "MIRROR_DELETE";
pub const AUTO_INIT_KEY: &str = "MIRROR_AUTO_INIT";
pub const EXCLUDE_KEY: &str = "MIRROR_EXCLUDE";
pub const HOST_KEY: &str = "MIRROR_HOST";
pub const PRIMARY_LABEL_KEY: &str = "PRIMARY_LABEL";

/// Every key the resolver understands; only these are read from the environment.
pub const KNOWN_KEYS: &[&str] = &[
    DEFAULT_USERNAME_KEY,
    DEFAULT_TOKEN_KEY,
    USERNAME_KEY,
    TOKEN_KEY,
    REPO_NAME_KEY,
    MIRROR_DIR_KEY,
    TRANSPORT_KEY,
    DELETE_KEY,
    AUTO_INIT_KEY,
    EXCLUDE_KEY,
    HOST_KEY,
    PRIMARY_LABEL_KEY,
];

/// How the mirror remote is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `https://<user>:<token>@<host>/...`, rewritten on every run.
    TokenHttps,
    /// A pre-existing `origin` remote; never created or rewritten.
    Ssh,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "https" | "token" | "token-https" => Ok(Transport::TokenHttps),
            "ssh" => Ok(Transport::Ssh),
            other => Err(format!("unknown transport '{}' (expected https or ssh)", other)),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::TokenHttps => f.write_str("https"),
            Transport::Ssh => f.write_str("ssh"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Override,
    Default,
}

/// Account used for the mirror remote and the mirror's commit identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub token: String,
    /// Where the token came from.
    pub source: CredentialSource,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub transport: Transport,
    pub delete_on_reconcile: bool,
    pub auto_init_mirror: bool,
    pub exclude_patterns: Vec<String>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            transport: Transport::TokenHttps,
            delete_on_reconcile: true,
            auto_init_mirror: true,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Values given on the command line; each one beats every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub transport: Option<Transport>,
    pub no_delete: bool,
    pub no_auto_init: bool,
    pub mirror_dir: Option<PathBuf>,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Always present under [`Transport::TokenHttps`].
    pub credential: Option<Credential>,
    pub policy: SyncPolicy,
    /// Mirror repository name; `None` means "same as the source directory".
    pub repo_name: Option<String>,
    /// Account that owns the mirror repository; set whenever a username is.
    pub owner: Option<String>,
    /// Mirror working tree; `None` means `<source-parent>/<repo>-mirror`.
    pub mirror_dir: Option<PathBuf>,
    pub mirror_host: String,
    pub primary_label: String,
    /// The file the settings were read from, kept out of the mirror.
    pub config_path: Option<PathBuf>,
}

/// Configuration problems, all collected before reporting.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigError {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
    pub unreadable: Option<String>,
}

impl ConfigError {
    fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty() && self.unreadable.is_none()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(u) = &self.unreadable {
            parts.push(u.clone());
        }
        if !self.missing.is_empty() {
            parts.push(format!("missing required configuration: {}", self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            parts.push(format!("invalid configuration: {}", self.invalid.join("; ")));
        }
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ConfigError {}

/// Layered lookup: environment first, then file. Empty values count as unset.
struct Layers<'a> {
    file: &'a EnvMap,
    env: &'a EnvMap,
}

impl Layers<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        non_empty(self.env, key).or_else(|| non_empty(self.file, key))
    }

    /// Override key first, default key second.
    fn pick(&self, override_key: &str, default_key: &str) -> Option<(String, CredentialSource)> {
        if let Some(v) = self.get(override_key) {
            return Some((v.to_string(), CredentialSource::Override));
        }
        self.get(default_key)
            .map(|v| (v.to_string(), CredentialSource::Default))
    }

    fn flag(&self, key: &str, default: bool, err: &mut ConfigError) -> bool {
        match self.get(key) {
            None => default,
            Some(v) => parse_bool(v).unwrap_or_else(|| {
                err.invalid
                    .push(format!("{}={} (expected true or false)", key, v));
                default
            }),
        }
    }
}

fn non_empty<'m>(map: &'m EnvMap, key: &str) -> Option<&'m str> {
    map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Combine the file layer, the environment layer and command-line overrides.
///
/// # Errors
/// Returns a [`ConfigError`] naming every missing required key and every
/// invalid value, never just the first one.
pub fn resolve(file: &EnvMap, env: &EnvMap, overrides: &Overrides) -> Result<Settings, ConfigError> {
    let layers = Layers { file, env };
    let mut err = ConfigError::default();

    let transport = match overrides.transport {
        Some(t) => Some(t),
        None => match layers.get(TRANSPORT_KEY) {
            None => Some(Transport::TokenHttps),
            Some(v) => match v.parse::<Transport>() {
                Ok(t) => Some(t),
                Err(e) => {
                    err.invalid.push(format!("{}: {}", TRANSPORT_KEY, e));
                    None
                }
            },
        },
    };

    let username = layers.pick(USERNAME_KEY, DEFAULT_USERNAME_KEY);
    let token = layers.pick(TOKEN_KEY, DEFAULT_TOKEN_KEY);
    if transport == Some(Transport::TokenHttps) {
        if username.is_none() {
            err.missing.push(DEFAULT_USERNAME_KEY.to_string());
        }
        if token.is_none() {
            err.missing.push(DEFAULT_TOKEN_KEY.to_string());
        }
    }
    let owner = username.as_ref().map(|(u, _)| u.clone());
    let credential = match (username, token) {
        (Some((username, _)), Some((token, source))) => Some(Credential {
            username,
            token,
            source,
        }),
        _ => None,
    };

    let delete_on_reconcile = layers.flag(DELETE_KEY, true, &mut err) && !overrides.no_delete;
    let auto_init_mirror = layers.flag(AUTO_INIT_KEY, true, &mut err) && !overrides.no_auto_init;

    let exclude_patterns: Vec<String> = layers
        .get(EXCLUDE_KEY)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    for p in &exclude_patterns {
        if let Err(e) = globset::Glob::new(p) {
            err.invalid.push(format!("{}: {}", EXCLUDE_KEY, e));
        }
    }

    if !err.is_empty() {
        return Err(err);
    }

    let settings = Settings {
        credential,
        policy: SyncPolicy {
            transport: transport.unwrap_or(Transport::TokenHttps),
            delete_on_reconcile,
            auto_init_mirror,
            exclude_patterns,
        },
        repo_name: layers.get(REPO_NAME_KEY).map(String::from),
        owner,
        mirror_dir: overrides
            .mirror_dir
            .clone()
            .or_else(|| layers.get(MIRROR_DIR_KEY).map(PathBuf::from)),
        mirror_host: layers.get(HOST_KEY).unwrap_or("github.com").to_string(),
        primary_label: layers.get(PRIMARY_LABEL_KEY).unwrap_or("Gitea").to_string(),
        config_path: None,
    };
    debug!(
        transport = %settings.policy.transport,
        delete = settings.policy.delete_on_reconcile,
        auto_init = settings.policy.auto_init_mirror,
        credential = settings.credential.is_some(),
        "resolved configuration"
    );
    Ok(settings)
}

/// Snapshot of the known keys present in the process environment.
pub fn process_env() -> EnvMap {
    KNOWN_KEYS
        .iter()
        .filter_map(|k| env::var(k).ok().map(|v| (k.to_string(), v)))
        .collect()
}

/// Load `path` (when present, or always when `explicit`), layer the process
/// environment and `overrides` on top, and resolve.
///
/// # Errors
/// Returns a [`ConfigError`] if the file cannot be read or resolution fails.
pub fn load(path: &Path, explicit: bool, overrides: &Overrides) -> Result<Settings, ConfigError> {
    let file = load_env_file(path, explicit).map_err(|e| ConfigError {
        unreadable: Some(format!("{:#}", e)),
        ..ConfigError::default()
    })?;
    let mut settings = resolve(&file, &process_env(), overrides)?;
    if path.exists() {
        settings.config_path = Some(path.to_path_buf());
    }
    Ok(settings)
}
