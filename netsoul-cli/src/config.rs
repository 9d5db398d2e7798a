//! Persistent configuration for netsoul-cli.
//!
//! Config file lives at `~/.config/netsoul/cli.toml`.

use std::path::PathBuf;

use netsoul_sdk::client::DEFAULT_SERVER;
use netsoul_sdk::message::LOCATION_PLACEHOLDER;
use serde::{Deserialize, Serialize};

/// Default netsoul port, appended when the server has none.
pub const DEFAULT_PORT: u16 = 4242;

/// User configuration (persisted in cli.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Server address (host:port). Default: ns-server.epita.fr:4242
    pub server: Option<String>,
    /// Account login.
    pub login: Option<String>,
    /// Account password. Prefer `NETSOUL_PASSWORD` over storing it here.
    pub password: Option<String>,
    /// Location shown to buddies; `%L` is replaced by the host name.
    pub location: Option<String>,
    /// Comment shown to buddies.
    pub comment: Option<String>,
    /// Logins to watch.
    #[serde(default)]
    pub contacts: Vec<String>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("netsoul")
}

pub fn config_path() -> PathBuf {
    config_dir().join("cli.toml")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Bad config file"),
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Can't read config file")
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Resolve the effective values by merging CLI args > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub server: String,
    pub login: String,
    pub password: String,
    pub location: String,
    pub comment: String,
    pub contacts: Vec<String>,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let server = cli
            .server
            .clone()
            .or_else(|| config.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        // Ensure server has a port
        let server = if server.contains(':') {
            server
        } else {
            format!("{server}:{DEFAULT_PORT}")
        };

        let login = cli
            .login
            .clone()
            .or_else(|| config.login.clone())
            .or_else(|| whoami::fallible::username().ok())
            .unwrap_or_default();

        let password = cli
            .password
            .clone()
            .or_else(|| config.password.clone())
            .unwrap_or_default();

        let location = cli
            .location
            .clone()
            .or_else(|| config.location.clone())
            .unwrap_or_else(|| LOCATION_PLACEHOLDER.to_string());

        let comment = cli
            .comment
            .clone()
            .or_else(|| config.comment.clone())
            .unwrap_or_default();

        let mut contacts = if cli.watch.is_empty() {
            config.contacts.clone()
        } else {
            cli.watch.clone()
        };
        contacts.retain(|c| !c.trim().is_empty());
        contacts.dedup();

        Self {
            server,
            login,
            password,
            location,
            comment,
            contacts,
        }
    }

    /// Config to persist. The password is only kept if it already lived in the file.
    pub fn to_config(&self, previous: &Config) -> Config {
        Config {
            server: Some(self.server.clone()),
            login: Some(self.login.clone()),
            password: previous.password.clone(),
            location: Some(self.location.clone()),
            comment: (!self.comment.is_empty()).then(|| self.comment.clone()),
            contacts: self.contacts.clone(),
        }
    }
}
