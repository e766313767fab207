//! Layered configuration for stash.
//!
//! Values are merged, later layers winning:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. a TOML file: the one given explicitly, or `config.toml` in the
//!    platform config directory (`~/.config/stash/config.toml` on Linux)
//! 3. `STASH_`-prefixed environment variables, with `__` separating nested
//!    keys (`STASH_HOSTS__DOCS=docs/index.html`)

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "STASH_";
pub use stash_storage::CACHE_DIR;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory every resource lives under.
    pub library: PathBuf,
    /// How long the transcode worker may sit idle before it is shut down.
    pub idle_teardown_ms: u64,
    /// `Cache-Control: max-age` for resource responses, in seconds.
    pub max_age: u64,
    /// URI schemes the router answers to.
    pub schemes: Vec<String>,
    /// Host name to entry document, relative to the embedded shell assets.
    pub hosts: BTreeMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let library = project_dirs().map(|dirs| dirs.data_dir().join("resources")).unwrap_or_default();
        Self {
            library,
            idle_teardown_ms: 5_000,
            max_age: 31_536_000,
            schemes: vec!["stash".to_string()],
            hosts: BTreeMap::from([
                ("app".to_string(), PathBuf::from("app/index.html")),
                ("viewer".to_string(), PathBuf::from("viewer/index.html")),
            ]),
        }
    }
}

impl Config {
    /// Load and validate the layered configuration.
    ///
    /// An explicit `file` must exist; the default location is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::MissingFile(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => project_dirs().map(|dirs| dirs.config_dir().join("config.toml")),
        };
        Self::from_figment(Self::figment(file.as_deref()))
    }

    /// The provider stack [`load`](Self::load) extracts from.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.library.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("no library directory configured".to_string()));
        }
        if !self.library.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("library must be absolute: {}", self.library.display())));
        }
        if self.idle_teardown_ms == 0 {
            exn::bail!(ErrorKind::Invalid("idle_teardown_ms must be positive".to_string()));
        }
        if self.schemes.is_empty() {
            exn::bail!(ErrorKind::Invalid("at least one scheme is required".to_string()));
        }
        if let Some(scheme) = self.schemes.iter().find(|scheme| !is_valid_scheme(scheme)) {
            exn::bail!(ErrorKind::Invalid(format!("invalid scheme: {scheme:?}")));
        }
        if self.hosts.is_empty() {
            exn::bail!(ErrorKind::Invalid("at least one host is required".to_string()));
        }
        for (host, entry) in &self.hosts {
            if host.is_empty() || entry.is_absolute() || stash_storage::validate_path(entry).is_err() {
                exn::bail!(ErrorKind::Invalid(format!("invalid entry document for host {host:?}")));
            }
        }
        Ok(())
    }

    pub fn idle_teardown(&self) -> Duration {
        Duration::from_millis(self.idle_teardown_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.library.join(CACHE_DIR)
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "stash")
}

// RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ), compared lowercase.
fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}
