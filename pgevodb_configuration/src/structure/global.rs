use std::{collections::BTreeSet, path::PathBuf};

use serde::Deserialize;

use crate::error::ConfigurationResolutionError;
use crate::traits::TryResolve;


/// Advisory lock key used when the configuration does not set one. Every
/// executor of the same database must use the same key for mutual
/// exclusion to hold, so overriding it is only useful to isolate multiple
/// independent migration streams in one database.
pub const DEFAULT_LOCK_KEY: i64 = 0x7067_6576_6f64_6201;

pub const DEFAULT_TIMEOUT_SEC: u32 = 600;


#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct UnresolvedGlobalConfiguration {
    migrations_dir: Option<String>,

    log_dir: Option<String>,

    lock_key: Option<i64>,

    timeout_sec: Option<u32>,

    allow_tags: Option<Vec<String>>,

    interactive: Option<bool>,
}


/// Profile-independent engine settings.
#[derive(Debug, Clone)]
pub struct GlobalConfiguration {
    /// Directory scanned for migration bundles.
    pub migrations_dir: PathBuf,

    /// Directory the per-step execution logs are written into.
    pub log_dir: PathBuf,

    /// 64-bit advisory lock key shared by all executors of one database.
    pub lock_key: i64,

    /// Default statement timeout in seconds; overridable per migration
    /// and per invocation.
    pub timeout_sec: u32,

    /// Tag whitelist; `None` (or an empty list in the file) disables
    /// tag filtering entirely.
    pub allow_tags: Option<BTreeSet<String>>,

    /// Whether terminal prompts are allowed.
    pub interactive: bool,
}

impl Default for GlobalConfiguration {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            log_dir: PathBuf::from("./logs"),
            lock_key: DEFAULT_LOCK_KEY,
            timeout_sec: DEFAULT_TIMEOUT_SEC,
            allow_tags: None,
            interactive: true,
        }
    }
}


impl TryResolve for UnresolvedGlobalConfiguration {
    type Resolved = GlobalConfiguration;
    type Error = ConfigurationResolutionError;

    fn try_resolve(self) -> Result<Self::Resolved, Self::Error> {
        if self.timeout_sec == Some(0) {
            return Err(ConfigurationResolutionError::NonPositiveTimeout);
        }

        let allow_tags = match self.allow_tags {
            Some(tags) if !tags.is_empty() => Some(tags.into_iter().collect()),
            _ => None,
        };

        let defaults = GlobalConfiguration::default();

        Ok(GlobalConfiguration {
            migrations_dir: self
                .migrations_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.migrations_dir),
            log_dir: self.log_dir.map(PathBuf::from).unwrap_or(defaults.log_dir),
            lock_key: self.lock_key.unwrap_or(defaults.lock_key),
            timeout_sec: self.timeout_sec.unwrap_or(defaults.timeout_sec),
            allow_tags,
            interactive: self.interactive.unwrap_or(defaults.interactive),
        })
    }
}
