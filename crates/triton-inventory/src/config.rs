//! Profile loading
//!
//! Profiles are the Triton CLI's connection profiles: one JSON file per
//! account/datacenter under `<config-dir>/profiles.d/`, plus a profile named
//! `env` synthesized from `TRITON_*`/`SDC_*` environment variables.
//!
//! The `env` profile mirrors whatever the shell currently points at. It is
//! loaded like any other profile but the walker never inventories it, since
//! it would duplicate one of the file profiles.

use crate::error::{InventoryError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the profile built from environment variables
pub const ENV_PROFILE_NAME: &str = "env";

/// Directory name of the Triton CLI configuration
pub const CONFIG_DIR_NAME: &str = ".triton";

/// Marker file that makes a project-local configuration directory win
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory holding one JSON file per profile
pub const PROFILES_DIR_NAME: &str = "profiles.d";

/// Overrides the key id of every profile
pub const KEY_ID_OVERRIDE_VAR: &str = "ANSIBLE_TRITON_KEY_ID";

/// Explicit path to the private key used for request signing
pub const KEY_PATH_VAR: &str = "TRITON_KEY_PATH";

/// A named connection configuration for one account/datacenter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Profile name, also the inventory group every instance joins
    ///
    /// Profile files may leave it out; the file stem is used then.
    #[serde(default)]
    pub name: String,

    /// CloudAPI endpoint
    pub url: String,

    /// Account login
    pub account: String,

    /// SSH key fingerprint registered with the account
    pub key_id: String,

    /// RBAC sub-user, if requests are made as one
    #[serde(default)]
    pub user: Option<String>,

    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure: bool,
}

impl Profile {
    /// Create a profile
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        account: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            account: account.into(),
            key_id: key_id.into(),
            user: None,
            insecure: false,
        }
    }

    /// Whether this is the environment profile the walker skips
    pub fn is_env(&self) -> bool {
        self.name == ENV_PROFILE_NAME
    }

    /// Replace the key id if an override is supplied
    pub fn with_key_id_override(mut self, key_id: Option<&str>) -> Self {
        if let Some(key_id) = key_id.filter(|k| !k.is_empty()) {
            self.key_id = key_id.to_string();
        }
        self
    }
}

/// Resolve the configuration directory
///
/// `<cwd>/.triton` wins when it holds a `config.json`, otherwise
/// `<home>/.triton` is used.
pub fn resolve_config_dir(cwd: &Path, home: &Path) -> PathBuf {
    let local = cwd.join(CONFIG_DIR_NAME);
    if local.join(CONFIG_FILE_NAME).is_file() {
        debug!(dir = %local.display(), "Using local config");
        return local;
    }
    home.join(CONFIG_DIR_NAME)
}

/// Home directory from `HOME`
pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| InventoryError::config("HOME is not set"))
}

/// Load every profile: the environment profile first (if complete), then
/// the profile files sorted by file name
pub fn load_all_profiles(config_dir: &Path) -> Result<Vec<Profile>> {
    let mut profiles = Vec::new();

    if let Some(profile) = env_profile(|name| std::env::var(name).ok()) {
        profiles.push(profile);
    }

    profiles.extend(load_profile_files(&config_dir.join(PROFILES_DIR_NAME))?);

    debug!(count = profiles.len(), dir = %config_dir.display(), "Loaded profiles");
    Ok(profiles)
}

/// Load `*.json` profiles from a directory, sorted by file name
///
/// A missing directory yields no profiles. Files that fail to parse are
/// logged and skipped.
pub fn load_profile_files(dir: &Path) -> Result<Vec<Profile>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No profiles directory");
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut profiles = Vec::with_capacity(paths.len());
    for path in paths {
        match read_profile(&path) {
            Ok(profile) => profiles.push(profile),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable profile"),
        }
    }
    Ok(profiles)
}

fn read_profile(path: &Path) -> Result<Profile> {
    let content = std::fs::read_to_string(path)?;
    let mut profile: Profile = serde_json::from_str(&content)?;
    if profile.name.is_empty() {
        profile.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InventoryError::config(format!("{}: no profile name", path.display())))?;
    }
    Ok(profile)
}

/// Build the `env` profile from `TRITON_*` variables, falling back to the
/// legacy `SDC_*` names
///
/// Returns `None` unless url, account and key id are all present.
pub fn env_profile<F>(lookup: F) -> Option<Profile>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        lookup(&format!("TRITON_{}", suffix))
            .or_else(|| lookup(&format!("SDC_{}", suffix)))
            .filter(|v| !v.is_empty())
    };

    let url = var("URL")?;
    let account = var("ACCOUNT")?;
    let key_id = var("KEY_ID")?;

    let mut profile = Profile::new(ENV_PROFILE_NAME, url, account, key_id);
    profile.user = var("USER");
    profile.insecure = var("TLS_INSECURE").is_some_and(|v| v == "1" || v == "true");
    Some(profile)
}
