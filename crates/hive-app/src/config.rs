use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use hive_core::{Group, GroupId, SecuritySetting};
use hive_hooks::HooksConfig;
use hive_store_git::StorageLayout;
use serde::Deserialize;

use crate::access::{RoleDefinition, StaticAccessModel};

/// Snapshot file kept next to the project directories.
pub const SNAPSHOT_FILE: &str = "hive.json";

/// Top-level server configuration loaded from `hive.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default = "default_roles")]
    pub roles: Vec<RoleDefinition>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            hooks: HooksConfig::default(),
            coalescer: CoalescerConfig::default(),
            security: SecurityConfig::default(),
            roles: default_roles(),
            groups: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Parse and validate TOML content.
    ///
    /// # Errors
    /// Returns an error for malformed TOML, duplicate ids, a missing owner role
    /// or an unknown default login group.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for role in &self.roles {
            if !seen.insert(role.id) {
                bail!("duplicate role id detected: {}", role.id);
            }
        }
        if !self.roles.iter().any(|role| role.owner) {
            bail!("no role is marked as owner");
        }
        let mut groups = HashSet::new();
        for group in &self.groups {
            if !groups.insert(group.id) {
                bail!("duplicate group id detected: {}", group.id);
            }
        }
        if let Some(id) = self.security.default_login_group
            && !groups.contains(&id)
        {
            bail!("default login group {id} is not defined");
        }
        Ok(())
    }

    /// Storage layout rooted at `[storage] root`.
    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage.root)
    }

    /// Path of the project snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.storage.root.join(SNAPSHOT_FILE)
    }

    /// Security setting with the default login group resolved.
    #[must_use]
    pub fn security_setting(&self) -> SecuritySetting {
        let default_login_group = self
            .security
            .default_login_group
            .and_then(|id| self.groups.iter().find(|group| group.id == id).cloned());
        SecuritySetting {
            anonymous_access: self.security.anonymous_access,
            default_login_group,
        }
    }

    /// Access model built from `[[roles]]` and `[security]`.
    ///
    /// # Errors
    /// Returns an error when the role table is inconsistent.
    pub fn access_model(&self) -> Result<StaticAccessModel> {
        StaticAccessModel::new(self.roles.clone(), self.security_setting())
    }
}

/// `[storage]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

/// `[coalescer]` block.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    pub threshold_secs: u64,
    pub interval_secs: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 60,
            interval_secs: 60,
        }
    }
}

impl CoalescerConfig {
    /// Age after which a pending update is flushed.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_secs)
    }

    /// Time between two flush cycles.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// `[security]` block.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub anonymous_access: bool,
    pub default_login_group: Option<GroupId>,
}

fn default_roles() -> Vec<RoleDefinition> {
    vec![RoleDefinition {
        id: hive_core::RoleId(1),
        name: "Project Owner".into(),
        permissions: ["*".to_owned()].into(),
        owner: true,
    }]
}
