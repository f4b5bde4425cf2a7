//! Role decisions consumed by permission resolution.

use anyhow::{Result, bail};
use hive_core::{Permission, RoleId, SecuritySetting};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Authorization rules as seen by the project manager.
pub trait AccessModel: Send + Sync {
    /// Whether `role` grants `permission`.
    fn implies(&self, role: RoleId, permission: &Permission) -> bool;

    /// Role granted to the creator of a project.
    fn owner_role(&self) -> RoleId;

    /// Instance-wide security settings.
    fn security_setting(&self) -> SecuritySetting;
}

/// Permission name granting everything.
pub const ALL_PERMISSIONS: &str = "*";

/// Role declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Primary key.
    pub id: RoleId,
    /// Display name.
    pub name: String,
    /// Granted permission names; `"*"` grants every permission.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Role given to project creators.
    #[serde(default)]
    pub owner: bool,
}

impl RoleDefinition {
    /// Whether this role grants `permission`.
    #[must_use]
    pub fn grants(&self, permission: &Permission) -> bool {
        self.permissions.contains(ALL_PERMISSIONS) || self.permissions.contains(permission.name())
    }
}

/// Fixed role table and security setting.
#[derive(Debug, Clone)]
pub struct StaticAccessModel {
    roles: HashMap<RoleId, RoleDefinition>,
    owner: RoleId,
    setting: SecuritySetting,
}

impl StaticAccessModel {
    /// Build the model from role definitions.
    ///
    /// # Errors
    /// Fails on duplicate role ids or when not exactly one role is marked as owner.
    pub fn new(roles: Vec<RoleDefinition>, setting: SecuritySetting) -> Result<Self> {
        let mut table = HashMap::with_capacity(roles.len());
        let mut owner = None;
        for role in roles {
            if role.owner {
                if let Some(existing) = owner {
                    bail!("roles {existing} and {} are both marked as owner", role.id);
                }
                owner = Some(role.id);
            }
            if let Some(previous) = table.insert(role.id, role) {
                bail!("duplicate role id {}", previous.id);
            }
        }
        let Some(owner) = owner else {
            bail!("no role is marked as owner");
        };
        Ok(Self {
            roles: table,
            owner,
            setting,
        })
    }

    /// Definition of `role`.
    #[must_use]
    pub fn role(&self, role: RoleId) -> Option<&RoleDefinition> {
        self.roles.get(&role)
    }
}

impl AccessModel for StaticAccessModel {
    fn implies(&self, role: RoleId, permission: &Permission) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|definition| definition.grants(permission))
    }

    fn owner_role(&self) -> RoleId {
        self.owner
    }

    fn security_setting(&self) -> SecuritySetting {
        self.setting.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: u64, permissions: &[&str], owner: bool) -> RoleDefinition {
        RoleDefinition {
            id: RoleId(id),
            name: format!("role-{id}"),
            permissions: permissions.iter().map(|p| (*p).to_owned()).collect(),
            owner,
        }
    }

    #[test]
    fn wildcard_role_implies_everything() -> Result<()> {
        let model = StaticAccessModel::new(
            vec![role(1, &["*"], true), role(2, &["read-code"], false)],
            SecuritySetting::default(),
        )?;
        assert_eq!(model.owner_role(), RoleId(1));
        assert!(model.implies(RoleId(1), &Permission::MANAGE_PROJECT));
        assert!(model.implies(RoleId(2), &Permission::READ_CODE));
        assert!(!model.implies(RoleId(2), &Permission::MANAGE_PROJECT));
        assert!(!model.implies(RoleId(9), &Permission::READ_CODE));
        Ok(())
    }

    #[test]
    fn owner_must_be_unique_and_present() {
        assert!(StaticAccessModel::new(vec![role(1, &[], false)], SecuritySetting::default()).is_err());
        assert!(
            StaticAccessModel::new(
                vec![role(1, &[], true), role(2, &[], true)],
                SecuritySetting::default()
            )
            .is_err()
        );
        assert!(
            StaticAccessModel::new(
                vec![role(1, &[], true), role(1, &[], false)],
                SecuritySetting::default()
            )
            .is_err()
        );
    }
}
