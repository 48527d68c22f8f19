use crate::catalog::Catalog;
use crate::catalog::schema::{Privilege, RelationDef};
use crate::catalog::types::Oid;
use crate::config::EngineConfig;
use crate::error::AlterError;
use serde::{Deserialize, Serialize};

/// Identity on whose behalf a command runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerContext {
    pub caller_id: String,
    // Reserved internal flag: never deserialize from untrusted input.
    #[serde(default, skip_deserializing)]
    internal_system: bool,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            internal_system: false,
        }
    }

    pub(crate) fn system_internal() -> Self {
        Self {
            caller_id: "system".to_string(),
            internal_system: true,
        }
    }

    pub(crate) fn is_internal_system(&self) -> bool {
        self.internal_system && self.caller_id == "system"
    }

    pub(crate) fn is_superuser(&self, catalog: &Catalog) -> bool {
        self.is_internal_system()
            || catalog
                .roles
                .get(self.caller_id.as_str())
                .is_some_and(|r| r.superuser)
    }

    /// Ownership or an administrative exemption.
    pub fn may_administer(&self, catalog: &Catalog, rel: &RelationDef) -> bool {
        if self.is_superuser(catalog) || rel.owner == self.caller_id {
            return true;
        }
        catalog
            .roles
            .get(self.caller_id.as_str())
            .is_some_and(|r| r.policy_exempt)
    }
}

pub fn check_owner(
    catalog: &Catalog,
    caller: &CallerContext,
    rel: &RelationDef,
) -> Result<(), AlterError> {
    if caller.may_administer(catalog, rel) {
        return Ok(());
    }
    Err(AlterError::InsufficientPrivilege {
        message: format!("must be owner of {} {}", rel.kind.description(), rel.name),
    })
}

pub fn check_system_protection(rel: &RelationDef, config: &EngineConfig) -> Result<(), AlterError> {
    if rel.is_system && !config.allow_system_table_mods {
        return Err(AlterError::SystemObjectProtected {
            relation: rel.name.to_string(),
        });
    }
    Ok(())
}

/// Ownership plus system protection; every ALTER target goes through this.
pub fn check_alter_permission(
    catalog: &Catalog,
    caller: &CallerContext,
    rel: &RelationDef,
    config: &EngineConfig,
) -> Result<(), AlterError> {
    check_owner(catalog, caller, rel)?;
    check_system_protection(rel, config)
}

pub fn has_privilege(catalog: &Catalog, caller: &CallerContext, relid: Oid, privilege: Privilege) -> bool {
    if caller.is_superuser(catalog) {
        return true;
    }
    if let Some(rel) = catalog.relations.get(&relid)
        && rel.owner == caller.caller_id
    {
        return true;
    }
    catalog.has_grant(&caller.caller_id, relid, privilege)
}

pub fn check_privilege(
    catalog: &Catalog,
    caller: &CallerContext,
    relid: Oid,
    privilege: Privilege,
) -> Result<(), AlterError> {
    if has_privilege(catalog, caller, relid, privilege) {
        return Ok(());
    }
    Err(AlterError::InsufficientPrivilege {
        message: format!("permission denied for table {}", catalog.relation_name(relid)),
    })
}

/// Whether the caller may hand objects over to `new_owner`.
pub fn check_can_assign_owner(
    catalog: &Catalog,
    caller: &CallerContext,
    new_owner: &str,
) -> Result<(), AlterError> {
    catalog.role(new_owner)?;
    if caller.is_superuser(catalog) || caller.caller_id == new_owner {
        return Ok(());
    }
    Err(AlterError::InsufficientPrivilege {
        message: format!("must be able to SET ROLE \"{new_owner}\""),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{RelKind, RoleDef};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::bootstrap("pg_default");
        for (name, superuser, policy_exempt) in [("alice", false, false), ("bob", false, false), ("ops", false, true)] {
            catalog.roles.insert(
                name.into(),
                RoleDef {
                    name: name.into(),
                    superuser,
                    policy_exempt,
                },
            );
        }
        catalog
    }

    #[test]
    fn owner_and_exempt_roles_may_alter() {
        let catalog = catalog();
        let rel = RelationDef::new(20000, "t", "public", RelKind::Table, "alice");
        assert!(check_owner(&catalog, &CallerContext::new("alice"), &rel).is_ok());
        assert!(check_owner(&catalog, &CallerContext::new("ops"), &rel).is_ok());
        assert!(check_owner(&catalog, &CallerContext::new("postgres"), &rel).is_ok());
        let err = check_owner(&catalog, &CallerContext::new("bob"), &rel).expect_err("bob");
        assert_eq!(err.to_string(), "must be owner of table t");
    }

    #[test]
    fn system_relations_need_explicit_permission() {
        let catalog = catalog();
        let rel = catalog.relation(1259).expect("pg_class").clone();
        let caller = CallerContext::system_internal();
        let strict = EngineConfig::default();
        assert!(check_alter_permission(&catalog, &caller, &rel, &strict).is_err());
        let relaxed = EngineConfig::default().with_system_table_mods(true);
        assert!(check_alter_permission(&catalog, &caller, &rel, &relaxed).is_ok());
    }

    #[test]
    fn grants_confer_privileges() {
        let mut catalog = catalog();
        let rel = RelationDef::new(20000, "t", "public", RelKind::Table, "alice");
        catalog.insert_relation(rel);
        let bob = CallerContext::new("bob");
        assert!(!has_privilege(&catalog, &bob, 20000, Privilege::References));
        catalog.grants.insert(("bob".into(), 20000, Privilege::References));
        assert!(check_privilege(&catalog, &bob, 20000, Privilege::References).is_ok());
        assert!(check_can_assign_owner(&catalog, &bob, "alice").is_err());
        assert!(check_can_assign_owner(&catalog, &bob, "bob").is_ok());
    }
}
