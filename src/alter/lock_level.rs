use crate::alter::command::{ColumnConstraint, ConstraintSpec, Subcommand};
use crate::lock::LockMode;

/// Relation options that only affect future planning or maintenance.
const LIGHT_REL_OPTIONS: &[&str] = &[
    "fillfactor",
    "autovacuum_enabled",
    "autovacuum_vacuum_threshold",
    "autovacuum_vacuum_scale_factor",
    "autovacuum_analyze_threshold",
    "autovacuum_analyze_scale_factor",
    "parallel_workers",
    "n_distinct",
];

fn rel_options_lock<'a>(names: impl IntoIterator<Item = &'a str>) -> LockMode {
    let all_light = names
        .into_iter()
        .all(|n| LIGHT_REL_OPTIONS.contains(&n));
    if all_light {
        LockMode::ShareUpdateExclusive
    } else {
        LockMode::AccessExclusive
    }
}

fn constraint_lock(spec: &ConstraintSpec) -> LockMode {
    match spec {
        // Only blocks writers on both tables; reads continue.
        ConstraintSpec::ForeignKey(_) => LockMode::ShareRowExclusive,
        ConstraintSpec::Check { .. }
        | ConstraintSpec::Unique { .. }
        | ConstraintSpec::PrimaryKey { .. } => LockMode::AccessExclusive,
    }
}

pub fn subcommand_lock_level(cmd: &Subcommand) -> LockMode {
    match cmd {
        Subcommand::AddColumn { column, .. } => column
            .constraints
            .iter()
            .map(|c| match c {
                ColumnConstraint::References { .. } => LockMode::ShareRowExclusive,
                _ => LockMode::AccessExclusive,
            })
            .fold(LockMode::AccessExclusive, LockMode::max),
        Subcommand::DropColumn { .. }
        | Subcommand::AlterColumnType { .. }
        | Subcommand::ColumnDefault { .. }
        | Subcommand::SetNotNull { .. }
        | Subcommand::DropNotNull { .. }
        | Subcommand::SetTablespace { .. }
        | Subcommand::SetLogged
        | Subcommand::SetUnlogged
        | Subcommand::SetWithOids
        | Subcommand::SetWithoutOids
        | Subcommand::DropConstraint { .. }
        | Subcommand::AlterConstraint { .. }
        | Subcommand::ChangeOwner { .. }
        | Subcommand::AddInherit { .. }
        | Subcommand::DropInherit { .. }
        | Subcommand::DropOf
        | Subcommand::ReplicaIdentity(_)
        | Subcommand::SetRowSecurity(_)
        | Subcommand::SetForceRowSecurity(_)
        | Subcommand::GenericOptions(_)
        | Subcommand::SetRule { .. }
        | Subcommand::DetachPartition { .. }
        | Subcommand::SetDistribution { .. }
        | Subcommand::ReAddIndex(_)
        | Subcommand::ReAddComment { .. } => LockMode::AccessExclusive,
        Subcommand::ReAddConstraint { spec, .. } => constraint_lock(spec).max(LockMode::AccessExclusive),
        Subcommand::AddConstraint(spec) => constraint_lock(spec),
        Subcommand::AddIndex(spec) => {
            if spec.is_constraint {
                LockMode::AccessExclusive
            } else {
                LockMode::Share
            }
        }
        Subcommand::SetTrigger { .. } => LockMode::ShareRowExclusive,
        Subcommand::SetStatistics { .. }
        | Subcommand::SetStorage { .. }
        | Subcommand::SetAttributeOptions { .. }
        | Subcommand::ClusterOn { .. }
        | Subcommand::DropCluster
        | Subcommand::ValidateConstraint { .. }
        | Subcommand::AttachPartition { .. }
        | Subcommand::AttachIndexPartition { .. } => LockMode::ShareUpdateExclusive,
        Subcommand::SetRelOptions { options } => rel_options_lock(options.iter().map(|(k, _)| k.as_str())),
        Subcommand::ResetRelOptions { options } => rel_options_lock(options.iter().map(String::as_str)),
    }
}

/// Strongest lock any subcommand in the batch needs.
pub fn alter_table_get_lock_level(cmds: &[Subcommand]) -> LockMode {
    cmds.iter()
        .map(subcommand_lock_level)
        .max()
        .unwrap_or(LockMode::AccessShare)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::command::{ForeignKeySpec, IndexSpec};
    use crate::expr::{col, lit};

    #[test]
    fn batch_takes_the_strongest_mode() {
        let cmds = vec![
            Subcommand::SetStatistics {
                column: "a".into(),
                target: 100,
            },
            Subcommand::AddConstraint(ConstraintSpec::ForeignKey(ForeignKeySpec::new(
                &["a"],
                "p",
                &["id"],
            ))),
        ];
        assert_eq!(alter_table_get_lock_level(&cmds), LockMode::ShareRowExclusive);
        assert_eq!(alter_table_get_lock_level(&[]), LockMode::AccessShare);
    }

    #[test]
    fn light_options_and_plain_indexes_take_weaker_locks() {
        let fill = Subcommand::SetRelOptions {
            options: vec![("fillfactor".into(), "70".into())],
        };
        let other = Subcommand::SetRelOptions {
            options: vec![("user_catalog_table".into(), "true".into())],
        };
        assert_eq!(subcommand_lock_level(&fill), LockMode::ShareUpdateExclusive);
        assert_eq!(subcommand_lock_level(&other), LockMode::AccessExclusive);
        assert_eq!(
            subcommand_lock_level(&Subcommand::AddIndex(IndexSpec::new(&["a"]))),
            LockMode::Share
        );
        assert_eq!(
            subcommand_lock_level(&Subcommand::AddConstraint(ConstraintSpec::check(
                "c",
                col("a").gt(lit(0))
            ))),
            LockMode::AccessExclusive
        );
    }
}
