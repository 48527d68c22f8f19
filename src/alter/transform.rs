//! Statement normalization done before planning: inline column constraints
//! and index-backed table constraints become their own subcommands.

use crate::alter::command::{
    AlterTableStmt, ColumnConstraint, ColumnDef, ConstraintSpec, ForeignKeySpec, IndexSpec,
    Subcommand,
};

fn constraint_index(name: Option<String>, columns: Vec<String>, primary: bool) -> IndexSpec {
    IndexSpec {
        name: name.clone(),
        columns,
        unique: true,
        primary,
        is_constraint: true,
        constraint_name: name,
        ..IndexSpec::new(&[])
    }
}

/// Strips the inline constraints off `column`, returning them as the
/// subcommands that follow the column's creation.
pub(crate) fn split_column_constraints(column: &ColumnDef) -> (ColumnDef, Vec<Subcommand>) {
    let mut stripped = column.clone();
    let inline = std::mem::take(&mut stripped.constraints);
    let mut after = Vec::new();
    for constraint in inline {
        match constraint {
            ColumnConstraint::Check {
                name,
                expr,
                no_inherit,
            } => after.push(Subcommand::AddConstraint(ConstraintSpec::Check {
                name,
                expr,
                no_inherit,
                not_valid: false,
            })),
            ColumnConstraint::Unique { name } => after.push(Subcommand::AddIndex(
                constraint_index(name, vec![column.name.clone()], false),
            )),
            ColumnConstraint::PrimaryKey { name } => {
                stripped.not_null = true;
                after.push(Subcommand::AddIndex(constraint_index(
                    name,
                    vec![column.name.clone()],
                    true,
                )));
            }
            ColumnConstraint::References {
                name,
                table,
                column: ref_column,
                on_delete,
                on_update,
                match_type,
            } => after.push(Subcommand::AddConstraint(ConstraintSpec::ForeignKey(
                ForeignKeySpec {
                    name,
                    columns: vec![column.name.clone()],
                    ref_table: table,
                    ref_columns: ref_column.into_iter().collect(),
                    on_delete,
                    on_update,
                    match_type,
                    ..ForeignKeySpec::new(&[], "", &[])
                },
            ))),
        }
    }
    (stripped, after)
}

pub fn transform_alter_table_stmt(stmt: &AlterTableStmt) -> AlterTableStmt {
    let mut cmds = Vec::with_capacity(stmt.cmds.len());
    for cmd in &stmt.cmds {
        match cmd {
            Subcommand::AddColumn {
                column,
                if_not_exists,
            } if !column.constraints.is_empty() => {
                let (stripped, after) = split_column_constraints(column);
                cmds.push(Subcommand::AddColumn {
                    column: stripped,
                    if_not_exists: *if_not_exists,
                });
                cmds.extend(after);
            }
            Subcommand::AddConstraint(ConstraintSpec::PrimaryKey { name, columns }) => {
                for column in columns {
                    cmds.push(Subcommand::SetNotNull {
                        column: column.clone(),
                    });
                }
                cmds.push(Subcommand::AddIndex(constraint_index(
                    name.clone(),
                    columns.clone(),
                    true,
                )));
            }
            Subcommand::AddConstraint(ConstraintSpec::Unique { name, columns }) => {
                cmds.push(Subcommand::AddIndex(constraint_index(
                    name.clone(),
                    columns.clone(),
                    false,
                )));
            }
            other => cmds.push(other.clone()),
        }
    }
    AlterTableStmt {
        cmds,
        ..stmt.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::lock_level::alter_table_get_lock_level;
    use crate::catalog::depend::DropBehavior;
    use crate::catalog::schema::{FkAction, FkMatch};
    use crate::catalog::types::{ColumnType, TypeName};
    use crate::expr::{col, lit};
    use proptest::prelude::*;

    fn int_column(name: &str) -> ColumnDef {
        ColumnDef::new(name, TypeName::new(ColumnType::Integer))
    }

    #[test]
    fn inline_constraints_become_separate_subcommands() {
        let column = int_column("b")
            .constraint(ColumnConstraint::PrimaryKey { name: None })
            .constraint(ColumnConstraint::Check {
                name: Some("b_pos".into()),
                expr: col("b").gt(lit(0)),
                no_inherit: false,
            });
        let stmt = AlterTableStmt::new(
            "t",
            vec![Subcommand::AddColumn {
                column,
                if_not_exists: false,
            }],
        );
        let out = transform_alter_table_stmt(&stmt);
        assert_eq!(out.cmds.len(), 3);
        match &out.cmds[0] {
            Subcommand::AddColumn { column, .. } => {
                assert!(column.not_null);
                assert!(column.constraints.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&out.cmds[1], Subcommand::AddIndex(spec) if spec.primary && spec.is_constraint));
        assert!(matches!(&out.cmds[2], Subcommand::AddConstraint(ConstraintSpec::Check { .. })));
    }

    #[test]
    fn primary_key_constraint_forces_not_null_first() {
        let stmt = AlterTableStmt::new(
            "t",
            vec![Subcommand::AddConstraint(ConstraintSpec::PrimaryKey {
                name: Some("t_pkey".into()),
                columns: vec!["a".into(), "b".into()],
            })],
        );
        let out = transform_alter_table_stmt(&stmt);
        assert!(matches!(&out.cmds[0], Subcommand::SetNotNull { column } if column == "a"));
        assert!(matches!(&out.cmds[1], Subcommand::SetNotNull { column } if column == "b"));
        assert!(matches!(&out.cmds[2], Subcommand::AddIndex(spec) if spec.constraint_name.as_deref() == Some("t_pkey")));
    }

    fn arb_subcommand() -> impl Strategy<Value = Subcommand> {
        prop_oneof![
            Just(Subcommand::SetStatistics {
                column: "a".into(),
                target: 10
            }),
            Just(Subcommand::DropNotNull { column: "a".into() }),
            Just(Subcommand::ValidateConstraint { name: "c".into() }),
            Just(Subcommand::AddIndex(IndexSpec::new(&["a"]))),
            Just(Subcommand::DropColumn {
                column: "a".into(),
                behavior: DropBehavior::Restrict,
                missing_ok: false
            }),
            Just(Subcommand::AddConstraint(ConstraintSpec::Unique {
                name: None,
                columns: vec!["a".into()]
            })),
            Just(Subcommand::AddConstraint(ConstraintSpec::PrimaryKey {
                name: None,
                columns: vec!["a".into()]
            })),
            Just(Subcommand::AddConstraint(ConstraintSpec::ForeignKey(
                ForeignKeySpec::new(&["a"], "p", &["id"])
            ))),
            Just(Subcommand::AddColumn {
                column: int_column("z").constraint(ColumnConstraint::References {
                    name: None,
                    table: "p".into(),
                    column: None,
                    on_delete: FkAction::Cascade,
                    on_update: FkAction::NoAction,
                    match_type: FkMatch::Simple,
                }),
                if_not_exists: false,
            }),
            Just(Subcommand::SetRelOptions {
                options: vec![("fillfactor".into(), "50".into())]
            }),
        ]
    }

    proptest! {
        #[test]
        fn lock_level_is_stable_across_transformation(cmds in prop::collection::vec(arb_subcommand(), 0..6)) {
            let stmt = AlterTableStmt::new("t", cmds);
            let before = alter_table_get_lock_level(&stmt.cmds);
            let transformed = transform_alter_table_stmt(&stmt);
            prop_assert_eq!(before, alter_table_get_lock_level(&transformed.cmds));
            let again = transform_alter_table_stmt(&transformed);
            prop_assert_eq!(before, alter_table_get_lock_level(&again.cmds));
        }
    }
}
