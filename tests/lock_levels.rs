mod common;

use common::*;
use proptest::prelude::*;
use relalter::alter::command::{ColumnDef, Subcommand};
use relalter::alter::lock_level::alter_table_get_lock_level;
use relalter::alter::transform::transform_alter_table_stmt;
use relalter::expr::lit;
use relalter::lock::LockMode;

fn subcommand() -> impl Strategy<Value = Subcommand> {
    prop_oneof![
        Just(Subcommand::SetStatistics {
            column: "a".into(),
            target: 100,
        }),
        Just(Subcommand::ColumnDefault {
            column: "a".into(),
            default: Some(lit(1)),
        }),
        Just(Subcommand::ColumnDefault {
            column: "a".into(),
            default: None,
        }),
        Just(Subcommand::SetRelOptions {
            options: vec![("fillfactor".into(), "70".into())],
        }),
        Just(Subcommand::SetRowSecurity(true)),
        Just(Subcommand::DropNotNull { column: "a".into() }),
        Just(Subcommand::AddColumn {
            column: ColumnDef::new("z", int()).not_null().default(lit(0)),
            if_not_exists: true,
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn executed_lock_matches_planned_lock(cmds in prop::collection::vec(subcommand(), 1..5)) {
        let mut db = open_db();
        create_simple(&mut db, "t", &[("a", int())]);
        let stmt = alter("t", cmds);
        let planned = alter_table_get_lock_level(&stmt.cmds);
        let transformed = transform_alter_table_stmt(&stmt);
        prop_assert_eq!(planned, alter_table_get_lock_level(&transformed.cmds));

        let report = db.alter(&stmt).expect("alter");
        prop_assert_eq!(report.lock_mode, Some(planned));
        prop_assert!(planned >= LockMode::ShareUpdateExclusive);
    }
}
