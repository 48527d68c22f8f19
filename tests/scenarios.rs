mod common;

use common::*;
use relalter::alter::command::{ColumnDef, ConstraintSpec, IndexSpec, Subcommand};
use relalter::catalog::schema::{PartitionBound, PartitionStrategy};
use relalter::catalog::types::{ColumnType, Value};
use relalter::create::CreateTableStmt;
use relalter::error::{AlterError, AlterErrorCode};
use relalter::expr::{Builtin, RawExpr, col, lit};

#[test]
fn add_not_null_column_with_constant_default() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[1])).expect("insert");

    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AddColumn {
                column: ColumnDef::new("b", int()).not_null().default(lit(5)),
                if_not_exists: false,
            }],
        ))
        .expect("add column");

    assert_eq!(
        db.scan("t").expect("scan"),
        vec![vec![Value::Integer(1), Value::Integer(5)]]
    );
    assert!(!report.was_rewritten("t"));
    let b = db
        .relation("t")
        .expect("t")
        .attribute_by_name("b")
        .expect("b")
        .clone();
    assert!(b.not_null);
    assert_eq!(b.missing_value, Some(Value::Integer(5)));
}

#[test]
fn volatile_default_forces_rewrite() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[1, 2])).expect("insert");
    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AddColumn {
                column: ColumnDef::new("b", int()).default(col_free_volatile()),
                if_not_exists: false,
            }],
        ))
        .expect("add column");
    assert!(report.was_rewritten("t"));
    assert_eq!(db.scan("t").expect("scan").len(), 2);
}

fn col_free_volatile() -> RawExpr {
    RawExpr::Func(Builtin::Random, vec![])
}

#[test]
fn range_partitions_with_default() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("parent", vec![ColumnDef::new("a", int())])
            .partition_by(PartitionStrategy::Range, &["a"]),
    );
    create(
        &mut db,
        CreateTableStmt::new("p0", vec![]).partition_of("parent", range(0, 10)),
    );
    create(
        &mut db,
        CreateTableStmt::new("p10", vec![]).partition_of("parent", range(10, 20)),
    );
    create(
        &mut db,
        CreateTableStmt::new("pdef", vec![]).partition_of("parent", PartitionBound::Default),
    );
    db.insert("parent", ints(&[15])).expect("insert");
    assert_eq!(db.scan("p10").expect("scan"), ints(&[15]));
    assert!(db.scan("pdef").expect("scan").is_empty());

    create_simple(&mut db, "dup", &[("a", int())]);
    let err = db
        .alter(&alter(
            "parent",
            vec![Subcommand::AttachPartition {
                partition: "dup".into(),
                bound: range(10, 20),
            }],
        ))
        .expect_err("duplicate bound");
    assert!(err.to_string().contains("would overlap partition \"p10\""), "{err}");

    create_simple(&mut db, "p20", &[("a", int())]);
    let report = db
        .alter(&alter(
            "parent",
            vec![Subcommand::AttachPartition {
                partition: "p20".into(),
                bound: range(20, 30),
            }],
        ))
        .expect("attach");
    let rechecked_default = report.was_validated("pdef")
        || report
            .skipped_validations
            .iter()
            .any(|s| s.starts_with("pdef"));
    assert!(rechecked_default);
    assert!(db.relation("p20").expect("p20").is_partition);

    db.insert("parent", ints(&[25])).expect("routes to p20");
    assert_eq!(db.scan("p20").expect("scan"), ints(&[25]));
    assert_eq!(db.scan("parent").expect("scan").len(), 2);
}

#[test]
fn failed_check_readd_rolls_back_type_change() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("t", vec![ColumnDef::new("a", int())])
            .constraint(ConstraintSpec::check("t_a_check", col("a").gt(lit(0)))),
    );
    db.create_index("t", &IndexSpec::new(&["a"]).named("t_a_idx"))
        .expect("index");
    db.insert("t", ints(&[1, 2])).expect("insert");
    let catalog_before = db.catalog().clone();

    let err = db
        .alter(&alter(
            "t",
            vec![Subcommand::AlterColumnType {
                column: "a".into(),
                type_name: text(),
                using: Some(col("a").cast(text())),
                collation: None,
            }],
        ))
        .expect_err("text > integer does not typecheck");
    assert_eq!(err.code(), AlterErrorCode::UndefinedFunction);
    assert!(matches!(err, AlterError::UndefinedFunction { .. }));

    let rel = db.relation("t").expect("t");
    assert_eq!(
        rel.attribute_by_name("a").expect("a").type_name.ty,
        ColumnType::Integer
    );
    let relid = rel.oid;
    assert!(db.catalog().constraint_by_name(relid, "t_a_check").is_some());
    assert_eq!(
        db.catalog().lookup("t_a_idx"),
        catalog_before.lookup("t_a_idx")
    );
    assert_eq!(db.scan("t").expect("scan"), ints(&[1, 2]));
}
