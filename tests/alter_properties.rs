mod common;

use common::*;
use relalter::alter::command::{ColumnDef, ConstraintSpec, IndexSpec, ObjectKind, Subcommand};
use relalter::alter::work_queue::{AlterPass, RewriteReason};
use relalter::catalog::depend::{DropBehavior, ObjectAddress};
use relalter::catalog::schema::{PartitionBound, PartitionStrategy};
use relalter::catalog::types::{ColumnType, TypeName, Value};
use relalter::create::CreateTableStmt;
use relalter::error::{AlterError, AlterErrorCode};
use relalter::expr::{col, lit};

#[test]
fn drop_then_add_same_column_in_one_statement() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int()), ("b", int())]);
    db.insert("t", vec![vec![Value::from(1), Value::from(2)]])
        .expect("insert");

    let report = db
        .alter(&alter(
            "t",
            vec![
                Subcommand::AddColumn {
                    column: ColumnDef::new("b", text()),
                    if_not_exists: false,
                },
                Subcommand::DropColumn {
                    column: "b".into(),
                    behavior: DropBehavior::Restrict,
                    missing_ok: false,
                },
            ],
        ))
        .expect("drop and re-add");

    let passes = report.passes_run();
    let drop = passes.iter().position(|p| *p == AlterPass::Drop);
    let add = passes.iter().position(|p| *p == AlterPass::AddColumn);
    assert!(drop < add, "drop must run before add: {passes:?}");

    let rel = db.relation("t").expect("t");
    let b = rel.attribute_by_name("b").expect("new b");
    assert_eq!(b.attnum, 3, "dropped slot must not be reused");
    assert_eq!(b.type_name.ty, ColumnType::Text);
    assert_eq!(
        db.scan("t").expect("scan"),
        vec![vec![Value::Integer(1), Value::Null]]
    );
}

#[test]
fn recursive_drop_not_null_visits_each_child_once() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("top", vec![ColumnDef::new("a", int()).not_null()]),
    );
    create(
        &mut db,
        CreateTableStmt::new("other", vec![ColumnDef::new("a", int()).not_null()]),
    );
    create(&mut db, CreateTableStmt::new("c1", vec![]).inherits(&["top"]));
    create(
        &mut db,
        CreateTableStmt::new("c2", vec![]).inherits(&["top", "other"]),
    );
    create(&mut db, CreateTableStmt::new("g", vec![]).inherits(&["c1", "c2"]));

    let report = db
        .alter(&alter(
            "top",
            vec![Subcommand::DropNotNull { column: "a".into() }],
        ))
        .expect("drop not null");

    for relation in ["top", "c1", "c2", "g"] {
        let visits = report
            .trace
            .iter()
            .filter(|t| t.relation == relation && t.tag == "ALTER COLUMN DROP NOT NULL")
            .count();
        assert_eq!(visits, 1, "{relation} visited {visits} times");
        let rel = db.relation(relation).expect("relation");
        assert!(!rel.attribute_by_name("a").expect("a").not_null);
    }
    assert!(report.trace.iter().all(|t| t.relation != "other"));
}

#[test]
fn type_change_rebuilds_index_and_check_and_keeps_comment() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("t", vec![ColumnDef::new("a", int())])
            .constraint(ConstraintSpec::check("t_a_pos", col("a").gt(lit(0)))),
    );
    db.create_index("t", &IndexSpec::new(&["a"]).named("t_a_idx"))
        .expect("index");
    db.insert("t", ints(&[1, 2, 3])).expect("insert");
    let relid = db.catalog().lookup_required("t").expect("t");
    let con = db
        .catalog()
        .constraint_by_name(relid, "t_a_pos")
        .expect("check")
        .oid;
    db.comment_on(ObjectAddress::constraint(con), Some("must be positive"));
    let old_index = db.catalog().lookup_required("t_a_idx").expect("index");

    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AlterColumnType {
                column: "a".into(),
                type_name: TypeName::new(ColumnType::BigInt),
                using: None,
                collation: None,
            }],
        ))
        .expect("alter type");

    let tags: Vec<&str> = report.trace.iter().map(|t| t.tag).collect();
    let pos = |tag: &str| tags.iter().position(|t| *t == tag).expect(tag);
    assert!(pos("ALTER COLUMN TYPE") < pos("ADD INDEX (re-add)"));
    assert!(pos("ADD INDEX (re-add)") < pos("ADD CONSTRAINT (re-add)"));

    let rel = db.relation("t").expect("t");
    assert_eq!(
        rel.attribute_by_name("a").expect("a").type_name.ty,
        ColumnType::BigInt
    );
    let new_index = db.catalog().lookup_required("t_a_idx").expect("index back");
    assert_ne!(new_index, old_index);
    let index = db.catalog().index(new_index).expect("index def");
    assert_eq!(index.attnums, vec![1]);
    assert!(!index.unique);

    let readded = db
        .catalog()
        .constraint_by_name(relid, "t_a_pos")
        .expect("check back");
    assert_ne!(readded.oid, con);
    assert!(readded.validated);
    assert_eq!(
        db.catalog().comment(&ObjectAddress::constraint(readded.oid)),
        Some("must be positive")
    );
    assert!(report.was_rewritten("t"));
}

#[test]
fn implied_check_skips_the_scan() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("t", vec![ColumnDef::new("a", int()).not_null()])
            .constraint(ConstraintSpec::check("t_a_big", col("a").gt(lit(10)))),
    );
    db.insert("t", ints(&[11, 20])).expect("insert");

    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AddConstraint(ConstraintSpec::check(
                "t_a_pos",
                col("a").gt(lit(0)).and(col("a").is_not_null()),
            ))],
        ))
        .expect("add check");

    assert_eq!(report.skipped_validations, vec!["t.t_a_pos".to_string()]);
    assert!(!report.was_validated("t"));
    assert!(!report.was_rewritten("t"));
    let relid = db.catalog().lookup_required("t").expect("t");
    assert!(
        db.catalog()
            .constraint_by_name(relid, "t_a_pos")
            .expect("new check")
            .validated
    );
}

#[test]
fn unproven_check_is_validated_by_scan() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[5])).expect("insert");
    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AddConstraint(ConstraintSpec::check(
                "t_a_pos",
                col("a").gt(lit(0)),
            ))],
        ))
        .expect("add check");
    assert!(report.was_validated("t"));

    let err = db
        .alter(&alter(
            "t",
            vec![Subcommand::AddConstraint(ConstraintSpec::check(
                "t_a_big",
                col("a").gt(lit(10)),
            ))],
        ))
        .expect_err("row 5 violates");
    assert!(matches!(err, AlterError::CheckViolation { .. }));
}

fn partitioned_parent(db: &mut relalter::Database) {
    create(
        db,
        CreateTableStmt::new("parent", vec![ColumnDef::new("a", int())])
            .partition_by(PartitionStrategy::Range, &["a"]),
    );
    create(
        db,
        CreateTableStmt::new("p1", vec![]).partition_of("parent", range(0, 10)),
    );
}

#[test]
fn overlapping_attach_fails_without_catalog_changes() {
    let mut db = open_db();
    partitioned_parent(&mut db);
    create_simple(&mut db, "p2", &[("a", int())]);
    let before = db.catalog().inherits.clone();

    let err = db
        .alter(&alter(
            "parent",
            vec![Subcommand::AttachPartition {
                partition: "p2".into(),
                bound: range(5, 15),
            }],
        ))
        .expect_err("overlap");
    assert!(err.to_string().contains("would overlap partition \"p1\""), "{err}");

    let p2 = db.relation("p2").expect("p2");
    assert!(!p2.is_partition);
    assert!(p2.partition_bound.is_none());
    assert!(db.catalog().parents(p2.oid).is_empty());
    assert_eq!(db.catalog().inherits, before);
}

#[test]
fn default_partition_row_blocks_attach() {
    let mut db = open_db();
    partitioned_parent(&mut db);
    create(
        &mut db,
        CreateTableStmt::new("pdef", vec![]).partition_of("parent", PartitionBound::Default),
    );
    db.insert("parent", ints(&[15])).expect("routes to default");
    assert_eq!(db.scan("pdef").expect("scan"), ints(&[15]));
    create_simple(&mut db, "p2", &[("a", int())]);

    let err = db
        .alter(&alter(
            "parent",
            vec![Subcommand::AttachPartition {
                partition: "p2".into(),
                bound: range(10, 20),
            }],
        ))
        .expect_err("default partition holds 15");
    assert!(matches!(err, AlterError::DefaultPartitionViolation { ref relation } if relation == "pdef"));
    assert!(err.to_string().contains("default partition"));

    assert_eq!(db.scan("pdef").expect("scan"), ints(&[15]));
    assert!(!db.relation("p2").expect("p2").is_partition);
}

#[test]
fn binary_compatible_type_change_skips_rewrite() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", TypeName::varchar(10))]);
    db.insert("t", vec![vec![Value::from("x")]]).expect("insert");

    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::AlterColumnType {
                column: "a".into(),
                type_name: text(),
                using: None,
                collation: None,
            }],
        ))
        .expect("varchar to text");
    assert!(report.rewrite_reasons.is_empty());
    assert!(!report.was_rewritten("t"));

    create_simple(&mut db, "u", &[("a", int())]);
    db.insert("u", ints(&[7])).expect("insert");
    let report = db
        .alter(&alter(
            "u",
            vec![Subcommand::AlterColumnType {
                column: "a".into(),
                type_name: text(),
                using: Some(col("a").cast(text())),
                collation: None,
            }],
        ))
        .expect("int to text");
    assert!(report.was_rewritten("u"));
    let (_, reason) = &report.rewrite_reasons[0];
    assert!(reason.contains(RewriteReason::COLUMN_TYPE));
    assert_eq!(
        db.scan("u").expect("scan"),
        vec![vec![Value::Text("7".into())]]
    );
}

#[test]
fn drop_and_alter_refuse_the_wrong_relation_kind() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.create_index("t", &IndexSpec::new(&["a"]).named("t_a_idx"))
        .expect("index");

    let err = db
        .drop_table("t_a_idx", DropBehavior::Restrict, false)
        .expect_err("not a table");
    assert_eq!(err.code(), AlterErrorCode::WrongObjectType);
    assert_eq!(err.to_string(), "\"t_a_idx\" is not a table");
    assert_eq!(err.hint(), Some("Use DROP INDEX to remove an index."));
    assert!(db.catalog().lookup("t_a_idx").is_some());

    let err = db
        .drop_index("t", DropBehavior::Restrict, false)
        .expect_err("not an index");
    assert_eq!(err.hint(), Some("Use DROP TABLE to remove a table."));
    assert!(db.catalog().lookup("t").is_some());

    let err = db
        .alter(&alter("t", vec![Subcommand::SetStatistics { column: "a".into(), target: 10 }]).kind(ObjectKind::Index))
        .expect_err("ALTER INDEX on a table");
    assert_eq!(err.hint(), Some("Use ALTER TABLE instead."));

    let err = db
        .alter(&alter(
            "t_a_idx",
            vec![Subcommand::AddColumn {
                column: ColumnDef::new("z", int()),
                if_not_exists: false,
            }],
        ))
        .expect_err("indexes have no columns to add");
    assert_eq!(err.code(), AlterErrorCode::WrongObjectType);
    assert_eq!(err.hint(), Some("This operation is not supported for indexes."));

    db.drop_index("t_a_idx", DropBehavior::Restrict, false)
        .expect("drop index");
    assert!(db.catalog().lookup("t_a_idx").is_none());
    assert!(db.catalog().lookup("t").is_some());
}
