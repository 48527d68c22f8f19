mod common;

use common::*;
use relalter::alter::command::{ColumnDef, ConstraintSpec, Subcommand};
use relalter::catalog::depend::DropBehavior;
use relalter::catalog::schema::{PartitionStrategy, RelKind};
use relalter::catalog::types::{ColumnType, TypeName, Value};
use relalter::create::CreateTableStmt;
use relalter::error::{AlterError, AlterErrorCode};
use relalter::expr::{col, lit};

fn add_column(name: &str) -> Subcommand {
    Subcommand::AddColumn {
        column: ColumnDef::new(name, int()),
        if_not_exists: false,
    }
}

#[test]
fn parent_scan_includes_children() {
    let mut db = open_db();
    create_simple(&mut db, "p", &[("a", int())]);
    create(
        &mut db,
        CreateTableStmt::new("c", vec![ColumnDef::new("b", int())]).inherits(&["p"]),
    );
    db.insert("p", ints(&[1])).expect("parent row");
    db.insert("c", vec![vec![Value::from(2), Value::from(3)]])
        .expect("child row");
    assert_eq!(db.scan("p").expect("scan"), ints(&[1, 2]));
}

#[test]
fn added_column_propagates_and_cannot_be_dropped_from_child() {
    let mut db = open_db();
    create_simple(&mut db, "p", &[("a", int())]);
    create(&mut db, CreateTableStmt::new("c", vec![]).inherits(&["p"]));

    db.alter(&alter("p", vec![add_column("b")])).expect("add");
    let child = db.relation("c").expect("c");
    let b = child.attribute_by_name("b").expect("inherited b");
    assert_eq!(b.inhcount, 1);
    assert!(!b.is_local);

    let err = db
        .alter(&alter(
            "c",
            vec![Subcommand::DropColumn {
                column: "b".into(),
                behavior: DropBehavior::Restrict,
                missing_ok: false,
            }],
        ))
        .expect_err("inherited");
    assert!(err.to_string().contains("cannot drop inherited column"));

    db.alter(&alter(
        "p",
        vec![Subcommand::DropColumn {
            column: "b".into(),
            behavior: DropBehavior::Restrict,
            missing_ok: false,
        }],
    ))
    .expect("drop on parent");
    assert!(db.relation("c").expect("c").attribute_by_name("b").is_none());
}

#[test]
fn inherit_requires_matching_columns_and_constraints() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("p", vec![ColumnDef::new("a", int())])
            .constraint(ConstraintSpec::check("p_a_pos", col("a").gt(lit(0)))),
    );
    create_simple(&mut db, "lonely", &[("z", int())]);
    let err = db
        .alter(&alter(
            "lonely",
            vec![Subcommand::AddInherit { parent: "p".into() }],
        ))
        .expect_err("missing column");
    assert!(err.to_string().contains("child table is missing column \"a\""));

    create_simple(&mut db, "c", &[("a", int())]);
    let err = db
        .alter(&alter("c", vec![Subcommand::AddInherit { parent: "p".into() }]))
        .expect_err("missing constraint");
    assert!(err.to_string().contains("missing constraint \"p_a_pos\""));

    db.alter(&alter(
        "c",
        vec![Subcommand::AddConstraint(ConstraintSpec::check(
            "p_a_pos",
            col("a").gt(lit(0)),
        ))],
    ))
    .expect("matching check");
    db.alter(&alter("c", vec![Subcommand::AddInherit { parent: "p".into() }]))
        .expect("inherit");
    let cid = db.catalog().lookup_required("c").expect("c");
    let pid = db.catalog().lookup_required("p").expect("p");
    assert_eq!(db.catalog().parents(cid), vec![pid]);

    let err = db
        .alter(&alter("p", vec![Subcommand::AddInherit { parent: "c".into() }]))
        .expect_err("cycle");
    assert!(matches!(err, AlterError::CircularInheritance { .. }));

    db.alter(&alter("c", vec![Subcommand::DropInherit { parent: "p".into() }]))
        .expect("no inherit");
    assert!(db.catalog().parents(cid).is_empty());
    let a = db.relation("c").expect("c").attribute_by_name("a").expect("a").clone();
    assert_eq!(a.inhcount, 0);
    assert!(a.is_local);
}

#[test]
fn detach_partition_hides_rows_from_parent() {
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
    db.insert("parent", ints(&[1, 11])).expect("insert");

    db.alter(&alter(
        "parent",
        vec![Subcommand::DetachPartition {
            partition: "p10".into(),
        }],
    ))
    .expect("detach");
    assert_eq!(db.scan("parent").expect("scan"), ints(&[1]));
    let p10 = db.relation("p10").expect("p10");
    assert!(!p10.is_partition);
    assert!(p10.partition_bound.is_none());
    // Detached table accepts rows outside its old bound.
    db.insert("p10", ints(&[99])).expect("free table");

    let err = db.insert("parent", ints(&[15])).expect_err("no partition");
    assert!(matches!(err, AlterError::NoPartitionForRow { .. }));
}

#[test]
fn partitions_cannot_drop_parent_not_null() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("parent", vec![ColumnDef::new("a", int()).not_null()])
            .partition_by(PartitionStrategy::Range, &["a"]),
    );
    create(
        &mut db,
        CreateTableStmt::new("p0", vec![]).partition_of("parent", range(0, 10)),
    );
    let err = db
        .alter(&alter("p0", vec![Subcommand::DropNotNull { column: "a".into() }]))
        .expect_err("parent column is not null");
    assert!(err.to_string().contains("marked NOT NULL in parent table"));

    let err = db
        .alter(&alter("parent", vec![Subcommand::DropNotNull { column: "a".into() }]).only())
        .expect_err("ONLY on partitioned table");
    assert!(matches!(err, AlterError::OnlyNotAllowed { .. }));
}

#[test]
fn typed_table_follows_its_type_until_not_of() {
    let mut db = open_db();
    db.create_relation(
        "pair",
        RelKind::CompositeType,
        &[ColumnDef::new("x", int()), ColumnDef::new("y", int())],
    )
    .expect("type");
    create(&mut db, CreateTableStmt::new("pairs", vec![]).of_type("pair"));
    let rel = db.relation("pairs").expect("pairs");
    assert!(rel.of_type.is_some());
    assert_eq!(rel.live_attributes().count(), 2);

    let err = db
        .alter(&alter("pairs", vec![add_column("z")]))
        .expect_err("typed table");
    assert!(matches!(err, AlterError::WrongObjectKind { .. } | AlterError::WrongObjectType { .. }));

    db.alter(&alter("pairs", vec![Subcommand::DropOf]))
        .expect("not of");
    assert!(db.relation("pairs").expect("pairs").of_type.is_none());
    db.alter(&alter("pairs", vec![add_column("z")]))
        .expect("plain table now");
}

fn retype_a_to_bigint() -> Subcommand {
    Subcommand::AlterColumnType {
        column: "a".into(),
        type_name: TypeName::new(ColumnType::BigInt),
        using: None,
        collation: None,
    }
}

fn column_type(db: &relalter::Database, table: &str, column: &str) -> ColumnType {
    db.relation(table)
        .expect("relation")
        .attribute_by_name(column)
        .expect("column")
        .type_name
        .ty
        .clone()
}

#[test]
fn type_change_refuses_column_also_inherited_from_another_parent() {
    let mut db = open_db();
    create_simple(&mut db, "p1", &[("a", int())]);
    create_simple(&mut db, "p2", &[("a", int())]);
    create(&mut db, CreateTableStmt::new("c", vec![]).inherits(&["p1", "p2"]));
    assert_eq!(
        db.relation("c").expect("c").attribute_by_name("a").expect("a").inhcount,
        2
    );

    let err = db
        .alter(&alter("p1", vec![retype_a_to_bigint()]))
        .expect_err("c.a also comes from p2");
    assert_eq!(err.code(), AlterErrorCode::InvalidTableDefinition);
    assert!(err.to_string().contains("cannot alter inherited column \"a\""), "{err}");
    assert_eq!(column_type(&db, "p1", "a"), ColumnType::Integer);
    assert_eq!(column_type(&db, "c", "a"), ColumnType::Integer);
    assert_eq!(column_type(&db, "p2", "a"), ColumnType::Integer);
}

#[test]
fn type_change_reaches_diamond_child_through_both_parents() {
    let mut db = open_db();
    create_simple(&mut db, "top", &[("a", int())]);
    create(&mut db, CreateTableStmt::new("l", vec![]).inherits(&["top"]));
    create(&mut db, CreateTableStmt::new("r", vec![]).inherits(&["top"]));
    create(&mut db, CreateTableStmt::new("g", vec![]).inherits(&["l", "r"]));
    db.insert("g", ints(&[7])).expect("insert");

    db.alter(&alter("top", vec![retype_a_to_bigint()]))
        .expect("every parent of g is in the tree");
    for table in ["top", "l", "r", "g"] {
        assert_eq!(column_type(&db, table, "a"), ColumnType::BigInt, "{table}");
    }
    assert_eq!(db.scan("g").expect("scan"), ints(&[7]));
}

#[test]
fn type_change_keeps_local_copy_of_inherited_check() {
    let mut db = open_db();
    let positive = || ConstraintSpec::check("c_pos", col("a").gt(lit(0)));
    create(
        &mut db,
        CreateTableStmt::new("p", vec![ColumnDef::new("a", int())]).constraint(positive()),
    );
    create(
        &mut db,
        CreateTableStmt::new("ch", vec![ColumnDef::new("a", int())]).constraint(positive()),
    );
    db.alter(&alter("ch", vec![Subcommand::AddInherit { parent: "p".into() }]))
        .expect("inherit");
    let chid = db.catalog().lookup_required("ch").expect("ch");
    let before = db.catalog().constraint_by_name(chid, "c_pos").expect("c_pos").clone();
    assert!(before.is_local);
    assert_eq!(before.inhcount, 1);

    db.alter(&alter("p", vec![retype_a_to_bigint()]))
        .expect("local and inherited check is re-added once");
    assert_eq!(column_type(&db, "ch", "a"), ColumnType::BigInt);
    let after = db.catalog().constraint_by_name(chid, "c_pos").expect("c_pos");
    assert!(after.is_local);
    assert_eq!(after.inhcount, 1);
    let checks = db
        .catalog()
        .constraints_of(chid)
        .into_iter()
        .filter(|c| c.name == "c_pos")
        .count();
    assert_eq!(checks, 1);

    let err = db.insert("ch", ints(&[-1])).expect_err("check still enforced");
    assert!(matches!(err, AlterError::CheckViolation { .. }));
}
