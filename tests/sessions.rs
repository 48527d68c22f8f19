mod common;

use common::*;
use relalter::Database;
use relalter::alter::FkValidationPath;
use relalter::alter::command::{ColumnDef, ConstraintSpec, ForeignKeySpec, Subcommand};
use relalter::alter::work_queue::RewriteReason;
use relalter::catalog::schema::{OnCommitAction, Persistence};
use relalter::catalog::types::Value;
use relalter::config::EngineConfig;
use relalter::create::CreateTableStmt;
use relalter::error::{AlterError, AlterErrorCode};
use relalter::lock::LockMode;
use relalter::permission::CallerContext;
use relalter::session::Session;
use relalter::expr::{col, lit};

fn parent_and_child(db: &mut Database, fk: ForeignKeySpec) {
    create(
        db,
        CreateTableStmt::new("parent", vec![ColumnDef::new("id", int())]).constraint(
            ConstraintSpec::PrimaryKey {
                name: None,
                columns: vec!["id".into()],
            },
        ),
    );
    create(
        db,
        CreateTableStmt::new("child", vec![ColumnDef::new("pid", int())])
            .constraint(ConstraintSpec::ForeignKey(fk)),
    );
}

#[test]
fn on_commit_delete_rows_empties_temp_table() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("scratch", vec![ColumnDef::new("a", int())])
            .temporary(OnCommitAction::DeleteRows),
    );
    assert_eq!(db.relation("scratch").expect("scratch").namespace, "pg_temp");
    db.begin().expect("begin");
    db.insert("scratch", ints(&[1, 2])).expect("insert");
    assert_eq!(db.scan("scratch").expect("scan").len(), 2);
    db.commit().expect("commit");
    assert!(db.scan("scratch").expect("scan").is_empty());
}

#[test]
fn on_commit_drop_removes_table() {
    let mut db = open_db();
    db.begin().expect("begin");
    create(
        &mut db,
        CreateTableStmt::new("scratch", vec![ColumnDef::new("a", int())])
            .temporary(OnCommitAction::Drop),
    );
    assert!(db.catalog().lookup("scratch").is_some());
    db.commit().expect("commit");
    assert!(db.catalog().lookup("scratch").is_none());
}

#[test]
fn on_commit_requires_temporary_table() {
    let mut db = open_db();
    let mut stmt = CreateTableStmt::new("t", vec![ColumnDef::new("a", int())])
        .temporary(OnCommitAction::Drop);
    stmt.persistence = Persistence::Permanent;
    let err = db.create_table(&stmt).expect_err("permanent table");
    assert_eq!(err.code(), AlterErrorCode::InvalidTableDefinition);
}

#[test]
fn deferred_foreign_key_checked_at_commit() {
    let mut db = open_db();
    let mut fk = ForeignKeySpec::new(&["pid"], "parent", &["id"]);
    fk.deferrable = true;
    fk.deferred = true;
    parent_and_child(&mut db, fk);

    db.begin().expect("begin");
    db.insert("child", ints(&[5])).expect("deferred check");
    let err = db
        .alter(&alter(
            "child",
            vec![Subcommand::AddColumn {
                column: ColumnDef::new("x", int()),
                if_not_exists: false,
            }],
        ))
        .expect_err("pending trigger events");
    assert!(matches!(err, AlterError::ObjectInUse { .. }));
    db.rollback().expect("rollback");

    db.begin().expect("begin");
    db.insert("child", ints(&[5])).expect("deferred check");
    let err = db.commit().expect_err("no parent row");
    assert!(matches!(err, AlterError::ForeignKeyViolation { .. }));
    assert!(db.scan("child").expect("scan").is_empty());

    db.begin().expect("begin");
    db.insert("parent", ints(&[5])).expect("parent");
    db.insert("child", ints(&[5])).expect("child");
    db.commit().expect("commit");
    assert_eq!(db.scan("child").expect("scan"), ints(&[5]));
}

#[test]
fn adding_foreign_key_validates_existing_rows() {
    let mut db = open_db();
    create(
        &mut db,
        CreateTableStmt::new("parent", vec![ColumnDef::new("id", int())]).constraint(
            ConstraintSpec::Unique {
                name: None,
                columns: vec!["id".into()],
            },
        ),
    );
    create_simple(&mut db, "child", &[("pid", int())]);
    db.insert("parent", ints(&[1, 2])).expect("parent");
    db.insert("child", ints(&[1, 2, 2])).expect("child");

    let report = db
        .alter(&alter(
            "child",
            vec![Subcommand::AddConstraint(ConstraintSpec::ForeignKey(
                ForeignKeySpec::new(&["pid"], "parent", &["id"]),
            ))],
        ))
        .expect("add fk");
    assert_eq!(
        report.fk_validations,
        vec![("child".to_string(), FkValidationPath::Bulk)]
    );

    let err = db.insert("child", ints(&[9])).expect_err("dangling");
    assert!(matches!(err, AlterError::ForeignKeyViolation { .. }));
}

#[test]
fn open_cursor_blocks_alter() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.open_cursor("c", "t").expect("cursor");
    let add = alter(
        "t",
        vec![Subcommand::AddColumn {
            column: ColumnDef::new("b", int()),
            if_not_exists: false,
        }],
    );
    let err = db.alter(&add).expect_err("in use");
    assert_eq!(err.code(), AlterErrorCode::ObjectInUse);
    assert!(db.close_cursor("c"));
    db.alter(&add).expect("alter after close");
}

#[test]
fn set_tablespace_copies_blocks() {
    let mut db = open_db();
    db.create_tablespace("fast").expect("tablespace");
    create_simple(&mut db, "t", &[("a", int())]);
    let rows: Vec<i64> = (0..200).collect();
    db.insert("t", ints(&rows)).expect("insert");

    let report = db
        .alter(&alter(
            "t",
            vec![Subcommand::SetTablespace {
                tablespace: "fast".into(),
            }],
        ))
        .expect("move");

    let per_block = db.config().rows_per_block;
    let blocks = rows.len().div_ceil(per_block);
    assert_eq!(report.block_copies, vec![("t".to_string(), blocks)]);
    assert!(!report.was_rewritten("t"));
    let rel = db.relation("t").expect("t");
    assert_eq!(rel.tablespace, "fast");
    let heap = rel.storage.expect("heap");
    assert_eq!(db.storage().tablespace(heap).expect("storage"), "fast");
    assert_eq!(db.scan("t").expect("scan"), ints(&rows));

    let err = db
        .alter(&alter(
            "t",
            vec![Subcommand::SetTablespace {
                tablespace: "nowhere".into(),
            }],
        ))
        .expect_err("unknown tablespace");
    assert_eq!(err.code(), AlterErrorCode::UndefinedObject);
}

#[test]
fn with_oids_rewrites_and_assigns_oids() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[1, 2, 3])).expect("insert");
    assert!(db.row_oids("t").expect("oids").iter().all(Option::is_none));

    let report = db
        .alter(&alter("t", vec![Subcommand::SetWithOids]))
        .expect("with oids");
    let (_, reason) = &report.rewrite_reasons[0];
    assert!(reason.contains(RewriteReason::OIDS));

    let oids: Vec<_> = db
        .row_oids("t")
        .expect("oids")
        .into_iter()
        .map(|o| o.expect("oid assigned"))
        .collect();
    let mut distinct = oids.clone();
    distinct.dedup();
    assert_eq!(distinct.len(), 3);
    assert_eq!(db.scan("t").expect("scan"), ints(&[1, 2, 3]));
}

#[test]
fn set_unlogged_rewrites_with_new_persistence() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[1])).expect("insert");
    let report = db
        .alter(&alter("t", vec![Subcommand::SetUnlogged]))
        .expect("unlogged");
    assert!(report.was_rewritten("t"));
    let rel = db.relation("t").expect("t");
    assert_eq!(rel.persistence, Persistence::Unlogged);
    let heap = rel.storage.expect("heap");
    assert_eq!(
        db.storage().persistence(heap).expect("storage"),
        Persistence::Unlogged
    );
}

#[test]
fn explicit_transaction_holds_locks_until_commit() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    let relid = db.catalog().lookup_required("t").expect("t");
    let locks = db.lock_manager();
    let other = Session::new();

    db.begin().expect("begin");
    db.alter(&alter(
        "t",
        vec![Subcommand::AddColumn {
            column: ColumnDef::new("b", int()),
            if_not_exists: false,
        }],
    ))
    .expect("alter");
    assert_eq!(
        locks.held_by(db.session().id, relid),
        Some(LockMode::AccessExclusive)
    );
    assert!(!locks.try_lock(other.id, relid, LockMode::AccessShare));
    db.commit().expect("commit");
    assert!(locks.try_lock(other.id, relid, LockMode::AccessShare));
    locks.release_all(other.id);
}

#[test]
fn cancelled_rewrite_aborts_the_statement() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.insert("t", ints(&[1, 2])).expect("insert");
    let retype = alter(
        "t",
        vec![Subcommand::AlterColumnType {
            column: "a".into(),
            type_name: text(),
            using: None,
            collation: None,
        }],
    );

    db.cancel_token().cancel();
    let err = db.alter(&retype).expect_err("cancelled");
    assert!(matches!(err, AlterError::QueryCanceled));
    assert_eq!(db.scan("t").expect("scan"), ints(&[1, 2]));

    db.alter(&retype).expect("token reset after abort");
    assert_eq!(
        db.scan("t").expect("scan"),
        vec![vec![Value::Text("1".into())], vec![Value::Text("2".into())]]
    );
}

#[test]
fn non_owner_cannot_alter() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.create_role("alice", false).expect("role");
    db.set_caller(CallerContext::new("alice"));
    let err = db
        .alter(&alter(
            "t",
            vec![Subcommand::DropNotNull { column: "a".into() }],
        ))
        .expect_err("not owner");
    assert!(matches!(err, AlterError::InsufficientPrivilege { .. }));

    db.set_caller(CallerContext::new("postgres"));
    db.alter(&alter(
        "t",
        vec![Subcommand::ChangeOwner {
            new_owner: "alice".into(),
        }],
    ))
    .expect("owner to");
    db.set_caller(CallerContext::new("alice"));
    db.alter(&alter(
        "t",
        vec![Subcommand::DropNotNull { column: "a".into() }],
    ))
    .expect("owner may alter");
}

#[test]
fn distribution_policy_changes() {
    let mut db =
        Database::open(EngineConfig::distributed(&["n1", "n2"])).expect("open distributed");
    create(
        &mut db,
        CreateTableStmt::new("t", vec![ColumnDef::new("a", int())])
            .distribute_by(relalter::catalog::schema::DistributionStrategy::Hash, Some("a")),
    );
    let policy = db
        .relation("t")
        .expect("t")
        .distribution
        .clone()
        .expect("policy");
    assert_eq!(policy.column.map(|(n, _)| n), Some(1));
    assert_eq!(policy.nodes.len(), 2);

    db.alter(&alter(
        "t",
        vec![Subcommand::SetDistribution {
            strategy: relalter::catalog::schema::DistributionStrategy::Replicated,
            column: None,
            nodes: None,
        }],
    ))
    .expect("redistribute");
    let policy = db
        .relation("t")
        .expect("t")
        .distribution
        .clone()
        .expect("policy");
    assert!(policy.column.is_none());
}

#[test]
fn failed_statement_in_block_leaves_no_partial_changes() {
    let mut db = open_db();
    create_simple(&mut db, "t", &[("a", int())]);
    db.begin().expect("begin");
    db.insert("t", ints(&[1])).expect("insert");
    let catalog_before = db.catalog().clone();

    let err = db
        .alter(&alter(
            "t",
            vec![
                Subcommand::AddColumn {
                    column: ColumnDef::new("b", int()),
                    if_not_exists: false,
                },
                Subcommand::AddConstraint(ConstraintSpec::check("t_a_big", col("a").gt(lit(5)))),
            ],
        ))
        .expect_err("row 1 violates the check");
    assert!(matches!(err, AlterError::CheckViolation { .. }));

    let rel = db.relation("t").expect("t");
    assert!(rel.attribute_by_name("b").is_none());
    assert_eq!(
        db.catalog().constraint_by_name(rel.oid, "t_a_big").map(|c| c.oid),
        None
    );
    assert_eq!(
        db.catalog().relation(rel.oid).expect("t").attributes,
        catalog_before.relation(rel.oid).expect("t").attributes
    );
    assert_eq!(db.scan("t").expect("scan"), ints(&[1]));

    assert!(db.insert("t", ints(&[2])).is_err());
    db.rollback().expect("rollback");
    assert!(db.scan("t").expect("scan").is_empty());
}
