use criterion::{Criterion, black_box, criterion_group, criterion_main};
use relalter::Database;
use relalter::alter::command::{AlterTableStmt, ColumnDef, ConstraintSpec, IndexSpec, Subcommand};
use relalter::alter::lock_level::alter_table_get_lock_level;
use relalter::catalog::types::{ColumnType, TypeName, Value};
use relalter::config::EngineConfig;
use relalter::create::CreateTableStmt;
use relalter::expr::{col, lit};

const TABLE_NAME: &str = "users";
const SEEDED_ROWS: i64 = 10_000;

fn setup_db(seed_rows: i64) -> Database {
    let mut db = Database::open(EngineConfig::default()).expect("open");
    db.create_tablespace("fast").expect("tablespace");
    db.create_table(&CreateTableStmt::new(
        TABLE_NAME,
        vec![
            ColumnDef::new("id", TypeName::new(ColumnType::Integer)).not_null(),
            ColumnDef::new("name", TypeName::new(ColumnType::Text)),
            ColumnDef::new("age", TypeName::new(ColumnType::Integer)),
        ],
    ))
    .expect("table");
    db.create_index(TABLE_NAME, &IndexSpec::new(&["age"]).named("users_age_idx"))
        .expect("index");
    let rows = (1..=seed_rows)
        .map(|id| {
            vec![
                Value::Integer(id),
                Value::Text(format!("user-{id}").into()),
                Value::Integer(18 + (id % 50)),
            ]
        })
        .collect();
    db.insert(TABLE_NAME, rows).expect("seed rows");
    db
}

/// Runs `stmt` inside a transaction that is rolled back, so every
/// iteration starts from the seeded table.
fn alter_and_rollback(db: &mut Database, stmt: &AlterTableStmt) {
    db.begin().expect("begin");
    let report = db.alter(black_box(stmt)).expect("alter");
    black_box(report);
    db.rollback().expect("rollback");
}

fn bench_phase3_paths(c: &mut Criterion) {
    let mut db = setup_db(SEEDED_ROWS);

    let retype = AlterTableStmt::new(
        TABLE_NAME,
        vec![Subcommand::AlterColumnType {
            column: "age".into(),
            type_name: TypeName::new(ColumnType::BigInt),
            using: None,
            collation: None,
        }],
    );
    c.bench_function("rewrite_alter_column_type_10k", |b| {
        b.iter(|| alter_and_rollback(&mut db, &retype))
    });

    let add_check = AlterTableStmt::new(
        TABLE_NAME,
        vec![Subcommand::AddConstraint(ConstraintSpec::check(
            "users_age_adult",
            col("age").ge(lit(18)),
        ))],
    );
    c.bench_function("validate_check_scan_10k", |b| {
        b.iter(|| alter_and_rollback(&mut db, &add_check))
    });

    let fast_default = AlterTableStmt::new(
        TABLE_NAME,
        vec![Subcommand::AddColumn {
            column: ColumnDef::new("score", TypeName::new(ColumnType::Integer)).default(lit(0)),
            if_not_exists: false,
        }],
    );
    c.bench_function("add_column_fast_default", |b| {
        b.iter(|| alter_and_rollback(&mut db, &fast_default))
    });

    let move_storage = AlterTableStmt::new(
        TABLE_NAME,
        vec![Subcommand::SetTablespace {
            tablespace: "fast".into(),
        }],
    );
    c.bench_function("set_tablespace_block_copy_10k", |b| {
        b.iter(|| alter_and_rollback(&mut db, &move_storage))
    });
}

fn bench_planning(c: &mut Criterion) {
    let cmds: Vec<Subcommand> = (0..32)
        .map(|i| Subcommand::SetStatistics {
            column: format!("c{i}"),
            target: 100,
        })
        .chain(std::iter::once(Subcommand::DropNotNull {
            column: "id".into(),
        }))
        .collect();
    c.bench_function("lock_level_33_subcommands", |b| {
        b.iter(|| alter_table_get_lock_level(black_box(&cmds)))
    });
}

criterion_group!(benches, bench_phase3_paths, bench_planning);
criterion_main!(benches);
