#![allow(dead_code)]

use relalter::Database;
use relalter::alter::command::{AlterTableStmt, ColumnDef, Subcommand};
use relalter::catalog::schema::{PartitionBound, RangeDatum};
use relalter::catalog::types::{ColumnType, TypeName, Value};
use relalter::config::EngineConfig;
use relalter::create::CreateTableStmt;

pub fn open_db() -> Database {
    Database::open(EngineConfig::default()).expect("open database")
}

pub fn int() -> TypeName {
    TypeName::new(ColumnType::Integer)
}

pub fn text() -> TypeName {
    TypeName::new(ColumnType::Text)
}

pub fn create(db: &mut Database, stmt: CreateTableStmt) {
    db.create_table(&stmt).expect("create table");
}

pub fn create_simple(db: &mut Database, name: &str, columns: &[(&str, TypeName)]) {
    let columns = columns
        .iter()
        .map(|(n, ty)| ColumnDef::new(n, ty.clone()))
        .collect();
    create(db, CreateTableStmt::new(name, columns));
}

pub fn alter(table: &str, cmds: Vec<Subcommand>) -> AlterTableStmt {
    AlterTableStmt::new(table, cmds)
}

pub fn range(lower: i64, upper: i64) -> PartitionBound {
    PartitionBound::Range {
        lower: vec![RangeDatum::Value(Value::Integer(lower))],
        upper: vec![RangeDatum::Value(Value::Integer(upper))],
    }
}

pub fn ints(rows: &[i64]) -> Vec<Vec<Value>> {
    rows.iter().map(|v| vec![Value::Integer(*v)]).collect()
}
