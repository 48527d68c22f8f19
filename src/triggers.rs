//! Internal referential-integrity triggers and the row-level foreign key
//! check they run.

use crate::catalog::Catalog;
use crate::catalog::depend::{DependKind, ObjectAddress, record_dependency};
use crate::catalog::schema::{ConstraintDef, FkMatch, TriggerDef, TriggerFiring, TriggerFunction};
use crate::catalog::types::{Oid, Value};
use crate::error::AlterError;
use crate::expr::cast::convert_value;
use crate::storage::StorageManager;
use tracing::debug;

fn add_trigger(
    catalog: &mut Catalog,
    con: &ConstraintDef,
    relid: Oid,
    name: String,
    function: TriggerFunction,
) -> Oid {
    let oid = catalog.alloc_oid();
    catalog.triggers.insert(
        oid,
        TriggerDef {
            oid,
            relid,
            name: name.into(),
            function,
            firing: TriggerFiring::Origin,
            is_internal: true,
            row_level: true,
            has_transition_tables: false,
            constraint: Some(con.oid),
        },
    );
    record_dependency(
        catalog,
        ObjectAddress::trigger(oid),
        ObjectAddress::constraint(con.oid),
        DependKind::Internal,
    );
    oid
}

/// Creates the check triggers on the referencing table and the action
/// triggers on the referenced table.
pub fn create_fk_triggers(catalog: &mut Catalog, con: &ConstraintDef) -> Result<Vec<Oid>, AlterError> {
    let fk = con
        .foreign_key
        .as_ref()
        .ok_or_else(|| AlterError::internal(format!("constraint {} is not a foreign key", con.oid)))?;
    let referencing = format!("RI_ConstraintTrigger_c_{}", con.oid);
    let referenced = format!("RI_ConstraintTrigger_a_{}", con.oid);
    let created = vec![
        add_trigger(catalog, con, con.relid, referencing.clone(), TriggerFunction::RiCheckInsert),
        add_trigger(catalog, con, con.relid, referencing, TriggerFunction::RiCheckUpdate),
        add_trigger(
            catalog,
            con,
            fk.referenced_rel,
            referenced.clone(),
            TriggerFunction::RiReferencedDelete,
        ),
        add_trigger(
            catalog,
            con,
            fk.referenced_rel,
            referenced,
            TriggerFunction::RiReferencedUpdate,
        ),
    ];
    debug!(constraint = %con.name, triggers = created.len(), "created foreign key triggers");
    Ok(created)
}

/// Referencing key of `row` after the per-column coercions, or `None` when
/// the match rule says the row needs no referenced match.
pub fn referencing_key(con: &ConstraintDef, row: &[Value]) -> Result<Option<Vec<Value>>, AlterError> {
    let fk = con
        .foreign_key
        .as_ref()
        .ok_or_else(|| AlterError::internal(format!("constraint {} is not a foreign key", con.oid)))?;
    let raw: Vec<Value> = fk
        .fk_attnums
        .iter()
        .map(|a| row.get((*a - 1) as usize).cloned().unwrap_or(Value::Null))
        .collect();
    let nulls = raw.iter().filter(|v| v.is_null()).count();
    match fk.match_type {
        FkMatch::Simple if nulls > 0 => return Ok(None),
        FkMatch::Full if nulls == raw.len() => return Ok(None),
        FkMatch::Full if nulls > 0 => {
            return Err(AlterError::ForeignKeyViolation {
                relation: String::new(),
                constraint: con.name.to_string(),
            });
        }
        _ => {}
    }
    let mut key = Vec::with_capacity(raw.len());
    for (value, op) in raw.iter().zip(&fk.operators) {
        let coerced = match op.fk_coercion {
            Some(path) if !path.is_relabel() => convert_value(value, &op.operand)?,
            _ => value.clone(),
        };
        key.push(coerced);
    }
    Ok(Some(key))
}

/// The check trigger's procedure for one referencing row: true when the
/// row has a match in the referenced table or needs none.
pub fn ri_check_row(
    catalog: &Catalog,
    storage: &StorageManager,
    con: &ConstraintDef,
    row: &[Value],
) -> Result<bool, AlterError> {
    let key = match referencing_key(con, row) {
        Ok(Some(key)) => key,
        Ok(None) => return Ok(true),
        Err(AlterError::ForeignKeyViolation { .. }) => return Ok(false),
        Err(e) => return Err(e),
    };
    let Some(fk) = &con.foreign_key else {
        return Ok(true);
    };
    let referenced = catalog.relation(fk.referenced_rel)?;
    let Some(heap) = referenced.storage else {
        return Ok(false);
    };
    for tuple in storage.tuples(heap)? {
        let pk_row = referenced.deform(&tuple.values);
        let candidate = fk
            .pk_attnums
            .iter()
            .zip(&fk.operators)
            .map(|(a, op)| {
                let v = pk_row.get((*a - 1) as usize).cloned().unwrap_or(Value::Null);
                if op.pk_type == op.operand {
                    Ok(v)
                } else {
                    convert_value(&v, &op.operand)
                }
            })
            .collect::<Result<Vec<_>, AlterError>>()?;
        if candidate == key {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{
        AttributeDef, ConstraintKind, EqualityOperator, FkAction, ForeignKeyInfo, RelKind,
        RelationDef,
    };
    use crate::catalog::types::{ColumnType, TypeName};
    use crate::storage::Tuple;

    fn int() -> TypeName {
        TypeName::new(ColumnType::Integer)
    }

    fn fixture(match_type: FkMatch) -> (Catalog, StorageManager, ConstraintDef) {
        let mut catalog = Catalog::bootstrap("pg_default");
        let mut storage = StorageManager::new(4);
        let pk_oid = catalog.alloc_oid();
        let mut pk = RelationDef::new(pk_oid, "pk", "public", RelKind::Table, "alice");
        pk.attributes.push(AttributeDef::new(1, "id", int()));
        pk.attributes.push(AttributeDef::new(2, "id2", int()));
        let heap = storage.create("pg_default", pk.persistence);
        pk.storage = Some(heap);
        storage
            .append_all(
                heap,
                [
                    Tuple::new(vec![Value::Integer(1), Value::Integer(10)]),
                    Tuple::new(vec![Value::Integer(2), Value::Integer(20)]),
                ],
            )
            .expect("append");
        catalog.insert_relation(pk);
        let fk_oid = catalog.alloc_oid();
        let mut fk_rel = RelationDef::new(fk_oid, "fk", "public", RelKind::Table, "alice");
        fk_rel.attributes.push(AttributeDef::new(1, "a", int()));
        fk_rel.attributes.push(AttributeDef::new(2, "b", int()));
        catalog.insert_relation(fk_rel);
        let op = EqualityOperator {
            operand: int(),
            fk_type: int(),
            pk_type: int(),
            fk_coercion: None,
        };
        let con = ConstraintDef {
            oid: catalog.alloc_oid(),
            relid: fk_oid,
            name: "fk_a_fkey".into(),
            kind: ConstraintKind::ForeignKey,
            expr: None,
            index: None,
            foreign_key: Some(ForeignKeyInfo {
                referenced_rel: pk_oid,
                referenced_index: 0,
                fk_attnums: vec![1, 2],
                pk_attnums: vec![1, 2],
                operators: vec![op.clone(), op],
                on_delete: FkAction::NoAction,
                on_update: FkAction::NoAction,
                match_type,
            }),
            attnums: vec![1, 2],
            deferrable: false,
            deferred: false,
            validated: true,
            inhcount: 0,
            is_local: true,
            no_inherit: false,
        };
        (catalog, storage, con)
    }

    #[test]
    fn simple_match_lets_partial_nulls_through() {
        let (catalog, storage, con) = fixture(FkMatch::Simple);
        let check = |row: &[Value]| ri_check_row(&catalog, &storage, &con, row).expect("check");
        assert!(check(&[Value::Integer(1), Value::Integer(10)]));
        assert!(!check(&[Value::Integer(1), Value::Integer(20)]));
        assert!(check(&[Value::Integer(9), Value::Null]));
    }

    #[test]
    fn full_match_rejects_mixed_nulls() {
        let (catalog, storage, con) = fixture(FkMatch::Full);
        let check = |row: &[Value]| ri_check_row(&catalog, &storage, &con, row).expect("check");
        assert!(check(&[Value::Null, Value::Null]));
        assert!(!check(&[Value::Integer(1), Value::Null]));
    }

    #[test]
    fn triggers_land_on_both_tables_and_die_with_the_constraint() {
        let (mut catalog, _storage, con) = fixture(FkMatch::Simple);
        catalog.constraints.insert(con.oid, con.clone());
        let created = create_fk_triggers(&mut catalog, &con).expect("triggers");
        assert_eq!(created.len(), 4);
        let pk = con.foreign_key.as_ref().map(|f| f.referenced_rel).unwrap_or_default();
        assert_eq!(catalog.triggers_of(con.relid).len(), 2);
        assert_eq!(catalog.triggers_of(pk).len(), 2);
        assert!(catalog.triggers_of(con.relid).iter().all(|t| t.is_internal));

        let mut targets = crate::catalog::depend::ObjectAddresses::new();
        targets.add(ObjectAddress::constraint(con.oid));
        crate::catalog::depend::perform_deletion(
            &mut catalog,
            &targets,
            crate::catalog::depend::DropBehavior::Restrict,
        )
        .expect("drop");
        assert!(catalog.triggers.is_empty());
    }
}
