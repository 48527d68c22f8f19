//! Typed ALTER TABLE statements and subcommands.

use crate::catalog::depend::DropBehavior;
use crate::catalog::schema::{
    AttributeStorage, DistributionStrategy, EqualityOperator, FkAction, FkMatch, IndexMethod,
    PartitionBound, RelKind, TriggerFiring,
};
use crate::catalog::types::TypeName;
use crate::error::AlterError;
use crate::expr::RawExpr;
use crate::storage::StorageId;
use serde::{Deserialize, Serialize};

/// Object kind named by the statement (ALTER TABLE, ALTER INDEX, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectKind {
    #[default]
    Table,
    Index,
    View,
    MaterializedView,
    ForeignTable,
    Type,
}

impl ObjectKind {
    pub fn statement(self) -> &'static str {
        match self {
            ObjectKind::Table => "ALTER TABLE",
            ObjectKind::Index => "ALTER INDEX",
            ObjectKind::View => "ALTER VIEW",
            ObjectKind::MaterializedView => "ALTER MATERIALIZED VIEW",
            ObjectKind::ForeignTable => "ALTER FOREIGN TABLE",
            ObjectKind::Type => "ALTER TYPE",
        }
    }

    /// The statement family that manages relations of `kind`.
    pub fn of_relkind(kind: RelKind) -> ObjectKind {
        match kind {
            RelKind::Table | RelKind::PartitionedTable | RelKind::Toast => ObjectKind::Table,
            RelKind::Index | RelKind::PartitionedIndex => ObjectKind::Index,
            RelKind::View => ObjectKind::View,
            RelKind::MaterializedView => ObjectKind::MaterializedView,
            RelKind::ForeignTable => ObjectKind::ForeignTable,
            RelKind::CompositeType => ObjectKind::Type,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::Index => "INDEX",
            ObjectKind::View => "VIEW",
            ObjectKind::MaterializedView => "MATERIALIZED VIEW",
            ObjectKind::ForeignTable => "FOREIGN TABLE",
            ObjectKind::Type => "TYPE",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            ObjectKind::Table => "a table",
            ObjectKind::Index => "an index",
            ObjectKind::View => "a view",
            ObjectKind::MaterializedView => "a materialized view",
            ObjectKind::ForeignTable => "a foreign table",
            ObjectKind::Type => "a type",
        }
    }

    /// What a DROP of this kind accepts, for "\"x\" is not ..." errors.
    pub fn drop_target(self) -> &'static str {
        self.noun()
    }

    pub fn drop_statement(self) -> &'static str {
        match self {
            ObjectKind::Table => "DROP TABLE",
            ObjectKind::Index => "DROP INDEX",
            ObjectKind::View => "DROP VIEW",
            ObjectKind::MaterializedView => "DROP MATERIALIZED VIEW",
            ObjectKind::ForeignTable => "DROP FOREIGN TABLE",
            ObjectKind::Type => "DROP TYPE",
        }
    }

    pub fn alter_hint(self) -> String {
        format!("Use ALTER {} instead.", self.keyword())
    }

    pub fn drop_hint(self) -> String {
        format!("Use DROP {} to remove {}.", self.keyword(), self.noun())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTableStmt {
    pub relation: String,
    pub cmds: Vec<Subcommand>,
    /// False for ONLY.
    pub recurse: bool,
    pub missing_ok: bool,
    pub object_kind: ObjectKind,
}

impl AlterTableStmt {
    pub fn new(relation: &str, cmds: Vec<Subcommand>) -> Self {
        Self {
            relation: relation.to_string(),
            cmds,
            recurse: true,
            missing_ok: false,
            object_kind: ObjectKind::Table,
        }
    }

    pub fn only(mut self) -> Self {
        self.recurse = false;
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.missing_ok = true;
        self
    }

    pub fn kind(mut self, kind: ObjectKind) -> Self {
        self.object_kind = kind;
        self
    }

    /// MessagePack encoding of the subcommand list.
    pub fn payload(&self) -> Result<Vec<u8>, AlterError> {
        rmp_serde::to_vec(&self.cmds).map_err(|e| AlterError::internal(e.to_string()))
    }
}

/// Constraint written inline with a column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnConstraint {
    Check {
        name: Option<String>,
        expr: RawExpr,
        no_inherit: bool,
    },
    Unique {
        name: Option<String>,
    },
    PrimaryKey {
        name: Option<String>,
    },
    References {
        name: Option<String>,
        table: String,
        column: Option<String>,
        on_delete: FkAction,
        on_update: FkAction,
        match_type: FkMatch,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: TypeName,
    pub not_null: bool,
    pub default: Option<RawExpr>,
    pub collation: Option<String>,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnDef {
    pub fn new(name: &str, type_name: TypeName) -> Self {
        Self {
            name: name.to_string(),
            type_name,
            not_null: false,
            default: None,
            collation: None,
            constraints: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default(mut self, expr: RawExpr) -> Self {
        self.default = Some(expr);
        self
    }

    pub fn collate(mut self, collation: &str) -> Self {
        self.collation = Some(collation.to_string());
        self
    }

    pub fn constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_table: String,
    /// Empty means the referenced table's primary key.
    pub ref_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
    pub match_type: FkMatch,
    pub deferrable: bool,
    pub deferred: bool,
    pub not_valid: bool,
}

impl ForeignKeySpec {
    pub fn new(columns: &[&str], ref_table: &str, ref_columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            ref_table: ref_table.to_string(),
            ref_columns: ref_columns.iter().map(|c| (*c).to_string()).collect(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
            match_type: FkMatch::Simple,
            deferrable: false,
            deferred: false,
            not_valid: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintSpec {
    Check {
        name: Option<String>,
        expr: RawExpr,
        no_inherit: bool,
        not_valid: bool,
    },
    ForeignKey(ForeignKeySpec),
    Unique {
        name: Option<String>,
        columns: Vec<String>,
    },
    PrimaryKey {
        name: Option<String>,
        columns: Vec<String>,
    },
}

impl ConstraintSpec {
    pub fn check(name: &str, expr: RawExpr) -> Self {
        ConstraintSpec::Check {
            name: Some(name.to_string()),
            expr,
            no_inherit: false,
            not_valid: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ConstraintSpec::Check { name, .. }
            | ConstraintSpec::Unique { name, .. }
            | ConstraintSpec::PrimaryKey { name, .. } => name.as_deref(),
            ConstraintSpec::ForeignKey(fk) => fk.name.as_deref(),
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, ConstraintSpec::ForeignKey(_))
    }

    pub fn is_check(&self) -> bool {
        matches!(self, ConstraintSpec::Check { .. })
    }

    pub fn is_index_backed(&self) -> bool {
        matches!(
            self,
            ConstraintSpec::Unique { .. } | ConstraintSpec::PrimaryKey { .. }
        )
    }
}

/// State of a constraint before it was dropped for a column type change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousConstraint {
    pub operators: Vec<EqualityOperator>,
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub method: IndexMethod,
    pub unique: bool,
    pub primary: bool,
    pub predicate: Option<RawExpr>,
    /// Index implements a UNIQUE or PRIMARY KEY constraint.
    pub is_constraint: bool,
    pub constraint_name: Option<String>,
    pub deferrable: bool,
    /// Storage of a dropped index whose contents are still valid.
    pub reuse_storage: Option<StorageId>,
}

impl IndexSpec {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            method: IndexMethod::BTree,
            unique: false,
            primary: false,
            predicate: None,
            is_constraint: false,
            constraint_name: None,
            deferrable: false,
            reuse_storage: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentTarget {
    Constraint(String),
    Index(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTarget {
    Named(String),
    All,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaIdentitySpec {
    Default,
    Nothing,
    Full,
    Index(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenericOptionAction {
    Add,
    Set,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericOption {
    pub action: GenericOptionAction,
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Subcommand {
    AddColumn {
        column: ColumnDef,
        if_not_exists: bool,
    },
    /// `None` drops the default.
    ColumnDefault {
        column: String,
        default: Option<RawExpr>,
    },
    DropNotNull {
        column: String,
    },
    SetNotNull {
        column: String,
    },
    SetStatistics {
        column: String,
        target: i32,
    },
    SetStorage {
        column: String,
        storage: AttributeStorage,
    },
    /// `None` values reset the option.
    SetAttributeOptions {
        column: String,
        options: Vec<(String, Option<String>)>,
    },
    DropColumn {
        column: String,
        behavior: DropBehavior,
        missing_ok: bool,
    },
    AddIndex(IndexSpec),
    ReAddIndex(IndexSpec),
    AddConstraint(ConstraintSpec),
    ReAddConstraint {
        spec: ConstraintSpec,
        previous: Option<PreviousConstraint>,
    },
    AlterConstraint {
        name: String,
        deferrable: bool,
        deferred: bool,
    },
    ValidateConstraint {
        name: String,
    },
    DropConstraint {
        name: String,
        behavior: DropBehavior,
        missing_ok: bool,
    },
    ReAddComment {
        target: CommentTarget,
        comment: String,
    },
    AlterColumnType {
        column: String,
        type_name: TypeName,
        using: Option<RawExpr>,
        collation: Option<String>,
    },
    ChangeOwner {
        new_owner: String,
    },
    ClusterOn {
        index: String,
    },
    DropCluster,
    SetLogged,
    SetUnlogged,
    SetWithOids,
    SetWithoutOids,
    SetTablespace {
        tablespace: String,
    },
    SetRelOptions {
        options: Vec<(String, String)>,
    },
    ResetRelOptions {
        options: Vec<String>,
    },
    SetTrigger {
        target: TriggerTarget,
        firing: TriggerFiring,
    },
    SetRule {
        name: String,
        firing: TriggerFiring,
    },
    AddInherit {
        parent: String,
    },
    DropInherit {
        parent: String,
    },
    DropOf,
    ReplicaIdentity(ReplicaIdentitySpec),
    SetRowSecurity(bool),
    SetForceRowSecurity(bool),
    GenericOptions(Vec<GenericOption>),
    AttachPartition {
        partition: String,
        bound: PartitionBound,
    },
    DetachPartition {
        partition: String,
    },
    AttachIndexPartition {
        index: String,
    },
    SetDistribution {
        strategy: DistributionStrategy,
        column: Option<String>,
        nodes: Option<Vec<String>>,
    },
}

impl Subcommand {
    pub fn tag(&self) -> &'static str {
        match self {
            Subcommand::AddColumn { .. } => "ADD COLUMN",
            Subcommand::ColumnDefault { default: Some(_), .. } => "ALTER COLUMN SET DEFAULT",
            Subcommand::ColumnDefault { default: None, .. } => "ALTER COLUMN DROP DEFAULT",
            Subcommand::DropNotNull { .. } => "ALTER COLUMN DROP NOT NULL",
            Subcommand::SetNotNull { .. } => "ALTER COLUMN SET NOT NULL",
            Subcommand::SetStatistics { .. } => "ALTER COLUMN SET STATISTICS",
            Subcommand::SetStorage { .. } => "ALTER COLUMN SET STORAGE",
            Subcommand::SetAttributeOptions { .. } => "ALTER COLUMN SET",
            Subcommand::DropColumn { .. } => "DROP COLUMN",
            Subcommand::AddIndex(_) => "ADD INDEX",
            Subcommand::ReAddIndex(_) => "ADD INDEX (re-add)",
            Subcommand::AddConstraint(_) => "ADD CONSTRAINT",
            Subcommand::ReAddConstraint { .. } => "ADD CONSTRAINT (re-add)",
            Subcommand::AlterConstraint { .. } => "ALTER CONSTRAINT",
            Subcommand::ValidateConstraint { .. } => "VALIDATE CONSTRAINT",
            Subcommand::DropConstraint { .. } => "DROP CONSTRAINT",
            Subcommand::ReAddComment { .. } => "COMMENT (re-add)",
            Subcommand::AlterColumnType { .. } => "ALTER COLUMN TYPE",
            Subcommand::ChangeOwner { .. } => "OWNER TO",
            Subcommand::ClusterOn { .. } => "CLUSTER ON",
            Subcommand::DropCluster => "SET WITHOUT CLUSTER",
            Subcommand::SetLogged => "SET LOGGED",
            Subcommand::SetUnlogged => "SET UNLOGGED",
            Subcommand::SetWithOids => "SET WITH OIDS",
            Subcommand::SetWithoutOids => "SET WITHOUT OIDS",
            Subcommand::SetTablespace { .. } => "SET TABLESPACE",
            Subcommand::SetRelOptions { .. } => "SET",
            Subcommand::ResetRelOptions { .. } => "RESET",
            Subcommand::SetTrigger { .. } => "ENABLE/DISABLE TRIGGER",
            Subcommand::SetRule { .. } => "ENABLE/DISABLE RULE",
            Subcommand::AddInherit { .. } => "INHERIT",
            Subcommand::DropInherit { .. } => "NO INHERIT",
            Subcommand::DropOf => "NOT OF",
            Subcommand::ReplicaIdentity(_) => "REPLICA IDENTITY",
            Subcommand::SetRowSecurity(_) => "ENABLE/DISABLE ROW LEVEL SECURITY",
            Subcommand::SetForceRowSecurity(_) => "FORCE ROW LEVEL SECURITY",
            Subcommand::GenericOptions(_) => "OPTIONS",
            Subcommand::AttachPartition { .. } => "ATTACH PARTITION",
            Subcommand::DetachPartition { .. } => "DETACH PARTITION",
            Subcommand::AttachIndexPartition { .. } => "ATTACH PARTITION (index)",
            Subcommand::SetDistribution { .. } => "DISTRIBUTE BY",
        }
    }

    /// Column the subcommand addresses, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Subcommand::AddColumn { column, .. } => Some(column.name.as_str()),
            Subcommand::ColumnDefault { column, .. }
            | Subcommand::DropNotNull { column }
            | Subcommand::SetNotNull { column }
            | Subcommand::SetStatistics { column, .. }
            | Subcommand::SetStorage { column, .. }
            | Subcommand::SetAttributeOptions { column, .. }
            | Subcommand::DropColumn { column, .. }
            | Subcommand::AlterColumnType { column, .. } => Some(column.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ColumnType;
    use crate::expr::{col, lit};

    #[test]
    fn hints_follow_the_relation_kind() {
        let index = ObjectKind::of_relkind(RelKind::PartitionedIndex);
        assert_eq!(index, ObjectKind::Index);
        assert_eq!(index.drop_hint(), "Use DROP INDEX to remove an index.");
        assert_eq!(
            ObjectKind::of_relkind(RelKind::MaterializedView).alter_hint(),
            "Use ALTER MATERIALIZED VIEW instead."
        );
        assert_eq!(
            ObjectKind::of_relkind(RelKind::CompositeType).drop_hint(),
            "Use DROP TYPE to remove a type."
        );
    }

    #[test]
    fn payload_round_trips_through_messagepack() {
        let stmt = AlterTableStmt::new(
            "t",
            vec![
                Subcommand::AddColumn {
                    column: ColumnDef::new("b", TypeName::new(ColumnType::Integer))
                        .not_null()
                        .default(lit(5)),
                    if_not_exists: false,
                },
                Subcommand::AddConstraint(ConstraintSpec::check("b_pos", col("b").gt(lit(0)))),
            ],
        );
        let bytes = stmt.payload().expect("encode");
        let decoded: Vec<Subcommand> = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, stmt.cmds);
    }

    #[test]
    fn tags_distinguish_default_forms() {
        let set = Subcommand::ColumnDefault {
            column: "a".into(),
            default: Some(lit(1)),
        };
        let drop = Subcommand::ColumnDefault {
            column: "a".into(),
            default: None,
        };
        assert_eq!(set.tag(), "ALTER COLUMN SET DEFAULT");
        assert_eq!(drop.tag(), "ALTER COLUMN DROP DEFAULT");
        assert_eq!(set.column(), Some("a"));
    }
}
