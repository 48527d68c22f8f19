use crate::catalog::types::{AttrNumber, Oid, TypeName, Value};
use crate::expr::BoundExpr;
use crate::storage::StorageId;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RelKind {
    Table,
    PartitionedTable,
    View,
    MaterializedView,
    Index,
    PartitionedIndex,
    CompositeType,
    ForeignTable,
    Toast,
}

impl RelKind {
    /// Whether relations of this kind own physical row storage.
    pub fn has_storage(self) -> bool {
        matches!(
            self,
            RelKind::Table | RelKind::MaterializedView | RelKind::Index | RelKind::Toast
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            RelKind::Table => "table",
            RelKind::PartitionedTable => "partitioned table",
            RelKind::View => "view",
            RelKind::MaterializedView => "materialized view",
            RelKind::Index => "index",
            RelKind::PartitionedIndex => "partitioned index",
            RelKind::CompositeType => "composite type",
            RelKind::ForeignTable => "foreign table",
            RelKind::Toast => "TOAST table",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            RelKind::Table => "tables",
            RelKind::PartitionedTable => "partitioned tables",
            RelKind::View => "views",
            RelKind::MaterializedView => "materialized views",
            RelKind::Index => "indexes",
            RelKind::PartitionedIndex => "partitioned indexes",
            RelKind::CompositeType => "composite types",
            RelKind::ForeignTable => "foreign tables",
            RelKind::Toast => "TOAST tables",
        }
    }

    pub fn is_table(self) -> bool {
        matches!(self, RelKind::Table | RelKind::PartitionedTable)
    }

    pub fn is_index(self) -> bool {
        matches!(self, RelKind::Index | RelKind::PartitionedIndex)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Persistence {
    Permanent,
    Unlogged,
    Temporary,
}

impl Persistence {
    pub fn description(self) -> &'static str {
        match self {
            Persistence::Permanent => "logged",
            Persistence::Unlogged => "unlogged",
            Persistence::Temporary => "temporary",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum OnCommitAction {
    #[default]
    Noop,
    PreserveRows,
    DeleteRows,
    Drop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ReplicaIdentity {
    #[default]
    Default,
    Nothing,
    Full,
    Index(Oid),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttributeStorage {
    Plain,
    External,
    Extended,
    Main,
}

impl AttributeStorage {
    pub fn name(self) -> &'static str {
        match self {
            AttributeStorage::Plain => "PLAIN",
            AttributeStorage::External => "EXTERNAL",
            AttributeStorage::Extended => "EXTENDED",
            AttributeStorage::Main => "MAIN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDef {
    pub attnum: AttrNumber,
    pub name: CompactString,
    pub type_name: TypeName,
    pub collation: Option<CompactString>,
    pub not_null: bool,
    pub default: Option<BoundExpr>,
    /// Value reported for rows physically written before the column existed.
    pub missing_value: Option<Value>,
    pub inhcount: i32,
    pub is_local: bool,
    pub is_dropped: bool,
    pub storage: AttributeStorage,
    pub stats_target: i32,
    pub options: BTreeMap<String, String>,
}

impl AttributeDef {
    pub fn new(attnum: AttrNumber, name: &str, type_name: TypeName) -> Self {
        let storage = if type_name.ty.fixed_width().is_some() {
            AttributeStorage::Plain
        } else {
            AttributeStorage::Extended
        };
        let collation = type_name
            .ty
            .is_collatable()
            .then(|| CompactString::from("default"));
        Self {
            attnum,
            name: name.into(),
            type_name,
            collation,
            not_null: false,
            default: None,
            missing_value: None,
            inhcount: 0,
            is_local: true,
            is_dropped: false,
            storage,
            stats_target: -1,
            options: BTreeMap::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Marks the attribute dropped; its slot stays so physical rows keep
    /// their layout.
    pub fn mark_dropped(&mut self) {
        self.is_dropped = true;
        self.name = format!("........pg.dropped.{}........", self.attnum).into();
        self.not_null = false;
        self.default = None;
        self.missing_value = None;
        self.inhcount = 0;
        self.is_local = true;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PartitionStrategy {
    Range,
    List,
    Hash,
}

impl PartitionStrategy {
    pub fn name(self) -> &'static str {
        match self {
            PartitionStrategy::Range => "range",
            PartitionStrategy::List => "list",
            PartitionStrategy::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionKey {
    pub strategy: PartitionStrategy,
    pub attnums: Vec<AttrNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RangeDatum {
    MinValue,
    Value(Value),
    MaxValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PartitionBound {
    Range {
        lower: Vec<RangeDatum>,
        upper: Vec<RangeDatum>,
    },
    List(Vec<Value>),
    Hash {
        modulus: u32,
        remainder: u32,
    },
    Default,
}

impl PartitionBound {
    pub fn is_default(&self) -> bool {
        matches!(self, PartitionBound::Default)
    }

    pub fn strategy(&self) -> Option<PartitionStrategy> {
        match self {
            PartitionBound::Range { .. } => Some(PartitionStrategy::Range),
            PartitionBound::List(_) => Some(PartitionStrategy::List),
            PartitionBound::Hash { .. } => Some(PartitionStrategy::Hash),
            PartitionBound::Default => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DistributionStrategy {
    Hash,
    Modulo,
    RoundRobin,
    Replicated,
}

impl DistributionStrategy {
    pub fn name(self) -> &'static str {
        match self {
            DistributionStrategy::Hash => "HASH",
            DistributionStrategy::Modulo => "MODULO",
            DistributionStrategy::RoundRobin => "ROUNDROBIN",
            DistributionStrategy::Replicated => "REPLICATION",
        }
    }

    pub fn needs_column(self) -> bool {
        matches!(self, DistributionStrategy::Hash | DistributionStrategy::Modulo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionPolicy {
    pub strategy: DistributionStrategy,
    pub column: Option<(AttrNumber, CompactString)>,
    pub nodes: Vec<CompactString>,
}

impl std::fmt::Display for DistributionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.strategy.name())?;
        if let Some((attnum, name)) = &self.column {
            write!(f, "({name} #{attnum})")?;
        }
        write!(f, " TO NODE ({})", self.nodes.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TriggerFiring {
    /// Fires in origin and local sessions.
    #[default]
    Origin,
    Always,
    Replica,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerFunction {
    /// Referencing side: new or updated rows must find a referenced key.
    RiCheckInsert,
    RiCheckUpdate,
    /// Referenced side actions.
    RiReferencedDelete,
    RiReferencedUpdate,
    User(CompactString),
}

impl TriggerFunction {
    pub fn is_ri_check(&self) -> bool {
        matches!(self, TriggerFunction::RiCheckInsert | TriggerFunction::RiCheckUpdate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerDef {
    pub oid: Oid,
    pub relid: Oid,
    pub name: CompactString,
    pub function: TriggerFunction,
    pub firing: TriggerFiring,
    pub is_internal: bool,
    pub row_level: bool,
    pub has_transition_tables: bool,
    pub constraint: Option<Oid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleDef {
    pub oid: Oid,
    pub relid: Oid,
    pub name: CompactString,
    pub firing: TriggerFiring,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    PrimaryKey,
    Unique,
}

impl ConstraintKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ConstraintKind::Check => "check",
            ConstraintKind::ForeignKey => "fkey",
            ConstraintKind::PrimaryKey => "pkey",
            ConstraintKind::Unique => "key",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum FkMatch {
    #[default]
    Simple,
    Full,
}

/// Equality operator chosen for one foreign key column pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EqualityOperator {
    /// Declared input type of the referenced index column.
    pub operand: TypeName,
    pub fk_type: TypeName,
    pub pk_type: TypeName,
    /// Coercion applied to the referencing value before comparison.
    pub fk_coercion: Option<crate::expr::cast::CoercionPath>,
}

impl EqualityOperator {
    /// Whether comparing raw stored values gives the operator's answer.
    pub fn is_binary(&self) -> bool {
        self.fk_coercion.is_none_or(|path| path.is_relabel())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub referenced_rel: Oid,
    pub referenced_index: Oid,
    pub fk_attnums: Vec<AttrNumber>,
    pub pk_attnums: Vec<AttrNumber>,
    pub operators: Vec<EqualityOperator>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
    pub match_type: FkMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintDef {
    pub oid: Oid,
    pub relid: Oid,
    pub name: CompactString,
    pub kind: ConstraintKind,
    pub expr: Option<BoundExpr>,
    pub index: Option<Oid>,
    pub foreign_key: Option<ForeignKeyInfo>,
    pub attnums: Vec<AttrNumber>,
    pub deferrable: bool,
    pub deferred: bool,
    pub validated: bool,
    pub inhcount: i32,
    pub is_local: bool,
    pub no_inherit: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IndexMethod {
    BTree,
    Hash,
}

impl IndexMethod {
    pub fn name(self) -> &'static str {
        match self {
            IndexMethod::BTree => "btree",
            IndexMethod::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub oid: Oid,
    pub relid: Oid,
    pub method: IndexMethod,
    pub attnums: Vec<AttrNumber>,
    pub unique: bool,
    pub primary: bool,
    pub predicate: Option<BoundExpr>,
    pub valid: bool,
    /// Partitioned index this index is attached to.
    pub parent: Option<Oid>,
    pub constraint: Option<Oid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct InheritEdge {
    pub child: Oid,
    pub parent: Oid,
    pub seqno: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationDef {
    pub oid: Oid,
    pub name: CompactString,
    pub namespace: CompactString,
    pub kind: RelKind,
    pub owner: CompactString,
    pub tablespace: CompactString,
    pub persistence: Persistence,
    pub has_oids: bool,
    pub storage: Option<StorageId>,
    pub toast: Option<Oid>,
    pub of_type: Option<Oid>,
    pub partition_key: Option<PartitionKey>,
    pub partition_bound: Option<PartitionBound>,
    pub is_partition: bool,
    pub distribution: Option<DistributionPolicy>,
    pub replica_identity: ReplicaIdentity,
    pub row_security: bool,
    pub force_row_security: bool,
    pub options: BTreeMap<String, String>,
    pub generic_options: BTreeMap<String, String>,
    pub attributes: Vec<AttributeDef>,
    pub cluster_index: Option<Oid>,
    pub is_system: bool,
}

impl RelationDef {
    pub fn new(oid: Oid, name: &str, namespace: &str, kind: RelKind, owner: &str) -> Self {
        Self {
            oid,
            name: name.into(),
            namespace: namespace.into(),
            kind,
            owner: owner.into(),
            tablespace: "pg_default".into(),
            persistence: Persistence::Permanent,
            has_oids: false,
            storage: None,
            toast: None,
            of_type: None,
            partition_key: None,
            partition_bound: None,
            is_partition: false,
            distribution: None,
            replica_identity: ReplicaIdentity::Default,
            row_security: false,
            force_row_security: false,
            options: BTreeMap::new(),
            generic_options: BTreeMap::new(),
            attributes: Vec::new(),
            cluster_index: None,
            is_system: false,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn attribute(&self, attnum: AttrNumber) -> Option<&AttributeDef> {
        if attnum <= 0 {
            return None;
        }
        self.attributes.get((attnum - 1) as usize)
    }

    pub fn attribute_mut(&mut self, attnum: AttrNumber) -> Option<&mut AttributeDef> {
        if attnum <= 0 {
            return None;
        }
        self.attributes.get_mut((attnum - 1) as usize)
    }

    /// Live (not dropped) attribute with the given name.
    pub fn attribute_by_name(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes
            .iter()
            .find(|a| !a.is_dropped && a.name == name)
    }

    pub fn live_attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.iter().filter(|a| !a.is_dropped)
    }

    pub fn next_attnum(&self) -> AttrNumber {
        self.attributes.len() as AttrNumber + 1
    }

    pub fn is_partitioned(&self) -> bool {
        self.kind == RelKind::PartitionedTable
    }

    /// Logical row for a stored tuple: one value per attribute slot. Slots
    /// past the physical tuple take the attribute's missing value; dropped
    /// slots read as null.
    pub fn deform(&self, physical: &[Value]) -> Vec<Value> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(i, att)| {
                if att.is_dropped {
                    Value::Null
                } else if let Some(v) = physical.get(i) {
                    v.clone()
                } else {
                    att.missing_value.clone().unwrap_or(Value::Null)
                }
            })
            .collect()
    }

    /// Widest row the current attribute list can produce.
    pub fn max_row_width(&self) -> usize {
        self.live_attributes()
            .map(|a| a.type_name.ty.max_width(a.type_name.typmod))
            .fold(0usize, usize::saturating_add)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainDef {
    pub name: CompactString,
    pub base: TypeName,
    pub not_null: bool,
    /// Bound against the domain value as attribute 1.
    pub check: Option<BoundExpr>,
}

impl DomainDef {
    pub fn has_constraints(&self) -> bool {
        self.not_null || self.check.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDef {
    pub name: CompactString,
    pub superuser: bool,
    /// Administrative exemption in policy-governed deployments.
    pub policy_exempt: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Privilege {
    Select,
    Insert,
    References,
    Trigger,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ColumnType;

    #[test]
    fn dropped_attributes_keep_their_slot() {
        let mut rel = RelationDef::new(16384, "t", "public", RelKind::Table, "alice");
        rel.attributes.push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.attributes.push(AttributeDef::new(2, "b", TypeName::new(ColumnType::Text)));
        rel.attributes[0].mark_dropped();
        assert!(rel.attribute_by_name("a").is_none());
        assert_eq!(rel.attribute(1).map(|a| a.is_dropped), Some(true));
        assert_eq!(rel.next_attnum(), 3);
        assert_eq!(rel.live_attributes().count(), 1);
        assert_eq!(rel.attributes[0].name, "........pg.dropped.1........");
    }

    #[test]
    fn storage_defaults_follow_type_width() {
        let int = AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer));
        let text = AttributeDef::new(2, "b", TypeName::new(ColumnType::Text));
        assert_eq!(int.storage, AttributeStorage::Plain);
        assert_eq!(text.storage, AttributeStorage::Extended);
        assert!(int.collation.is_none());
        assert_eq!(text.collation.as_deref(), Some("default"));
    }
}
