//! Expression trees stored in the catalog.
//!
//! Two forms exist. [`RawExpr`] is what a definition looks like before
//! analysis: columns are referenced by name and nothing is typed. It is also
//! the textual form a stored definition is deparsed back into when dependent
//! objects must be rebuilt against a changed column type. [`BoundExpr`] is the
//! analyzed form: columns are attribute numbers, every node is typed and all
//! implicit coercions are explicit nodes. Only bound trees are compiled into
//! evaluators.

pub mod cast;
pub mod eval;
pub mod implication;

use crate::catalog::schema::{DomainDef, RelationDef};
use crate::catalog::types::{AttrNumber, ColumnType, TypeCategory, TypeName, Value};
use crate::error::AlterError;
use cast::{CoercionContext, CoercionPath, find_coercion_path};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum nesting depth accepted for stored expressions.
const MAX_EXPR_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Operator obtained by swapping the operands.
    pub fn commute(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Lower,
    Upper,
    Length,
    Abs,
    Coalesce,
    Now,
    ClockTimestamp,
    Random,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Lower => "lower",
            Builtin::Upper => "upper",
            Builtin::Length => "length",
            Builtin::Abs => "abs",
            Builtin::Coalesce => "coalesce",
            Builtin::Now => "now",
            Builtin::ClockTimestamp => "clock_timestamp",
            Builtin::Random => "random",
        }
    }

    pub fn volatility(self) -> Volatility {
        match self {
            Builtin::Now => Volatility::Stable,
            Builtin::ClockTimestamp | Builtin::Random => Volatility::Volatile,
            _ => Volatility::Immutable,
        }
    }
}

/// Unanalyzed expression; columns are referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawExpr {
    Column(CompactString),
    Const(Value),
    Cast(Box<RawExpr>, TypeName),
    Binary(BinaryOp, Box<RawExpr>, Box<RawExpr>),
    And(Box<RawExpr>, Box<RawExpr>),
    Or(Box<RawExpr>, Box<RawExpr>),
    Not(Box<RawExpr>),
    IsNull(Box<RawExpr>),
    IsNotNull(Box<RawExpr>),
    InList(Box<RawExpr>, Vec<RawExpr>),
    Func(Builtin, Vec<RawExpr>),
}

pub fn col(name: &str) -> RawExpr {
    RawExpr::Column(name.into())
}

pub fn lit(value: impl Into<Value>) -> RawExpr {
    RawExpr::Const(value.into())
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl RawExpr {
    fn binary(self, op: BinaryOp, rhs: RawExpr) -> RawExpr {
        RawExpr::Binary(op, Box::new(self), Box::new(rhs))
    }

    pub fn eq(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn add(self, rhs: RawExpr) -> RawExpr {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn and(self, rhs: RawExpr) -> RawExpr {
        RawExpr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: RawExpr) -> RawExpr {
        RawExpr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> RawExpr {
        RawExpr::Not(Box::new(self))
    }

    pub fn is_null(self) -> RawExpr {
        RawExpr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> RawExpr {
        RawExpr::IsNotNull(Box::new(self))
    }

    pub fn cast(self, to: TypeName) -> RawExpr {
        RawExpr::Cast(Box::new(self), to)
    }

    pub fn depth(&self) -> usize {
        match self {
            RawExpr::Column(_) | RawExpr::Const(_) => 1,
            RawExpr::Cast(inner, _)
            | RawExpr::Not(inner)
            | RawExpr::IsNull(inner)
            | RawExpr::IsNotNull(inner) => 1 + inner.depth(),
            RawExpr::Binary(_, l, r) | RawExpr::And(l, r) | RawExpr::Or(l, r) => {
                1 + l.depth().max(r.depth())
            }
            RawExpr::InList(arg, list) => {
                1 + list.iter().map(RawExpr::depth).max().unwrap_or(0).max(arg.depth())
            }
            RawExpr::Func(_, args) => 1 + args.iter().map(RawExpr::depth).max().unwrap_or(0),
        }
    }

    pub fn column_names(&self) -> BTreeSet<CompactString> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<CompactString>) {
        match self {
            RawExpr::Column(name) => {
                out.insert(name.clone());
            }
            RawExpr::Const(_) => {}
            RawExpr::Cast(inner, _)
            | RawExpr::Not(inner)
            | RawExpr::IsNull(inner)
            | RawExpr::IsNotNull(inner) => inner.collect_columns(out),
            RawExpr::Binary(_, l, r) | RawExpr::And(l, r) | RawExpr::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            RawExpr::InList(arg, list) => {
                arg.collect_columns(out);
                list.iter().for_each(|e| e.collect_columns(out));
            }
            RawExpr::Func(_, args) => args.iter().for_each(|e| e.collect_columns(out)),
        }
    }
}

impl std::fmt::Display for RawExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawExpr::Column(name) => write!(f, "{name}"),
            RawExpr::Const(v) => write!(f, "{}", v.literal()),
            RawExpr::Cast(inner, ty) => write!(f, "({inner})::{}", ty.display()),
            RawExpr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            RawExpr::And(l, r) => write!(f, "({l} AND {r})"),
            RawExpr::Or(l, r) => write!(f, "({l} OR {r})"),
            RawExpr::Not(inner) => write!(f, "(NOT {inner})"),
            RawExpr::IsNull(inner) => write!(f, "({inner} IS NULL)"),
            RawExpr::IsNotNull(inner) => write!(f, "({inner} IS NOT NULL)"),
            RawExpr::InList(arg, list) => {
                write!(f, "({arg} IN (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "))")
            }
            RawExpr::Func(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, item) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoercionForm {
    /// Written by the user; survives deparsing.
    Explicit,
    /// Inserted by analysis; dropped when deparsing.
    Implicit,
}

/// Analyzed, typed expression; columns are attribute numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundExpr {
    Var {
        attnum: AttrNumber,
        ty: TypeName,
    },
    Const {
        value: Value,
        ty: TypeName,
    },
    Coerce {
        arg: Box<BoundExpr>,
        to: TypeName,
        path: CoercionPath,
        form: CoercionForm,
    },
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
        ty: TypeName,
    },
    And(Vec<BoundExpr>),
    Or(Vec<BoundExpr>),
    Not(Box<BoundExpr>),
    NullTest {
        arg: Box<BoundExpr>,
        is_null: bool,
    },
    InList {
        arg: Box<BoundExpr>,
        list: Vec<BoundExpr>,
    },
    Func {
        func: Builtin,
        args: Vec<BoundExpr>,
        ty: TypeName,
    },
    /// Lexicographic comparison of two equal-length expression lists.
    RowCompare {
        op: BinaryOp,
        left: Vec<BoundExpr>,
        right: Vec<BoundExpr>,
    },
    /// True when the combined hash of `keys` lands in `remainder` mod `modulus`.
    HashPartition {
        modulus: u32,
        remainder: u32,
        keys: Vec<BoundExpr>,
    },
    DomainCheck {
        arg: Box<BoundExpr>,
        domain: CompactString,
        not_null: bool,
        /// Evaluated with the coerced value as attribute 1.
        check: Option<Box<BoundExpr>>,
    },
}

fn bool_type() -> TypeName {
    TypeName::new(ColumnType::Boolean)
}

impl BoundExpr {
    pub fn ty(&self) -> TypeName {
        match self {
            BoundExpr::Var { ty, .. } | BoundExpr::Const { ty, .. } => ty.clone(),
            BoundExpr::Coerce { to, .. } => to.clone(),
            BoundExpr::Binary { ty, .. } | BoundExpr::Func { ty, .. } => ty.clone(),
            BoundExpr::DomainCheck { domain, .. } => TypeName::new(ColumnType::Domain(domain.clone())),
            BoundExpr::And(_)
            | BoundExpr::Or(_)
            | BoundExpr::Not(_)
            | BoundExpr::NullTest { .. }
            | BoundExpr::InList { .. }
            | BoundExpr::RowCompare { .. }
            | BoundExpr::HashPartition { .. } => bool_type(),
        }
    }

    pub fn and_all(mut clauses: Vec<BoundExpr>) -> BoundExpr {
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            BoundExpr::And(clauses)
        }
    }

    pub fn or_all(mut clauses: Vec<BoundExpr>) -> BoundExpr {
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            BoundExpr::Or(clauses)
        }
    }

    pub fn var(attnum: AttrNumber, ty: TypeName) -> BoundExpr {
        BoundExpr::Var { attnum, ty }
    }

    pub fn constant(value: Value, ty: TypeName) -> BoundExpr {
        BoundExpr::Const { value, ty }
    }

    pub fn not_null(arg: BoundExpr) -> BoundExpr {
        BoundExpr::NullTest {
            arg: Box::new(arg),
            is_null: false,
        }
    }

    pub fn compare(op: BinaryOp, left: BoundExpr, right: BoundExpr) -> BoundExpr {
        BoundExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty: bool_type(),
        }
    }

    fn children(&self) -> Vec<&BoundExpr> {
        match self {
            BoundExpr::Var { .. } | BoundExpr::Const { .. } => Vec::new(),
            BoundExpr::Coerce { arg, .. }
            | BoundExpr::Not(arg)
            | BoundExpr::NullTest { arg, .. } => vec![arg.as_ref()],
            BoundExpr::DomainCheck { arg, .. } => vec![arg.as_ref()],
            BoundExpr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            BoundExpr::And(items) | BoundExpr::Or(items) => items.iter().collect(),
            BoundExpr::InList { arg, list } => {
                let mut out = vec![arg.as_ref()];
                out.extend(list.iter());
                out
            }
            BoundExpr::Func { args, .. } => args.iter().collect(),
            BoundExpr::RowCompare { left, right, .. } => left.iter().chain(right.iter()).collect(),
            BoundExpr::HashPartition { keys, .. } => keys.iter().collect(),
        }
    }

    /// Attribute numbers referenced anywhere in the tree.
    pub fn attnums(&self) -> BTreeSet<AttrNumber> {
        let mut out = BTreeSet::new();
        self.collect_attnums(&mut out);
        out
    }

    fn collect_attnums(&self, out: &mut BTreeSet<AttrNumber>) {
        if let BoundExpr::Var { attnum, .. } = self {
            out.insert(*attnum);
        }
        for child in self.children() {
            child.collect_attnums(out);
        }
    }

    pub fn references(&self, attnum: AttrNumber) -> bool {
        self.attnums().contains(&attnum)
    }

    pub fn volatility(&self) -> Volatility {
        let own = match self {
            BoundExpr::Func { func, .. } => func.volatility(),
            _ => Volatility::Immutable,
        };
        self.children()
            .into_iter()
            .map(BoundExpr::volatility)
            .fold(own, Volatility::max)
    }

    pub fn contains_domain_check(&self) -> bool {
        matches!(self, BoundExpr::DomainCheck { .. })
            || self.children().into_iter().any(BoundExpr::contains_domain_check)
    }

    /// No column references and no volatile calls: the value can be computed
    /// once and reused for every row.
    pub fn is_row_independent(&self) -> bool {
        self.attnums().is_empty() && self.volatility() != Volatility::Volatile
    }

    /// True when the tree is `Var(attnum)` under nothing but relabel coercions.
    pub fn is_relabeled_var(&self, attnum: AttrNumber) -> bool {
        match self {
            BoundExpr::Var { attnum: a, .. } => *a == attnum,
            BoundExpr::Coerce {
                arg,
                path: CoercionPath::Relabel,
                ..
            } => arg.is_relabeled_var(attnum),
            _ => false,
        }
    }

    /// Rewrites attribute numbers through `map`; fails if an attribute has no
    /// counterpart.
    pub fn map_attnums(
        &self,
        map: &dyn Fn(AttrNumber) -> Option<AttrNumber>,
    ) -> Result<BoundExpr, AlterError> {
        let mapped = match self {
            BoundExpr::Var { attnum, ty } => BoundExpr::Var {
                attnum: map(*attnum).ok_or_else(|| {
                    AlterError::internal(format!("attribute {attnum} has no mapping"))
                })?,
                ty: ty.clone(),
            },
            BoundExpr::Const { .. } => self.clone(),
            BoundExpr::Coerce {
                arg,
                to,
                path,
                form,
            } => BoundExpr::Coerce {
                arg: Box::new(arg.map_attnums(map)?),
                to: to.clone(),
                path: *path,
                form: *form,
            },
            BoundExpr::Binary {
                op,
                left,
                right,
                ty,
            } => BoundExpr::Binary {
                op: *op,
                left: Box::new(left.map_attnums(map)?),
                right: Box::new(right.map_attnums(map)?),
                ty: ty.clone(),
            },
            BoundExpr::And(items) => BoundExpr::And(map_list(items, map)?),
            BoundExpr::Or(items) => BoundExpr::Or(map_list(items, map)?),
            BoundExpr::Not(inner) => BoundExpr::Not(Box::new(inner.map_attnums(map)?)),
            BoundExpr::NullTest { arg, is_null } => BoundExpr::NullTest {
                arg: Box::new(arg.map_attnums(map)?),
                is_null: *is_null,
            },
            BoundExpr::InList { arg, list } => BoundExpr::InList {
                arg: Box::new(arg.map_attnums(map)?),
                list: map_list(list, map)?,
            },
            BoundExpr::Func { func, args, ty } => BoundExpr::Func {
                func: *func,
                args: map_list(args, map)?,
                ty: ty.clone(),
            },
            BoundExpr::RowCompare { op, left, right } => BoundExpr::RowCompare {
                op: *op,
                left: map_list(left, map)?,
                right: map_list(right, map)?,
            },
            BoundExpr::HashPartition {
                modulus,
                remainder,
                keys,
            } => BoundExpr::HashPartition {
                modulus: *modulus,
                remainder: *remainder,
                keys: map_list(keys, map)?,
            },
            // The check expression is bound against the domain value, not the table.
            BoundExpr::DomainCheck {
                arg,
                domain,
                not_null,
                check,
            } => BoundExpr::DomainCheck {
                arg: Box::new(arg.map_attnums(map)?),
                domain: domain.clone(),
                not_null: *not_null,
                check: check.clone(),
            },
        };
        Ok(mapped)
    }

    /// Turns the tree back into its name-based form. Implicit coercions are
    /// dropped so re-analysis picks whatever the current column types need.
    pub fn deparse(&self, names: &dyn ColumnResolver) -> Result<RawExpr, AlterError> {
        let raw = match self {
            BoundExpr::Var { attnum, .. } => RawExpr::Column(
                names
                    .column_name(*attnum)
                    .ok_or_else(|| AlterError::internal(format!("unknown attribute {attnum}")))?
                    .into(),
            ),
            BoundExpr::Const { value, .. } => RawExpr::Const(value.clone()),
            BoundExpr::Coerce { arg, to, form, .. } => match form {
                CoercionForm::Explicit => arg.deparse(names)?.cast(to.clone()),
                CoercionForm::Implicit => arg.deparse(names)?,
            },
            BoundExpr::DomainCheck { arg, domain, .. } => arg
                .deparse(names)?
                .cast(TypeName::new(ColumnType::Domain(domain.clone()))),
            BoundExpr::Binary {
                op, left, right, ..
            } => RawExpr::Binary(
                *op,
                Box::new(left.deparse(names)?),
                Box::new(right.deparse(names)?),
            ),
            BoundExpr::And(items) => fold_raw(items, names, RawExpr::and)?,
            BoundExpr::Or(items) => fold_raw(items, names, RawExpr::or)?,
            BoundExpr::Not(inner) => inner.deparse(names)?.not(),
            BoundExpr::NullTest { arg, is_null } => {
                let inner = arg.deparse(names)?;
                if *is_null {
                    inner.is_null()
                } else {
                    inner.is_not_null()
                }
            }
            BoundExpr::InList { arg, list } => RawExpr::InList(
                Box::new(arg.deparse(names)?),
                list.iter()
                    .map(|e| e.deparse(names))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            BoundExpr::Func { func, args, .. } => RawExpr::Func(
                *func,
                args.iter()
                    .map(|e| e.deparse(names))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            BoundExpr::RowCompare { .. } | BoundExpr::HashPartition { .. } => {
                return Err(AlterError::internal(
                    "partition bound expressions are not deparsable",
                ));
            }
        };
        Ok(raw)
    }

    /// Canonical rendering used to decide whether two stored definitions are
    /// the same, independent of attribute numbering.
    pub fn canonical(&self, names: &dyn ColumnResolver) -> String {
        match self.deparse(names) {
            Ok(raw) => raw.to_string(),
            Err(_) => format!("{self:?}"),
        }
    }
}

fn map_list(
    items: &[BoundExpr],
    map: &dyn Fn(AttrNumber) -> Option<AttrNumber>,
) -> Result<Vec<BoundExpr>, AlterError> {
    items.iter().map(|e| e.map_attnums(map)).collect()
}

fn fold_raw(
    items: &[BoundExpr],
    names: &dyn ColumnResolver,
    join: fn(RawExpr, RawExpr) -> RawExpr,
) -> Result<RawExpr, AlterError> {
    let mut iter = items.iter();
    let first = iter
        .next()
        .ok_or_else(|| AlterError::internal("empty boolean clause list"))?
        .deparse(names)?;
    iter.try_fold(first, |acc, e| Ok(join(acc, e.deparse(names)?)))
}

/// Name resolution for analysis and deparsing.
pub trait ColumnResolver {
    fn relation_name(&self) -> &str;
    fn resolve(&self, name: &str) -> Option<(AttrNumber, TypeName)>;
    fn column_name(&self, attnum: AttrNumber) -> Option<String>;
}

impl ColumnResolver for RelationDef {
    fn relation_name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, name: &str) -> Option<(AttrNumber, TypeName)> {
        self.attribute_by_name(name)
            .map(|a| (a.attnum, a.type_name.clone()))
    }

    fn column_name(&self, attnum: AttrNumber) -> Option<String> {
        self.attribute(attnum).map(|a| a.name.to_string())
    }
}

/// Resolves the single pseudo-column `value` of a domain check.
pub struct DomainValue<'a> {
    pub domain: &'a DomainDef,
}

impl ColumnResolver for DomainValue<'_> {
    fn relation_name(&self) -> &str {
        &self.domain.name
    }

    fn resolve(&self, name: &str) -> Option<(AttrNumber, TypeName)> {
        name.eq_ignore_ascii_case("value")
            .then(|| (1, self.domain.base.clone()))
    }

    fn column_name(&self, attnum: AttrNumber) -> Option<String> {
        (attnum == 1).then(|| "VALUE".to_string())
    }
}

/// Domain lookup used while analyzing.
pub trait TypeLookup {
    fn domain(&self, name: &str) -> Option<&DomainDef>;
}

/// Base type of `ty`, looking through domains.
pub fn base_type(ty: &TypeName, types: &dyn TypeLookup) -> Result<TypeName, AlterError> {
    match &ty.ty {
        ColumnType::Domain(name) => {
            let domain = types.domain(name).ok_or_else(|| AlterError::UndefinedObject {
                kind: crate::error::ObjectKindName::Type,
                name: name.to_string(),
            })?;
            Ok(domain.base.clone())
        }
        _ => Ok(ty.clone()),
    }
}

/// Analyzer binding raw trees against a relation.
pub struct Analyzer<'a> {
    pub columns: &'a dyn ColumnResolver,
    pub types: &'a dyn TypeLookup,
}

impl<'a> Analyzer<'a> {
    pub fn new(columns: &'a dyn ColumnResolver, types: &'a dyn TypeLookup) -> Self {
        Self { columns, types }
    }

    pub fn analyze(&self, raw: &RawExpr) -> Result<BoundExpr, AlterError> {
        if raw.depth() > MAX_EXPR_DEPTH {
            return Err(AlterError::InvalidParameterValue {
                message: format!("expression depth exceeds maximum of {MAX_EXPR_DEPTH}"),
            });
        }
        self.bind(raw)
    }

    /// Analyzes a boolean qualification such as a CHECK body.
    pub fn analyze_predicate(&self, raw: &RawExpr, what: &str) -> Result<BoundExpr, AlterError> {
        let bound = self.analyze(raw)?;
        let ty = self.base(&bound.ty())?;
        if ty.ty != ColumnType::Boolean {
            return Err(AlterError::DatatypeMismatch {
                message: format!("argument of {what} must be type boolean, not type {}", ty.display()),
            });
        }
        Ok(bound)
    }

    /// Analyzes `raw` and coerces the result to `target` in assignment context.
    pub fn analyze_for_column(
        &self,
        raw: &RawExpr,
        column: &str,
        target: &TypeName,
        what: &str,
    ) -> Result<BoundExpr, AlterError> {
        let bound = self.analyze(raw)?;
        let source = bound.ty();
        self.coerce(bound, target, CoercionContext::Assignment, CoercionForm::Implicit)?
            .ok_or_else(|| AlterError::DatatypeMismatch {
                message: format!(
                    "column \"{column}\" is of type {} but {what} is of type {}",
                    target.display(),
                    source.display()
                ),
            })
    }

    fn base(&self, ty: &TypeName) -> Result<TypeName, AlterError> {
        base_type(ty, self.types)
    }

    /// Coerces an analyzed expression; `None` when no cast path exists.
    pub fn coerce(
        &self,
        expr: BoundExpr,
        target: &TypeName,
        ctx: CoercionContext,
        form: CoercionForm,
    ) -> Result<Option<BoundExpr>, AlterError> {
        let source = expr.ty();
        if source == *target {
            return Ok(Some(expr));
        }
        if let ColumnType::Domain(name) = &target.ty {
            let domain = self
                .types
                .domain(name)
                .ok_or_else(|| AlterError::UndefinedObject {
                    kind: crate::error::ObjectKindName::Type,
                    name: name.to_string(),
                })?
                .clone();
            let Some(inner) = self.coerce(expr, &domain.base, ctx, CoercionForm::Implicit)? else {
                return Ok(None);
            };
            return Ok(Some(BoundExpr::DomainCheck {
                arg: Box::new(inner),
                domain: name.clone(),
                not_null: domain.not_null,
                check: domain.check.clone().map(Box::new),
            }));
        }
        let source_base = self.base(&source)?;
        let expr = if source_base != source {
            BoundExpr::Coerce {
                arg: Box::new(expr),
                to: source_base.clone(),
                path: CoercionPath::Relabel,
                form: CoercionForm::Implicit,
            }
        } else {
            expr
        };
        if source_base == *target {
            return Ok(Some(expr));
        }
        // An untyped null literal adopts whatever type is asked for.
        if let BoundExpr::Const {
            value: Value::Null, ..
        } = &expr
        {
            return Ok(Some(BoundExpr::Const {
                value: Value::Null,
                ty: target.clone(),
            }));
        }
        Ok(
            find_coercion_path(&source_base, target, ctx).map(|path| BoundExpr::Coerce {
                arg: Box::new(expr),
                to: target.clone(),
                path,
                form,
            }),
        )
    }

    fn bind(&self, raw: &RawExpr) -> Result<BoundExpr, AlterError> {
        match raw {
            RawExpr::Column(name) => {
                let (attnum, ty) =
                    self.columns
                        .resolve(name)
                        .ok_or_else(|| AlterError::UndefinedColumn {
                            relation: self.columns.relation_name().to_string(),
                            column: name.to_string(),
                        })?;
                Ok(BoundExpr::Var { attnum, ty })
            }
            RawExpr::Const(value) => {
                let ty = value
                    .type_hint()
                    .map(TypeName::new)
                    .unwrap_or_else(|| TypeName::new(ColumnType::Text));
                Ok(BoundExpr::Const {
                    value: value.clone(),
                    ty,
                })
            }
            RawExpr::Cast(inner, to) => {
                let bound = self.bind(inner)?;
                let from = bound.ty();
                self.coerce(bound, to, CoercionContext::Explicit, CoercionForm::Explicit)?
                    .ok_or_else(|| AlterError::DatatypeMismatch {
                        message: format!(
                            "cannot cast type {} to {}",
                            from.display(),
                            to.display()
                        ),
                    })
            }
            RawExpr::Binary(op, l, r) => self.bind_binary(*op, l, r),
            RawExpr::And(l, r) => Ok(BoundExpr::And(vec![
                self.bind_bool(l, "AND")?,
                self.bind_bool(r, "AND")?,
            ])),
            RawExpr::Or(l, r) => Ok(BoundExpr::Or(vec![
                self.bind_bool(l, "OR")?,
                self.bind_bool(r, "OR")?,
            ])),
            RawExpr::Not(inner) => Ok(BoundExpr::Not(Box::new(self.bind_bool(inner, "NOT")?))),
            RawExpr::IsNull(inner) => Ok(BoundExpr::NullTest {
                arg: Box::new(self.bind(inner)?),
                is_null: true,
            }),
            RawExpr::IsNotNull(inner) => Ok(BoundExpr::NullTest {
                arg: Box::new(self.bind(inner)?),
                is_null: false,
            }),
            RawExpr::InList(arg, list) => {
                let mut bound_arg = self.bind(arg)?;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let (a, b) = self.unify(BinaryOp::Eq, bound_arg.clone(), self.bind(item)?)?;
                    bound_arg = a;
                    items.push(b);
                }
                Ok(BoundExpr::InList {
                    arg: Box::new(bound_arg),
                    list: items,
                })
            }
            RawExpr::Func(func, args) => self.bind_func(*func, args),
        }
    }

    fn bind_bool(&self, raw: &RawExpr, what: &str) -> Result<BoundExpr, AlterError> {
        let bound = self.bind(raw)?;
        let ty = self.base(&bound.ty())?;
        if ty.ty != ColumnType::Boolean {
            return Err(AlterError::DatatypeMismatch {
                message: format!("argument of {what} must be type boolean, not type {}", ty.display()),
            });
        }
        Ok(bound)
    }

    fn bind_binary(&self, op: BinaryOp, l: &RawExpr, r: &RawExpr) -> Result<BoundExpr, AlterError> {
        let left = self.bind(l)?;
        let right = self.bind(r)?;
        if op == BinaryOp::Concat {
            let text = TypeName::new(ColumnType::Text);
            let lt = self.base(&left.ty())?;
            let rt = self.base(&right.ty())?;
            if lt.ty.category() != TypeCategory::String && rt.ty.category() != TypeCategory::String
            {
                return Err(operator_missing(op, &lt, &rt));
            }
            let left = self
                .coerce(left, &text, CoercionContext::Assignment, CoercionForm::Implicit)?
                .ok_or_else(|| operator_missing(op, &lt, &rt))?;
            let right = self
                .coerce(right, &text, CoercionContext::Assignment, CoercionForm::Implicit)?
                .ok_or_else(|| operator_missing(op, &lt, &rt))?;
            return Ok(BoundExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                ty: text,
            });
        }
        let (left, right) = self.unify(op, left, right)?;
        let ty = if op.is_comparison() {
            bool_type()
        } else {
            let operand = self.base(&left.ty())?;
            if operand.ty.numeric_rank().is_none() {
                let rt = self.base(&right.ty())?;
                return Err(operator_missing(op, &operand, &rt));
            }
            operand
        };
        Ok(BoundExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        })
    }

    /// Brings both operands of `op` to a common type, or reports that no
    /// operator exists for the pair.
    fn unify(
        &self,
        op: BinaryOp,
        left: BoundExpr,
        right: BoundExpr,
    ) -> Result<(BoundExpr, BoundExpr), AlterError> {
        let lt = self.base(&left.ty())?;
        let rt = self.base(&right.ty())?;
        let left_null = matches!(left, BoundExpr::Const { value: Value::Null, .. });
        let right_null = matches!(right, BoundExpr::Const { value: Value::Null, .. });
        let target = if left_null {
            rt.clone()
        } else if right_null {
            lt.clone()
        } else {
            match (lt.ty.category(), rt.ty.category()) {
                (TypeCategory::Numeric, TypeCategory::Numeric) => {
                    let lr = lt.ty.numeric_rank().unwrap_or(0);
                    let rr = rt.ty.numeric_rank().unwrap_or(0);
                    if lr >= rr {
                        TypeName::new(lt.ty.clone())
                    } else {
                        TypeName::new(rt.ty.clone())
                    }
                }
                (TypeCategory::String, TypeCategory::String) => TypeName::new(ColumnType::Text),
                (TypeCategory::Json, _) | (_, TypeCategory::Json) => {
                    return Err(operator_missing(op, &lt, &rt));
                }
                _ if lt.ty == rt.ty => TypeName::new(lt.ty.clone()),
                _ => return Err(operator_missing(op, &lt, &rt)),
            }
        };
        let left = self
            .coerce_operand(left, &target)?
            .ok_or_else(|| operator_missing(op, &lt, &rt))?;
        let right = self
            .coerce_operand(right, &target)?
            .ok_or_else(|| operator_missing(op, &lt, &rt))?;
        Ok((left, right))
    }

    fn coerce_operand(
        &self,
        expr: BoundExpr,
        target: &TypeName,
    ) -> Result<Option<BoundExpr>, AlterError> {
        let base = self.base(&expr.ty())?;
        // Same base type with a different modifier compares without a cast.
        if base.ty == target.ty && !matches!(expr.ty().ty, ColumnType::Domain(_)) {
            return Ok(Some(expr));
        }
        self.coerce(expr, target, CoercionContext::Implicit, CoercionForm::Implicit)
    }

    fn bind_func(&self, func: Builtin, args: &[RawExpr]) -> Result<BoundExpr, AlterError> {
        let bound = args
            .iter()
            .map(|a| self.bind(a))
            .collect::<Result<Vec<_>, _>>()?;
        let arity_error = || AlterError::UndefinedFunction {
            message: format!("function {}() does not exist with {} arguments", func.name(), args.len()),
        };
        let ty = match func {
            Builtin::Lower | Builtin::Upper | Builtin::Length => {
                if bound.len() != 1 {
                    return Err(arity_error());
                }
                let arg_ty = self.base(&bound[0].ty())?;
                if arg_ty.ty.category() != TypeCategory::String {
                    return Err(AlterError::UndefinedFunction {
                        message: format!("function {}({}) does not exist", func.name(), arg_ty.display()),
                    });
                }
                if func == Builtin::Length {
                    TypeName::new(ColumnType::Integer)
                } else {
                    TypeName::new(ColumnType::Text)
                }
            }
            Builtin::Abs => {
                if bound.len() != 1 {
                    return Err(arity_error());
                }
                let arg_ty = self.base(&bound[0].ty())?;
                if arg_ty.ty.numeric_rank().is_none() {
                    return Err(AlterError::UndefinedFunction {
                        message: format!("function abs({}) does not exist", arg_ty.display()),
                    });
                }
                arg_ty
            }
            Builtin::Coalesce => {
                let mut iter = bound.into_iter();
                let Some(mut first) = iter.next() else {
                    return Err(arity_error());
                };
                let mut rest = Vec::new();
                for item in iter {
                    let (a, b) = self.unify(BinaryOp::Eq, first, item)?;
                    first = a;
                    rest.push(b);
                }
                let ty = first.ty();
                let mut args = vec![first];
                args.extend(rest);
                return Ok(BoundExpr::Func { func, args, ty });
            }
            Builtin::Now | Builtin::ClockTimestamp => {
                if !bound.is_empty() {
                    return Err(arity_error());
                }
                TypeName::new(ColumnType::Timestamp)
            }
            Builtin::Random => {
                if !bound.is_empty() {
                    return Err(arity_error());
                }
                TypeName::new(ColumnType::Float)
            }
        };
        Ok(BoundExpr::Func {
            func,
            args: bound,
            ty,
        })
    }
}

fn operator_missing(op: BinaryOp, l: &TypeName, r: &TypeName) -> AlterError {
    AlterError::UndefinedFunction {
        message: format!(
            "operator does not exist: {} {} {}",
            l.ty.name(),
            op.symbol(),
            r.ty.name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{AttributeDef, RelKind, RelationDef};
    use crate::error::AlterErrorCode;

    struct NoDomains;

    impl TypeLookup for NoDomains {
        fn domain(&self, _name: &str) -> Option<&DomainDef> {
            None
        }
    }

    fn rel() -> RelationDef {
        let mut rel = RelationDef::new(16384, "t", "public", RelKind::Table, "alice");
        rel.attributes.push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.attributes.push(AttributeDef::new(2, "b", TypeName::new(ColumnType::Text)));
        rel.attributes.push(AttributeDef::new(3, "c", TypeName::new(ColumnType::BigInt)));
        rel
    }

    #[test]
    fn comparison_promotes_to_wider_numeric() {
        let rel = rel();
        let analyzer = Analyzer::new(&rel, &NoDomains);
        let bound = analyzer.analyze(&col("a").lt(col("c"))).expect("analyze");
        let BoundExpr::Binary { left, .. } = &bound else {
            panic!("expected binary");
        };
        assert!(matches!(left.as_ref(), BoundExpr::Coerce { path: CoercionPath::Convert, .. }));
        // Implicit coercions vanish when deparsed.
        assert_eq!(bound.deparse(&rel).expect("deparse"), col("a").lt(col("c")));
    }

    #[test]
    fn text_against_integer_has_no_operator() {
        let rel = rel();
        let err = Analyzer::new(&rel, &NoDomains)
            .analyze(&col("b").gt(lit(0)))
            .expect_err("text > integer");
        assert_eq!(err.code(), AlterErrorCode::UndefinedFunction);
        assert_eq!(err.to_string(), "operator does not exist: text > integer");
    }

    #[test]
    fn explicit_casts_survive_deparse() {
        let rel = rel();
        let raw = col("a").cast(TypeName::new(ColumnType::Text)).eq(lit("1"));
        let bound = Analyzer::new(&rel, &NoDomains).analyze(&raw).expect("analyze");
        assert_eq!(bound.deparse(&rel).expect("deparse"), raw);
        assert_eq!(bound.canonical(&rel), "((a)::text = '1')");
    }

    #[test]
    fn attnum_mapping_follows_names() {
        let rel = rel();
        let bound = Analyzer::new(&rel, &NoDomains)
            .analyze(&col("c").gt(lit(1)))
            .expect("analyze");
        let mapped = bound.map_attnums(&|a| Some(a + 1)).expect("map");
        assert_eq!(mapped.attnums().into_iter().collect::<Vec<_>>(), vec![4]);
        assert!(bound.map_attnums(&|_| None).is_err());
    }

    #[test]
    fn volatility_and_row_independence() {
        let rel = rel();
        let analyzer = Analyzer::new(&rel, &NoDomains);
        assert!(analyzer.analyze(&lit(5)).expect("lit").is_row_independent());
        assert!(!analyzer
            .analyze(&RawExpr::Func(Builtin::Random, vec![]))
            .expect("random")
            .is_row_independent());
        assert!(analyzer
            .analyze(&RawExpr::Func(Builtin::Now, vec![]))
            .expect("now")
            .is_row_independent());
    }

    #[test]
    fn check_body_must_be_boolean() {
        let rel = rel();
        let err = Analyzer::new(&rel, &NoDomains)
            .analyze_predicate(&col("a"), "CHECK")
            .expect_err("integer body");
        assert_eq!(err.code(), AlterErrorCode::DatatypeMismatch);
    }
}
