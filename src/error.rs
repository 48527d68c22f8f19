use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKindName {
    Table,
    Index,
    View,
    Constraint,
    Trigger,
    Rule,
    Tablespace,
    Role,
    Type,
    Option,
}

impl std::fmt::Display for ObjectKindName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKindName::Table => write!(f, "relation"),
            ObjectKindName::Index => write!(f, "index"),
            ObjectKindName::View => write!(f, "view"),
            ObjectKindName::Constraint => write!(f, "constraint"),
            ObjectKindName::Trigger => write!(f, "trigger"),
            ObjectKindName::Rule => write!(f, "rule"),
            ObjectKindName::Tablespace => write!(f, "tablespace"),
            ObjectKindName::Role => write!(f, "role"),
            ObjectKindName::Type => write!(f, "type"),
            ObjectKindName::Option => write!(f, "option"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterErrorCode {
    InvalidConfig,
    InvalidTransactionState,
    WrongObjectType,
    InsufficientPrivilege,
    SystemObjectProtected,
    DuplicateColumn,
    DuplicateObject,
    UndefinedColumn,
    UndefinedObject,
    UndefinedTable,
    DatatypeMismatch,
    CollationMismatch,
    InvalidTableDefinition,
    InvalidObjectDefinition,
    InvalidParameterValue,
    TooManyColumns,
    CircularInheritance,
    CannotCoerce,
    UndefinedFunction,
    DependentObjectsStillExist,
    NotNullViolation,
    CheckViolation,
    ForeignKeyViolation,
    UniqueViolation,
    InvalidForeignKey,
    DataException,
    ObjectInUse,
    FeatureNotSupported,
    QueryCanceled,
    Internal,
}

impl AlterErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AlterErrorCode::InvalidConfig => "invalid_config",
            AlterErrorCode::InvalidTransactionState => "invalid_transaction_state",
            AlterErrorCode::WrongObjectType => "wrong_object_type",
            AlterErrorCode::InsufficientPrivilege => "insufficient_privilege",
            AlterErrorCode::SystemObjectProtected => "system_object_protected",
            AlterErrorCode::DuplicateColumn => "duplicate_column",
            AlterErrorCode::DuplicateObject => "duplicate_object",
            AlterErrorCode::UndefinedColumn => "undefined_column",
            AlterErrorCode::UndefinedObject => "undefined_object",
            AlterErrorCode::UndefinedTable => "undefined_table",
            AlterErrorCode::DatatypeMismatch => "datatype_mismatch",
            AlterErrorCode::CollationMismatch => "collation_mismatch",
            AlterErrorCode::InvalidTableDefinition => "invalid_table_definition",
            AlterErrorCode::InvalidObjectDefinition => "invalid_object_definition",
            AlterErrorCode::InvalidParameterValue => "invalid_parameter_value",
            AlterErrorCode::TooManyColumns => "too_many_columns",
            AlterErrorCode::CircularInheritance => "circular_inheritance",
            AlterErrorCode::CannotCoerce => "cannot_coerce",
            AlterErrorCode::UndefinedFunction => "undefined_function",
            AlterErrorCode::DependentObjectsStillExist => "dependent_objects_still_exist",
            AlterErrorCode::NotNullViolation => "not_null_violation",
            AlterErrorCode::CheckViolation => "check_violation",
            AlterErrorCode::ForeignKeyViolation => "foreign_key_violation",
            AlterErrorCode::UniqueViolation => "unique_violation",
            AlterErrorCode::InvalidForeignKey => "invalid_foreign_key",
            AlterErrorCode::DataException => "data_exception",
            AlterErrorCode::ObjectInUse => "object_in_use",
            AlterErrorCode::FeatureNotSupported => "feature_not_supported",
            AlterErrorCode::QueryCanceled => "query_canceled",
            AlterErrorCode::Internal => "internal_error",
        }
    }

    /// Whether the code reports a row of existing data failing a new rule.
    pub fn is_data_violation(self) -> bool {
        matches!(
            self,
            AlterErrorCode::NotNullViolation
                | AlterErrorCode::CheckViolation
                | AlterErrorCode::ForeignKeyViolation
                | AlterErrorCode::UniqueViolation
        )
    }
}

#[derive(Debug, Error)]
pub enum AlterError {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("{message}")]
    InvalidTransactionState { message: String },
    #[error("\"{relation}\" is not {allowed}")]
    WrongObjectType {
        relation: String,
        allowed: String,
        hint: Option<String>,
    },
    #[error("{message}")]
    WrongObjectKind { message: String },
    #[error("{message}")]
    InsufficientPrivilege { message: String },
    #[error("permission denied: \"{relation}\" is a system catalog")]
    SystemObjectProtected { relation: String },
    #[error("column \"{column}\" of relation \"{relation}\" already exists")]
    DuplicateColumn { relation: String, column: String },
    #[error("{message}")]
    DuplicateObject { message: String },
    #[error("column \"{column}\" of relation \"{relation}\" does not exist")]
    UndefinedColumn { relation: String, column: String },
    #[error("{kind} \"{name}\" does not exist")]
    UndefinedObject { kind: ObjectKindName, name: String },
    #[error("constraint \"{constraint}\" of relation \"{relation}\" does not exist")]
    UndefinedConstraint { relation: String, constraint: String },
    #[error("relation \"{relation}\" does not exist")]
    UndefinedTable { relation: String },
    #[error("{message}")]
    RelationNotRelated { message: String },
    #[error("{message}")]
    DatatypeMismatch { message: String },
    #[error("{message}")]
    CollationMismatch { message: String },
    #[error("{message}")]
    InvalidTableDefinition { message: String },
    #[error("{message}")]
    InvalidObjectDefinition { message: String },
    #[error("{message}")]
    InvalidParameterValue { message: String },
    #[error("{message}")]
    OnlyNotAllowed { message: String },
    #[error("column \"{column}\" inherits conflicting default values")]
    ConflictingDefaults { column: String },
    #[error("{message}")]
    InvalidForeignKey { message: String },
    #[error("tables can have at most {max} columns")]
    TooManyColumns { max: usize },
    #[error("circular inheritance not allowed: \"{parent}\" is already a child of \"{relation}\"")]
    CircularInheritance { relation: String, parent: String },
    #[error("column \"{column}\" cannot be cast automatically to type {to}")]
    CannotCoerce {
        column: String,
        from: String,
        to: String,
        hint: Option<String>,
    },
    #[error("{message}")]
    UndefinedFunction { message: String },
    #[error("{message}")]
    DependentObjectsStillExist { message: String, detail: String },
    #[error("column \"{column}\" of relation \"{relation}\" contains null values")]
    NotNullViolation { relation: String, column: String },
    #[error("check constraint \"{constraint}\" of relation \"{relation}\" is violated by some row")]
    CheckViolation { relation: String, constraint: String },
    #[error("partition constraint of relation \"{relation}\" is violated by some row")]
    PartitionConstraintViolation { relation: String },
    #[error(
        "updated partition constraint for default partition \"{relation}\" would be violated by some row"
    )]
    DefaultPartitionViolation { relation: String },
    #[error("no partition of relation \"{relation}\" found for row")]
    NoPartitionForRow { relation: String },
    #[error("value for domain {domain} violates check constraint")]
    DomainViolation { domain: String },
    #[error("domain {domain} does not allow null values")]
    DomainNotNull { domain: String },
    #[error("could not create unique index \"{index}\"")]
    UniqueViolation { index: String },
    #[error("duplicate key value violates unique constraint \"{index}\"")]
    DuplicateKey { index: String },
    #[error(
        "insert or update on table \"{relation}\" violates foreign key constraint \"{constraint}\""
    )]
    ForeignKeyViolation { relation: String, constraint: String },
    #[error("{message}")]
    DataException { message: String },
    #[error("{message}")]
    ObjectInUse { message: String },
    #[error("{message}")]
    FeatureNotSupported { message: String },
    #[error("canceling statement due to user request")]
    QueryCanceled,
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AlterError {
    pub fn code(&self) -> AlterErrorCode {
        match self {
            AlterError::InvalidConfig { .. } => AlterErrorCode::InvalidConfig,
            AlterError::InvalidTransactionState { .. } => AlterErrorCode::InvalidTransactionState,
            AlterError::WrongObjectType { .. } | AlterError::WrongObjectKind { .. } => {
                AlterErrorCode::WrongObjectType
            }
            AlterError::InsufficientPrivilege { .. } => AlterErrorCode::InsufficientPrivilege,
            AlterError::SystemObjectProtected { .. } => AlterErrorCode::SystemObjectProtected,
            AlterError::DuplicateColumn { .. } => AlterErrorCode::DuplicateColumn,
            AlterError::DuplicateObject { .. } => AlterErrorCode::DuplicateObject,
            AlterError::UndefinedColumn { .. } => AlterErrorCode::UndefinedColumn,
            AlterError::UndefinedObject { .. } | AlterError::UndefinedConstraint { .. } => {
                AlterErrorCode::UndefinedObject
            }
            AlterError::UndefinedTable { .. } | AlterError::RelationNotRelated { .. } => {
                AlterErrorCode::UndefinedTable
            }
            AlterError::DatatypeMismatch { .. } => AlterErrorCode::DatatypeMismatch,
            AlterError::CollationMismatch { .. } => AlterErrorCode::CollationMismatch,
            AlterError::InvalidTableDefinition { .. }
            | AlterError::OnlyNotAllowed { .. }
            | AlterError::ConflictingDefaults { .. } => AlterErrorCode::InvalidTableDefinition,
            AlterError::InvalidForeignKey { .. } => AlterErrorCode::InvalidForeignKey,
            AlterError::InvalidObjectDefinition { .. } => AlterErrorCode::InvalidObjectDefinition,
            AlterError::InvalidParameterValue { .. } => AlterErrorCode::InvalidParameterValue,
            AlterError::TooManyColumns { .. } => AlterErrorCode::TooManyColumns,
            AlterError::CircularInheritance { .. } => AlterErrorCode::CircularInheritance,
            AlterError::CannotCoerce { .. } => AlterErrorCode::CannotCoerce,
            AlterError::UndefinedFunction { .. } => AlterErrorCode::UndefinedFunction,
            AlterError::DependentObjectsStillExist { .. } => {
                AlterErrorCode::DependentObjectsStillExist
            }
            AlterError::NotNullViolation { .. } | AlterError::DomainNotNull { .. } => {
                AlterErrorCode::NotNullViolation
            }
            AlterError::UniqueViolation { .. } | AlterError::DuplicateKey { .. } => {
                AlterErrorCode::UniqueViolation
            }
            AlterError::CheckViolation { .. }
            | AlterError::PartitionConstraintViolation { .. }
            | AlterError::DefaultPartitionViolation { .. }
            | AlterError::NoPartitionForRow { .. }
            | AlterError::DomainViolation { .. } => AlterErrorCode::CheckViolation,
            AlterError::ForeignKeyViolation { .. } => AlterErrorCode::ForeignKeyViolation,
            AlterError::DataException { .. } => AlterErrorCode::DataException,
            AlterError::ObjectInUse { .. } => AlterErrorCode::ObjectInUse,
            AlterError::FeatureNotSupported { .. } => AlterErrorCode::FeatureNotSupported,
            AlterError::QueryCanceled => AlterErrorCode::QueryCanceled,
            AlterError::Internal { .. } => AlterErrorCode::Internal,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            AlterError::WrongObjectType { hint, .. } | AlterError::CannotCoerce { hint, .. } => {
                hint.as_deref()
            }
            AlterError::DependentObjectsStillExist { .. } => {
                Some("Use CASCADE to drop the dependent objects too.")
            }
            AlterError::OnlyNotAllowed { .. } => Some("Do not specify the ONLY keyword."),
            AlterError::ConflictingDefaults { .. } => {
                Some("To resolve the conflict, specify a default explicitly.")
            }
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            AlterError::DependentObjectsStillExist { detail, .. } => Some(detail.as_str()),
            _ => None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        AlterError::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn table_def(message: impl Into<String>) -> Self {
        AlterError::InvalidTableDefinition {
            message: message.into(),
        }
    }

    pub(crate) fn object_def(message: impl Into<String>) -> Self {
        AlterError::InvalidObjectDefinition {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        AlterError::FeatureNotSupported {
            message: message.into(),
        }
    }

    pub(crate) fn wrong_kind(message: impl Into<String>) -> Self {
        AlterError::WrongObjectKind {
            message: message.into(),
        }
    }

    pub(crate) fn in_use(message: impl Into<String>) -> Self {
        AlterError::ObjectInUse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AlterError, AlterErrorCode, ObjectKindName};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(AlterErrorCode::WrongObjectType.as_str(), "wrong_object_type");
        assert_eq!(
            AlterErrorCode::DependentObjectsStillExist.as_str(),
            "dependent_objects_still_exist"
        );
        assert_eq!(AlterErrorCode::Internal.as_str(), "internal_error");
    }

    #[test]
    fn partition_violations_share_check_code_but_differ_in_message() {
        let direct = AlterError::PartitionConstraintViolation {
            relation: "p1".into(),
        };
        let chained = AlterError::DefaultPartitionViolation {
            relation: "pdef".into(),
        };
        assert_eq!(direct.code(), AlterErrorCode::CheckViolation);
        assert_eq!(chained.code(), AlterErrorCode::CheckViolation);
        assert!(chained.to_string().contains("updated partition constraint"));
        assert!(!direct.to_string().contains("updated"));
    }

    #[test]
    fn wrong_object_type_carries_hint() {
        let err = AlterError::WrongObjectType {
            relation: "idx".into(),
            allowed: "a table".into(),
            hint: Some("Use ALTER INDEX instead.".into()),
        };
        assert_eq!(err.hint(), Some("Use ALTER INDEX instead."));
        assert_eq!(err.to_string(), "\"idx\" is not a table");
        let missing = AlterError::UndefinedObject {
            kind: ObjectKindName::Constraint,
            name: "c1".into(),
        };
        assert_eq!(missing.to_string(), "constraint \"c1\" does not exist");
        assert!(!missing.code().is_data_violation());
    }
}
