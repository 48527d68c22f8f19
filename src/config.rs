use crate::error::AlterError;

/// Column count ceiling for a single relation, including dropped columns.
pub const DEFAULT_MAX_COLUMNS: usize = 1600;

/// How strictly two relations must line up before an inheritance or
/// partition edge may be established between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ShapeMatching {
    /// Columns are matched by name only.
    #[default]
    ByName,
    /// Columns must also occupy identical attribute positions.
    Positional,
}

/// Runtime configuration for a schema-mutation engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub shape_matching: ShapeMatching,
    pub distribution_enabled: bool,
    pub fast_default_enabled: bool,
    pub constraint_implication_enabled: bool,
    pub max_columns: usize,
    pub rows_per_block: usize,
    pub allow_system_table_mods: bool,
    /// Row width beyond which a relation with storage needs an out-of-line
    /// value store.
    pub toast_threshold_bytes: usize,
    pub default_tablespace: String,
    pub default_nodes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shape_matching: ShapeMatching::ByName,
            distribution_enabled: false,
            fast_default_enabled: true,
            constraint_implication_enabled: true,
            max_columns: DEFAULT_MAX_COLUMNS,
            rows_per_block: 64,
            allow_system_table_mods: false,
            toast_threshold_bytes: 2032,
            default_tablespace: "pg_default".to_string(),
            default_nodes: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn single_node() -> Self {
        Self::default()
    }

    /// Profile for cluster deployments: positional column matching and
    /// distribution policy checks are enforced.
    pub fn distributed(nodes: &[&str]) -> Self {
        Self {
            shape_matching: ShapeMatching::Positional,
            distribution_enabled: true,
            default_nodes: nodes.iter().map(|n| (*n).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn requires_positional_match(&self) -> bool {
        matches!(self.shape_matching, ShapeMatching::Positional)
    }

    pub fn with_system_table_mods(mut self, allowed: bool) -> Self {
        self.allow_system_table_mods = allowed;
        self
    }

    pub fn with_rows_per_block(mut self, rows: usize) -> Self {
        self.rows_per_block = rows;
        self
    }

    pub fn validate(&self) -> Result<(), AlterError> {
        if self.rows_per_block == 0 {
            return Err(AlterError::InvalidConfig {
                message: "rows_per_block must be positive".into(),
            });
        }
        if self.max_columns == 0 || self.max_columns > i16::MAX as usize {
            return Err(AlterError::InvalidConfig {
                message: format!("max_columns must be within 1..={}", i16::MAX),
            });
        }
        if self.default_tablespace.is_empty() {
            return Err(AlterError::InvalidConfig {
                message: "default_tablespace must not be empty".into(),
            });
        }
        if self.distribution_enabled && self.default_nodes.is_empty() {
            return Err(AlterError::InvalidConfig {
                message: "distribution requires at least one node".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_validate() {
        EngineConfig::single_node().validate().expect("single node");
        let cfg = EngineConfig::distributed(&["n1", "n2"]);
        cfg.validate().expect("distributed");
        assert!(cfg.requires_positional_match());
        assert!(!EngineConfig::default().requires_positional_match());
    }

    #[test]
    fn rejects_distribution_without_nodes() {
        let cfg = EngineConfig {
            distribution_enabled: true,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(EngineConfig::default().with_rows_per_block(0).validate().is_err());
    }
}
